// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `stream` module provides the block-at-a-time precompressor/recompressor interface used
//! by formats that must handle arbitrarily long streams in bounded memory (bzip2, raw deflate).
//!
//! A streaming handler's payload is a sequence of framed blocks, each a one-byte last-block
//! marker followed by a vlint length and the block bytes. The forward driver feeds the source to
//! a [`StreamPrecompressor`] in [`CHUNK`]-sized pieces and frames whatever comes out; the
//! reverse driver unframes the payload and feeds it to a [`StreamRecompressor`].

use std::io;

use crate::errors::{decode_error, Result};
use crate::io::{ReadBytes, SourceStream, WriteBytes};

/// The default I/O block size used by streaming handlers.
pub const CHUNK: usize = 256 * 1024;

/// A block-at-a-time decompressor with an interface in the style of zlib's: the caller owns the
/// buffers, the implementation owns the codec state.
pub trait StreamPrecompressor {
    /// Consumes bytes from `input` and appends decompressed bytes to `out`. `eof` indicates
    /// that `input` is the final piece of the source. Returns the number of input bytes
    /// consumed and whether the compressed stream is complete.
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)>;
}

/// The reverse of [`StreamPrecompressor`]: consumes decompressed bytes, produces the
/// recompressed stream.
pub trait StreamRecompressor {
    /// Consumes bytes from `input` and appends recompressed bytes to `out`. `eof` indicates
    /// that `input` is the final piece of the payload. Returns the number of input bytes
    /// consumed and whether the recompressed stream is complete.
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)>;
}

/// The result of driving a [`StreamPrecompressor`] over a source span.
pub struct StreamOutcome {
    /// Compressed bytes consumed from the source.
    pub consumed: u64,
    /// Decompressed bytes produced into the payload blocks.
    pub produced: u64,
}

/// Appends one framed block to the payload.
pub fn write_framed_block<W: WriteBytes + ?Sized>(out: &mut W, data: &[u8], last: bool) -> Result<()> {
    out.write_byte(u8::from(last))?;
    out.write_vlint(data.len() as u64)?;
    out.write_buf(data)
}

/// Reads framed blocks until the last-block marker, passing each to `visit` along with the
/// marker.
pub fn read_framed_blocks(
    input: &mut dyn io::Read,
    mut visit: impl FnMut(&[u8], bool) -> Result<()>,
) -> Result<()> {
    loop {
        let last = match input.read_byte()? {
            0 => false,
            1 => true,
            _ => return decode_error("invalid block marker in streamed payload"),
        };

        let len = input.read_vlint()? as usize;
        let data = input.read_vec_exact(len)?;

        visit(&data, last)?;

        if last {
            return Ok(());
        }
    }
}

/// Drives a [`StreamPrecompressor`] over the source starting at `pos`, writing framed blocks
/// into `payload`.
pub fn drive_precompressor(
    src: &mut SourceStream,
    pos: u64,
    pc: &mut dyn StreamPrecompressor,
    payload: &mut Vec<u8>,
) -> Result<StreamOutcome> {
    let mut input = vec![0u8; CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    let mut consumed = 0u64;
    let mut produced = 0u64;

    loop {
        let avail = src.reread_from(pos + consumed, &mut input)?;
        let eof = avail < input.len();

        let mut off = 0;
        loop {
            let pending_before = pending.len();

            let (used, finished) = pc.process(&input[off..avail], eof && off == avail, &mut pending)?;
            off += used;
            consumed += used as u64;

            if finished {
                produced += pending.len() as u64;
                write_framed_block(payload, &pending, true)?;
                return Ok(StreamOutcome { consumed, produced });
            }

            if pending.len() >= CHUNK {
                produced += pending.len() as u64;
                write_framed_block(payload, &pending, false)?;
                pending.clear();
            }

            if off == avail {
                break;
            }

            // A codec making no progress while refusing to finish would spin forever.
            if used == 0 && pending.len() == pending_before {
                return decode_error("stream codec stalled");
            }
        }

        if eof {
            return decode_error("stream ended before codec completion");
        }
    }
}

/// Drives a [`StreamRecompressor`] over a block-framed payload, writing the recompressed stream
/// to `out`.
pub fn drive_recompressor(
    payload: &mut dyn io::Read,
    rc: &mut dyn StreamRecompressor,
    out: &mut dyn io::Write,
) -> Result<()> {
    let mut pending = Vec::new();

    read_framed_blocks(payload, |data, last| {
        let mut off = 0;
        loop {
            let eof = last && off == data.len();

            let (used, finished) = rc.process(&data[off..], eof, &mut pending)?;
            off += used;

            let produced = !pending.is_empty();
            if produced {
                out.write_all(&pending).map_err(crate::errors::Error::from)?;
                pending.clear();
            }

            if finished {
                return Ok(());
            }
            if off == data.len() && !eof {
                return Ok(());
            }
            if eof && used == 0 && !produced {
                return decode_error("stream codec stalled during recompression");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{read_framed_blocks, write_framed_block};

    #[test]
    fn verify_block_framing_round_trip() {
        let mut payload = Vec::new();
        write_framed_block(&mut payload, &[1, 2, 3], false).unwrap();
        write_framed_block(&mut payload, &[], false).unwrap();
        write_framed_block(&mut payload, &[4, 5], true).unwrap();

        let mut blocks = Vec::new();
        read_framed_blocks(&mut Cursor::new(&payload), |data, last| {
            blocks.push((data.to_vec(), last));
            Ok(())
        })
        .unwrap();

        assert_eq!(
            blocks,
            vec![(vec![1, 2, 3], false), (vec![], false), (vec![4, 5], true)]
        );
    }

    #[test]
    fn verify_bad_block_marker_rejected() {
        let payload = [7u8, 0];
        let result = read_framed_blocks(&mut Cursor::new(&payload), |_, _| Ok(()));
        assert!(result.is_err());
    }
}
