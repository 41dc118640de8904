// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handler for bzip2 streams (tag 9).
//!
//! Bzip2 is the reason the streaming handler interface exists: real-world bzip2 streams can be
//! arbitrarily long, so both directions run block-at-a-time through the bzip2 crate's raw
//! `Compress`/`Decompress` state machines. The compression level is taken from the `BZh<n>`
//! header digit and a penalty-byte comparison absorbs small divergences between the original
//! stream and its regeneration.

use std::io;
use std::io::Cursor;

use bzip2::{Action, Compress, Compression, Decompress, Status};

use prepack_core::container::tags;
use prepack_core::errors::{container_error, decode_error, Error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream};
use prepack_core::penalty::OriginalComparator;
use prepack_core::stream::{
    drive_precompressor, drive_recompressor, read_framed_blocks, StreamPrecompressor,
    StreamRecompressor, CHUNK,
};

/// The six magic bytes opening the first block of every bzip2 stream.
const BLOCK_MAGIC: [u8; 6] = [0x31, 0x41, 0x59, 0x26, 0x53, 0x59];

/// The libbz2 default work factor.
const WORK_FACTOR: u32 = 30;

/// Bzip2 streams.
#[derive(Default)]
pub struct Bzip2Handler;

impl Bzip2Handler {
    pub fn new() -> Bzip2Handler {
        Bzip2Handler
    }
}

/// Streaming decompression through the block-at-a-time interface.
struct Bzip2Precompressor {
    decompress: Decompress,
    buf: Vec<u8>,
}

impl Bzip2Precompressor {
    fn new() -> Bzip2Precompressor {
        Bzip2Precompressor { decompress: Decompress::new(false), buf: vec![0u8; CHUNK] }
    }
}

impl StreamPrecompressor for Bzip2Precompressor {
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let in_before = self.decompress.total_in();
        let out_before = self.decompress.total_out();

        let status = self
            .decompress
            .decompress(input, &mut self.buf)
            .map_err(|_| Error::DecodeError("invalid bzip2 stream"))?;

        let used = (self.decompress.total_in() - in_before) as usize;
        let got = (self.decompress.total_out() - out_before) as usize;
        out.extend_from_slice(&self.buf[..got]);

        match status {
            Status::StreamEnd => Ok((used, true)),
            _ => {
                if eof && used == 0 && got == 0 {
                    return decode_error("bzip2 stream ended prematurely");
                }
                Ok((used, false))
            }
        }
    }
}

/// Streaming recompression at the recorded level.
struct Bzip2Recompressor {
    compress: Compress,
    buf: Vec<u8>,
}

impl Bzip2Recompressor {
    fn new(level: u8) -> Bzip2Recompressor {
        Bzip2Recompressor {
            compress: Compress::new(Compression::new(u32::from(level)), WORK_FACTOR),
            buf: vec![0u8; CHUNK],
        }
    }
}

impl StreamRecompressor for Bzip2Recompressor {
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let action = if eof { Action::Finish } else { Action::Run };

        let in_before = self.compress.total_in();
        let out_before = self.compress.total_out();

        let status = self
            .compress
            .compress(input, &mut self.buf, action)
            .map_err(|_| Error::RecompressionError("bzip2 compression failed"))?;

        let used = (self.compress.total_in() - in_before) as usize;
        let got = (self.compress.total_out() - out_before) as usize;
        out.extend_from_slice(&self.buf[..got]);

        Ok((used, matches!(status, Status::StreamEnd)))
    }
}

/// Compresses `data` at the given level, passing the stream to `sink` chunk by chunk. The sink
/// returns `false` to abort early.
fn bzip2_chunks(
    data: &[u8],
    level: u8,
    mut sink: impl FnMut(&[u8]) -> Result<bool>,
) -> Result<()> {
    let mut compress = Compress::new(Compression::new(u32::from(level)), WORK_FACTOR);
    let mut output = vec![0u8; CHUNK];
    let mut off = 0;

    loop {
        let action = if off == data.len() { Action::Finish } else { Action::Run };

        let in_before = compress.total_in();
        let out_before = compress.total_out();

        let status = compress
            .compress(&data[off..], &mut output, action)
            .map_err(|_| Error::RecompressionError("bzip2 compression failed"))?;

        off += (compress.total_in() - in_before) as usize;
        let got = (compress.total_out() - out_before) as usize;

        if got > 0 && !sink(&output[..got])? {
            return Ok(());
        }

        if let Status::StreamEnd = status {
            return Ok(());
        }
    }
}

impl FormatHandler for Bzip2Handler {
    fn name(&self) -> &'static str {
        "bzip2"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::BZIP2]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 10
            && window[0] == b'B'
            && window[1] == b'Z'
            && window[2] == b'h'
            && (b'1'..=b'9').contains(&window[3])
            && window[4..10] == BLOCK_MAGIC
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let level = {
            let window = src.peek(4)?;
            window[3] - b'0'
        };

        let mut payload = Vec::new();
        let mut pc = Bzip2Precompressor::new();

        let outcome = match drive_precompressor(src, pos, &mut pc, &mut payload) {
            Ok(outcome) => outcome,
            Err(_) => return Ok(None),
        };

        if outcome.produced == 0 {
            return Ok(None);
        }

        let mut data = Vec::with_capacity(outcome.produced as usize);
        read_framed_blocks(&mut Cursor::new(&payload), |block, _| {
            data.extend_from_slice(block);
            Ok(())
        })?;

        let mut comparator = OriginalComparator::new(src, pos);
        bzip2_chunks(&data, level, |chunk| comparator.feed(chunk))?;

        let matched = match comparator.finish() {
            Some(matched) => matched,
            None => return Ok(None),
        };

        if matched.matched_len < ctx.options.min_ident_size {
            return Ok(None);
        }

        let exact = matched.is_exact(outcome.consumed);

        let payload = Payload::new_spilling(
            payload,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "bzip2",
        )?;

        let mut segment = Precompressed::new(tags::BZIP2, matched.matched_len, payload);
        segment.header_data = vec![level];
        segment.penalty_bytes = matched.penalty_bytes;
        if exact {
            segment.format_flags |= SegmentFlags::FORMAT_0;
        }

        Ok(Some(segment))
    }

    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        Ok(vec![input.read_byte()?])
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        header_data: &[u8],
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        let level = match header_data {
            &[level] if level >= 1 && level <= 9 => level,
            _ => return container_error("invalid bzip2 header"),
        };

        let mut rc = Bzip2Recompressor::new(level);
        drive_recompressor(payload, &mut rc, out)
    }
}

#[cfg(test)]
mod tests {
    use super::{bzip2_chunks, Bzip2Handler};
    use prepack_core::handler::FormatHandler;

    fn compress(data: &[u8], level: u8) -> Vec<u8> {
        let mut out = Vec::new();
        bzip2_chunks(data, level, |chunk| {
            out.extend_from_slice(chunk);
            Ok(true)
        })
        .unwrap();
        out
    }

    #[test]
    fn verify_quick_check_magic() {
        let handler = Bzip2Handler::new();

        let stream = compress(b"the quick brown fox jumps over the lazy dog", 6);
        assert!(handler.quick_check(&stream, 0));

        assert!(!handler.quick_check(b"BZh0\x31\x41\x59\x26\x53\x59", 0));
        assert!(!handler.quick_check(b"BZx6\x31\x41\x59\x26\x53\x59", 0));
        assert!(!handler.quick_check(b"BZh6 not the block magic", 0));
    }

    #[test]
    fn verify_level_digit_matches_header() {
        for level in [1u8, 5, 9] {
            let stream = compress(&vec![7u8; 10_000], level);
            assert_eq!(stream[3], b'0' + level);
        }
    }
}
