// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::io::Cursor;

use flate2::{Decompress, FlushDecompress, Status};

use prepack_core::container::tags;
use prepack_core::errors::{decode_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream};
use prepack_core::stream::{
    drive_precompressor, drive_recompressor, read_framed_blocks, StreamPrecompressor,
    StreamRecompressor, CHUNK,
};

use crate::engine;

/// Minimum decompressed output before a headerless stream is believed to be deflate.
const MIN_DECOMPRESSED: u64 = 1024;

/// Headerless deflate streams, tried at every position ("brute mode").
///
/// There is no magic to look for, so the quick check is a peakiness screen over the first four
/// 64-byte windows followed by a bounded trial inflation. The payload is written as framed
/// blocks through the streaming interface so arbitrarily long streams decompress in bounded
/// memory. Never recursed into: the handler would detect deflate inside its own output.
pub struct BruteDeflateHandler {
    depth_limit: Option<u32>,
}

impl BruteDeflateHandler {
    pub fn new(depth_limit: Option<u32>) -> BruteDeflateHandler {
        BruteDeflateHandler { depth_limit }
    }
}

/// Rejects windows dominated by a single byte value, which inflate happily but are virtually
/// never real deflate streams.
fn too_peaky(window: &[u8]) -> bool {
    for chunk in window.chunks(64).take(4) {
        if chunk.len() < 64 {
            break;
        }

        let mut counts = [0u8; 256];
        let mut max = 0;
        for &byte in chunk {
            counts[usize::from(byte)] += 1;
            max = max.max(counts[usize::from(byte)]);
        }

        // One value filling 90% of a window fails it.
        if max >= 58 {
            return true;
        }
    }

    false
}

/// Trial-inflates the look-ahead window. True when at least [`MIN_DECOMPRESSED`] bytes come
/// out.
fn window_inflates(window: &[u8]) -> bool {
    let mut decompress = Decompress::new(false);
    let mut output = vec![0u8; CHUNK];
    let mut produced = 0u64;

    loop {
        let consumed = decompress.total_in() as usize;
        let out_before = decompress.total_out();

        let status = match decompress.decompress(
            &window[consumed..],
            &mut output,
            FlushDecompress::None,
        ) {
            Ok(status) => status,
            Err(_) => return produced >= MIN_DECOMPRESSED,
        };

        produced = decompress.total_out();

        if produced >= MIN_DECOMPRESSED {
            return true;
        }

        match status {
            Status::StreamEnd => return false,
            _ => {
                let stalled = decompress.total_in() as usize == consumed
                    && decompress.total_out() == out_before;
                if stalled || decompress.total_in() as usize == window.len() {
                    return false;
                }
            }
        }
    }
}

/// Streaming raw inflation through the block-at-a-time interface.
struct InflatePrecompressor {
    decompress: Decompress,
    buf: Vec<u8>,
}

impl InflatePrecompressor {
    fn new() -> InflatePrecompressor {
        InflatePrecompressor { decompress: Decompress::new(false), buf: vec![0u8; CHUNK] }
    }
}

impl StreamPrecompressor for InflatePrecompressor {
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)> {
        let in_before = self.decompress.total_in();
        let out_before = self.decompress.total_out();

        let status = self
            .decompress
            .decompress(input, &mut self.buf, FlushDecompress::None)
            .map_err(|_| prepack_core::errors::Error::DecodeError("invalid deflate stream"))?;

        let used = (self.decompress.total_in() - in_before) as usize;
        let got = (self.decompress.total_out() - out_before) as usize;
        out.extend_from_slice(&self.buf[..got]);

        match status {
            Status::StreamEnd => Ok((used, true)),
            _ => {
                if eof && used == 0 && got == 0 {
                    return decode_error("deflate stream ended prematurely");
                }
                Ok((used, false))
            }
        }
    }
}

/// The reverse: collects the whole decompressed stream, then deflates it at the recorded level
/// once the last block arrives.
struct DeflateRecompressor {
    level: u8,
    data: Vec<u8>,
}

impl StreamRecompressor for DeflateRecompressor {
    fn process(&mut self, input: &[u8], eof: bool, out: &mut Vec<u8>) -> Result<(usize, bool)> {
        self.data.extend_from_slice(input);

        if !eof {
            return Ok((input.len(), false));
        }

        engine::deflate_chunks(&self.data, self.level, |chunk| {
            out.extend_from_slice(chunk);
            Ok(true)
        })?;

        Ok((input.len(), true))
    }
}

impl FormatHandler for BruteDeflateHandler {
    fn name(&self) -> &'static str {
        "deflate-brute"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::BRUTE]
    }

    fn recursion_allowed(&self) -> bool {
        false
    }

    fn depth_limit(&self) -> Option<u32> {
        self.depth_limit
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 256 && !too_peaky(window) && window_inflates(window)
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let mut payload = Vec::new();
        let mut pc = InflatePrecompressor::new();

        let outcome = match drive_precompressor(src, pos, &mut pc, &mut payload) {
            Ok(outcome) => outcome,
            Err(_) => return Ok(None),
        };

        if outcome.produced < MIN_DECOMPRESSED {
            return Ok(None);
        }

        let mut data = Vec::with_capacity(outcome.produced as usize);
        read_framed_blocks(&mut Cursor::new(&payload), |block, _| {
            data.extend_from_slice(block);
            Ok(())
        })?;

        let found = match engine::find_recompression_level(
            src,
            pos,
            &[],
            &data,
            &[],
            outcome.consumed,
        )? {
            Some(found) => found,
            None => return Ok(None),
        };

        if found.matched.matched_len < MIN_DECOMPRESSED.min(outcome.consumed) {
            return Ok(None);
        }

        let exact = found.matched.is_exact(outcome.consumed);

        let payload = Payload::new_spilling(
            payload,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "brute",
        )?;

        let mut segment = Precompressed::new(tags::BRUTE, found.matched.matched_len, payload);
        segment.header_data = vec![found.level];
        segment.penalty_bytes = found.matched.penalty_bytes;
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
            _ => return prepack_core::errors::container_error("invalid brute deflate header"),
        };

        let mut rc = DeflateRecompressor { level, data: Vec::new() };
        drive_recompressor(payload, &mut rc, out)
    }
}

#[cfg(test)]
mod tests {
    use super::too_peaky;

    #[test]
    fn verify_peaky_window_rejected() {
        assert!(too_peaky(&[0u8; 256]));

        let mixed: Vec<u8> = (0..256u32).map(|i| (i % 256) as u8).collect();
        assert!(!too_peaky(&mixed));
    }

    #[test]
    fn verify_one_bad_window_is_enough() {
        let mut data: Vec<u8> = (0..256u32).map(|i| (i % 251) as u8).collect();
        for byte in data[64..128].iter_mut() {
            *byte = 0xaa;
        }
        assert!(too_peaky(&data));
    }
}
