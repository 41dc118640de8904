// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shared precompress/recompress engine behind every deflate-family container.
//!
//! The forward path inflates the raw deflate stream found in the input, then searches for a
//! compression level whose deterministic re-deflation reproduces the original bytes — exactly,
//! or near-exactly with penalty bytes covering the divergence. Containers differ only in the
//! prefix bytes before the stream, the trailer derived from the decompressed data, and the way
//! the stream is spliced back into the container; all of that is expressed through the
//! [`OriginalComparator`] fed with candidate bytes in container order.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use prepack_core::errors::{recompression_error, Result};
use prepack_core::io::SourceStream;
use prepack_core::penalty::{match_score, OriginalComparator, PenaltyMatch};
use prepack_core::stream::CHUNK;

/// Decompressed output cap. A deflate bomb inflating past this is left alone.
const MAX_DECOMPRESSED: u64 = 1 << 31;

/// Validates the two-byte zlib stream header: compression method 8, a window size within the
/// spec, the FDICT flag clear, and a valid check value.
pub fn zlib_header_check(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }

    let cmf = buf[0];
    let flg = buf[1];

    (cmf & 0x0f) == 8
        && (cmf >> 4) <= 7
        && (flg & 0x20) == 0
        && (u16::from(cmf) * 256 + u16::from(flg)) % 31 == 0
}

/// A raw deflate stream inflated out of the input.
pub struct InflatedStream {
    /// The decompressed bytes.
    pub data: Vec<u8>,
    /// The length of the compressed stream in the input.
    pub compressed_len: u64,
}

/// Inflates the raw deflate stream starting at absolute position `pos`. Returns `None` when the
/// bytes there are not a complete, well-formed deflate stream.
pub fn inflate_raw_from(src: &mut SourceStream, pos: u64) -> Result<Option<InflatedStream>> {
    let mut decompress = Decompress::new(false);
    let mut input = vec![0u8; CHUNK];
    let mut output = vec![0u8; CHUNK];
    let mut data = Vec::new();
    let mut consumed = 0u64;

    loop {
        let avail = src.reread_from(pos + consumed, &mut input)?;
        if avail == 0 {
            // Ran out of input before the stream ended.
            return Ok(None);
        }

        let consumed_before = consumed;
        let mut off = 0;
        loop {
            let in_before = decompress.total_in();
            let out_before = decompress.total_out();

            let status =
                match decompress.decompress(&input[off..avail], &mut output, FlushDecompress::None)
                {
                    Ok(status) => status,
                    Err(_) => return Ok(None),
                };

            let used = (decompress.total_in() - in_before) as usize;
            let got = (decompress.total_out() - out_before) as usize;

            off += used;
            consumed += used as u64;
            data.extend_from_slice(&output[..got]);

            if data.len() as u64 > MAX_DECOMPRESSED {
                return Ok(None);
            }

            match status {
                Status::StreamEnd => {
                    return Ok(Some(InflatedStream { data, compressed_len: consumed }))
                }
                _ => {
                    if used == 0 && got == 0 {
                        break;
                    }
                }
            }
        }

        // The source is exhausted, or the decoder stopped making progress.
        if (avail < input.len() && off == avail) || consumed == consumed_before {
            return Ok(None);
        }
    }
}

/// Inflates a raw deflate stream held in memory. Returns the decompressed bytes and the number
/// of compressed bytes consumed, or `None` when `input` does not begin with a complete,
/// well-formed deflate stream.
pub fn inflate_raw(input: &[u8]) -> Option<InflatedStream> {
    let mut decompress = Decompress::new(false);
    let mut output = vec![0u8; CHUNK];
    let mut data = Vec::new();

    loop {
        let consumed = decompress.total_in() as usize;
        let out_before = decompress.total_out();

        let status = decompress
            .decompress(&input[consumed..], &mut output, FlushDecompress::None)
            .ok()?;

        let got = (decompress.total_out() - out_before) as usize;
        data.extend_from_slice(&output[..got]);

        if data.len() as u64 > MAX_DECOMPRESSED {
            return None;
        }

        match status {
            Status::StreamEnd => {
                return Some(InflatedStream { data, compressed_len: decompress.total_in() })
            }
            _ => {
                if got == 0 && decompress.total_in() as usize == consumed {
                    return None;
                }
            }
        }
    }
}

/// Deflates `data` at the given level, passing the compressed bytes to `sink` chunk by chunk.
/// The sink returns `false` to abort early.
pub fn deflate_chunks(
    data: &[u8],
    level: u8,
    mut sink: impl FnMut(&[u8]) -> Result<bool>,
) -> Result<()> {
    let mut compress = Compress::new(Compression::new(u32::from(level)), false);
    let mut output = vec![0u8; CHUNK];
    let mut off = 0;

    loop {
        let flush = if off == data.len() { FlushCompress::Finish } else { FlushCompress::None };

        let in_before = compress.total_in();
        let out_before = compress.total_out();

        let status = compress
            .compress(&data[off..], &mut output, flush)
            .map_err(|_| prepack_core::errors::Error::RecompressionError("deflate failed"))?;

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

/// Deflates the whole of `data` at the given level into `out`.
pub fn deflate_to(out: &mut dyn std::io::Write, data: &[u8], level: u8) -> Result<()> {
    deflate_chunks(data, level, |chunk| {
        out.write_all(chunk).map_err(prepack_core::errors::Error::from)?;
        Ok(true)
    })
}

/// The best recompression found by the level search.
pub struct LevelMatch {
    pub level: u8,
    pub matched: PenaltyMatch,
}

/// Searches compression levels 9 down to 1 for the deflation of `data` that best reproduces the
/// original container bytes at `span_start`: `prefix`, then the deflate stream, then `trailer`.
///
/// An exact reproduction of `expected_len` bytes wins immediately; otherwise the best-scoring
/// partial match is returned.
pub fn find_recompression_level(
    src: &mut SourceStream,
    span_start: u64,
    prefix: &[u8],
    data: &[u8],
    trailer: &[u8],
    expected_len: u64,
) -> Result<Option<LevelMatch>> {
    let mut best: Option<LevelMatch> = None;

    for level in (1..=9u8).rev() {
        let mut comparator = OriginalComparator::new(src, span_start);

        if comparator.feed(prefix)? {
            deflate_chunks(data, level, |chunk| comparator.feed(chunk))?;
            comparator.feed(trailer)?;
        }

        let matched = match comparator.finish() {
            Some(matched) => matched,
            None => continue,
        };

        if matched.is_exact(expected_len) {
            return Ok(Some(LevelMatch { level, matched }));
        }

        let better = match &best {
            Some(current) => match_score(&matched) > match_score(&current.matched),
            None => true,
        };
        if better {
            best = Some(LevelMatch { level, matched });
        }
    }

    Ok(best)
}

/// Re-inflates a recompression candidate and compares it against the decompressed payload, as a
/// guard against a non-deterministic codec. Gated by the `verify_deflate` option.
pub fn verify_reinflation(candidate_deflate: &[u8], data: &[u8]) -> Result<()> {
    let mut decompress = Decompress::new(false);
    let mut output = vec![0u8; CHUNK];
    let mut off = 0usize;
    let mut data_off = 0usize;

    loop {
        let in_before = decompress.total_in();
        let out_before = decompress.total_out();

        let status = decompress
            .decompress(&candidate_deflate[off..], &mut output, FlushDecompress::Finish)
            .map_err(|_| {
                prepack_core::errors::Error::RecompressionError("re-inflation failed")
            })?;

        off += (decompress.total_in() - in_before) as usize;
        let got = (decompress.total_out() - out_before) as usize;

        if data_off + got > data.len() || output[..got] != data[data_off..data_off + got] {
            return recompression_error("re-inflation diverged from payload");
        }
        data_off += got;

        match status {
            Status::StreamEnd => break,
            _ => {
                if got == 0 && off == candidate_deflate.len() {
                    return recompression_error("re-inflation stalled");
                }
            }
        }
    }

    if data_off != data.len() {
        return recompression_error("re-inflation is shorter than the payload");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use prepack_core::io::SourceStream;

    use super::{
        deflate_chunks, find_recompression_level, inflate_raw_from, zlib_header_check,
    };

    fn sample_data() -> Vec<u8> {
        // Compressible but not trivial.
        (0..20_000u32).flat_map(|i| [(i % 251) as u8, (i % 7) as u8]).collect()
    }

    fn deflate_all(data: &[u8], level: u8) -> Vec<u8> {
        let mut out = Vec::new();
        deflate_chunks(data, level, |chunk| {
            out.extend_from_slice(chunk);
            Ok(true)
        })
        .unwrap();
        out
    }

    #[test]
    fn verify_zlib_header_check() {
        assert!(zlib_header_check(&[0x78, 0x9c]));
        assert!(zlib_header_check(&[0x78, 0x01]));
        assert!(zlib_header_check(&[0x78, 0xda]));
        // FDICT set.
        assert!(!zlib_header_check(&[0x78, 0xbc]));
        // Not deflate.
        assert!(!zlib_header_check(&[0x79, 0x9c]));
        // Bad check value.
        assert!(!zlib_header_check(&[0x78, 0x9d]));
    }

    #[test]
    fn verify_inflate_round_trip() {
        let data = sample_data();
        let compressed = deflate_all(&data, 6);

        let mut padded = compressed.clone();
        padded.extend_from_slice(b"trailing garbage");

        let mut src = SourceStream::new(Box::new(Cursor::new(padded)), Default::default());
        let inflated = inflate_raw_from(&mut src, 0).unwrap().unwrap();

        assert_eq!(inflated.data, data);
        assert_eq!(inflated.compressed_len, compressed.len() as u64);
    }

    #[test]
    fn verify_inflate_rejects_garbage() {
        let garbage = vec![0xffu8; 4096];
        let mut src = SourceStream::new(Box::new(Cursor::new(garbage)), Default::default());
        assert!(inflate_raw_from(&mut src, 0).unwrap().is_none());
    }

    #[test]
    fn verify_level_search_finds_exact_level() {
        let data = sample_data();

        for made_with in [1u8, 6, 9] {
            let compressed = deflate_all(&data, made_with);
            let expected_len = compressed.len() as u64;

            let mut src =
                SourceStream::new(Box::new(Cursor::new(compressed)), Default::default());

            let found = find_recompression_level(&mut src, 0, &[], &data, &[], expected_len)
                .unwrap()
                .unwrap();

            assert!(found.matched.is_exact(expected_len), "level {} not exact", made_with);
            // Deflate output at different levels can coincide; re-deflating at the found level
            // must still reproduce the stream, which is what is_exact already proves.
        }
    }
}
