// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handler for MPEG-1 Layer III audio (tag 10).
//!
//! The scan validates at least five consecutive frames agreeing on everything but bit rate and
//! padding, checking the CRC-16 of protected frames and the bit-reservoir bound in each frame's
//! side information. The packer then regroups the claimed frames by kind: all headers, then all
//! CRC words, then all side-information blocks, then the concatenated main data. Frame headers
//! and side information are highly self-similar across a stream, so the regrouped form models
//! far better under a general-purpose compressor, and the original interleaving is rebuilt
//! exactly from the grouped form.

mod header;

use std::collections::HashSet;
use std::io;
use std::io::Read;

use log::debug;

use prepack_core::container::tags;
use prepack_core::errors::{decode_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes};

use header::{crc16, parse_frame_header, FrameHeader, MPEG_HEADER_LEN};

/// The shortest run of frames worth claiming.
const MIN_FRAMES: usize = 5;

/// The bit reservoir holds at most 511 bytes.
const MAX_RESERVOIR: usize = 511;

/// One validated frame of the scan.
struct ScannedFrame {
    pos: u64,
    header: FrameHeader,
}

/// Why a frame chain ended.
enum ChainEnd {
    /// Clean break: the bytes after the chain are not a continuation frame.
    Break,
    /// A structural defect inside a continuation frame (bad CRC, reservoir overflow, truncated
    /// frame). Starts within this chain are hopeless too.
    Defect,
}

/// MPEG-1 Layer III streams.
#[derive(Default)]
pub struct Mp3Handler {
    /// End positions of chains that failed structurally; any start whose chain ends there would
    /// fail the same way ("suppression map").
    bad_chain_ends: HashSet<u64>,
    /// The last rejected chain, so re-scans from its inner frames are answered from memory
    /// instead of re-parsing the tail.
    last_chain: Option<(Vec<u64>, u64)>,
}

impl Mp3Handler {
    pub fn new() -> Mp3Handler {
        Default::default()
    }

    /// Walks consecutive frames starting at `pos`. Returns the frames plus how the chain ended.
    fn scan_chain(
        &mut self,
        src: &mut SourceStream,
        pos: u64,
    ) -> Result<(Vec<ScannedFrame>, ChainEnd)> {
        let mut frames: Vec<ScannedFrame> = Vec::new();
        let mut reservoir = 0usize;
        let mut cursor = pos;

        loop {
            let mut head = [0u8; MPEG_HEADER_LEN];
            if src.reread_from(cursor, &mut head)? != MPEG_HEADER_LEN {
                return Ok((frames, ChainEnd::Break));
            }

            let word = u32::from_be_bytes(head);
            let header = match parse_frame_header(word) {
                Some(header) => header,
                None => return Ok((frames, ChainEnd::Break)),
            };

            if let Some(first) = frames.first() {
                if !header.is_same_stream(&first.header) {
                    return Ok((frames, ChainEnd::Break));
                }
            }

            let frame_len = header.frame_len();
            if frame_len < header.pre_main_len() {
                return Ok((frames, ChainEnd::Break));
            }

            // The frame must be complete within the input.
            let mut body = vec![0u8; frame_len - MPEG_HEADER_LEN];
            if src.reread_from(cursor + MPEG_HEADER_LEN as u64, &mut body)? != body.len() {
                let end = if frames.is_empty() { ChainEnd::Break } else { ChainEnd::Defect };
                return Ok((frames, end));
            }

            let side_off = if header.has_crc { 2 } else { 0 };
            let side_info = &body[side_off..side_off + header.side_info_len()];

            if header.has_crc {
                let stored = u16::from(body[0]) << 8 | u16::from(body[1]);
                let mut protected = Vec::with_capacity(2 + side_info.len());
                protected.extend_from_slice(&head[2..]);
                protected.extend_from_slice(side_info);

                if crc16(&protected) != stored {
                    let end = if frames.is_empty() { ChainEnd::Break } else { ChainEnd::Defect };
                    return Ok((frames, end));
                }
            }

            // The first nine bits of the side information address the bit reservoir; a frame
            // cannot reach back further than the main data accumulated so far.
            if !frames.is_empty() {
                let main_data_begin =
                    (usize::from(side_info[0]) << 1) | (usize::from(side_info[1]) >> 7);
                if main_data_begin > reservoir {
                    return Ok((frames, ChainEnd::Defect));
                }
            }

            reservoir = MAX_RESERVOIR.min(reservoir + (frame_len - header.pre_main_len()));

            frames.push(ScannedFrame { pos: cursor, header });
            cursor += frame_len as u64;
        }
    }
}

/// Serializes the grouped form: count, headers, CRC words, side information, main data.
fn pack_frames(src: &mut SourceStream, frames: &[ScannedFrame]) -> Result<Vec<u8>> {
    let first = &frames[0].header;
    let crc_len = if first.has_crc { 2usize } else { 0 };
    let side_len = first.side_info_len();

    let total: usize = frames.iter().map(|f| f.header.frame_len()).sum();

    let mut out = Vec::with_capacity(total + 8);
    out.write_vlint(frames.len() as u64)?;

    for frame in frames {
        let head = src.read_span(frame.pos, MPEG_HEADER_LEN)?;
        out.write_buf(&head)?;
    }

    if crc_len > 0 {
        for frame in frames {
            let crc = src.read_span(frame.pos + MPEG_HEADER_LEN as u64, crc_len)?;
            out.write_buf(&crc)?;
        }
    }

    for frame in frames {
        let side = src
            .read_span(frame.pos + (MPEG_HEADER_LEN + crc_len) as u64, side_len)?;
        out.write_buf(&side)?;
    }

    for frame in frames {
        let pre = frame.header.pre_main_len();
        let main = src.read_span(frame.pos + pre as u64, frame.header.frame_len() - pre)?;
        out.write_buf(&main)?;
    }

    Ok(out)
}

/// Rebuilds the original interleaved frames from the grouped form.
fn unpack_frames(payload: &mut dyn Read, out: &mut dyn io::Write) -> Result<()> {
    let count = payload.read_vlint()? as usize;
    if count == 0 || count > 1 << 24 {
        return decode_error("mp3: invalid frame count");
    }

    let mut headers = Vec::with_capacity(count);
    for _ in 0..count {
        let mut head = [0u8; MPEG_HEADER_LEN];
        payload.read_buf_exact(&mut head)?;

        let header = match parse_frame_header(u32::from_be_bytes(head)) {
            Some(header) => header,
            None => return decode_error("mp3: invalid frame header in payload"),
        };
        headers.push((head, header));
    }

    let first = headers[0].1;
    let crc_len = if first.has_crc { 2usize } else { 0 };
    let side_len = first.side_info_len();

    let crcs = payload.read_vec_exact(count * crc_len)?;
    let sides = payload.read_vec_exact(count * side_len)?;

    for (index, (head, header)) in headers.iter().enumerate() {
        out.write_all(head)?;
        if crc_len > 0 {
            out.write_all(&crcs[index * crc_len..(index + 1) * crc_len])?;
        }
        out.write_all(&sides[index * side_len..(index + 1) * side_len])?;

        let main_len = header.frame_len() - header.pre_main_len();
        let main = payload.read_vec_exact(main_len)?;
        out.write_all(&main)?;
    }

    Ok(())
}

impl FormatHandler for Mp3Handler {
    fn name(&self) -> &'static str {
        "mp3"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::MP3]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        if window.len() < MPEG_HEADER_LEN {
            return false;
        }

        let word = u32::from_be_bytes([window[0], window[1], window[2], window[3]]);
        parse_frame_header(word).is_some()
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        // A start inside the previously rejected chain shares its tail; answer from memory.
        if let Some((starts, end)) = &self.last_chain {
            if let Ok(index) = starts.binary_search(&pos) {
                if starts.len() - index < MIN_FRAMES || self.bad_chain_ends.contains(end) {
                    return Ok(None);
                }
            }
        }

        let (frames, end) = self.scan_chain(src, pos)?;

        let chain_end = frames
            .last()
            .map(|f| f.pos + f.header.frame_len() as u64)
            .unwrap_or(pos);

        if frames.len() < MIN_FRAMES {
            if let ChainEnd::Defect = end {
                self.bad_chain_ends.insert(chain_end);
            }

            debug!("mp3: rejecting {} frame(s) at {}", frames.len(), pos);
            self.last_chain =
                Some((frames.iter().map(|f| f.pos).collect(), chain_end));
            return Ok(None);
        }

        let original_size = chain_end - pos;
        let packed = pack_frames(src, &frames)?;

        let payload = Payload::new_spilling(
            packed,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "mp3",
        )?;

        Ok(Some(Precompressed::new(tags::MP3, original_size, payload)))
    }

    fn read_header_data(
        &self,
        _input: &mut dyn io::Read,
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        // Everything the rebuild needs lives in the grouped payload itself.
        Ok(Vec::new())
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        _header_data: &[u8],
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        unpack_frames(payload, out)
    }

    fn reset(&mut self) {
        self.bad_chain_ends.clear();
        self.last_chain = None;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::header::MPEG_HEADER_LEN;
    use super::{pack_frames, unpack_frames, Mp3Handler};
    use prepack_core::handler::FormatHandler;
    use prepack_core::io::SourceStream;

    /// 44.1 kHz, 128 kbit/s, stereo, no CRC: 417-byte frames.
    const HEADER: [u8; 4] = [0xff, 0xfb, 0x90, 0x00];

    fn test_stream(frames: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..frames {
            out.extend_from_slice(&HEADER);
            // Side info (32 bytes, main_data_begin zero) plus deterministic main data.
            out.extend_from_slice(&[0u8; 32]);
            out.extend((0..417 - MPEG_HEADER_LEN - 32).map(|j| ((i * 31 + j) % 251) as u8));
        }
        out
    }

    #[test]
    fn verify_quick_check() {
        let handler = Mp3Handler::new();
        assert!(handler.quick_check(&HEADER, 0));
        assert!(!handler.quick_check(&[0xff, 0xfb, 0xf0, 0x00], 0));
        assert!(!handler.quick_check(b"RIFF", 0));
    }

    #[test]
    fn verify_chain_scan_counts_frames() {
        let data = test_stream(7);
        let mut src = SourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut handler = Mp3Handler::new();
        let (frames, _) = handler.scan_chain(&mut src, 0).unwrap();
        assert_eq!(frames.len(), 7);
    }

    #[test]
    fn verify_pack_round_trip() {
        let data = test_stream(6);
        let mut src = SourceStream::new(Box::new(Cursor::new(data.clone())), Default::default());

        let mut handler = Mp3Handler::new();
        let (frames, _) = handler.scan_chain(&mut src, 0).unwrap();

        let packed = pack_frames(&mut src, &frames).unwrap();

        let mut rebuilt = Vec::new();
        unpack_frames(&mut Cursor::new(&packed), &mut rebuilt).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn verify_scanner_round_trip() {
        use prepack_core::container::tags;
        use prepack_core::handler::{Registry, Tier};
        use prepack_core::options::Options;
        use prepack_core::{recompress, scanner};

        let mut input = b"ID3 junk before the audio ".to_vec();
        input.extend_from_slice(&test_stream(12));
        // A truncated trailing frame stays uncompressed.
        input.extend_from_slice(&HEADER);
        input.extend_from_slice(&[0u8; 40]);

        let mut registry = Registry::new();
        registry.register(Box::new(Mp3Handler::new()), Tier::Structured);

        let options = Options::default();

        let mut pcf = Vec::new();
        let stats = scanner::precompress(
            &mut registry,
            &options,
            Box::new(Cursor::new(input.clone())),
            &mut pcf,
            "test.mp3",
        )
        .unwrap();

        assert_eq!(stats.claimed_by_tag.get(&tags::MP3), Some(&1));
        assert_eq!(stats.claimed_bytes, 12 * 417);

        let mut restored = Vec::new();
        recompress::restore(&registry, &mut Cursor::new(&pcf), &mut restored).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn verify_short_chain_rejected() {
        let data = test_stream(3);
        let mut src = SourceStream::new(Box::new(Cursor::new(data)), Default::default());

        let mut handler = Mp3Handler::new();
        let mut stats = Default::default();
        let options = Default::default();
        let scratch = prepack_core::io::ScratchDir::new(None);
        let mut ctx = prepack_core::handler::ScanContext {
            options: &options,
            scratch: &scratch,
            stats: &mut stats,
            depth: 0,
        };

        assert!(handler.precompress(&mut src, &mut ctx, 0).unwrap().is_none());
    }
}
