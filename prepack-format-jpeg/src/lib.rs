// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handler for JPEG images (tag 6).
//!
//! The scan walks the marker structure from SOI to EOI, entropy-coded segments included, to
//! find the exact stream length. The stream is then handed to the lepton entropy recoder,
//! which stores the DCT coefficients under an arithmetic coder and reproduces the original
//! file bit-exactly on restore. Motion-JPEG frames lacking a Huffman table get the canonical
//! tables spliced in before encoding and stripped again on restore, recorded in a flag bit.

mod codec;
mod dht;

use std::io;
use std::io::Read;

use log::debug;

use prepack_core::container::tags;
use prepack_core::errors::{decode_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream};

use dht::{MJPG_DHT, MJPG_DHT_LEN};

/// The canonical Huffman tables were spliced in before the scan.
const FLAG_DHT_INSERTED: SegmentFlags = SegmentFlags::FORMAT_2;

/// Streams beyond this are not worth the recoder's memory footprint.
const MAX_JPEG_LEN: u64 = 1 << 31;

/// What the marker walk learned about a stream.
struct JpegScan {
    /// Total stream length, SOI through EOI.
    len: u64,
    /// A SOF2 marker makes the stream progressive.
    progressive: bool,
    /// A DHT segment precedes the first scan.
    has_dht: bool,
}

/// Walks the marker structure of a JPEG starting after its SOI marker. Returns `None` when the
/// bytes do not form a complete, well-formed stream.
fn scan_jpeg(input: &mut dyn Read) -> Option<JpegScan> {
    let mut len: u64 = 2;
    let mut progressive = false;
    let mut has_dht = false;
    let mut seen_sos = false;

    // A marker already consumed by the entropy-data scan.
    let mut pending: Option<u8> = None;

    loop {
        if len > MAX_JPEG_LEN {
            return None;
        }

        let marker = match pending.take() {
            Some(marker) => marker,
            None => {
                // Optional fill bytes before the marker.
                let mut byte = input.read_byte().ok()?;
                if byte != 0xff {
                    return None;
                }
                len += 1;
                while byte == 0xff {
                    byte = input.read_byte().ok()?;
                    len += 1;
                }
                byte
            }
        };

        match marker {
            // EOI: the stream ends here.
            0xd9 => return Some(JpegScan { len, progressive, has_dht }),
            // SOS: a scan header followed by entropy-coded data.
            0xda => {
                seen_sos = true;

                let seg_len = read_segment_len(input)?;
                skip(input, seg_len)?;
                len += 2 + seg_len as u64;

                // Entropy-coded data runs until a marker other than a stuffed zero or a
                // restart.
                loop {
                    let byte = input.read_byte().ok()?;
                    len += 1;

                    if byte != 0xff {
                        continue;
                    }

                    let next = input.read_byte().ok()?;
                    len += 1;

                    match next {
                        0x00 => {}
                        0xd0..=0xd7 => {}
                        _ => {
                            pending = Some(next);
                            break;
                        }
                    }
                }
            }
            // SOF0..SOF15, DHT, DQT, DNL, DRI, application and comment segments: all carry a
            // two-byte length.
            0xc0..=0xcf | 0xdb | 0xdc | 0xdd | 0xe0..=0xef | 0xfe => {
                if marker == 0xc2 {
                    progressive = true;
                }
                if marker == 0xc4 && !seen_sos {
                    has_dht = true;
                }

                let seg_len = read_segment_len(input)?;
                skip(input, seg_len)?;
                len += 2 + seg_len as u64;
            }
            _ => return None,
        }
    }
}

/// Reads a segment length field and returns the number of bytes that follow it.
fn read_segment_len(input: &mut dyn Read) -> Option<usize> {
    let mut buf = [0u8; 2];
    input.read_buf_exact(&mut buf).ok()?;

    let total = usize::from(buf[0]) << 8 | usize::from(buf[1]);
    total.checked_sub(2)
}

fn skip(input: &mut dyn Read, len: usize) -> Option<()> {
    io::copy(&mut input.take(len as u64), &mut io::sink()).ok().filter(|&n| n == len as u64)?;
    Some(())
}

/// Finds the `FF DA` start-of-scan marker.
fn find_sos(jpeg: &[u8]) -> Option<usize> {
    jpeg.windows(2).position(|w| w == [0xff, 0xda])
}

/// JPEG images via the lepton entropy recoder.
pub struct JpegHandler {
    prog_only: bool,
    use_mjpeg: bool,
}

impl JpegHandler {
    pub fn new(prog_only: bool, use_mjpeg: bool) -> JpegHandler {
        JpegHandler { prog_only, use_mjpeg }
    }
}

impl FormatHandler for JpegHandler {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::JPEG]
    }

    fn recursion_allowed(&self) -> bool {
        false
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        // SOI followed by a plausible first marker.
        window.len() >= 4
            && window[0] == 0xff
            && window[1] == 0xd8
            && window[2] == 0xff
            && matches!(window[3], 0xc0 | 0xc2 | 0xc4 | 0xdb..=0xfe)
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let scan = {
            let mut reader = src.reader_at(pos + 2);
            match scan_jpeg(&mut reader) {
                Some(scan) => scan,
                None => return Ok(None),
            }
        };

        if self.prog_only && !scan.progressive {
            debug!("jpeg: skipping non-progressive stream at {}", pos);
            return Ok(None);
        }

        let mut jpeg = src.read_span(pos, scan.len as usize)?;

        let mut flags = SegmentFlags::empty();

        if !scan.has_dht {
            if !self.use_mjpeg {
                return Ok(None);
            }

            // Motion-JPEG: splice the canonical tables in front of the scan.
            let sos = match find_sos(&jpeg) {
                Some(sos) => sos,
                None => return Ok(None),
            };
            jpeg.splice(sos..sos, MJPG_DHT.iter().copied());
            flags |= FLAG_DHT_INSERTED;
        }

        let packed = match codec::pack(&jpeg) {
            Ok(packed) => packed,
            Err(err) => {
                debug!("jpeg: recoder rejected stream at {}: {}", pos, err);
                return Ok(None);
            }
        };

        let payload = Payload::new_spilling(
            packed,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "jpeg",
        )?;

        let mut segment = Precompressed::new(tags::JPEG, scan.len, payload);
        segment.format_flags = flags;

        Ok(Some(segment))
    }

    fn read_header_data(
        &self,
        _input: &mut dyn io::Read,
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        _header_data: &[u8],
        flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        let mut packed = Vec::new();
        payload.read_to_end(&mut packed)?;

        let mut jpeg = codec::unpack(&packed)?;

        if flags.contains(FLAG_DHT_INSERTED) {
            // Strip the spliced tables immediately preceding the scan.
            let sos = match find_sos(&jpeg) {
                Some(sos) if sos >= MJPG_DHT_LEN => sos,
                _ => return decode_error("jpeg: spliced tables missing on restore"),
            };
            jpeg.drain(sos - MJPG_DHT_LEN..sos);
        }

        out.write_all(&jpeg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{find_sos, scan_jpeg};

    /// A structurally valid single-scan JPEG skeleton (the entropy data is arbitrary).
    fn skeleton(with_dht: bool, progressive: bool) -> Vec<u8> {
        let mut out = vec![0xff, 0xd8];

        // APP0.
        out.extend_from_slice(&[0xff, 0xe0, 0x00, 0x04, 0x4a, 0x46]);
        // DQT.
        out.extend_from_slice(&[0xff, 0xdb, 0x00, 0x04, 0x00, 0x01]);
        // SOF.
        let sof = if progressive { 0xc2 } else { 0xc0 };
        out.extend_from_slice(&[0xff, sof, 0x00, 0x0b, 8, 0, 16, 0, 16, 1, 0x11, 0, 0]);
        if with_dht {
            out.extend_from_slice(&[0xff, 0xc4, 0x00, 0x1f, 0x00]);
            out.extend_from_slice(&[0; 16]);
            out.extend_from_slice(&[0; 12]);
        }
        // SOS.
        out.extend_from_slice(&[0xff, 0xda, 0x00, 0x08, 1, 0, 0, 0, 63, 0]);
        // Entropy data with a stuffed 0xff and a restart marker.
        out.extend_from_slice(&[0x12, 0x34, 0xff, 0x00, 0x56, 0xff, 0xd0, 0x78]);
        // EOI.
        out.extend_from_slice(&[0xff, 0xd9]);
        out
    }

    #[test]
    fn verify_scan_finds_length() {
        let jpeg = skeleton(true, false);
        let mut padded = jpeg.clone();
        padded.extend_from_slice(b"trailing");

        let scan = scan_jpeg(&mut Cursor::new(&padded[2..])).unwrap();
        assert_eq!(scan.len, jpeg.len() as u64);
        assert!(scan.has_dht);
        assert!(!scan.progressive);
    }

    #[test]
    fn verify_scan_flags_progressive() {
        let jpeg = skeleton(true, true);
        let scan = scan_jpeg(&mut Cursor::new(&jpeg[2..])).unwrap();
        assert!(scan.progressive);
    }

    #[test]
    fn verify_scan_detects_missing_dht() {
        let jpeg = skeleton(false, false);
        let scan = scan_jpeg(&mut Cursor::new(&jpeg[2..])).unwrap();
        assert!(!scan.has_dht);
    }

    #[test]
    fn verify_truncated_stream_rejected() {
        let jpeg = skeleton(true, false);
        assert!(scan_jpeg(&mut Cursor::new(&jpeg[2..jpeg.len() - 4])).is_none());
    }

    #[test]
    fn verify_find_sos() {
        let jpeg = skeleton(true, false);
        let sos = find_sos(&jpeg).unwrap();
        assert_eq!(jpeg[sos + 1], 0xda);
    }
}
