// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::io::{Cursor, Read};

use log::debug;

use prepack_core::container::tags;
use prepack_core::errors::{decode_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes, CHECKBUF};

use crate::common;
use crate::common::DeflateHeader;
use crate::engine;

/// 8-bit image payloads get a palette BMP header, 24-bit ones a true-color BMP header.
const FLAG_BMP_8BPP: SegmentFlags = SegmentFlags::FORMAT_3;
const FLAG_BMP_24BPP: SegmentFlags = SegmentFlags::FORMAT_4;

const BMP_HEADER_LEN: usize = 54;
const BMP_PALETTE_LEN: usize = 1024;

/// PDF `/FlateDecode` streams.
///
/// With `pdf_bmp_mode` enabled and a parseable image dictionary, the decompressed payload is
/// wrapped in a BMP header with 4-byte-aligned rows, which lets image-aware outer compressors
/// model it; the wrap is stripped again on restore.
#[derive(Default)]
pub struct PdfHandler;

impl PdfHandler {
    pub fn new() -> PdfHandler {
        PdfHandler
    }
}

/// Locates the deflate stream behind the `stream` keyword. Returns the prefix length, zlib
/// header included.
fn find_stream_start(window: &[u8]) -> Option<usize> {
    let mut at = 12;

    while at + 6 <= window.len().min(CHECKBUF - 6) {
        if window[at] == b's' && window[at..].starts_with(b"stream") {
            let mut data = at + 6;
            if window.get(data) == Some(&b'\r') && window.get(data + 1) == Some(&b'\n') {
                data += 2;
            }
            else if window.get(data) == Some(&b'\n') {
                data += 1;
            }

            if window.len() >= data + 2 && engine::zlib_header_check(&window[data..]) {
                return Some(data + 2);
            }
            return None;
        }
        at += 1;
    }

    None
}

/// Parses the integer following a dictionary key such as `/Width`.
fn dict_int(dict: &[u8], key: &[u8]) -> Option<u64> {
    let at = dict.windows(key.len()).position(|w| w == key)? + key.len();

    let mut value: u64 = 0;
    let mut seen_digit = false;

    for &byte in &dict[at..] {
        match byte {
            b' ' if !seen_digit => {}
            b'0'..=b'9' => {
                seen_digit = true;
                value = value.checked_mul(10)?.checked_add(u64::from(byte - b'0'))?;
            }
            _ => break,
        }
    }

    seen_digit.then_some(value)
}

/// The image geometry recovered from the stream dictionary.
struct ImageInfo {
    width: u64,
    height: u64,
}

fn image_info(dict: &[u8]) -> Option<ImageInfo> {
    if dict_int(dict, b"/BitsPerComponent")? != 8 {
        return None;
    }

    let width = dict_int(dict, b"/Width")?;
    let height = dict_int(dict, b"/Height")?;

    (width > 0 && height > 0).then_some(ImageInfo { width, height })
}

fn row_padding(row_len: u64) -> u64 {
    (4 - row_len % 4) % 4
}

/// Wraps raw image rows in a BMP file: header, palette for the 8-bit case, and rows padded to
/// four bytes.
fn wrap_bmp(data: &[u8], info: &ImageInfo, bpp24: bool) -> Vec<u8> {
    let row_len = if bpp24 { info.width * 3 } else { info.width };
    let padded_row = row_len + row_padding(row_len);
    let data_offset = BMP_HEADER_LEN + if bpp24 { 0 } else { BMP_PALETTE_LEN };
    let image_size = padded_row * info.height;

    let mut out = Vec::with_capacity(data_offset + image_size as usize);

    out.extend_from_slice(b"BM");
    out.extend_from_slice(&(data_offset as u32 + image_size as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(data_offset as u32).to_le_bytes());

    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(info.width as u32).to_le_bytes());
    out.extend_from_slice(&(info.height as u32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&(if bpp24 { 24u16 } else { 8u16 }).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(image_size as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(if bpp24 { 0u32 } else { 256 }).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    if !bpp24 {
        // Grayscale palette.
        for i in 0..256u32 {
            out.extend_from_slice(&(i | (i << 8) | (i << 16)).to_le_bytes());
        }
    }

    let pad = [0u8; 3];
    for row in data.chunks(row_len as usize) {
        out.extend_from_slice(row);
        out.extend_from_slice(&pad[..row_padding(row_len) as usize]);
    }

    out
}

/// The inverse of [`wrap_bmp`].
fn strip_bmp(wrapped: &[u8], width: u64, height: u64, bpp24: bool) -> Result<Vec<u8>> {
    let row_len = if bpp24 { width * 3 } else { width };
    let padded_row = row_len + row_padding(row_len);
    let data_offset = BMP_HEADER_LEN + if bpp24 { 0 } else { BMP_PALETTE_LEN };

    let expected = data_offset as u64 + padded_row * height;
    if (wrapped.len() as u64) != expected {
        return decode_error("pdf: image payload does not match its geometry");
    }

    let mut data = Vec::with_capacity((row_len * height) as usize);
    for row in wrapped[data_offset..].chunks(padded_row as usize) {
        data.extend_from_slice(&row[..row_len as usize]);
    }

    Ok(data)
}

impl FormatHandler for PdfHandler {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::PDF]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.starts_with(b"/FlateDecode")
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let (prefix_len, info) = {
            let window = src.peek(CHECKBUF)?;

            let prefix_len = match find_stream_start(window) {
                Some(len) => len,
                None => return Ok(None),
            };

            let info = if ctx.options.pdf_bmp_mode {
                image_info(&window[..prefix_len])
            }
            else {
                None
            };

            (prefix_len, info)
        };

        let prefix = src.read_span(pos, prefix_len)?;

        let mut segment = match common::precompress_container(
            src,
            ctx,
            pos,
            tags::PDF,
            prefix,
            common::TrailerKind::Adler32,
            "pdf",
        )? {
            Some(segment) => segment,
            None => return Ok(None),
        };

        if let Some(info) = info {
            let data = segment.payload.clone_to_vec()?;

            let bpp24 = if data.len() as u64 == info.width * info.height {
                Some(false)
            }
            else if data.len() as u64 == info.width * info.height * 3 {
                Some(true)
            }
            else {
                debug!("pdf: image size does not match the stream, keeping raw payload");
                None
            };

            if let Some(bpp24) = bpp24 {
                let wrapped = wrap_bmp(&data, &info, bpp24);

                segment.format_flags |= if bpp24 { FLAG_BMP_24BPP } else { FLAG_BMP_8BPP };
                segment.header_data.write_vlint(info.width)?;
                segment.header_data.write_vlint(info.height)?;
                segment.precompressed_size = wrapped.len() as u64;
                segment.payload = Payload::new_spilling(
                    wrapped,
                    ctx.options.in_memory_limit,
                    ctx.scratch,
                    "pdf_bmp",
                )?;
            }
        }

        Ok(Some(segment))
    }

    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        let mut out = common::read_container_header_data(input)?;

        if flags.intersects(FLAG_BMP_8BPP | FLAG_BMP_24BPP) {
            out.write_vlint(input.read_vlint()?)?;
            out.write_vlint(input.read_vlint()?)?;
        }

        Ok(out)
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        header_data: &[u8],
        flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        let mut reader = Cursor::new(header_data);
        let header = DeflateHeader::read_from(&mut reader)?;

        let mut data = Vec::new();
        payload.read_to_end(&mut data)?;

        if flags.intersects(FLAG_BMP_8BPP | FLAG_BMP_24BPP) {
            let width = reader.read_vlint()?;
            let height = reader.read_vlint()?;
            data = strip_bmp(&data, width, height, flags.contains(FLAG_BMP_24BPP))?;
        }

        out.write_all(&header.prefix)?;
        engine::deflate_to(out, &data, header.level)?;
        out.write_all(&common::trailer_bytes(header.trailer, &data))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{dict_int, find_stream_start, image_info, strip_bmp, wrap_bmp, ImageInfo};

    #[test]
    fn verify_dict_int_parsing() {
        let dict = b"<< /Type /XObject /Width 640 /Height 480 /BitsPerComponent 8 >>";
        assert_eq!(dict_int(dict, b"/Width"), Some(640));
        assert_eq!(dict_int(dict, b"/Height"), Some(480));
        assert_eq!(dict_int(dict, b"/BitsPerComponent"), Some(8));
        assert_eq!(dict_int(dict, b"/Length"), None);
    }

    #[test]
    fn verify_stream_start() {
        let mut window = b"/FlateDecode /Length 20 >> stream\r\n".to_vec();
        window.extend_from_slice(&[0x78, 0x9c, 0, 0, 0]);
        assert_eq!(find_stream_start(&window), Some(window.len() - 3));
    }

    #[test]
    fn verify_stream_start_requires_zlib_header() {
        let mut window = b"/FlateDecode >> stream\r\n".to_vec();
        window.extend_from_slice(&[0x12, 0x34]);
        assert_eq!(find_stream_start(&window), None);
    }

    #[test]
    fn verify_bmp_wrap_round_trip() {
        // A width that forces row padding.
        let info = ImageInfo { width: 5, height: 4 };
        let data: Vec<u8> = (0..20).collect();

        let wrapped = wrap_bmp(&data, &info, false);
        assert_eq!(wrapped.len(), 54 + 1024 + 8 * 4);

        let stripped = strip_bmp(&wrapped, 5, 4, false).unwrap();
        assert_eq!(stripped, data);
    }

    #[test]
    fn verify_bmp_wrap_round_trip_24bpp() {
        let info = ImageInfo { width: 3, height: 2 };
        let data: Vec<u8> = (0..18).collect();

        let wrapped = wrap_bmp(&data, &info, true);
        let stripped = strip_bmp(&wrapped, 3, 2, true).unwrap();
        assert_eq!(stripped, data);
    }

    #[test]
    fn verify_image_info_needs_eight_bpc() {
        let dict = b"/Width 10 /Height 10 /BitsPerComponent 1 stream";
        assert!(image_info(dict).is_none());
    }
}
