// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handler for GIF images (tag 5).
//!
//! Everything in a GIF except the image data — header, screen descriptor, color tables,
//! extensions — is carried over verbatim. Each image's LZW sub-block chain is decoded to pixel
//! indices and stored raw; on restore the deterministic in-repo LZW encoder regenerates the
//! chain and re-splits it into sub-blocks of the recorded size. The rebuilt file is always
//! compared against the original before a claim: streams written by an encoder with a
//! different code-emission policy fall to penalty bytes or are rejected.

mod lzw;

use std::io;
use std::io::Read;

use log::debug;

use prepack_core::container::tags;
use prepack_core::errors::{decode_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes};
use prepack_core::penalty::OriginalComparator;

/// Sub-blocks are at most 255 bytes; some writers keep them at 254.
const FLAG_BLOCK_254: SegmentFlags = SegmentFlags::FORMAT_1;

/// GIF images.
#[derive(Default)]
pub struct GifHandler;

impl GifHandler {
    pub fn new() -> GifHandler {
        GifHandler
    }
}

/// The size of a color table whose presence/size bits are `packed`.
fn color_table_len(packed: u8) -> usize {
    if packed & 0x80 != 0 {
        3 * (2 << (packed & 0x07))
    }
    else {
        0
    }
}

/// Copies a sub-block chain verbatim (used for extensions).
fn copy_sub_blocks(input: &mut dyn Read, out: &mut Vec<u8>) -> Result<()> {
    loop {
        let len = input.read_byte()?;
        out.push(len);
        if len == 0 {
            return Ok(());
        }
        let data = input.read_vec_exact(usize::from(len))?;
        out.extend_from_slice(&data);
    }
}

/// Reads a sub-block chain and returns the concatenated data plus the uniform full-block size
/// (255 unless every non-final block is 254).
fn read_sub_blocks(input: &mut dyn Read) -> Result<Option<(Vec<u8>, u8)>> {
    let mut data = Vec::new();
    let mut sizes = Vec::new();

    loop {
        let len = input.read_byte()?;
        if len == 0 {
            break;
        }
        sizes.push(len);
        let block = input.read_vec_exact(usize::from(len))?;
        data.extend_from_slice(&block);
    }

    if sizes.is_empty() {
        return Ok(None);
    }

    let block_size = match sizes.first() {
        Some(&254) if sizes.len() > 1 => 254,
        _ => 255,
    };

    // Every block but the last must be full; odd splits cannot be reproduced.
    let uniform = sizes[..sizes.len() - 1].iter().all(|&s| s == block_size)
        && *sizes.last().unwrap() <= block_size;
    if !uniform {
        return Ok(None);
    }

    Ok(Some((data, block_size)))
}

/// Splits `data` into sub-blocks of `block_size` and appends the chain, terminator included.
fn write_sub_blocks(data: &[u8], block_size: u8, out: &mut dyn io::Write) -> Result<()> {
    for block in data.chunks(usize::from(block_size)) {
        out.write_byte(block.len() as u8)?;
        out.write_buf(block)?;
    }
    out.write_byte(0)?;
    Ok(())
}

/// Walks a GIF from `input`, producing the transformed payload: structure verbatim, image data
/// replaced by vlint-framed raw pixels. Returns the payload, the consumed input length, and the
/// uniform sub-block size.
fn transform(input: &mut dyn Read) -> Result<Option<(Vec<u8>, u64, u8)>> {
    fn read_copy(input: &mut dyn Read, out: &mut Vec<u8>, len: usize) -> Result<Vec<u8>> {
        let data = input.read_vec_exact(len)?;
        out.extend_from_slice(&data);
        Ok(data)
    }

    let mut out = Vec::new();
    let mut consumed = 0u64;
    let mut block_size: Option<u8> = None;

    // Header and logical screen descriptor.
    let header = read_copy(input, &mut out, 13)?;
    if &header[..6] != b"GIF87a" && &header[..6] != b"GIF89a" {
        return Ok(None);
    }
    consumed += 13;

    let gct_len = color_table_len(header[10]);
    read_copy(input, &mut out, gct_len)?;
    consumed += gct_len as u64;

    loop {
        let marker = input.read_byte()?;
        out.push(marker);
        consumed += 1;

        match marker {
            // Extension: label plus sub-block chain, verbatim.
            0x21 => {
                let before = out.len();
                let label = input.read_byte()?;
                out.push(label);
                copy_sub_blocks(input, &mut out)?;
                consumed += (out.len() - before) as u64;
            }
            // Image descriptor.
            0x2c => {
                let descriptor = read_copy(input, &mut out, 9)?;
                consumed += 9;

                let lct_len = color_table_len(descriptor[8]);
                read_copy(input, &mut out, lct_len)?;
                consumed += lct_len as u64;

                let min_code_size = input.read_byte()?;
                out.push(min_code_size);
                consumed += 1;

                let chain_start = consumed;
                let (compressed, size) = match read_sub_blocks(input)? {
                    Some(read) => read,
                    None => return Ok(None),
                };

                // Chain length: data plus one length byte per block plus the terminator.
                let blocks = compressed.len().div_ceil(usize::from(size)).max(1);
                consumed = chain_start + compressed.len() as u64 + blocks as u64 + 1;

                match block_size {
                    None => block_size = Some(size),
                    Some(existing) if existing != size => return Ok(None),
                    Some(_) => {}
                }

                let pixels = match lzw::decode(min_code_size, &compressed) {
                    Some(pixels) => pixels,
                    None => return Ok(None),
                };

                out.write_vlint(pixels.len() as u64)?;
                out.extend_from_slice(&pixels);
            }
            // Trailer.
            0x3b => {
                return Ok(Some((out, consumed, block_size.unwrap_or(255))));
            }
            _ => return Ok(None),
        }
    }
}

/// The inverse walk: reads the transformed payload and writes the original GIF bytes.
fn rebuild(payload: &mut dyn Read, block_size: u8, out: &mut dyn io::Write) -> Result<()> {
    let header = payload.read_vec_exact(13)?;
    if &header[..6] != b"GIF87a" && &header[..6] != b"GIF89a" {
        return decode_error("gif: invalid payload header");
    }
    out.write_buf(&header)?;

    let gct = payload.read_vec_exact(color_table_len(header[10]))?;
    out.write_buf(&gct)?;

    loop {
        let marker = payload.read_byte()?;
        out.write_byte(marker)?;

        match marker {
            0x21 => {
                let mut chain = Vec::new();
                chain.push(payload.read_byte()?);
                copy_sub_blocks(payload, &mut chain)?;
                out.write_buf(&chain)?;
            }
            0x2c => {
                let descriptor = payload.read_vec_exact(9)?;
                out.write_buf(&descriptor)?;

                let lct = payload.read_vec_exact(color_table_len(descriptor[8]))?;
                out.write_buf(&lct)?;

                let min_code_size = payload.read_byte()?;
                out.write_byte(min_code_size)?;

                let pixel_count = payload.read_vlint()? as usize;
                let pixels = payload.read_vec_exact(pixel_count)?;

                let compressed = lzw::encode(min_code_size, &pixels);
                write_sub_blocks(&compressed, block_size, out)?;
            }
            0x3b => return Ok(()),
            _ => return decode_error("gif: invalid payload block marker"),
        }
    }
}

impl FormatHandler for GifHandler {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::GIF]
    }

    fn recursion_allowed(&self) -> bool {
        false
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 13 && (window.starts_with(b"GIF87a") || window.starts_with(b"GIF89a"))
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let (payload, consumed, block_size) = {
            let mut reader = src.reader_at(pos);
            match transform(&mut reader) {
                Ok(Some(result)) => result,
                // Malformed or truncated structure: not claimable.
                Ok(None) | Err(_) => return Ok(None),
            }
        };

        if consumed < ctx.options.min_ident_size {
            return Ok(None);
        }

        // Prove the rebuild against the original before claiming.
        let mut rebuilt = Vec::new();
        rebuild(&mut io::Cursor::new(&payload), block_size, &mut rebuilt)?;

        let mut comparator = OriginalComparator::new(src, pos);
        comparator.feed(&rebuilt)?;

        let matched = match comparator.finish() {
            Some(matched) => matched,
            None => return Ok(None),
        };

        if matched.matched_len < ctx.options.min_ident_size {
            return Ok(None);
        }

        if !matched.is_exact(consumed) {
            debug!(
                "gif: inexact rebuild at {} ({} of {} bytes, {} patches)",
                pos,
                matched.matched_len,
                consumed,
                matched.penalty_bytes.len()
            );
        }

        let payload = Payload::new_spilling(
            payload,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "gif",
        )?;

        let mut segment = Precompressed::new(tags::GIF, matched.matched_len, payload);
        segment.penalty_bytes = matched.penalty_bytes;
        if block_size == 254 {
            segment.format_flags |= FLAG_BLOCK_254;
        }

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
        let block_size = if flags.contains(FLAG_BLOCK_254) { 254 } else { 255 };
        rebuild(payload, block_size, out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{lzw, rebuild, transform, write_sub_blocks};

    /// Builds a minimal single-image GIF with our own encoder.
    fn test_gif(width: u16, height: u16, pixels: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"GIF89a");
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        // Global color table, 4 entries.
        out.push(0x81);
        out.push(0);
        out.push(0);
        for i in 0..4u8 {
            out.extend_from_slice(&[i * 60, i * 60, i * 60]);
        }

        // Graphic control extension.
        out.extend_from_slice(&[0x21, 0xf9, 4, 0, 0, 0, 0, 0]);

        // Image descriptor, no local color table.
        out.push(0x2c);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.push(0);

        out.push(2);
        let compressed = lzw::encode(2, pixels);
        write_sub_blocks(&compressed, 255, &mut out).unwrap();

        out.push(0x3b);
        out
    }

    #[test]
    fn verify_transform_round_trip() {
        let pixels: Vec<u8> = (0..40u32 * 30).map(|i| ((i / 7) % 4) as u8).collect();
        let gif = test_gif(40, 30, &pixels);

        let (payload, consumed, block_size) =
            transform(&mut Cursor::new(&gif)).unwrap().unwrap();

        assert_eq!(consumed, gif.len() as u64);
        assert_eq!(block_size, 255);

        let mut rebuilt = Vec::new();
        rebuild(&mut Cursor::new(&payload), block_size, &mut rebuilt).unwrap();
        assert_eq!(rebuilt, gif);
    }

    #[test]
    fn verify_transform_expands_image_data() {
        // Highly repetitive pixels: the raw form must be larger than the LZW form.
        let pixels = vec![1u8; 4000];
        let gif = test_gif(80, 50, &pixels);

        let (payload, _, _) = transform(&mut Cursor::new(&gif)).unwrap().unwrap();
        assert!(payload.len() > gif.len());
    }

    #[test]
    fn verify_trailing_bytes_not_consumed() {
        let pixels: Vec<u8> = (0..100u32).map(|i| (i % 4) as u8).collect();
        let mut gif = test_gif(10, 10, &pixels);
        let gif_len = gif.len();
        gif.extend_from_slice(b"trailing data");

        let (_, consumed, _) = transform(&mut Cursor::new(&gif)).unwrap().unwrap();
        assert_eq!(consumed, gif_len as u64);
    }

    #[test]
    fn verify_garbage_rejected() {
        assert!(transform(&mut Cursor::new(b"GIF89a but not really a gif file"))
            .unwrap_or(None)
            .is_none());
    }

    #[test]
    fn verify_scanner_round_trip() {
        use prepack_core::container::tags;
        use prepack_core::handler::{Registry, Tier};
        use prepack_core::options::Options;
        use prepack_core::{recompress, scanner};

        let pixels: Vec<u8> = (0..64u32 * 48).map(|i| ((i ^ (i / 5)) % 4) as u8).collect();
        let mut input = b"leading bytes ".to_vec();
        input.extend_from_slice(&test_gif(64, 48, &pixels));
        input.extend_from_slice(b" trailing bytes");

        let mut registry = Registry::new();
        registry.register(Box::new(super::GifHandler::new()), Tier::Structured);

        let options = Options::default();

        let mut pcf = Vec::new();
        let stats = scanner::precompress(
            &mut registry,
            &options,
            Box::new(Cursor::new(input.clone())),
            &mut pcf,
            "test.gif",
        )
        .unwrap();

        assert_eq!(stats.claimed_by_tag.get(&tags::GIF), Some(&1));

        let mut restored = Vec::new();
        recompress::restore(&registry, &mut Cursor::new(&pcf), &mut restored).unwrap();
        assert_eq!(restored, input);
    }
}
