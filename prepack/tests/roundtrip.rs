// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end round-trip tests over the default handler set.

use std::io::{Cursor, Read, Write};

use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use prepack::core::checksum::crc32;
use prepack::core::container;
use prepack::core::handler::SegmentFlags;
use prepack::core::io::ReadBytes;
use prepack::core::options::Options;
use prepack::core::penalty::PenaltyList;

/// A parsed summary of one PCF body segment.
#[derive(Debug)]
struct Segment {
    /// `None` for an uncompressed run.
    tag: Option<u8>,
    flags: SegmentFlags,
    original_size: u64,
    precompressed_size: u64,
    recursion_size: Option<u64>,
}

fn precompress(options: &Options, input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    prepack::precompress(options, Box::new(Cursor::new(input.to_vec())), &mut out, "input.bin")
        .unwrap();
    out
}

fn restore(options: &Options, pcf: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    prepack::restore(options, &mut Cursor::new(pcf), &mut out).unwrap();
    out
}

fn assert_round_trip(options: &Options, input: &[u8]) -> Vec<u8> {
    let pcf = precompress(options, input);
    assert_eq!(restore(options, &pcf), input);
    pcf
}

/// Walks the PCF body and summarizes its segments, using the registered handlers to delimit
/// the per-format header data.
fn parse_segments(options: &Options, pcf: &[u8]) -> Vec<Segment> {
    let registry = prepack::default::get_registry(options);

    let mut reader = Cursor::new(pcf);
    container::read_header(&mut reader).unwrap();

    let mut segments = Vec::new();

    loop {
        let first = reader.read_byte().unwrap();

        if first == 0 {
            let len = reader.read_vlint().unwrap();
            if len == 0 {
                break;
            }
            std::io::copy(&mut (&mut reader).take(len), &mut std::io::sink()).unwrap();
            segments.push(Segment {
                tag: None,
                flags: SegmentFlags::empty(),
                original_size: len,
                precompressed_size: len,
                recursion_size: None,
            });
            continue;
        }

        let flags = SegmentFlags::from_bits_retain(first);
        assert!(flags.contains(SegmentFlags::PRESENT));

        let tag = reader.read_byte().unwrap();
        let handler = registry.by_tag(tag).expect("no handler for tag");
        handler.read_header_data(&mut reader, flags, tag).unwrap();

        if flags.contains(SegmentFlags::PENALTY_BYTES) {
            PenaltyList::read_from(&mut reader).unwrap();
        }

        let original_size = reader.read_vlint().unwrap();
        let precompressed_size = reader.read_vlint().unwrap();

        let recursion_size = if flags.contains(SegmentFlags::RECURSION) {
            Some(reader.read_vlint().unwrap())
        }
        else {
            None
        };

        let payload_len = recursion_size.unwrap_or(precompressed_size);
        std::io::copy(&mut (&mut reader).take(payload_len), &mut std::io::sink()).unwrap();

        segments.push(Segment { tag: Some(tag), flags, original_size, precompressed_size, recursion_size });
    }

    segments
}

fn deflate_raw(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// An RFC 1952 member: magic, method 8, no flags, mtime 0, xfl 0, unknown OS.
fn gzip_member(data: &[u8]) -> Vec<u8> {
    let mut member = vec![0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff];
    member.extend_from_slice(&deflate_raw(data));
    member.extend_from_slice(&crc32(data).to_le_bytes());
    member.extend_from_slice(&(data.len() as u32).to_le_bytes());
    member
}

#[test]
fn verify_empty_input() {
    let options = Options::default();
    let pcf = assert_round_trip(&options, &[]);

    // Just the container header and the end-of-stream marker.
    let mut reader = Cursor::new(&pcf);
    let header = container::read_header(&mut reader).unwrap();
    assert_eq!(header.input_file_name, "input.bin");

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, vec![0, 0]);
}

#[test]
fn verify_all_uncompressed_input() {
    let options = Options::default();
    let input = vec![0xaa; 1000];

    let pcf = assert_round_trip(&options, &input);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].tag, None);
    assert_eq!(segments[0].original_size, 1000);
}

#[test]
fn verify_single_gzip_member() {
    let options = Options::default();
    let member = gzip_member(&[b'A'; 100]);

    let pcf = assert_round_trip(&options, &member);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].tag, Some(container::tags::GZIP));
    assert_eq!(segments[0].original_size, member.len() as u64);
    assert_eq!(segments[0].precompressed_size, 100);
    assert!(!segments[0].flags.contains(SegmentFlags::PENALTY_BYTES));
}

#[test]
fn verify_zip_with_one_deflate_entry() {
    let options = Options::default();

    let data: Vec<u8> = (0..4000u32).map(|i| (i % 7) as u8).collect();
    let compressed = deflate_raw(&data);
    let name = b"a.txt";

    let mut zip = Vec::new();
    // Local file header.
    zip.extend_from_slice(b"PK\x03\x04");
    zip.extend_from_slice(&20u16.to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());
    zip.extend_from_slice(&8u16.to_le_bytes());
    zip.extend_from_slice(&[0; 4]);
    zip.extend_from_slice(&crc32(&data).to_le_bytes());
    zip.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    zip.extend_from_slice(&(data.len() as u32).to_le_bytes());
    zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());
    zip.extend_from_slice(name);

    let local_entry_len = zip.len() + compressed.len();
    zip.extend_from_slice(&compressed);

    // Central directory and end-of-central-directory records.
    let cd_start = zip.len();
    zip.extend_from_slice(b"PK\x01\x02");
    zip.extend_from_slice(&[0; 24]);
    zip.extend_from_slice(&(name.len() as u16).to_le_bytes());
    zip.extend_from_slice(&[0; 12]);
    zip.extend_from_slice(&0u32.to_le_bytes());
    zip.extend_from_slice(name);
    let cd_len = zip.len() - cd_start;

    zip.extend_from_slice(b"PK\x05\x06");
    zip.extend_from_slice(&[0; 4]);
    zip.extend_from_slice(&1u16.to_le_bytes());
    zip.extend_from_slice(&1u16.to_le_bytes());
    zip.extend_from_slice(&(cd_len as u32).to_le_bytes());
    zip.extend_from_slice(&(cd_start as u32).to_le_bytes());
    zip.extend_from_slice(&0u16.to_le_bytes());

    let pcf = assert_round_trip(&options, &zip);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 2);

    // The claim covers the local header through the end of the compressed data; the central
    // directory follows as an uncompressed run.
    assert_eq!(segments[0].tag, Some(container::tags::ZIP));
    assert_eq!(segments[0].original_size, local_entry_len as u64);
    assert_eq!(segments[1].tag, None);
    assert_eq!(segments[1].original_size, (zip.len() - local_entry_len) as u64);
}

#[test]
fn verify_base64_wrapped_gzip_recursion() {
    use base64_lines::to_mime_part;

    let options = Options::default();

    let member = gzip_member(&(0..3000u32).map(|i| (i % 11) as u8).collect::<Vec<u8>>());
    let part = to_mime_part(&member);

    let pcf = assert_round_trip(&options, &part);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 1);

    let segment = &segments[0];
    assert_eq!(segment.tag, Some(container::tags::BASE64));
    assert!(segment.flags.contains(SegmentFlags::RECURSION));

    // The nested payload is itself a PCF stream holding one gzip segment.
    assert!(segment.recursion_size.is_some());
    assert_eq!(segment.precompressed_size, member.len() as u64);
}

/// Minimal base64 MIME part construction, independent of the handler under test.
mod base64_lines {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    pub fn to_mime_part(data: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();

        for chunk in data.chunks(3) {
            let mut group = [0u8; 3];
            group[..chunk.len()].copy_from_slice(chunk);

            let bits = (u32::from(group[0]) << 16) | (u32::from(group[1]) << 8) | u32::from(group[2]);

            let chars = [
                ALPHABET[(bits >> 18) as usize & 63],
                ALPHABET[(bits >> 12) as usize & 63],
                ALPHABET[(bits >> 6) as usize & 63],
                ALPHABET[bits as usize & 63],
            ];

            let keep = match chunk.len() {
                1 => 2,
                2 => 3,
                _ => 4,
            };
            encoded.extend_from_slice(&chars[..keep]);
            for _ in keep..4 {
                encoded.push(b'=');
            }
        }

        let mut part = b"Content-Transfer-Encoding: base64\r\n\r\n".to_vec();
        for line in encoded.chunks(76) {
            part.extend_from_slice(line);
            part.extend_from_slice(b"\r\n");
        }
        part
    }
}

#[test]
fn verify_intense_mode_raw_zlib() {
    let data: Vec<u8> = (0..6000u32).map(|i| ((i / 5) % 83) as u8).collect();

    let mut zlib = Vec::new();
    let mut encoder = ZlibEncoder::new(&mut zlib, Compression::new(6));
    encoder.write_all(&data).unwrap();
    encoder.finish().unwrap();
    assert_eq!(zlib[0], 0x78);

    // Random brackets, scrubbed of bytes that could look like a zlib stream header.
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    let mut bracket = |len: usize| -> Vec<u8> {
        (0..len)
            .map(|_| {
                let byte: u8 = rng.gen();
                if byte & 0x0f == 8 {
                    byte | 0x01
                }
                else {
                    byte
                }
            })
            .collect()
    };

    let before = bracket(512);
    let after = bracket(512);

    let mut input = Vec::new();
    input.extend_from_slice(&before);
    input.extend_from_slice(&zlib);
    input.extend_from_slice(&after);

    // Without intense mode the whole input is one uncompressed run.
    let plain = Options::default();
    let pcf = assert_round_trip(&plain, &input);
    let segments = parse_segments(&plain, &pcf);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].tag, None);

    // With intense mode, two runs bracket one raw zlib segment.
    let intense = Options { intense_mode: true, ..Default::default() };
    let pcf = assert_round_trip(&intense, &input);

    let segments = parse_segments(&intense, &pcf);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[0].tag, None);
    assert_eq!(segments[0].original_size, 512);
    assert_eq!(segments[1].tag, Some(container::tags::ZLIB));
    assert_eq!(segments[1].original_size, zlib.len() as u64);
    assert_eq!(segments[2].tag, None);
    assert_eq!(segments[2].original_size, 512);
}

#[test]
fn verify_brute_mode_headerless_deflate() {
    let data: Vec<u8> = (0..8000u32).map(|i| ((i * 13 + i / 40) % 97) as u8).collect();
    let compressed = deflate_raw(&data);

    let mut input = vec![b'A'; 300];
    input.extend_from_slice(&compressed);
    input.extend_from_slice(&[b'B'; 300]);

    let options = Options { brute_mode: true, ..Default::default() };
    let pcf = assert_round_trip(&options, &input);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1].tag, Some(container::tags::BRUTE));
    assert_eq!(segments[1].original_size, compressed.len() as u64);
}

#[test]
fn verify_penalty_bytes_patch_corrupt_trailer() {
    let options = Options::default();

    // A gzip member whose stored CRC is wrong: the regenerated trailer differs at one byte,
    // which the penalty list must patch on restore. The corrupt byte is the first of the
    // trailer, so the seven agreeing bytes after it pay for the patch.
    let mut member = gzip_member(&(0..2000u32).map(|i| (i % 19) as u8).collect::<Vec<u8>>());
    let crc_byte = member.len() - 8;
    member[crc_byte] ^= 0xff;

    let pcf = assert_round_trip(&options, &member);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].tag, Some(container::tags::GZIP));
    assert!(segments[0].flags.contains(SegmentFlags::PENALTY_BYTES));
    assert_eq!(segments[0].original_size, member.len() as u64);
}

#[test]
fn verify_bzip2_stream() {
    let options = Options::default();

    let data: Vec<u8> = (0..50_000u32).map(|i| ((i / 9) % 41) as u8).collect();

    let mut stream = Vec::new();
    let mut encoder = bzip2::write::BzEncoder::new(&mut stream, bzip2::Compression::new(7));
    encoder.write_all(&data).unwrap();
    encoder.finish().unwrap();

    let mut input = b"prefix ".to_vec();
    input.extend_from_slice(&stream);
    input.extend_from_slice(b" suffix");

    let pcf = assert_round_trip(&options, &input);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 3);
    assert_eq!(segments[1].tag, Some(container::tags::BZIP2));
    assert_eq!(segments[1].original_size, stream.len() as u64);
}

#[test]
fn verify_png_multi_idat() {
    let options = Options::default();

    let pixels: Vec<u8> = (0..20_000u32).map(|i| ((i / 3) % 17) as u8).collect();

    let mut zstream = Vec::new();
    let mut encoder = ZlibEncoder::new(&mut zstream, Compression::new(6));
    encoder.write_all(&pixels).unwrap();
    encoder.finish().unwrap();

    // Split the zlib stream over three IDAT chunks inside a PNG-shaped wrapper.
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();

    let split_a = zstream.len() / 3;
    let split_b = 2 * zstream.len() / 3;

    let first_idat = png.len() + 4;
    for part in [&zstream[..split_a], &zstream[split_a..split_b], &zstream[split_b..]] {
        png.extend_from_slice(&(part.len() as u32).to_be_bytes());
        png.extend_from_slice(b"IDAT");
        png.extend_from_slice(part);
        let mut chunk = b"IDAT".to_vec();
        chunk.extend_from_slice(part);
        png.extend_from_slice(&crc32(&chunk).to_be_bytes());
    }

    png.extend_from_slice(&0u32.to_be_bytes());
    png.extend_from_slice(b"IEND");
    png.extend_from_slice(&crc32(b"IEND").to_be_bytes());

    let pcf = assert_round_trip(&options, &png);

    let segments = parse_segments(&options, &pcf);
    let idat = segments
        .iter()
        .find(|s| s.tag == Some(container::tags::MULTIPNG))
        .expect("no multi-IDAT segment");

    // The claim starts at the first IDAT chunk type and covers the whole chain.
    assert_eq!(idat.original_size, (png.len() - first_idat - 12) as u64);
    assert_eq!(idat.precompressed_size, pixels.len() as u64);
}

#[test]
fn verify_determinism() {
    let input = {
        let mut input = gzip_member(&[b'x'; 5000]);
        input.extend_from_slice(b"interlude");
        input.extend_from_slice(&gzip_member(&(0..800u32).map(|i| (i % 5) as u8).collect::<Vec<u8>>()));
        input
    };

    let options = Options::default();
    let first = precompress(&options, &input);
    let second = precompress(&options, &input);
    assert_eq!(first, second);
}

#[test]
fn verify_restore_rejects_non_pcf() {
    let options = Options::default();

    let mut out = Vec::new();
    let result = prepack::restore(&options, &mut Cursor::new(b"not a pcf stream"), &mut out);

    assert!(result.is_err());
    assert!(out.is_empty());
}

#[test]
fn verify_uncompressed_block_flush() {
    let options = Options { uncompressed_block_length: 256, ..Default::default() };
    let input = vec![0x55u8; 1000];

    let pcf = assert_round_trip(&options, &input);

    let segments = parse_segments(&options, &pcf);
    assert_eq!(segments.len(), 4);
    assert!(segments.iter().all(|s| s.tag.is_none()));
    assert_eq!(segments.iter().map(|s| s.original_size).sum::<u64>(), 1000);
}
