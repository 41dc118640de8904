// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handler for base64-encoded MIME parts (tag 8).
//!
//! Detection keys on a `Content-Transfer-Encoding: base64` header followed by an empty line and
//! CRLF-delimited base64 lines. The payload is the decoded binary — recursion then finds
//! whatever container hides inside — and the sidecar records the MIME header verbatim plus the
//! line-length schema in one of three compact forms: uniform, uniform-except-last, or an
//! explicit per-line table. The first sidecar byte is stored decremented so a nested scan over
//! the container never re-detects the part, and restored on the reverse path.

use std::io;
use std::io::{BufRead, Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;

use prepack_core::container::tags;
use prepack_core::errors::{container_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes, CHECKBUF};
use prepack_core::penalty::OriginalComparator;

/// All-but-last lines share one length.
const FLAG_UNIFORM_EXCEPT_LAST: SegmentFlags = SegmentFlags::FORMAT_0;
/// Line lengths are stored as an explicit table.
const FLAG_LINE_TABLE: SegmentFlags = SegmentFlags::FORMAT_1;

const CTE_MARKER: &[u8] = b"content-transfer-encoding: base64";

/// The line-length schema of an encoded part.
#[derive(Clone, Debug, PartialEq, Eq)]
enum LineSchema {
    Uniform(u8),
    UniformExceptLast(u8, u8),
    Table(Vec<u8>),
}

impl LineSchema {
    fn of(lines: &[u8]) -> LineSchema {
        let first = lines[0];

        if lines.iter().all(|&len| len == first) {
            return LineSchema::Uniform(first);
        }

        let (last, body) = lines.split_last().unwrap();
        if body.iter().all(|&len| len == first) {
            return LineSchema::UniformExceptLast(first, *last);
        }

        LineSchema::Table(lines.to_vec())
    }

    fn flags(&self) -> SegmentFlags {
        match self {
            LineSchema::Uniform(_) => SegmentFlags::empty(),
            LineSchema::UniformExceptLast(..) => FLAG_UNIFORM_EXCEPT_LAST,
            LineSchema::Table(_) => FLAG_LINE_TABLE,
        }
    }

    /// Expands the schema back into per-line lengths.
    fn line_lengths(&self, count: usize) -> Vec<u8> {
        match self {
            LineSchema::Uniform(len) => vec![*len; count],
            LineSchema::UniformExceptLast(len, last) => {
                let mut lens = vec![*len; count.saturating_sub(1)];
                lens.push(*last);
                lens
            }
            LineSchema::Table(lens) => lens.clone(),
        }
    }
}

/// The reconstruction sidecar: the MIME header and the line schema.
struct MimeHeader {
    header: Vec<u8>,
    line_count: u64,
    schema: LineSchema,
}

impl MimeHeader {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_vlint(self.header.len() as u64)?;
        // The first byte is stored off-by-one to prevent re-detection on nested passes.
        out.write_byte(self.header[0].wrapping_sub(1))?;
        out.write_buf(&self.header[1..])?;

        out.write_vlint(self.line_count)?;
        match &self.schema {
            LineSchema::Uniform(len) => out.write_byte(*len),
            LineSchema::UniformExceptLast(len, last) => {
                out.write_byte(*len)?;
                out.write_byte(*last)
            }
            LineSchema::Table(lens) => out.write_buf(lens),
        }
    }

    fn read_from(input: &mut dyn Read, flags: SegmentFlags) -> Result<MimeHeader> {
        let header_len = input.read_vlint()? as usize;
        if header_len == 0 || header_len > CHECKBUF {
            return container_error("invalid base64 header length");
        }

        let mut header = input.read_vec_exact(header_len)?;
        header[0] = header[0].wrapping_add(1);

        let line_count = input.read_vlint()?;
        if line_count == 0 || line_count > 1 << 32 {
            return container_error("invalid base64 line count");
        }

        let schema = if flags.contains(FLAG_LINE_TABLE) {
            LineSchema::Table(input.read_vec_exact(line_count as usize)?)
        }
        else if flags.contains(FLAG_UNIFORM_EXCEPT_LAST) {
            LineSchema::UniformExceptLast(input.read_byte()?, input.read_byte()?)
        }
        else {
            LineSchema::Uniform(input.read_byte()?)
        };

        Ok(MimeHeader { header, line_count, schema })
    }
}

fn is_base64_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'+' || byte == b'/'
}

/// The parsed encoded part: its decoded data, line lengths, and consumed input length.
struct ParsedPart {
    data: Vec<u8>,
    lines: Vec<u8>,
    consumed: u64,
}

/// Parses CRLF-delimited base64 lines starting at `pos`. Only complete, terminated lines are
/// taken; the part ends at the first empty line, non-base64 byte, or padded line.
fn parse_lines(src: &mut SourceStream, pos: u64) -> Result<Option<ParsedPart>> {
    let mut reader = io::BufReader::new(src.reader_at(pos));

    let mut chars: Vec<u8> = Vec::new();
    let mut lines: Vec<u8> = Vec::new();
    let mut consumed = 0u64;

    let mut line: Vec<u8> = Vec::new();
    let mut padded = false;

    'outer: loop {
        line.clear();

        loop {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                // Unterminated trailing line: not part of the claim.
                break 'outer;
            }

            let byte = buf[0];
            reader.consume(1);

            match byte {
                b'\r' => {
                    let next = reader.fill_buf()?;
                    if next.first() != Some(&b'\n') {
                        break 'outer;
                    }
                    reader.consume(1);
                    break;
                }
                byte if is_base64_char(byte) && !padded => line.push(byte),
                b'=' => {
                    padded = true;
                    line.push(byte);
                }
                _ => break 'outer,
            }

            if line.len() > 255 {
                break 'outer;
            }
        }

        if line.is_empty() {
            break;
        }

        chars.extend_from_slice(&line);
        lines.push(line.len() as u8);
        consumed += line.len() as u64 + 2;

        if padded {
            break;
        }
    }

    if lines.is_empty() || chars.len() % 4 != 0 {
        return Ok(None);
    }

    let data = match STANDARD.decode(&chars) {
        Ok(data) => data,
        Err(_) => return Ok(None),
    };

    Ok(Some(ParsedPart { data, lines, consumed }))
}

/// Rebuilds the original part bytes: the MIME header, then the re-encoded data split at the
/// recorded line lengths.
fn rebuild(header: &MimeHeader, data: &[u8], out: &mut dyn io::Write) -> Result<()> {
    out.write_all(&header.header)?;

    let encoded = STANDARD.encode(data);
    let encoded = encoded.as_bytes();

    let mut at = 0usize;
    for len in header.schema.line_lengths(header.line_count as usize) {
        let end = (at + usize::from(len)).min(encoded.len());
        out.write_all(&encoded[at..end])?;
        out.write_all(b"\r\n")?;
        at = end;
    }

    Ok(())
}

/// Base64-encoded MIME parts.
#[derive(Default)]
pub struct MimeBase64Handler;

impl MimeBase64Handler {
    pub fn new() -> MimeBase64Handler {
        MimeBase64Handler
    }
}

impl FormatHandler for MimeBase64Handler {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::BASE64]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= CTE_MARKER.len()
            && window[..CTE_MARKER.len()]
                .iter()
                .zip(CTE_MARKER)
                .all(|(byte, marker)| byte.to_ascii_lowercase() == *marker)
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        // The MIME header runs through the empty line separating it from the encoded body.
        let header_len = {
            let window = src.peek(CHECKBUF)?;
            match window.windows(4).position(|w| w == b"\r\n\r\n") {
                Some(at) => at + 4,
                None => return Ok(None),
            }
        };

        let header_bytes = src.read_span(pos, header_len)?;

        let part = match parse_lines(src, pos + header_len as u64)? {
            Some(part) => part,
            None => return Ok(None),
        };

        if (part.data.len() as u64) < ctx.options.min_ident_size {
            return Ok(None);
        }

        let header = MimeHeader {
            header: header_bytes,
            line_count: part.lines.len() as u64,
            schema: LineSchema::of(&part.lines),
        };

        // Prove the rebuild against the original before claiming.
        let mut rebuilt = Vec::new();
        rebuild(&header, &part.data, &mut rebuilt)?;

        let mut comparator = OriginalComparator::new(src, pos);
        comparator.feed(&rebuilt)?;

        let matched = match comparator.finish() {
            Some(matched) => matched,
            None => return Ok(None),
        };

        let expected = header_len as u64 + part.consumed;
        if matched.matched_len < ctx.options.min_ident_size {
            return Ok(None);
        }
        if !matched.is_exact(expected) {
            debug!(
                "base64: inexact rebuild at {} ({} of {} bytes)",
                pos, matched.matched_len, expected
            );
        }

        let mut header_data = Vec::new();
        header.write_to(&mut header_data)?;

        let payload = Payload::new_spilling(
            part.data,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "base64",
        )?;

        let mut segment = Precompressed::new(tags::BASE64, matched.matched_len, payload);
        segment.format_flags = header.schema.flags();
        segment.header_data = header_data;
        segment.penalty_bytes = matched.penalty_bytes;

        Ok(Some(segment))
    }

    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        let header = MimeHeader::read_from(input, flags)?;

        let mut out = Vec::new();
        header.write_to(&mut out)?;
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
        let header = MimeHeader::read_from(&mut Cursor::new(header_data), flags)?;

        let mut data = Vec::new();
        payload.read_to_end(&mut data)?;

        rebuild(&header, &data, out)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::{parse_lines, rebuild, LineSchema, MimeBase64Handler, MimeHeader};
    use prepack_core::handler::FormatHandler;
    use prepack_core::io::SourceStream;

    fn mime_part(data: &[u8], line_len: usize) -> Vec<u8> {
        let mut out = b"Content-Transfer-Encoding: base64\r\n\r\n".to_vec();
        let encoded = STANDARD.encode(data);
        for chunk in encoded.as_bytes().chunks(line_len) {
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    #[test]
    fn verify_quick_check_is_case_insensitive() {
        let handler = MimeBase64Handler::new();
        assert!(handler.quick_check(b"Content-Transfer-Encoding: base64\r\n", 0));
        assert!(handler.quick_check(b"CONTENT-TRANSFER-ENCODING: BASE64\r\n", 0));
        assert!(!handler.quick_check(b"Content-Transfer-Encoding: 7bit\r\n\r\n", 0));
    }

    #[test]
    fn verify_line_schema_forms() {
        assert_eq!(LineSchema::of(&[76, 76, 76]), LineSchema::Uniform(76));
        assert_eq!(LineSchema::of(&[76, 76, 20]), LineSchema::UniformExceptLast(76, 20));
        assert_eq!(LineSchema::of(&[76, 40, 20]), LineSchema::Table(vec![76, 40, 20]));
    }

    #[test]
    fn verify_parse_and_rebuild_round_trip() {
        let data: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let part = mime_part(&data, 76);
        let header_len = part.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;

        let mut src = SourceStream::new(Box::new(Cursor::new(part.clone())), Default::default());

        let parsed = parse_lines(&mut src, header_len as u64).unwrap().unwrap();
        assert_eq!(parsed.data, data);

        let header = MimeHeader {
            header: part[..header_len].to_vec(),
            line_count: parsed.lines.len() as u64,
            schema: LineSchema::of(&parsed.lines),
        };

        let mut rebuilt = Vec::new();
        rebuild(&header, &parsed.data, &mut rebuilt).unwrap();
        assert_eq!(rebuilt, part);
    }

    #[test]
    fn verify_sidecar_first_byte_decrement() {
        let header = MimeHeader {
            header: b"Content-Transfer-Encoding: base64\r\n\r\n".to_vec(),
            line_count: 1,
            schema: LineSchema::Uniform(8),
        };

        let mut serialized = Vec::new();
        header.write_to(&mut serialized).unwrap();

        // vlint length (one byte here), then the decremented 'C'.
        assert_eq!(serialized[1], b'C' - 1);

        let read = MimeHeader::read_from(
            &mut Cursor::new(&serialized),
            prepack_core::handler::SegmentFlags::empty(),
        )
        .unwrap();
        assert_eq!(read.header, header.header);
    }

    #[test]
    fn verify_garbage_body_rejected() {
        let part = b"Content-Transfer-Encoding: base64\r\n\r\n%%%not base64%%%\r\n".to_vec();
        let mut src = SourceStream::new(Box::new(Cursor::new(part)), Default::default());
        assert!(parse_lines(&mut src, 37).unwrap().is_none());
    }
}
