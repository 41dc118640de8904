// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared container logic: the header-data layout common to the single-stream deflate
//! containers, and the generic precompress/recompress flow they all share.

use std::io;
use std::io::{Cursor, Read};

use log::debug;

use prepack_core::checksum::{adler32, crc32};
use prepack_core::errors::{container_error, Result};
use prepack_core::handler::{Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes};

use crate::engine;

/// The trailer following a container's deflate stream, derived from the decompressed data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrailerKind {
    /// No trailer (ZIP; the data descriptor and central directory are left to the scanner).
    None,
    /// A big-endian Adler-32 of the decompressed data (zlib, SWF, PDF, PNG).
    Adler32,
    /// A little-endian CRC-32 and ISIZE of the decompressed data (gzip).
    Gzip,
}

impl TrailerKind {
    fn to_byte(self) -> u8 {
        match self {
            TrailerKind::None => 0,
            TrailerKind::Adler32 => 1,
            TrailerKind::Gzip => 2,
        }
    }

    fn from_byte(byte: u8) -> Result<TrailerKind> {
        match byte {
            0 => Ok(TrailerKind::None),
            1 => Ok(TrailerKind::Adler32),
            2 => Ok(TrailerKind::Gzip),
            _ => container_error("invalid deflate trailer kind"),
        }
    }
}

/// Computes the container trailer for the given decompressed data.
pub fn trailer_bytes(kind: TrailerKind, data: &[u8]) -> Vec<u8> {
    match kind {
        TrailerKind::None => Vec::new(),
        TrailerKind::Adler32 => adler32(data).to_be_bytes().to_vec(),
        TrailerKind::Gzip => {
            let mut trailer = Vec::with_capacity(8);
            trailer.extend_from_slice(&crc32(data).to_le_bytes());
            trailer.extend_from_slice(&(data.len() as u32).to_le_bytes());
            trailer
        }
    }
}

/// The reconstruction sidecar shared by the single-stream deflate containers: the recompression
/// level, the trailer kind, and the verbatim container prefix up to the start of the deflate
/// stream.
pub struct DeflateHeader {
    pub level: u8,
    pub trailer: TrailerKind,
    pub prefix: Vec<u8>,
}

impl DeflateHeader {
    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_byte(self.level)?;
        out.write_byte(self.trailer.to_byte())?;
        out.write_vlint(self.prefix.len() as u64)?;
        out.write_buf(&self.prefix)
    }

    pub fn read_from(input: &mut dyn io::Read) -> Result<DeflateHeader> {
        let level = input.read_byte()?;
        if level < 1 || level > 9 {
            return container_error("invalid deflate recompression level");
        }

        let trailer = TrailerKind::from_byte(input.read_byte()?)?;

        let prefix_len = input.read_vlint()? as usize;
        let prefix = input.read_vec_exact(prefix_len)?;

        Ok(DeflateHeader { level, trailer, prefix })
    }
}

/// The generic forward path: inflate the stream behind `prefix`, find the level that best
/// reproduces the original container bytes, and assemble the segment.
pub fn precompress_container(
    src: &mut SourceStream,
    ctx: &mut ScanContext<'_>,
    pos: u64,
    tag: u8,
    prefix: Vec<u8>,
    trailer: TrailerKind,
    scratch_purpose: &str,
) -> Result<Option<Precompressed>> {
    let stream_pos = pos + prefix.len() as u64;

    let inflated = match engine::inflate_raw_from(src, stream_pos)? {
        Some(inflated) => inflated,
        None => return Ok(None),
    };

    if inflated.data.is_empty() {
        return Ok(None);
    }

    let trailer_data = trailer_bytes(trailer, &inflated.data);

    let expected_len =
        prefix.len() as u64 + inflated.compressed_len + trailer_data.len() as u64;

    let found = match engine::find_recompression_level(
        src,
        pos,
        &prefix,
        &inflated.data,
        &trailer_data,
        expected_len,
    )? {
        Some(found) => found,
        None => return Ok(None),
    };

    if found.matched.matched_len < prefix.len() as u64 + ctx.options.min_ident_size {
        return Ok(None);
    }

    if ctx.options.verify_deflate {
        let mut candidate = Vec::new();
        engine::deflate_to(&mut candidate, &inflated.data, found.level)?;
        if engine::verify_reinflation(&candidate, &inflated.data).is_err() {
            debug!("re-inflation check failed at {}", pos);
            return Ok(None);
        }
    }

    let exact = found.matched.is_exact(expected_len);

    let mut header_data = Vec::new();
    DeflateHeader { level: found.level, trailer, prefix }.write_to(&mut header_data)?;

    let payload = Payload::new_spilling(
        inflated.data,
        ctx.options.in_memory_limit,
        ctx.scratch,
        scratch_purpose,
    )?;

    let mut segment = Precompressed::new(tag, found.matched.matched_len, payload);
    segment.header_data = header_data;
    segment.penalty_bytes = found.matched.penalty_bytes;
    if exact {
        segment.format_flags |= SegmentFlags::FORMAT_0;
    }

    Ok(Some(segment))
}

/// Delimits and collects the shared header-data layout from the container stream.
pub fn read_container_header_data(input: &mut dyn io::Read) -> Result<Vec<u8>> {
    let header = DeflateHeader::read_from(input)?;
    let mut out = Vec::new();
    header.write_to(&mut out)?;
    Ok(out)
}

/// The generic reverse path: prefix, deflate stream, derived trailer. The caller's writer scopes
/// the output to the claimed size and applies penalty patches.
pub fn recompress_container(
    payload: &mut dyn Read,
    out: &mut dyn io::Write,
    header_data: &[u8],
) -> Result<()> {
    let header = DeflateHeader::read_from(&mut Cursor::new(header_data))?;

    let mut data = Vec::new();
    payload.read_to_end(&mut data)?;

    out.write_all(&header.prefix)?;
    engine::deflate_to(out, &data, header.level)?;
    out.write_all(&trailer_bytes(header.trailer, &data))?;

    Ok(())
}
