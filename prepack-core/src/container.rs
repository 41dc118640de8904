// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `container` module reads and writes the PCF framing.
//!
//! A PCF stream is a fixed header followed by self-delimiting segments: uncompressed runs
//! (`0x00`, a vlint length, the raw bytes) interleaved with precompressed segments (a flag
//! byte, a format tag, format header data, an optional penalty-byte list, the size fields, and
//! the payload). An uncompressed run of length zero marks the end of the stream.

use std::io;

use crate::errors::{container_error, unsupported_error, Result};
use crate::handler::Precompressed;
use crate::io::{ReadBytes, WriteBytes};

/// The three magic bytes heading every PCF stream.
pub const PCF_MAGIC: &[u8; 3] = b"PCF";

/// The container version written by this crate.
pub const PCF_VERSION: (u8, u8, u8) = (0, 1, 0);

/// The stable format tag values.
pub mod tags {
    pub const PDF: u8 = 0;
    pub const ZIP: u8 = 1;
    pub const GZIP: u8 = 2;
    pub const PNG: u8 = 3;
    pub const MULTIPNG: u8 = 4;
    pub const GIF: u8 = 5;
    pub const JPEG: u8 = 6;
    pub const SWF: u8 = 7;
    pub const BASE64: u8 = 8;
    pub const BZIP2: u8 = 9;
    pub const MP3: u8 = 10;
    pub const BRUTE: u8 = 254;
    pub const ZLIB: u8 = 255;
}

/// A human-readable name for a format tag.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        tags::PDF => "pdf",
        tags::ZIP => "zip",
        tags::GZIP => "gzip",
        tags::PNG => "png",
        tags::MULTIPNG => "png-multi",
        tags::GIF => "gif",
        tags::JPEG => "jpeg",
        tags::SWF => "swf",
        tags::BASE64 => "base64",
        tags::BZIP2 => "bzip2",
        tags::MP3 => "mp3",
        tags::BRUTE => "deflate-brute",
        tags::ZLIB => "zlib",
        _ => "unknown",
    }
}

/// The parsed PCF header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: (u8, u8, u8),
    pub input_file_name: String,
}

/// Writes the PCF header.
pub fn write_header<W: WriteBytes + ?Sized>(out: &mut W, input_file_name: &str) -> Result<()> {
    out.write_buf(PCF_MAGIC)?;
    out.write_byte(PCF_VERSION.0)?;
    out.write_byte(PCF_VERSION.1)?;
    out.write_byte(PCF_VERSION.2)?;
    // On-the-fly outer compression is no longer supported; the field remains for compatibility.
    out.write_byte(0)?;
    out.write_cstring(input_file_name)
}

/// Reads and validates the PCF header.
pub fn read_header(input: &mut dyn io::Read) -> Result<ContainerHeader> {
    let mut magic = [0u8; 3];
    input.read_buf_exact(&mut magic).map_err(|_| {
        crate::errors::Error::ContainerError("missing PCF header")
    })?;

    if &magic != PCF_MAGIC {
        return container_error("missing PCF header");
    }

    let version = (input.read_byte()?, input.read_byte()?, input.read_byte()?);
    if (version.0, version.1) != (PCF_VERSION.0, PCF_VERSION.1) {
        return container_error("incompatible PCF version");
    }

    let outer_compression = input.read_byte()?;
    if outer_compression != 0 {
        return unsupported_error("outer compression is no longer supported");
    }

    let input_file_name = input.read_cstring(4096)?;

    Ok(ContainerHeader { version, input_file_name })
}

/// Writes one uncompressed run.
pub fn write_uncompressed<W: WriteBytes + ?Sized>(out: &mut W, data: &[u8]) -> Result<()> {
    out.write_byte(0)?;
    out.write_vlint(data.len() as u64)?;
    out.write_buf(data)
}

/// Writes the end-of-stream marker: an uncompressed run of length zero.
pub fn write_end_marker<W: WriteBytes + ?Sized>(out: &mut W) -> Result<()> {
    out.write_byte(0)?;
    out.write_vlint(0)
}

/// Writes one precompressed segment, payload included.
pub fn write_segment(out: &mut dyn io::Write, segment: &mut Precompressed) -> Result<()> {
    out.write_byte(segment.flag_byte())?;
    out.write_byte(segment.tag)?;
    out.write_buf(&segment.header_data)?;

    if !segment.penalty_bytes.is_empty() {
        segment.penalty_bytes.write_to(out)?;
    }

    out.write_vlint(segment.original_size)?;
    out.write_vlint(segment.precompressed_size)?;

    if let Some(recursion_size) = segment.recursion_size {
        out.write_vlint(recursion_size)?;
        debug_assert_eq!(segment.payload.len(), recursion_size);
    }
    else {
        debug_assert_eq!(segment.payload.len(), segment.precompressed_size);
    }

    segment.payload.write_to(out)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{read_header, write_header, write_uncompressed, PCF_VERSION};
    use crate::io::ReadBytes;

    #[test]
    fn verify_header_round_trip() {
        let mut buf = Vec::new();
        write_header(&mut buf, "input.bin").unwrap();

        let header = read_header(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(header.version, PCF_VERSION);
        assert_eq!(header.input_file_name, "input.bin");
    }

    #[test]
    fn verify_bad_magic_rejected() {
        let buf = b"PCX\x00\x01\x00\x00\x00";
        assert!(read_header(&mut Cursor::new(&buf[..])).is_err());
    }

    #[test]
    fn verify_outer_compression_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"PCF");
        buf.extend_from_slice(&[PCF_VERSION.0, PCF_VERSION.1, PCF_VERSION.2]);
        buf.push(2);
        buf.push(0);

        assert!(read_header(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn verify_uncompressed_run_framing() {
        let mut buf = Vec::new();
        write_uncompressed(&mut buf, &[0xaa; 300]).unwrap();

        let mut reader = Cursor::new(&buf);
        assert_eq!(reader.read_byte().unwrap(), 0);
        assert_eq!(reader.read_vlint().unwrap(), 300);
        assert_eq!(reader.read_vec_exact(300).unwrap(), vec![0xaa; 300]);
    }
}
