// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use prepack_core::container::tags;
use prepack_core::errors::Result;
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::SourceStream;

use crate::common;

const FHCRC: u8 = 0x02;
const FEXTRA: u8 = 0x04;
const FNAME: u8 = 0x08;
const FCOMMENT: u8 = 0x10;

/// Computes the total gzip member header length, or `None` when the optional fields run past
/// the look-ahead window.
fn header_length(window: &[u8]) -> Option<usize> {
    let flg = window[3];
    let mut len = 10usize;

    if flg & FEXTRA != 0 {
        if len + 2 > window.len() {
            return None;
        }
        let xlen = usize::from(window[len]) | (usize::from(window[len + 1]) << 8);
        len += 2 + xlen;
        if len > window.len() {
            return None;
        }
    }

    if flg & FNAME != 0 {
        len = 1 + window[len..].iter().position(|&b| b == 0).map(|i| len + i)?;
    }

    if flg & FCOMMENT != 0 {
        len = 1 + window[len..].iter().position(|&b| b == 0).map(|i| len + i)?;
    }

    if flg & FHCRC != 0 {
        len += 2;
        if len > window.len() {
            return None;
        }
    }

    Some(len)
}

/// RFC 1952 gzip members: the variable-length member header is carried in the sidecar and the
/// CRC-32/ISIZE trailer is derived from the decompressed data on restore.
#[derive(Default)]
pub struct GzipHandler;

impl GzipHandler {
    pub fn new() -> GzipHandler {
        GzipHandler
    }
}

impl FormatHandler for GzipHandler {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::GZIP]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 10
            && window[0] == 0x1f
            && window[1] == 0x8b
            // Compression method 8 (deflate) with the reserved flag bits clear.
            && window[2] == 8
            && window[3] & 0xe0 == 0
            && header_length(window).is_some()
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let window = src.peek(prepack_core::io::CHECKBUF)?;

        let prefix_len = match header_length(window) {
            Some(len) => len,
            None => return Ok(None),
        };

        let prefix = src.read_span(pos, prefix_len)?;

        common::precompress_container(
            src,
            ctx,
            pos,
            tags::GZIP,
            prefix,
            common::TrailerKind::Gzip,
            "gzip",
        )
    }

    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        common::read_container_header_data(input)
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        header_data: &[u8],
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        common::recompress_container(payload, out, header_data)
    }
}

#[cfg(test)]
mod tests {
    use super::header_length;

    #[test]
    fn verify_plain_header_length() {
        let header = [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 0xff, 0x01];
        assert_eq!(header_length(&header), Some(10));
    }

    #[test]
    fn verify_fname_header_length() {
        let mut header = vec![0x1f, 0x8b, 8, super::FNAME, 0, 0, 0, 0, 0, 0xff];
        header.extend_from_slice(b"file.txt\0");
        header.push(0x01);
        assert_eq!(header_length(&header), Some(19));
    }

    #[test]
    fn verify_fextra_header_length() {
        let mut header = vec![0x1f, 0x8b, 8, super::FEXTRA, 0, 0, 0, 0, 0, 0xff];
        header.extend_from_slice(&[4, 0]);
        header.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(header_length(&header), Some(16));
    }

    #[test]
    fn verify_unterminated_fname_rejected() {
        let mut header = vec![0x1f, 0x8b, 8, super::FNAME, 0, 0, 0, 0, 0, 0xff];
        header.extend_from_slice(b"never terminated");
        assert_eq!(header_length(&header), None);
    }
}
