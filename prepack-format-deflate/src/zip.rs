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
use prepack_core::io::{SourceStream, CHECKBUF};

use crate::common;

/// ZIP local file entries compressed with method 8 (deflate).
///
/// A segment covers the local file header through the end of the compressed data. Whatever
/// follows (data descriptor, further entries, the central directory) is left to the scanner.
#[derive(Default)]
pub struct ZipHandler;

impl ZipHandler {
    pub fn new() -> ZipHandler {
        ZipHandler
    }

    fn header_length(window: &[u8]) -> usize {
        let name_len = usize::from(window[26]) | (usize::from(window[27]) << 8);
        let extra_len = usize::from(window[28]) | (usize::from(window[29]) << 8);
        30 + name_len + extra_len
    }
}

impl FormatHandler for ZipHandler {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::ZIP]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 30
            && window[0] == b'P'
            && window[1] == b'K'
            && window[2] == 3
            && window[3] == 4
            // Not encrypted.
            && window[6] & 0x01 == 0
            // Compression method 8: deflate.
            && window[8] == 8
            && window[9] == 0
            && Self::header_length(window) <= CHECKBUF
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let header_len = {
            let window = src.peek(CHECKBUF)?;
            Self::header_length(window)
        };

        let prefix = src.read_span(pos, header_len)?;

        common::precompress_container(
            src,
            ctx,
            pos,
            tags::ZIP,
            prefix,
            common::TrailerKind::None,
            "zip",
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
