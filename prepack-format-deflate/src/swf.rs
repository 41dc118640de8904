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
use crate::engine;

/// zlib-compressed Flash files: `CWS`, a version byte, the uncompressed length, then one zlib
/// stream to the end of the file.
#[derive(Default)]
pub struct SwfHandler;

impl SwfHandler {
    pub fn new() -> SwfHandler {
        SwfHandler
    }
}

impl FormatHandler for SwfHandler {
    fn name(&self) -> &'static str {
        "swf"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::SWF]
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        window.len() >= 10
            && window[0] == b'C'
            && window[1] == b'W'
            && window[2] == b'S'
            && engine::zlib_header_check(&window[8..])
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        // CWS, version, u32le uncompressed length, and the zlib stream header.
        let prefix = src.read_span(pos, 10)?;

        common::precompress_container(
            src,
            ctx,
            pos,
            tags::SWF,
            prefix,
            common::TrailerKind::Adler32,
            "swf",
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
