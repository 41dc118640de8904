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

/// Raw zlib streams without any enclosing container ("intense mode").
///
/// The two-byte stream header is the only magic, so this handler runs at the raw tier, after
/// every structured container has passed on the position.
pub struct ZlibHandler {
    depth_limit: Option<u32>,
}

impl ZlibHandler {
    pub fn new(depth_limit: Option<u32>) -> ZlibHandler {
        ZlibHandler { depth_limit }
    }
}

impl FormatHandler for ZlibHandler {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::ZLIB]
    }

    fn depth_limit(&self) -> Option<u32> {
        self.depth_limit
    }

    fn quick_check(&self, window: &[u8], _pos: u64) -> bool {
        engine::zlib_header_check(window)
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        let prefix = src.read_span(pos, 2)?;

        common::precompress_container(
            src,
            ctx,
            pos,
            tags::ZLIB,
            prefix,
            common::TrailerKind::Adler32,
            "zlib",
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
