// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `handler` module provides the traits and support structures necessary to implement
//! format handlers, and the registry the scanner dispatches through.

use std::io;

use bitflags::bitflags;

use crate::errors::Result;
use crate::io::{Payload, ScratchDir, SourceStream};
use crate::options::Options;
use crate::penalty::PenaltyList;
use crate::scanner::Statistics;

bitflags! {
    /// The flag byte heading every precompressed segment.
    ///
    /// Bits 2 through 6 carry format-specific meaning and are free for handlers to define; the
    /// remaining bits are managed by the container layer.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct SegmentFlags: u8 {
        /// Always set on a precompressed segment. A clear bit 0 marks an uncompressed run.
        const PRESENT = 0x01;
        /// A penalty-byte list follows the format header data.
        const PENALTY_BYTES = 0x02;
        const FORMAT_0 = 0x04;
        const FORMAT_1 = 0x08;
        const FORMAT_2 = 0x10;
        const FORMAT_3 = 0x20;
        const FORMAT_4 = 0x40;
        /// The payload is itself a complete PCF stream.
        const RECURSION = 0x80;
    }
}

impl SegmentFlags {
    /// The format-specific bits of the flag byte.
    pub fn format_bits(self) -> SegmentFlags {
        self & (SegmentFlags::FORMAT_0
            | SegmentFlags::FORMAT_1
            | SegmentFlags::FORMAT_2
            | SegmentFlags::FORMAT_3
            | SegmentFlags::FORMAT_4)
    }
}

/// The in-memory result of one successful precompression claim.
pub struct Precompressed {
    /// The format tag identifying the handler on the restore path.
    pub tag: u8,
    /// Format-specific flag bits (bits 2..=6 only).
    pub format_flags: SegmentFlags,
    /// The number of input bytes the segment covers.
    pub original_size: u64,
    /// Opaque bytes the reverse path needs to reproduce the original container exactly.
    pub header_data: Vec<u8>,
    /// Patches applied to the recompressed output on restore.
    pub penalty_bytes: PenaltyList,
    /// The precompressed payload.
    pub payload: Payload,
    /// When the recursion driver replaced the payload with a nested PCF stream, its length.
    /// `payload` then holds the nested stream while `precompressed_size` keeps the payload's
    /// pre-recursion length.
    pub recursion_size: Option<u64>,
    /// The payload's pre-recursion length.
    pub precompressed_size: u64,
}

impl Precompressed {
    pub fn new(tag: u8, original_size: u64, payload: Payload) -> Precompressed {
        let precompressed_size = payload.len();
        Precompressed {
            tag,
            format_flags: SegmentFlags::empty(),
            original_size,
            header_data: Vec::new(),
            penalty_bytes: PenaltyList::default(),
            payload,
            recursion_size: None,
            precompressed_size,
        }
    }

    /// The flag byte as serialized into the container.
    pub fn flag_byte(&self) -> u8 {
        let mut flags = SegmentFlags::PRESENT | self.format_flags.format_bits();
        if !self.penalty_bytes.is_empty() {
            flags |= SegmentFlags::PENALTY_BYTES;
        }
        if self.recursion_size.is_some() {
            flags |= SegmentFlags::RECURSION;
        }
        flags.bits()
    }
}

/// Shared state a handler may use while precompressing: configuration, scratch file naming, and
/// the statistics counters.
pub struct ScanContext<'a> {
    pub options: &'a Options,
    pub scratch: &'a ScratchDir,
    pub stats: &'a mut Statistics,
    /// Recursion depth of the running scan; `0` at the top level.
    pub depth: u32,
}

/// `FormatHandler` is the contract every supported container format implements.
///
/// The forward path is `quick_check` (a cheap look at a fixed-size window) followed by
/// `precompress` (the expensive claim attempt). The reverse path is `read_header_data`
/// (delimit and collect the format-specific header bytes of one segment) followed by
/// `recompress` (reproduce the original container bytes from payload plus header data).
///
/// `precompress` must leave the source position untouched; it examines the stream through
/// [`SourceStream::peek`] and [`SourceStream::reread_from`] only, and the scanner advances past
/// the claimed bytes itself.
pub trait FormatHandler: Send + Sync {
    /// A short lower-case name for logging and statistics.
    fn name(&self) -> &'static str;

    /// The format tag bytes this handler writes and reads.
    fn format_tags(&self) -> &'static [u8];

    /// Whether the recursion driver may re-scan this handler's payloads.
    fn recursion_allowed(&self) -> bool {
        true
    }

    /// An optional scan-depth limit below the global recursion limit. The scanner skips this
    /// handler entirely at depths beyond the limit.
    fn depth_limit(&self) -> Option<u32> {
        None
    }

    /// Cheaply decide whether this handler wants the position. `window` holds up to
    /// [`CHECKBUF`][crate::io::CHECKBUF] bytes of look-ahead.
    fn quick_check(&self, window: &[u8], pos: u64) -> bool;

    /// Attempt to claim the stream at `pos`. Returns `Ok(None)` to reject.
    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>>;

    /// Reads the format-specific header data of one segment from the container and returns it
    /// re-serialized, so `recompress` can be driven from it.
    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        flags: SegmentFlags,
        tag: u8,
    ) -> Result<Vec<u8>>;

    /// Reproduces the original container bytes from the precompressed payload and the header
    /// data. The writer is already scoped to `original_size` bytes and applies penalty patches
    /// transparently.
    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        header_data: &[u8],
        flags: SegmentFlags,
        tag: u8,
    ) -> Result<()>;

    /// Called once at the start of every top-level scan. Handlers carrying per-run state
    /// (suppression maps, parse caches) clear it here.
    fn reset(&mut self) {}
}

/// The dispatch priority of a handler. Structured containers are asked first, raw formats with
/// weaker magic second, and brute-force handlers last.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Structured,
    Raw,
    Brute,
}

struct Entry {
    tier: Tier,
    handler: Box<dyn FormatHandler>,
}

/// A priority-ordered collection of format handlers.
///
/// Dispatch order is `Tier` first, registration order second, and never anything else, so the
/// scan output is a deterministic function of input and configuration.
#[derive(Default)]
pub struct Registry {
    entries: Vec<Entry>,
}

impl Registry {
    pub fn new() -> Registry {
        Default::default()
    }

    pub fn register(&mut self, handler: Box<dyn FormatHandler>, tier: Tier) {
        let at = self.entries.partition_point(|entry| entry.tier <= tier);
        self.entries.insert(at, Entry { tier, handler });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> &dyn FormatHandler {
        self.entries[index].handler.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> &mut dyn FormatHandler {
        self.entries[index].handler.as_mut()
    }

    /// Finds the handler that reads and writes segments with the given format tag.
    pub fn by_tag(&self, tag: u8) -> Option<&dyn FormatHandler> {
        self.entries
            .iter()
            .find(|entry| entry.handler.format_tags().contains(&tag))
            .map(|entry| entry.handler.as_ref())
    }

    /// Clears the per-run state of all handlers.
    pub fn reset_all(&mut self) {
        for entry in &mut self.entries {
            entry.handler.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FormatHandler, Registry, ScanContext, SegmentFlags, Tier};
    use crate::errors::Result;
    use crate::handler::Precompressed;
    use crate::io::SourceStream;

    struct Dummy(&'static str, &'static [u8]);

    impl FormatHandler for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }

        fn format_tags(&self) -> &'static [u8] {
            self.1
        }

        fn quick_check(&self, _: &[u8], _: u64) -> bool {
            false
        }

        fn precompress(
            &mut self,
            _: &mut SourceStream,
            _: &mut ScanContext<'_>,
            _: u64,
        ) -> Result<Option<Precompressed>> {
            Ok(None)
        }

        fn read_header_data(
            &self,
            _: &mut dyn std::io::Read,
            _: SegmentFlags,
            _: u8,
        ) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn recompress(
            &self,
            _: &mut dyn std::io::Read,
            _: &mut dyn std::io::Write,
            _: &[u8],
            _: SegmentFlags,
            _: u8,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn verify_registry_order_is_tier_then_registration() {
        let mut registry = Registry::new();
        registry.register(Box::new(Dummy("brute", &[254])), Tier::Brute);
        registry.register(Box::new(Dummy("gzip", &[2])), Tier::Structured);
        registry.register(Box::new(Dummy("zlib", &[255])), Tier::Raw);
        registry.register(Box::new(Dummy("zip", &[1])), Tier::Structured);

        let order: Vec<&str> = (0..registry.len()).map(|i| registry.get(i).name()).collect();
        assert_eq!(order, vec!["gzip", "zip", "zlib", "brute"]);
    }

    #[test]
    fn verify_lookup_by_tag() {
        let mut registry = Registry::new();
        registry.register(Box::new(Dummy("gzip", &[2])), Tier::Structured);
        registry.register(Box::new(Dummy("png", &[3, 4])), Tier::Structured);

        assert_eq!(registry.by_tag(4).unwrap().name(), "png");
        assert!(registry.by_tag(9).is_none());
    }
}
