// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `options` module defines the configuration knobs that affect the engine's behaviour.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Per-format enable switches consumed by the registry builder.
#[derive(Copy, Clone, Debug)]
pub struct FormatToggles {
    pub pdf: bool,
    pub zip: bool,
    pub gzip: bool,
    pub png: bool,
    pub gif: bool,
    pub jpeg: bool,
    pub mp3: bool,
    pub swf: bool,
    pub base64: bool,
    pub bzip2: bool,
}

impl Default for FormatToggles {
    fn default() -> Self {
        FormatToggles {
            pdf: true,
            zip: true,
            gzip: true,
            png: true,
            gif: true,
            jpeg: true,
            mp3: true,
            swf: true,
            base64: true,
            bzip2: true,
        }
    }
}

/// `Options` is the set of configuration values affecting scanning, verification, and
/// recursion.
#[derive(Clone, Debug)]
pub struct Options {
    /// Prove at precompress time that every claimed segment restores bit-exactly, and reject
    /// segments that do not. Default: `true`.
    pub verify_precompressed: bool,
    /// Maximum number of bytes in a single uncompressed segment before a forced flush, so
    /// downstream consumers can start processing. Default: 100 MiB.
    pub uncompressed_block_length: u64,
    /// Input positions at which no handler may attempt precompression, in stream order.
    pub ignore_positions: Vec<u64>,
    /// Maximum recursion depth when re-scanning precompressed payloads. Default: `10`.
    pub max_recursion_depth: u32,
    /// Enable the raw-zlib handler, which claims bare zlib streams without any enclosing
    /// container. Default: `false`.
    pub intense_mode: bool,
    /// Recursion depth limit for the raw-zlib handler, if enabled.
    pub intense_depth_limit: Option<u32>,
    /// Enable the raw-deflate handler, which claims headerless deflate streams. Slow and prone
    /// to false positives on short streams. Default: `false`.
    pub brute_mode: bool,
    /// Recursion depth limit for the raw-deflate handler, if enabled.
    pub brute_depth_limit: Option<u32>,
    /// Per-format enable switches.
    pub formats: FormatToggles,
    /// JPEG: restrict precompression to progressive streams. Default: `false`.
    pub prog_only: bool,
    /// PDF: wrap image streams of known dimensions in a BMP header. Default: `false`.
    pub pdf_bmp_mode: bool,
    /// JPEG: splice the canonical Huffman table into Motion-JPEG frames that lack one.
    /// Default: `true`.
    pub use_mjpeg: bool,
    /// Minimum number of original bytes a partial-match handler will claim. Default: `4`.
    pub min_ident_size: u64,
    /// Payloads larger than this spill to scratch files instead of staying in memory.
    /// Default: 25 MiB.
    pub in_memory_limit: u64,
    /// Deflate: re-run the reverse path inside the deflate engine and byte-compare against the
    /// original stream before accepting. Default: `true`.
    pub verify_deflate: bool,
    /// Directory for scratch files. Defaults to the system temporary directory.
    pub work_dir: Option<PathBuf>,
    /// Cooperative abort flag, observed at the start of each scanner iteration.
    pub abort: Option<Arc<AtomicBool>>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            verify_precompressed: true,
            uncompressed_block_length: 100 * 1024 * 1024,
            ignore_positions: Vec::new(),
            max_recursion_depth: 10,
            intense_mode: false,
            intense_depth_limit: None,
            brute_mode: false,
            brute_depth_limit: None,
            formats: Default::default(),
            prog_only: false,
            pdf_bmp_mode: false,
            use_mjpeg: true,
            min_ident_size: 4,
            in_memory_limit: 25 * 1024 * 1024,
            verify_deflate: true,
            work_dir: None,
            abort: None,
        }
    }
}

impl Options {
    /// Returns true if the abort flag is set.
    pub fn aborted(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.abort.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
