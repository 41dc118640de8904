// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Prepack
//!
//! Prepack is a lossless precompression engine: it rewrites a byte stream so that
//! previously-compressed regions embedded inside it (deflate containers, bzip2, JPEG, MP3, GIF,
//! base64-encoded MIME parts) are expanded back into reconstructable form. The rewritten stream
//! compresses far better under a general-purpose compressor, and
//! [`restore`] reproduces the original bytes exactly.
//!
//! # Formats
//!
//! The supported container formats are listed below. The JPEG handler must be enabled via a
//! feature flag because it pulls in a heavyweight entropy recoder.
//!
//! | Format              | Feature Flag | Default |
//! |---------------------|--------------|---------|
//! | MIME base64         | `base64`     | Yes     |
//! | bzip2               | `bzip2`      | Yes     |
//! | GIF                 | `gif`        | Yes     |
//! | gzip                | `gzip`       | Yes     |
//! | JPEG                | `jpeg`       | No      |
//! | MP3                 | `mp3`        | Yes     |
//! | PDF FlateDecode     | `pdf`        | Yes     |
//! | PNG                 | `png`        | Yes     |
//! | SWF                 | `swf`        | Yes     |
//! | ZIP                 | `zip`        | Yes     |
//!
//! Raw zlib and headerless deflate streams are always compiled in; they are switched on at
//! runtime with [`Options::intense_mode`][core::options::Options] and
//! [`Options::brute_mode`][core::options::Options].
//!
//! # Usage
//!
//! 1. Build an [`Options`][core::options::Options] value describing the scan.
//! 2. Call [`default::get_registry`] to obtain a handler [`Registry`][core::handler::Registry]
//!    with all enabled formats registered, or register handlers by hand for a custom set.
//! 3. Call [`precompress`] with any [`ScanSource`][core::io::ScanSource] (a `File` or an
//!    in-memory `Cursor`) to write a PCF stream, and [`restore`] to get the original bytes
//!    back.

pub use prepack_core as core;

use std::io;

use crate::core::errors::Result;
use crate::core::io::ScanSource;
use crate::core::options::Options;
use crate::core::scanner::Statistics;

pub mod default {
    //! The `default` module provides convenience registry builders to get an implementer
    //! up-and-running as quickly as possible. Using it is completely optional; handlers can be
    //! registered by hand for custom handler sets.

    use crate::core::handler::{Registry, Tier};
    use crate::core::options::Options;

    /// Builds a handler registry for all enabled formats, honouring the per-format toggles and
    /// scan modes in `options`.
    ///
    /// Registration order is detection priority: structured containers first, then raw zlib,
    /// then brute-force deflate.
    pub fn get_registry(options: &Options) -> Registry {
        let mut registry = Registry::new();

        #[cfg(feature = "pdf")]
        if options.formats.pdf {
            registry.register(
                Box::new(prepack_format_deflate::PdfHandler::new()),
                Tier::Structured,
            );
        }

        #[cfg(feature = "zip")]
        if options.formats.zip {
            registry.register(
                Box::new(prepack_format_deflate::ZipHandler::new()),
                Tier::Structured,
            );
        }

        #[cfg(feature = "gzip")]
        if options.formats.gzip {
            registry.register(
                Box::new(prepack_format_deflate::GzipHandler::new()),
                Tier::Structured,
            );
        }

        #[cfg(feature = "png")]
        if options.formats.png {
            registry.register(
                Box::new(prepack_format_deflate::PngHandler::new()),
                Tier::Structured,
            );
        }

        #[cfg(feature = "swf")]
        if options.formats.swf {
            registry.register(
                Box::new(prepack_format_deflate::SwfHandler::new()),
                Tier::Structured,
            );
        }

        #[cfg(feature = "gif")]
        if options.formats.gif {
            registry.register(Box::new(prepack_format_gif::GifHandler::new()), Tier::Structured);
        }

        #[cfg(feature = "jpeg")]
        if options.formats.jpeg {
            registry.register(
                Box::new(prepack_format_jpeg::JpegHandler::new(
                    options.prog_only,
                    options.use_mjpeg,
                )),
                Tier::Structured,
            );
        }

        #[cfg(feature = "mp3")]
        if options.formats.mp3 {
            registry.register(Box::new(prepack_format_mp3::Mp3Handler::new()), Tier::Structured);
        }

        #[cfg(feature = "bzip2")]
        if options.formats.bzip2 {
            registry
                .register(Box::new(prepack_format_bzip2::Bzip2Handler::new()), Tier::Structured);
        }

        #[cfg(feature = "base64")]
        if options.formats.base64 {
            registry.register(
                Box::new(prepack_format_mime::MimeBase64Handler::new()),
                Tier::Structured,
            );
        }

        if options.intense_mode {
            registry.register(
                Box::new(prepack_format_deflate::ZlibHandler::new(
                    options.intense_depth_limit,
                )),
                Tier::Raw,
            );
        }

        if options.brute_mode {
            registry.register(
                Box::new(prepack_format_deflate::BruteDeflateHandler::new(
                    options.brute_depth_limit,
                )),
                Tier::Brute,
            );
        }

        registry
    }
}

/// Precompresses `source` into a PCF stream written to `out`, using the default registry for
/// `options`. Returns the scan statistics.
pub fn precompress(
    options: &Options,
    source: Box<dyn ScanSource>,
    out: &mut dyn io::Write,
    input_file_name: &str,
) -> Result<Statistics> {
    let mut registry = default::get_registry(options);
    core::scanner::precompress(&mut registry, options, source, out, input_file_name)
}

/// Restores the original bytes of a PCF stream, using the default registry for `options`.
/// Returns the parsed container header.
pub fn restore(
    options: &Options,
    input: &mut dyn io::Read,
    out: &mut dyn io::Write,
) -> Result<core::container::ContainerHeader> {
    let registry = default::get_registry(options);
    core::recompress::restore(&registry, input, out)
}
