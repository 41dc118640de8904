// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Prepack handlers for the deflate container family.
//!
//! Six containers share one precompress/recompress engine and differ only in their framing:
//!
//! * [`GzipHandler`] — RFC 1952 gzip members (tag 2)
//! * [`ZipHandler`] — ZIP local file entries, method 8 (tag 1)
//! * [`PngHandler`] — PNG IDAT chains, single or multi chunk (tags 3 and 4)
//! * [`PdfHandler`] — PDF `/FlateDecode` streams (tag 0)
//! * [`SwfHandler`] — zlib-compressed Flash files (tag 7)
//! * [`ZlibHandler`] — bare zlib streams, intense mode (tag 255)
//! * [`BruteDeflateHandler`] — headerless deflate streams, brute mode (tag 254)
//!
//! The engine inflates with `flate2` and reproduces the original stream by searching for the
//! deflate level whose deterministic re-compression matches it, patching small divergences with
//! penalty bytes and claiming the best-scoring prefix when the stream cannot be matched to the
//! end.

mod brute;
mod common;
mod engine;
#[cfg(feature = "gzip")]
mod gzip;
#[cfg(feature = "pdf")]
mod pdf;
#[cfg(feature = "png")]
mod png;
#[cfg(feature = "swf")]
mod swf;
#[cfg(feature = "zip")]
mod zip;
mod zlib;

pub use brute::BruteDeflateHandler;
#[cfg(feature = "gzip")]
pub use gzip::GzipHandler;
#[cfg(feature = "pdf")]
pub use pdf::PdfHandler;
#[cfg(feature = "png")]
pub use png::PngHandler;
#[cfg(feature = "swf")]
pub use swf::SwfHandler;
#[cfg(feature = "zip")]
pub use zip::ZipHandler;
pub use zlib::ZlibHandler;
