// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Shared structs, traits, and building blocks of Prepack.
//!
//! Prepack rewrites a byte stream so that previously-compressed regions embedded inside it
//! (deflate containers, bzip2, JPEG, MP3, GIF, base64-encoded MIME parts, ...) are expanded back
//! into reconstructable form. The rewritten stream compresses far better under a general-purpose
//! compressor, and the original bytes can always be reproduced exactly.
//!
//! This crate contains everything that is not specific to a single container format:
//!
//! * [`io`] — the byte-window reader the scanner walks, plus composable reader/writer plumbing
//!   (vlint coding, write monitors, the penalty-byte patch writer, scratch files, and the
//!   worker-thread pipe used when restoring recursive streams).
//! * [`checksum`] — streaming CRC-32 and SHA-1.
//! * [`handler`] — the contract every container format plugs into, and the registry the scanner
//!   dispatches through.
//! * [`stream`] — the block-at-a-time precompressor/recompressor interface used by formats that
//!   must run in bounded memory.
//! * [`penalty`] — bounded lists of byte patches that fix up near-exact recompressions.
//! * [`container`] — the PCF framing written by the precompress path and read back on restore.
//! * [`scanner`] — the single-pass scan/dispatch loop, including the recursion driver.
//! * [`verify`] — the proof, at precompress time, that a claimed segment restores bit-exactly.
//! * [`recompress`] — the reverse path.
//!
//! Format support itself lives in the `prepack-format-*` crates; the `prepack` crate ties the
//! default set together behind feature flags.

pub mod checksum;
pub mod container;
pub mod errors;
pub mod handler;
pub mod io;
pub mod options;
pub mod penalty;
pub mod recompress;
pub mod scanner;
pub mod stream;
pub mod verify;
