// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The narrow seam to the lepton entropy recoder. Everything the handler knows about the
//! third-party codec lives here.

use std::io::Cursor;

use lepton_jpeg::{decode_lepton, encode_lepton, EnabledFeatures};

use prepack_core::errors::{decode_error, recompression_error, Result};

/// Losslessly recompresses a complete JPEG into a lepton stream.
pub fn pack(jpeg: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    match encode_lepton(
        &mut Cursor::new(jpeg),
        &mut out,
        8,
        &EnabledFeatures::compat_lepton_vector_write(),
    ) {
        Ok(_) => Ok(out),
        Err(_) => decode_error("jpeg: entropy recoding failed"),
    }
}

/// Reproduces the original JPEG bytes from a lepton stream.
pub fn unpack(packed: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    match decode_lepton(
        &mut Cursor::new(packed),
        &mut out,
        8,
        &EnabledFeatures::compat_lepton_vector_read(),
    ) {
        Ok(_) => Ok(out),
        Err(_) => recompression_error("jpeg: entropy decoding failed"),
    }
}
