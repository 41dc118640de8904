// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `checksum` module provides implementations of the error-detecting codes and hashing
//! algorithms the engine needs to rebuild containers (CRC-32) and to prove round-trips
//! (SHA-1).

mod adler32;
mod crc32;
mod sha1;

pub use adler32::{adler32, Adler32};
pub use crc32::{crc32, Crc32};
pub use sha1::Sha1;
