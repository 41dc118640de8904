// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// The Adler-32 checksum trailing every zlib stream.
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Adler32::new()
    }
}

impl Adler32 {
    // The largest prime smaller than 2^16.
    const MOD: u32 = 65_521;

    pub fn new() -> Adler32 {
        Adler32 { a: 1, b: 0 }
    }

    pub fn update(&mut self, buf: &[u8]) {
        // 5552 is the largest run that cannot overflow 32 bits before the modulo.
        for chunk in buf.chunks(5552) {
            for &byte in chunk {
                self.a += u32::from(byte);
                self.b += self.a;
            }
            self.a %= Self::MOD;
            self.b %= Self::MOD;
        }
    }

    pub fn checksum(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// Computes the Adler-32 of a whole buffer in one call.
pub fn adler32(buf: &[u8]) -> u32 {
    let mut adler = Adler32::new();
    adler.update(buf);
    adler.checksum()
}

#[cfg(test)]
mod tests {
    use super::adler32;

    #[test]
    fn verify_adler32() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11e6_0398);
    }
}
