// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

/// Generate the lookup table for the reflected IEEE CRC-32 polynomial.
const fn build_table() -> [u32; 256] {
    // The reflected polynomial of 0x04c11db7.
    const POLY: u32 = 0xedb8_8320;

    let mut table = [0u32; 256];

    let mut n = 0;
    while n < 256 {
        let mut crc = n as u32;

        let mut k = 0;
        while k < 8 {
            crc = if crc & 1 != 0 { POLY ^ (crc >> 1) } else { crc >> 1 };
            k += 1;
        }

        table[n] = crc;
        n += 1;
    }

    table
}

const CRC32_TABLE: [u32; 256] = build_table();

/// The IEEE CRC-32 as used by gzip members and PNG chunks.
#[derive(Default)]
pub struct Crc32 {
    crc: u32,
}

impl Crc32 {
    pub fn new() -> Crc32 {
        Crc32 { crc: 0 }
    }

    pub fn update(&mut self, buf: &[u8]) {
        let mut crc = !self.crc;
        for &byte in buf {
            crc = CRC32_TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8);
        }
        self.crc = !crc;
    }

    pub fn crc(&self) -> u32 {
        self.crc
    }
}

/// Computes the CRC-32 of a whole buffer in one call.
pub fn crc32(buf: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(buf);
    crc.crc()
}

impl Monitor for Crc32 {
    fn process_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        self.update(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::Crc32;

    #[test]
    fn verify_crc32() {
        // Check values from the CRC catalogue for CRC-32/ISO-HDLC.
        let mut crc = Crc32::new();
        crc.update(b"123456789");
        assert_eq!(crc.crc(), 0xcbf4_3926);

        let mut crc = Crc32::new();
        crc.update(b"");
        assert_eq!(crc.crc(), 0x0000_0000);

        // Incremental updates must match a single update.
        let mut split = Crc32::new();
        split.update(b"1234");
        split.update(b"56789");
        assert_eq!(split.crc(), 0xcbf4_3926);
    }
}
