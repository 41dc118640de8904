// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::io::Monitor;

fn transform(state: &mut [u32; 5], buf: &[u8]) {
    // Assert to hopefully force the compiler to elide bounds checks on buf.
    assert!(buf.len() == 64);

    let mut w = [0u32; 80];

    for (i, word) in buf.chunks_exact(4).enumerate() {
        w[i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }

    for i in 16..80 {
        w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
    }

    let mut a = state[0];
    let mut b = state[1];
    let mut c = state[2];
    let mut d = state[3];
    let mut e = state[4];

    for (i, &word) in w.iter().enumerate() {
        let (f, k) = match i {
            0..=19 => ((b & c) | (!b & d), 0x5a82_7999),
            20..=39 => (b ^ c ^ d, 0x6ed9_eba1),
            40..=59 => ((b & c) | (b & d) | (c & d), 0x8f1b_bcdc),
            _ => (b ^ c ^ d, 0xca62_c1d6),
        };

        let temp = a
            .rotate_left(5)
            .wrapping_add(f)
            .wrapping_add(e)
            .wrapping_add(k)
            .wrapping_add(word);

        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = temp;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
}

/// A streaming SHA-1 hasher.
pub struct Sha1 {
    state: [u32; 5],
    buf: [u8; 64],
    buf_len: usize,
    len: u64,
}

impl Default for Sha1 {
    fn default() -> Self {
        Sha1::new()
    }
}

impl Sha1 {
    pub fn new() -> Sha1 {
        Sha1 {
            state: [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476, 0xc3d2_e1f0],
            buf: [0; 64],
            buf_len: 0,
            len: 0,
        }
    }

    /// The total number of bytes hashed so far.
    pub fn byte_count(&self) -> u64 {
        self.len
    }

    pub fn update(&mut self, mut buf: &[u8]) {
        self.len += buf.len() as u64;

        if self.buf_len > 0 {
            let fill = (64 - self.buf_len).min(buf.len());
            self.buf[self.buf_len..self.buf_len + fill].copy_from_slice(&buf[..fill]);
            self.buf_len += fill;
            buf = &buf[fill..];

            if self.buf_len == 64 {
                let block = self.buf;
                transform(&mut self.state, &block);
                self.buf_len = 0;
            }
        }

        while buf.len() >= 64 {
            transform(&mut self.state, &buf[..64]);
            buf = &buf[64..];
        }

        if !buf.is_empty() {
            self.buf[..buf.len()].copy_from_slice(buf);
            self.buf_len = buf.len();
        }
    }

    /// Consumes the hasher and returns the 160-bit digest.
    pub fn finalize(mut self) -> [u8; 20] {
        let bit_len = self.len.wrapping_mul(8);

        self.update(&[0x80]);
        while self.buf_len != 56 {
            self.update(&[0]);
        }

        // The length words bring the final block to exactly 64 bytes.
        self.update(&bit_len.to_be_bytes());
        debug_assert!(self.buf_len == 0);

        let mut digest = [0u8; 20];
        for (chunk, word) in digest.chunks_exact_mut(4).zip(self.state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        digest
    }
}

impl Monitor for Sha1 {
    fn process_byte(&mut self, byte: u8) {
        self.update(&[byte]);
    }

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        self.update(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::Sha1;

    fn hex(digest: [u8; 20]) -> String {
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn verify_sha1_test_vectors() {
        let sha = Sha1::new();
        assert_eq!(hex(sha.finalize()), "da39a3ee5e6b4b0d3255bfef95601890afd80709");

        let mut sha = Sha1::new();
        sha.update(b"abc");
        assert_eq!(hex(sha.finalize()), "a9993e364706816aba3e25717850c26c9cd0d89d");

        let mut sha = Sha1::new();
        sha.update(b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq");
        assert_eq!(hex(sha.finalize()), "84983e441c3bd26ebaae4aa1f95129e5e54670f1");
    }

    #[test]
    fn verify_sha1_split_updates() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 256) as u8).collect();

        let mut whole = Sha1::new();
        whole.update(&data);

        let mut split = Sha1::new();
        for chunk in data.chunks(17) {
            split.update(chunk);
        }

        assert_eq!(whole.finalize(), split.finalize());
    }
}
