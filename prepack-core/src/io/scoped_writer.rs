// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

/// A `ScopedWriter` passes through at most `len` bytes to the inner writer and silently
/// discards the rest.
///
/// A reverse codec regenerates its *whole* output stream deterministically, but a partial-match
/// segment only claims a prefix of it; the restore path scopes the codec's output to the
/// segment's `original_size` this way.
pub struct ScopedWriter<W: io::Write> {
    inner: W,
    remaining: u64,
}

impl<W: io::Write> ScopedWriter<W> {
    pub fn new(inner: W, len: u64) -> ScopedWriter<W> {
        ScopedWriter { inner, remaining: len }
    }

    /// The number of bytes still accepted before the excess is discarded.
    pub fn bytes_available(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> io::Write for ScopedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pass = (self.remaining.min(buf.len() as u64)) as usize;
        if pass > 0 {
            self.inner.write_all(&buf[..pass])?;
            self.remaining -= pass as u64;
        }
        // The excess is accepted and dropped.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::ScopedWriter;

    #[test]
    fn verify_excess_is_discarded() {
        let mut writer = ScopedWriter::new(Vec::new(), 5);
        writer.write_all(b"hello world").unwrap();
        writer.write_all(b"more").unwrap();

        assert_eq!(writer.bytes_available(), 0);
        assert_eq!(writer.into_inner(), b"hello");
    }
}
