// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

/// A `ProgressWriter` invokes a callback with the running byte count as data passes through to
/// the inner writer.
///
/// The callback runs on the write path and must not block.
pub struct ProgressWriter<W: io::Write, F: FnMut(u64)> {
    inner: W,
    callback: F,
    written: u64,
}

impl<W: io::Write, F: FnMut(u64)> ProgressWriter<W, F> {
    pub fn new(inner: W, callback: F) -> ProgressWriter<W, F> {
        ProgressWriter { inner, callback, written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write, F: FnMut(u64)> io::Write for ProgressWriter<W, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.written += written as u64;
        (self.callback)(self.written);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
