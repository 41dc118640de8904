// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

/// A `Monitor` provides a common interface to examine the bytes passing through a
/// [`MonitorStream`].
pub trait Monitor {
    fn process_byte(&mut self, byte: u8);

    fn process_buf_bytes(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.process_byte(byte);
        }
    }
}

/// A `MonitorStream` is a passive writer that forwards all bytes written to the inner writer to
/// a [`Monitor`].
pub struct MonitorStream<W: io::Write, M: Monitor> {
    inner: W,
    monitor: M,
}

impl<W: io::Write, M: Monitor> MonitorStream<W, M> {
    pub fn new(inner: W, monitor: M) -> MonitorStream<W, M> {
        MonitorStream { inner, monitor }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut M {
        &mut self.monitor
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn into_monitor(self) -> M {
        self.monitor
    }
}

impl<W: io::Write, M: Monitor> io::Write for MonitorStream<W, M> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.monitor.process_buf_bytes(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
