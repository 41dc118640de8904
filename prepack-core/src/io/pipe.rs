// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::sync::mpsc;

/// Creates an in-process pipe with the given channel depth (in chunks, not bytes).
///
/// The restore path uses this to feed a recursively-restored stream into the reverse codec of
/// the enclosing segment: a worker thread writes the inner stream into the [`PipeWriter`] while
/// the outer codec pulls from the [`PipeReader`]. Dropping the writer ends the reader with a
/// clean end-of-stream.
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(depth);
    (PipeWriter { tx }, PipeReader { rx, current: Vec::new(), offset: 0 })
}

pub struct PipeWriter {
    tx: mpsc::SyncSender<Vec<u8>>,
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    current: Vec<u8>,
    offset: usize,
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                // All writers gone: end of stream.
                Err(mpsc::RecvError) => return Ok(0),
            }
        }

        let avail = self.current.len() - self.offset;
        let count = avail.min(buf.len());
        buf[..count].copy_from_slice(&self.current[self.offset..self.offset + count]);
        self.offset += count;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use super::pipe;

    #[test]
    fn verify_pipe_transfers_all_bytes() {
        let (mut writer, mut reader) = pipe(4);

        let handle = thread::spawn(move || {
            for chunk in (0u8..100).collect::<Vec<u8>>().chunks(7) {
                writer.write_all(chunk).unwrap();
            }
            // Writer dropped here; reader sees end-of-stream.
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();

        assert_eq!(out, (0u8..100).collect::<Vec<u8>>());
    }
}
