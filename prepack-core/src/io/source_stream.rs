// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::{Read, Seek, SeekFrom};

use crate::errors::{unsupported_error, Result};

use super::ScanSource;

/// The look-ahead, in bytes, that [`SourceStream::peek`] guarantees to format handlers short of
/// the end of the stream.
pub const CHECKBUF: usize = 4096;

/// `SourceStreamOptions` specifies the buffering behaviour of a `SourceStream`.
pub struct SourceStreamOptions {
    /// The buffer size. Must be at least 4x the look-ahead window.
    pub buffer_len: usize,
}

impl Default for SourceStreamOptions {
    fn default() -> Self {
        SourceStreamOptions { buffer_len: 64 * 1024 }
    }
}

/// A `SourceStream` is the sliding byte-window the scanner walks over its input.
///
/// By using type erasure and dynamic dispatch, `SourceStream` wraps and hides the inner reader,
/// allowing any typical `Read`er to be scanned in a generic way, selectable at runtime.
///
/// The window guarantees a [`CHECKBUF`]-byte look-ahead ([`peek`][SourceStream::peek]) at the
/// current position without consuming, and restartable reads of earlier spans
/// ([`reread_from`][SourceStream::reread_from]) so format handlers can re-consume the bytes they
/// claimed. Seekable sources serve re-reads of any span; stream-only sources can only serve spans
/// still held in the buffer.
pub struct SourceStream {
    /// The source reader.
    inner: Box<dyn ScanSource>,
    /// The sliding buffer.
    buf: Box<[u8]>,
    /// Absolute stream position of `buf[0]`.
    buf_pos: u64,
    /// The read offset into `buf`. The current stream position is `buf_pos + read_off`.
    read_off: usize,
    /// Number of valid bytes in `buf`.
    valid: usize,
    /// The inner reader returned 0 bytes; `buf[..valid]` holds the remainder of the stream.
    at_inner_eof: bool,
    /// Cached seekability of the inner reader.
    seekable: bool,
    /// Cached total length of the inner reader, if known.
    total_len: Option<u64>,
}

impl SourceStream {
    pub fn new(source: Box<dyn ScanSource>, options: SourceStreamOptions) -> Self {
        assert!(options.buffer_len >= 4 * CHECKBUF);

        let seekable = source.is_seekable();
        let total_len = source.byte_len();

        SourceStream {
            inner: source,
            buf: vec![0; options.buffer_len].into_boxed_slice(),
            buf_pos: 0,
            read_off: 0,
            valid: 0,
            at_inner_eof: false,
            seekable,
            total_len,
        }
    }

    /// Gets the current stream position. Monotonically non-decreasing.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.buf_pos + self.read_off as u64
    }

    /// Gets the total length of the stream, if known.
    pub fn byte_len(&self) -> Option<u64> {
        self.total_len
    }

    /// Returns a view of at least `min(len, remaining)` bytes starting at the current position,
    /// without consuming them. `len` may be up to [`CHECKBUF`]. An empty view indicates the end
    /// of the stream.
    pub fn peek(&mut self, len: usize) -> Result<&[u8]> {
        debug_assert!(len <= CHECKBUF);

        if self.valid - self.read_off < len && !self.at_inner_eof {
            self.refill()?;
        }

        let avail = cmp::min(len, self.valid - self.read_off);
        Ok(&self.buf[self.read_off..self.read_off + avail])
    }

    /// Consumes `len` bytes.
    pub fn advance(&mut self, len: u64) -> Result<()> {
        let buffered = (self.valid - self.read_off) as u64;

        if len <= buffered {
            self.read_off += len as usize;
            return Ok(());
        }

        // The skip extends beyond the buffered window.
        let target = self.position() + len;

        if self.seekable {
            self.inner.seek(SeekFrom::Start(target))?;
            self.buf_pos = target;
            self.read_off = 0;
            self.valid = 0;
            self.at_inner_eof = false;
        }
        else {
            // Read-and-discard on stream-only sources.
            self.read_off = self.valid;
            let mut remaining = len - buffered;
            let mut sink = [0u8; 8192];

            while remaining > 0 {
                let want = cmp::min(remaining, sink.len() as u64) as usize;
                let count = self.inner.read(&mut sink[..want])?;
                if count == 0 {
                    break;
                }
                remaining -= count as u64;
            }

            self.buf_pos = target - remaining;
            self.read_off = 0;
            self.valid = 0;
            self.at_inner_eof = remaining > 0;
        }

        Ok(())
    }

    /// Re-reads a span the scanner previously passed over, filling `buf` with up-to
    /// `buf.len()` bytes starting at absolute position `pos`, and returns the number of bytes
    /// read.
    ///
    /// Fails only if the source is not seekable and the span has fallen out of the buffer, which
    /// the scanner treats as a handler rejection.
    pub fn reread_from(&mut self, pos: u64, buf: &mut [u8]) -> Result<usize> {
        // Serve from the buffer when the span is (still, or already) resident.
        let buf_end = self.buf_pos + self.valid as u64;

        if pos >= self.buf_pos && pos < buf_end {
            let off = (pos - self.buf_pos) as usize;
            let avail = self.valid - off;
            let count = cmp::min(avail, buf.len());
            buf[..count].copy_from_slice(&self.buf[off..off + count]);

            // A short read that the inner stream could extend falls through to a seek.
            if count == buf.len() || (self.at_inner_eof && !self.seekable) {
                return Ok(count);
            }
        }

        if !self.seekable {
            return unsupported_error("span is no longer buffered");
        }

        // Save the fetch position so the scan window can resume afterwards.
        let resume = self.buf_pos + self.valid as u64;

        self.inner.seek(SeekFrom::Start(pos))?;

        let mut total = 0;
        while total < buf.len() {
            let count = self.inner.read(&mut buf[total..])?;
            if count == 0 {
                break;
            }
            total += count;
        }

        self.inner.seek(SeekFrom::Start(resume))?;

        Ok(total)
    }

    /// Re-reads exactly `len` bytes starting at absolute position `pos`.
    pub fn read_span(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let count = self.reread_from(pos, &mut buf)?;
        if count < len {
            return crate::errors::end_of_stream_error();
        }
        Ok(buf)
    }

    /// Returns a sequential [`std::io::Read`]er over the stream starting at absolute position
    /// `pos`, leaving the scan window untouched.
    pub fn reader_at(&mut self, pos: u64) -> SpanReader<'_> {
        SpanReader { src: self, pos }
    }

    /// Slide the buffer window and fill it from the inner reader.
    fn refill(&mut self) -> Result<()> {
        // Compact: move the unread tail to the front of the buffer.
        if self.read_off > 0 {
            self.buf.copy_within(self.read_off..self.valid, 0);
            self.buf_pos += self.read_off as u64;
            self.valid -= self.read_off;
            self.read_off = 0;
        }

        while self.valid < self.buf.len() {
            let count = self.inner.read(&mut self.buf[self.valid..])?;
            if count == 0 {
                self.at_inner_eof = true;
                break;
            }
            self.valid += count;
        }

        Ok(())
    }
}

/// A sequential reader over a [`SourceStream`] span, implemented with restartable re-reads so
/// the scan position is unaffected.
pub struct SpanReader<'a> {
    src: &'a mut SourceStream,
    pos: u64,
}

impl<'a> SpanReader<'a> {
    /// The absolute stream position of the next byte this reader returns.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<'a> io::Read for SpanReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let got = self
            .src
            .reread_from(self.pos, buf)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        self.pos += got as u64;
        Ok(got)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{SourceStream, SourceStreamOptions, CHECKBUF};
    use crate::io::ReadOnlySource;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn stream_over(data: Vec<u8>) -> SourceStream {
        SourceStream::new(Box::new(Cursor::new(data)), Default::default())
    }

    #[test]
    fn verify_peek_does_not_consume() {
        let mut stream = stream_over(pattern(100));

        let first = stream.peek(16).unwrap().to_vec();
        let again = stream.peek(16).unwrap().to_vec();

        assert_eq!(first, again);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn verify_peek_across_buffer_slide() {
        let data = pattern(256 * 1024);
        let mut stream = stream_over(data.clone());

        let mut pos = 0usize;
        while pos < data.len() {
            let window = stream.peek(CHECKBUF).unwrap();
            assert!(!window.is_empty());
            assert_eq!(window[0], data[pos]);
            let step = window.len().min(977);
            stream.advance(step as u64).unwrap();
            pos += step;
        }

        assert!(stream.peek(1).unwrap().is_empty());
    }

    #[test]
    fn verify_advance_beyond_buffer() {
        let data = pattern(300 * 1024);
        let mut stream = stream_over(data.clone());

        stream.peek(CHECKBUF).unwrap();
        stream.advance(200 * 1024).unwrap();

        assert_eq!(stream.position(), 200 * 1024);
        assert_eq!(stream.peek(1).unwrap()[0], data[200 * 1024]);
    }

    #[test]
    fn verify_reread_behind_position() {
        let data = pattern(128 * 1024);
        let mut stream = stream_over(data.clone());

        stream.peek(CHECKBUF).unwrap();
        stream.advance(100 * 1024).unwrap();
        stream.peek(CHECKBUF).unwrap();

        let span = stream.read_span(10, 64).unwrap();
        assert_eq!(span, &data[10..74]);

        // The scan window is unaffected by the re-read.
        assert_eq!(stream.position(), 100 * 1024);
        assert_eq!(stream.peek(1).unwrap()[0], data[100 * 1024]);
    }

    #[test]
    fn verify_unseekable_reread_within_buffer() {
        let data = pattern(32 * 1024);
        let source = ReadOnlySource::new(Cursor::new(data.clone()));
        let mut stream = SourceStream::new(Box::new(source), Default::default());

        stream.peek(CHECKBUF).unwrap();
        stream.advance(8).unwrap();

        let span = stream.read_span(0, 16).unwrap();
        assert_eq!(span, &data[0..16]);
    }

    #[test]
    fn verify_unseekable_reread_out_of_window_fails() {
        let data = pattern(512 * 1024);
        let source = ReadOnlySource::new(Cursor::new(data));
        let options = SourceStreamOptions { buffer_len: 64 * 1024 };
        let mut stream = SourceStream::new(Box::new(source), options);

        stream.peek(CHECKBUF).unwrap();
        stream.advance(400 * 1024).unwrap();
        stream.peek(CHECKBUF).unwrap();

        let mut buf = [0u8; 16];
        assert!(stream.reread_from(0, &mut buf).is_err());
    }
}
