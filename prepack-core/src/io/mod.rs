// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements composable byte-level I/O.
//!
//! Any [`std::io::Read`]er gains the [`ReadBytes`] interface and any [`std::io::Write`]r gains
//! the [`WriteBytes`] interface, including the variable-length integer coding used throughout
//! the PCF container. The scanner consumes sources implementing [`ScanSource`] through a
//! [`SourceStream`], which guarantees a fixed look-ahead window and cheap restartable reads.

use std::io;

use crate::errors::{Error, Result};

mod monitor_stream;
mod patch_stream;
mod pipe;
mod progress;
mod scoped_writer;
mod scratch;
mod source_stream;

pub use monitor_stream::{Monitor, MonitorStream};
pub use patch_stream::PatchedWriter;
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use progress::ProgressWriter;
pub use scoped_writer::ScopedWriter;
pub use scratch::{Payload, ScratchDir, ScratchFile};
pub use source_stream::{SourceStream, SourceStreamOptions, SpanReader, CHECKBUF};

/// `ScanSource` is a composite trait of [`std::io::Read`] and [`std::io::Seek`]. A source *must*
/// implement this trait to be scanned through a [`SourceStream`].
///
/// Despite requiring the [`std::io::Seek`] trait, seeking is an optional capability that can be
/// queried at runtime.
pub trait ScanSource: io::Read + io::Seek + Send {
    /// Returns if the source is seekable. This may be an expensive operation.
    fn is_seekable(&self) -> bool;

    /// Returns the length in bytes, if available. This may be an expensive operation.
    fn byte_len(&self) -> Option<u64>;
}

impl ScanSource for std::fs::File {
    fn is_seekable(&self) -> bool {
        // If the file's metadata is available, and the file is a regular file (i.e., not a FIFO,
        // etc.), then the source will be seekable. Otherwise assume it is not.
        match self.metadata() {
            Ok(metadata) => metadata.is_file(),
            _ => false,
        }
    }

    fn byte_len(&self) -> Option<u64> {
        match self.metadata() {
            Ok(metadata) => Some(metadata.len()),
            _ => None,
        }
    }
}

impl<T: AsRef<[u8]> + Send> ScanSource for io::Cursor<T> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// `ReadOnlySource` wraps any source implementing [`std::io::Read`] in an unseekable
/// [`ScanSource`].
pub struct ReadOnlySource<R: io::Read> {
    inner: R,
}

impl<R: io::Read + Send> ReadOnlySource<R> {
    /// Instantiates a new `ReadOnlySource<R>` by taking ownership and wrapping the provided
    /// `Read`er.
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }

    /// Unwraps this `ReadOnlySource<R>`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read + Send> io::Read for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: io::Read + Send> io::Seek for ReadOnlySource<R> {
    fn seek(&mut self, _: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "source does not support seeking"))
    }
}

impl<R: io::Read + Send> ScanSource for ReadOnlySource<R> {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// `ReadBytes` provides methods to read bytes and interpret them as integers of standard widths,
/// variable-length integers, or null-terminated strings.
pub trait ReadBytes {
    /// Reads a single byte from the stream and returns it or an error.
    fn read_byte(&mut self) -> Result<u8>;

    /// Reads up-to the number of bytes required to fill `buf` or returns an error.
    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Reads exactly the number of bytes required to fill the provided buffer or returns an
    /// error.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Reads a single unsigned byte from the stream and returns it or an error.
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        self.read_byte()
    }

    /// Reads two bytes from the stream and interprets them as an unsigned 16-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_buf_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit little-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_buf_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads four bytes from the stream and interprets them as an unsigned 32-bit big-endian
    /// integer or returns an error.
    #[inline(always)]
    fn read_be_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_buf_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads exactly the number of bytes requested, and returns them as a vector or an error.
    fn read_vec_exact(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_buf_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads a variable-length integer from the stream.
    ///
    /// The coding stores 7 bits per byte, least-significant group first, with the continuation
    /// bit set on every byte except the last. Each continuation byte additionally shifts the
    /// decoded value by an offset so that the coding is prefix-free: no value has more than one
    /// valid encoding.
    fn read_vlint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut offset: u64 = 0;
        let mut shift: u32 = 0;

        loop {
            let byte = self.read_byte()?;

            if byte >= 128 {
                value = value.wrapping_add(u64::from(byte & 127) << shift);
                shift += 7;
                offset = (offset + 1) << 7;
            }
            else {
                return Ok(value
                    .wrapping_add(offset)
                    .wrapping_add(u64::from(byte) << shift));
            }
        }
    }

    /// Reads bytes up to and including a null terminator, and returns them (terminator excluded)
    /// as a string, replacing invalid UTF-8 sequences.
    fn read_cstring(&mut self, max_len: usize) -> Result<String> {
        let mut buf = Vec::new();

        loop {
            let byte = self.read_byte()?;
            if byte == 0 {
                break;
            }
            if buf.len() >= max_len {
                return Err(Error::LimitError("string exceeds maximum length"));
            }
            buf.push(byte);
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl<T: io::Read + ?Sized> ReadBytes for T {
    #[inline(always)]
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    #[inline(always)]
    fn read_buf(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read(buf)?)
    }

    #[inline(always)]
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.read_exact(buf)?;
        Ok(())
    }
}

/// `WriteBytes` provides methods to write bytes, integers of standard widths, variable-length
/// integers, and null-terminated strings.
pub trait WriteBytes {
    /// Writes the whole buffer to the stream or returns an error.
    fn write_buf(&mut self, buf: &[u8]) -> Result<()>;

    /// Writes a single byte to the stream or returns an error.
    #[inline(always)]
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_buf(&[byte])
    }

    /// Writes an unsigned 16-bit integer to the stream in big-endian byte order.
    #[inline(always)]
    fn write_be_u16(&mut self, value: u16) -> Result<()> {
        self.write_buf(&value.to_be_bytes())
    }

    /// Writes an unsigned 32-bit integer to the stream in little-endian byte order.
    #[inline(always)]
    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_buf(&value.to_le_bytes())
    }

    /// Writes an unsigned 32-bit integer to the stream in big-endian byte order.
    #[inline(always)]
    fn write_be_u32(&mut self, value: u32) -> Result<()> {
        self.write_buf(&value.to_be_bytes())
    }

    /// Writes a variable-length integer to the stream. See [`ReadBytes::read_vlint`] for the
    /// coding.
    fn write_vlint(&mut self, mut value: u64) -> Result<()> {
        while value >= 128 {
            self.write_byte(((value & 127) + 128) as u8)?;
            value = (value >> 7) - 1;
        }
        self.write_byte(value as u8)
    }

    /// Writes a string followed by a null terminator.
    fn write_cstring(&mut self, value: &str) -> Result<()> {
        self.write_buf(value.as_bytes())?;
        self.write_byte(0)
    }
}

impl<T: io::Write + ?Sized> WriteBytes for T {
    #[inline(always)]
    fn write_buf(&mut self, buf: &[u8]) -> Result<()> {
        self.write_all(buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{ReadBytes, WriteBytes};

    fn vlint_bytes(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_vlint(value).unwrap();
        buf
    }

    #[test]
    fn verify_vlint_round_trip() {
        let values = [
            0u64,
            1,
            127,
            128,
            129,
            255,
            16_383,
            16_384,
            16_511,
            2_097_151,
            u64::from(u32::MAX),
            u64::MAX >> 1,
        ];

        for &value in &values {
            let encoded = vlint_bytes(value);
            let decoded = Cursor::new(&encoded).read_vlint().unwrap();
            assert_eq!(decoded, value, "value {} did not round-trip", value);
        }
    }

    #[test]
    fn verify_vlint_prefix_free() {
        // The offset rule makes the coding bijective: the smallest two-byte encoding decodes to
        // 128, not 0.
        assert_eq!(vlint_bytes(127), vec![0x7f]);
        assert_eq!(vlint_bytes(128), vec![0x80, 0x00]);
        assert_eq!(Cursor::new([0x80u8, 0x00]).read_vlint().unwrap(), 128);
        assert_eq!(Cursor::new([0xffu8, 0x7f]).read_vlint().unwrap(), 127 + (127 << 7) + 128);
    }

    #[test]
    fn verify_vlint_single_byte_values() {
        for value in 0u64..128 {
            assert_eq!(vlint_bytes(value).len(), 1);
        }
        assert_eq!(vlint_bytes(128).len(), 2);
    }

    #[test]
    fn verify_cstring_round_trip() {
        let mut buf = Vec::new();
        buf.write_cstring("input.bin").unwrap();
        buf.write_byte(0xaa).unwrap();

        let mut reader = Cursor::new(&buf);
        assert_eq!(reader.read_cstring(4096).unwrap(), "input.bin");
        assert_eq!(reader.read_byte().unwrap(), 0xaa);
    }
}
