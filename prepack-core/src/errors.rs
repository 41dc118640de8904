// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Prepack.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred while reading, writing, or seeking the stream.
    IoError(io::Error),
    /// The stream ended while more data was expected.
    EndOfStream,
    /// The stream contained malformed data and could not be parsed.
    DecodeError(&'static str),
    /// The container header is missing, malformed, or has an incompatible version.
    ContainerError(&'static str),
    /// A codec reported an internal error while rebuilding a stream. The original
    /// bytes cannot be reproduced and the restore must abort.
    RecompressionError(&'static str),
    /// An unsupported feature or configuration was encountered.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached.
    LimitError(&'static str),
    /// The operation was aborted by the user.
    Aborted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::EndOfStream => {
                write!(f, "unexpected end of stream")
            }
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::ContainerError(msg) => {
                write!(f, "container error: {}", msg)
            }
            Error::RecompressionError(msg) => {
                write!(f, "error during recompression: {}", msg)
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::Aborted => {
                write!(f, "aborted")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create a container error.
pub fn container_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::ContainerError(desc))
}

/// Convenience function to create a recompression error.
pub fn recompression_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::RecompressionError(desc))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::EndOfStream)
}
