// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `verify` module proves, at precompress time, that a claimed segment restores
//! bit-exactly.
//!
//! The candidate segment is serialized exactly as it would appear in the output, run through
//! the restore path into a streaming SHA-1 sink, and the resulting digest and byte count are
//! compared against a digest of the original input span. No restored byte touches a disk.

use std::io;
use std::io::Cursor;

use log::debug;

use crate::checksum::Sha1;
use crate::container;
use crate::errors::Result;
use crate::handler::{Precompressed, Registry};
use crate::io::{MonitorStream, SourceStream};
use crate::options::Options;
use crate::recompress;

/// Serializes `segment` and, when verification is enabled, proves its round-trip. Returns the
/// serialized segment bytes, or `None` when the proof failed and the segment must be dropped.
pub fn seal_segment(
    registry: &Registry,
    options: &Options,
    src: &mut SourceStream,
    pos: u64,
    segment: &mut Precompressed,
) -> Result<Option<Vec<u8>>> {
    let mut bytes = Vec::new();
    container::write_segment(&mut bytes, segment)?;

    if !options.verify_precompressed {
        return Ok(Some(bytes));
    }

    let expected = digest_input_span(src, pos, segment.original_size)?;

    let mut sink = MonitorStream::new(io::sink(), Sha1::new());

    match recompress::restore_segment(registry, &mut Cursor::new(&bytes), &mut sink) {
        Ok(()) => {}
        Err(err) => {
            debug!("restore failed during verification: {}", err);
            return Ok(None);
        }
    }

    let actual = sink.into_monitor();

    if actual.byte_count() != segment.original_size {
        return Ok(None);
    }
    if actual.finalize() != expected {
        return Ok(None);
    }

    Ok(Some(bytes))
}

/// Digest of the input span `[pos, pos + len)`.
fn digest_input_span(src: &mut SourceStream, pos: u64, len: u64) -> Result<[u8; 20]> {
    let mut sha = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut off = 0u64;

    while off < len {
        let want = buf.len().min((len - off) as usize);
        let got = src.reread_from(pos + off, &mut buf[..want])?;
        if got == 0 {
            return crate::errors::end_of_stream_error();
        }
        sha.update(&buf[..got]);
        off += got as u64;
    }

    Ok(sha.finalize())
}
