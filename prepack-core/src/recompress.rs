// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `recompress` module implements the restore path: it reads a PCF stream and reproduces
//! the original bytes exactly.
//!
//! Uncompressed runs are copied verbatim. Precompressed segments are dispatched to the handler
//! registered for their format tag; the handler's output flows through a penalty-byte patcher
//! and is scoped to the segment's original size. Segments whose payload is itself a PCF stream
//! are restored through an in-process pipe: a worker thread restores the nested stream while
//! the enclosing handler consumes it.

use std::io;
use std::io::{Cursor, Read};
use std::thread;

use log::{debug, trace};

use crate::container;
use crate::container::ContainerHeader;
use crate::errors::{container_error, recompression_error, Error, Result};
use crate::handler::{Registry, SegmentFlags};
use crate::io::{pipe, PatchedWriter, ReadBytes, ScopedWriter};
use crate::penalty::PenaltyList;

/// Restores a complete PCF stream from `input` into `out`, returning the parsed container
/// header.
pub fn restore(
    registry: &Registry,
    input: &mut dyn io::Read,
    out: &mut dyn io::Write,
) -> Result<ContainerHeader> {
    let header = container::read_header(input)?;

    loop {
        let flag_byte = match input.read_byte() {
            Ok(byte) => byte,
            // A clean end at a segment boundary is equivalent to the end marker.
            Err(Error::EndOfStream) => break,
            Err(err) => return Err(err),
        };

        if flag_byte == 0 {
            let len = input.read_vlint()?;
            if len == 0 {
                break;
            }
            copy_exact(input, out, len)?;
            trace!("restored uncompressed run of {} bytes", len);
        }
        else {
            restore_segment_body(registry, flag_byte, input, out)?;
        }
    }

    Ok(header)
}

/// Restores a single segment (uncompressed run or precompressed) from `input` into `out`. Used
/// by the verifier, which replays one serialized segment at a time.
pub fn restore_segment(
    registry: &Registry,
    input: &mut dyn io::Read,
    out: &mut dyn io::Write,
) -> Result<()> {
    let flag_byte = input.read_byte()?;

    if flag_byte == 0 {
        let len = input.read_vlint()?;
        return copy_exact(input, out, len);
    }

    restore_segment_body(registry, flag_byte, input, out)
}

fn restore_segment_body(
    registry: &Registry,
    flag_byte: u8,
    input: &mut dyn io::Read,
    out: &mut dyn io::Write,
) -> Result<()> {
    let flags = SegmentFlags::from_bits_retain(flag_byte);

    if !flags.contains(SegmentFlags::PRESENT) {
        return container_error("invalid segment flag byte");
    }

    let tag = input.read_byte()?;

    let handler = match registry.by_tag(tag) {
        Some(handler) => handler,
        None => return container_error("no handler registered for format tag"),
    };

    let header_data = handler.read_header_data(input, flags, tag)?;

    let penalty_bytes = if flags.contains(SegmentFlags::PENALTY_BYTES) {
        PenaltyList::read_from(input)?
    }
    else {
        PenaltyList::default()
    };

    let original_size = input.read_vlint()?;
    let precompressed_size = input.read_vlint()?;

    let payload_len = if flags.contains(SegmentFlags::RECURSION) {
        input.read_vlint()?
    }
    else {
        precompressed_size
    };

    trace!(
        "restoring {} segment: {} payload bytes into {} original bytes",
        container::tag_name(tag),
        payload_len,
        original_size
    );

    let mut scoped = ScopedWriter::new(&mut *out, original_size);
    let mut patched = PatchedWriter::new(&mut scoped, &penalty_bytes);

    if flags.contains(SegmentFlags::RECURSION) {
        // The payload is a nested PCF stream. A worker thread restores it into a pipe while the
        // enclosing handler consumes the restored bytes as its payload.
        let mut nested = vec![0u8; payload_len as usize];
        input.read_buf_exact(&mut nested)?;

        debug!("restoring nested stream of {} bytes", nested.len());

        thread::scope(|scope| -> Result<()> {
            let (writer, mut reader) = pipe(8);

            let worker = scope.spawn(move || -> Result<()> {
                let mut writer = writer;
                restore(registry, &mut Cursor::new(nested), &mut writer)?;
                Ok(())
            });

            let outer = handler.recompress(&mut reader, &mut patched, &header_data, flags, tag);

            // Unblock the worker if the handler bailed early, then surface its result first:
            // an inner failure explains an outer one.
            drop(reader);

            match worker.join() {
                Ok(inner) => inner?,
                Err(_) => return recompression_error("nested restore worker panicked"),
            }

            outer
        })?;
    }
    else {
        let mut payload = (&mut *input).take(payload_len);

        handler.recompress(&mut payload, &mut patched, &header_data, flags, tag)?;

        // The handler may not need the payload's trailing bytes; keep the container stream
        // aligned regardless.
        io::copy(&mut payload, &mut io::sink())?;
    }

    drop(patched);

    if scoped.bytes_available() != 0 {
        return recompression_error("restored stream is shorter than the recorded size");
    }

    Ok(())
}

fn copy_exact(input: &mut dyn io::Read, out: &mut dyn io::Write, len: u64) -> Result<()> {
    let mut taken = (&mut *input).take(len);
    let copied = io::copy(&mut taken, out)?;

    if copied != len {
        return crate::errors::end_of_stream_error();
    }

    Ok(())
}
