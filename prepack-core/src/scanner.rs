// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `scanner` module implements the single-pass scan/dispatch loop of the precompress path.
//!
//! The scanner walks the input left to right. At every position it asks the registered handlers,
//! in priority order, whether they want to claim the bytes there; claimed spans become
//! precompressed segments (optionally re-scanned recursively and verified), everything else
//! accumulates into uncompressed runs. The output is a deterministic function of the input
//! bytes, the handler set, and the configuration.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::io;
use std::io::Cursor;

use log::{debug, trace};

use crate::container;
use crate::errors::{Error, Result};
use crate::handler::{Precompressed, Registry, ScanContext};
use crate::io::{Payload, ScanSource, ScratchDir, SourceStream, CHECKBUF};
use crate::options::Options;
use crate::verify;

/// Counters accumulated over one precompress run, recursion included.
#[derive(Default)]
pub struct Statistics {
    /// Number of precompressed segments written.
    pub claimed_segments: u64,
    /// Segment counts keyed by format tag.
    pub claimed_by_tag: HashMap<u8, u64>,
    /// Original bytes covered by precompressed segments.
    pub claimed_bytes: u64,
    /// Number of uncompressed runs written.
    pub uncompressed_runs: u64,
    /// Bytes written as uncompressed runs.
    pub uncompressed_bytes: u64,
    /// Segments dropped because their round-trip proof failed.
    pub verify_failures: u64,
    /// Deepest recursion level that claimed anything.
    pub max_recursion_depth: u32,
    /// The recursion depth limit stopped at least one re-scan.
    pub recursion_limit_hit: bool,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "precompressed streams: {}", self.claimed_segments)?;

        let mut tags: Vec<_> = self.claimed_by_tag.iter().collect();
        tags.sort();
        for (&tag, count) in tags {
            writeln!(f, "  {}: {}", container::tag_name(tag), count)?;
        }

        writeln!(
            f,
            "uncompressed: {} bytes in {} runs",
            self.uncompressed_bytes, self.uncompressed_runs
        )?;

        if self.verify_failures > 0 {
            writeln!(f, "verification rejected {} streams", self.verify_failures)?;
        }
        if self.max_recursion_depth > 0 {
            writeln!(f, "maximum recursion depth: {}", self.max_recursion_depth)?;
        }
        if self.recursion_limit_hit {
            writeln!(f, "recursion depth limit was reached")?;
        }

        Ok(())
    }
}

/// Precompresses `source` into a PCF stream written to `out`.
pub fn precompress(
    registry: &mut Registry,
    options: &Options,
    source: Box<dyn ScanSource>,
    out: &mut dyn io::Write,
    input_file_name: &str,
) -> Result<Statistics> {
    let scratch = ScratchDir::new(options.work_dir.as_deref());
    let mut stats = Statistics::default();

    registry.reset_all();

    container::write_header(out, input_file_name)?;

    let mut src = SourceStream::new(source, Default::default());
    scan(registry, options, &scratch, &mut stats, &mut src, out, 0)?;

    container::write_end_marker(out)?;

    Ok(stats)
}

/// One level of the scan loop. Called once at depth 0, and again by the recursion driver for
/// every payload that is re-scanned.
fn scan(
    registry: &mut Registry,
    options: &Options,
    scratch: &ScratchDir,
    stats: &mut Statistics,
    src: &mut SourceStream,
    out: &mut dyn io::Write,
    depth: u32,
) -> Result<()> {
    let mut run: Vec<u8> = Vec::new();

    // Caller-provided exclusions apply to the top-level stream only.
    let mut ignore_positions: VecDeque<u64> = if depth == 0 {
        options.ignore_positions.iter().copied().collect()
    }
    else {
        VecDeque::new()
    };

    // Positions each handler has deep-checked and rejected, so it is never asked again.
    let mut handler_ignore: Vec<BTreeSet<u64>> = vec![BTreeSet::new(); registry.len()];

    loop {
        if options.aborted() {
            return Err(Error::Aborted);
        }

        if src.peek(CHECKBUF)?.is_empty() {
            break;
        }

        let pos = src.position();

        while ignore_positions.front().is_some_and(|&excluded| excluded < pos) {
            ignore_positions.pop_front();
        }

        let mut claimed = None;

        if ignore_positions.front() == Some(&pos) {
            ignore_positions.pop_front();
        }
        else {
            claimed = dispatch(
                registry,
                options,
                scratch,
                stats,
                &mut handler_ignore,
                src,
                pos,
                depth,
            )?;
        }

        match claimed {
            Some((segment_bytes, original_size, tag)) => {
                flush_run(out, &mut run, stats)?;

                out.write_all(&segment_bytes)?;

                stats.claimed_segments += 1;
                stats.claimed_bytes += original_size;
                *stats.claimed_by_tag.entry(tag).or_insert(0) += 1;

                src.advance(original_size)?;

                for set in &mut handler_ignore {
                    *set = set.split_off(&src.position());
                }
            }
            None => {
                let byte = src.peek(1)?[0];
                run.push(byte);
                src.advance(1)?;

                if run.len() as u64 >= options.uncompressed_block_length {
                    flush_run(out, &mut run, stats)?;
                }
            }
        }
    }

    flush_run(out, &mut run, stats)
}

/// Asks each handler, in priority order, to claim the stream at `pos`. Returns the serialized
/// segment plus its original size and tag on success.
#[allow(clippy::too_many_arguments)]
fn dispatch(
    registry: &mut Registry,
    options: &Options,
    scratch: &ScratchDir,
    stats: &mut Statistics,
    handler_ignore: &mut [BTreeSet<u64>],
    src: &mut SourceStream,
    pos: u64,
    depth: u32,
) -> Result<Option<(Vec<u8>, u64, u8)>> {
    for index in 0..registry.len() {
        if registry.get(index).depth_limit().is_some_and(|limit| depth > limit) {
            continue;
        }

        if handler_ignore[index].contains(&pos) {
            continue;
        }

        let wants = {
            let window = src.peek(CHECKBUF)?;
            registry.get(index).quick_check(window, pos)
        };
        if !wants {
            continue;
        }

        trace!("{} claims position {}", registry.get(index).name(), pos);

        let mut ctx = ScanContext { options, scratch, stats: &mut *stats, depth };

        let mut segment = match registry.get_mut(index).precompress(src, &mut ctx, pos) {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                handler_ignore[index].insert(pos);
                continue;
            }
            // Real I/O trouble and user aborts end the run; anything else the handler hit in
            // the data is a rejection of this position.
            Err(err @ (Error::IoError(_) | Error::Aborted)) => return Err(err),
            Err(err) => {
                debug!("{} rejected position {}: {}", registry.get(index).name(), pos, err);
                handler_ignore[index].insert(pos);
                continue;
            }
        };

        if registry.get(index).recursion_allowed() {
            recurse_into_payload(registry, options, scratch, stats, depth, &mut segment)?;
        }

        match verify::seal_segment(registry, options, src, pos, &mut segment)? {
            Some(bytes) => {
                debug!(
                    "{} precompressed {} bytes at {} into {} (depth {})",
                    registry.get(index).name(),
                    segment.original_size,
                    pos,
                    segment.payload.len(),
                    depth
                );
                return Ok(Some((bytes, segment.original_size, segment.tag)));
            }
            None => {
                debug!(
                    "{} failed round-trip verification at {}",
                    registry.get(index).name(),
                    pos
                );
                stats.verify_failures += 1;
                handler_ignore[index].insert(pos);
                continue;
            }
        }
    }

    Ok(None)
}

/// Re-scans a claimed payload as a fresh input. When anything inside is claimed, the payload is
/// replaced by the nested PCF stream and the segment is marked as recursed.
fn recurse_into_payload(
    registry: &mut Registry,
    options: &Options,
    scratch: &ScratchDir,
    stats: &mut Statistics,
    depth: u32,
    segment: &mut Precompressed,
) -> Result<()> {
    if segment.payload.is_empty() {
        return Ok(());
    }

    if depth + 1 > options.max_recursion_depth {
        stats.recursion_limit_hit = true;
        return Ok(());
    }

    let payload = segment.payload.clone_to_vec()?;

    let claimed_before = stats.claimed_segments;

    let mut nested = Vec::new();
    container::write_header(&mut nested, "")?;

    let mut child = SourceStream::new(Box::new(Cursor::new(payload)), Default::default());
    scan(registry, options, scratch, stats, &mut child, &mut nested, depth + 1)?;

    container::write_end_marker(&mut nested)?;

    if stats.claimed_segments > claimed_before {
        stats.max_recursion_depth = stats.max_recursion_depth.max(depth + 1);
        segment.recursion_size = Some(nested.len() as u64);
        segment.payload = Payload::new_spilling(nested, options.in_memory_limit, scratch, "recursion")?;
    }

    Ok(())
}

fn flush_run(out: &mut dyn io::Write, run: &mut Vec<u8>, stats: &mut Statistics) -> Result<()> {
    if run.is_empty() {
        return Ok(());
    }

    container::write_uncompressed(out, run)?;

    stats.uncompressed_runs += 1;
    stats.uncompressed_bytes += run.len() as u64;
    run.clear();

    Ok(())
}
