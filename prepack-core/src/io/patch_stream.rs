// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::io;

use crate::penalty::PenaltyList;

/// A `PatchedWriter` rewrites single bytes at recorded positions while data passes through to
/// the inner writer.
///
/// This is how penalty bytes are applied on the restore path: the recompressed stream is written
/// front-to-back and the queued `(position, byte)` patches are substituted on the fly. Positions
/// are relative to the first byte written and must be strictly increasing; no seeking is ever
/// required of the inner writer.
pub struct PatchedWriter<W: io::Write> {
    inner: W,
    patches: VecDeque<(u32, u8)>,
    pos: u64,
}

impl<W: io::Write> PatchedWriter<W> {
    pub fn new(inner: W, penalty_bytes: &PenaltyList) -> PatchedWriter<W> {
        PatchedWriter { inner, patches: penalty_bytes.entries().iter().copied().collect(), pos: 0 }
    }

    /// The number of bytes written so far.
    pub fn len(&self) -> u64 {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn patch_in_range(&self, len: usize) -> bool {
        match self.patches.front() {
            Some(&(patch_pos, _)) => u64::from(patch_pos) < self.pos + len as u64,
            None => false,
        }
    }
}

impl<W: io::Write> io::Write for PatchedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.patch_in_range(buf.len()) {
            self.inner.write_all(buf)?;
            self.pos += buf.len() as u64;
            return Ok(buf.len());
        }

        let mut patched = buf.to_vec();

        while let Some(&(patch_pos, byte)) = self.patches.front() {
            let patch_pos = u64::from(patch_pos);
            if patch_pos >= self.pos + patched.len() as u64 {
                break;
            }
            // Patches behind the current position can only come from a malformed list; skip them.
            if patch_pos >= self.pos {
                patched[(patch_pos - self.pos) as usize] = byte;
            }
            self.patches.pop_front();
        }

        self.inner.write_all(&patched)?;
        self.pos += patched.len() as u64;
        Ok(patched.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::PatchedWriter;
    use crate::penalty::PenaltyList;

    #[test]
    fn verify_patches_applied_across_writes() {
        let list = PenaltyList::from_entries(vec![(1, 0xbb), (5, 0xcc), (9, 0xdd)]);

        let mut writer = PatchedWriter::new(Vec::new(), &list);
        writer.write_all(&[0u8; 4]).unwrap();
        writer.write_all(&[0u8; 4]).unwrap();
        writer.write_all(&[0u8; 2]).unwrap();

        let out = writer.into_inner();
        assert_eq!(out, vec![0, 0xbb, 0, 0, 0, 0xcc, 0, 0, 0, 0xdd]);
    }

    #[test]
    fn verify_no_patches_is_pass_through() {
        let list = PenaltyList::default();
        let mut writer = PatchedWriter::new(Vec::new(), &list);
        writer.write_all(b"hello").unwrap();
        assert_eq!(writer.into_inner(), b"hello");
    }
}
