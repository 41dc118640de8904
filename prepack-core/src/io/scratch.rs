// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs;
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::errors::Result;

/// `ScratchDir` names the scratch files of one invocation.
///
/// All scratch files share a random 8-hex-digit tag so that concurrent invocations sharing a
/// working directory never collide, plus a purpose suffix for debuggability.
pub struct ScratchDir {
    dir: PathBuf,
    tag: String,
}

impl ScratchDir {
    pub fn new(work_dir: Option<&Path>) -> ScratchDir {
        ScratchDir {
            dir: work_dir.map(|p| p.to_path_buf()).unwrap_or_else(std::env::temp_dir),
            tag: format!("{:08x}", rand::random::<u32>()),
        }
    }

    /// Creates an empty read-write scratch file. The file is deleted when the returned handle is
    /// dropped.
    pub fn create(&self, purpose: &str) -> Result<ScratchFile> {
        let path = self.dir.join(format!("prepack_{}_{}.tmp", self.tag, purpose));

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(ScratchFile { path, file })
    }
}

/// An open scratch file, deleted on drop.
pub struct ScratchFile {
    path: PathBuf,
    pub file: fs::File,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("failed to remove scratch file {}: {}", self.path.display(), err);
        }
    }
}

/// A precompressed payload: an owned in-memory buffer, or a scratch file for payloads too large
/// to hold in memory.
pub enum Payload {
    Buffer(Vec<u8>),
    Scratch { scratch: ScratchFile, len: u64 },
}

impl Payload {
    /// Moves `buf` into a payload, spilling it to a scratch file when it exceeds `limit` bytes.
    pub fn new_spilling(buf: Vec<u8>, limit: u64, dir: &ScratchDir, purpose: &str) -> Result<Payload> {
        if buf.len() as u64 <= limit {
            return Ok(Payload::Buffer(buf));
        }

        let mut scratch = dir.create(purpose)?;
        scratch.file.write_all(&buf)?;
        Ok(Payload::Scratch { scratch, len: buf.len() as u64 })
    }

    pub fn len(&self) -> u64 {
        match self {
            Payload::Buffer(buf) => buf.len() as u64,
            Payload::Scratch { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the whole payload to `out`.
    pub fn write_to(&mut self, out: &mut dyn Write) -> Result<()> {
        match self {
            Payload::Buffer(buf) => out.write_all(buf)?,
            Payload::Scratch { scratch, .. } => {
                scratch.file.seek(SeekFrom::Start(0))?;
                io::copy(&mut scratch.file, out)?;
            }
        }
        Ok(())
    }

    /// Reads the whole payload back into memory. Used by the recursion driver, which needs to
    /// re-scan the payload as a fresh input.
    pub fn clone_to_vec(&mut self) -> Result<Vec<u8>> {
        match self {
            Payload::Buffer(buf) => Ok(buf.clone()),
            Payload::Scratch { scratch, len } => {
                scratch.file.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::with_capacity(*len as usize);
                scratch.file.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Payload, ScratchDir};

    #[test]
    fn verify_scratch_file_removed_on_drop() {
        let dir = ScratchDir::new(None);
        let scratch = dir.create("test").unwrap();
        let path = scratch.path.clone();

        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn verify_payload_spills_over_limit() {
        let dir = ScratchDir::new(None);

        let small = Payload::new_spilling(vec![1, 2, 3], 16, &dir, "small").unwrap();
        assert!(matches!(small, Payload::Buffer(_)));

        let mut large = Payload::new_spilling(vec![7u8; 64], 16, &dir, "large").unwrap();
        assert!(matches!(large, Payload::Scratch { .. }));
        assert_eq!(large.len(), 64);
        assert_eq!(large.clone_to_vec().unwrap(), vec![7u8; 64]);

        let mut out = Vec::new();
        large.write_to(&mut out).unwrap();
        assert_eq!(out, vec![7u8; 64]);
    }
}
