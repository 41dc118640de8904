// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;
use std::io::{Cursor, Read};

use prepack_core::container::tags;
use prepack_core::errors::{container_error, Result};
use prepack_core::handler::{FormatHandler, Precompressed, ScanContext, SegmentFlags};
use prepack_core::io::{Payload, ReadBytes, SourceStream, WriteBytes};
use prepack_core::penalty::{match_score, OriginalComparator};

use crate::common;
use crate::engine;

/// Combined cap on the IDAT chain; longer chains are left alone.
const MAX_IDAT_TOTAL: u64 = 1 << 31;

/// PNG image data.
///
/// The segment starts at the first `IDAT` chunk type (the preceding length field stays in the
/// surrounding uncompressed run) and covers the whole chunk chain. The chunks' payloads form
/// one logical zlib stream which is inflated as a unit; chunk lengths and CRCs are recorded in
/// the sidecar so the restore path re-splits the regenerated stream at the original boundaries
/// and re-emits the original CRCs, whether or not they were correct.
#[derive(Default)]
pub struct PngHandler;

impl PngHandler {
    pub fn new() -> PngHandler {
        PngHandler
    }
}

/// One recorded IDAT chunk: its data length and stored CRC.
#[derive(Copy, Clone)]
struct IdatChunk {
    len: u32,
    crc: u32,
}

/// Walks the IDAT chain starting at the chunk type at `pos`. Returns the chunks and the
/// concatenated chunk payloads.
fn walk_idat_chain(
    src: &mut SourceStream,
    pos: u64,
    first_len: u32,
) -> Result<Option<(Vec<IdatChunk>, Vec<u8>)>> {
    let mut chunks = Vec::new();
    let mut stream = Vec::new();

    let mut cursor = pos + 4;
    let mut len = first_len;

    loop {
        if stream.len() as u64 + u64::from(len) > MAX_IDAT_TOTAL {
            return Ok(None);
        }

        let mut data = vec![0u8; len as usize];
        if src.reread_from(cursor, &mut data)? != data.len() {
            return Ok(None);
        }
        stream.append(&mut data);
        cursor += u64::from(len);

        let mut crc = [0u8; 4];
        if src.reread_from(cursor, &mut crc)? != 4 {
            return Ok(None);
        }
        cursor += 4;

        chunks.push(IdatChunk { len, crc: u32::from_be_bytes(crc) });

        // Chained IDAT chunk?
        let mut next = [0u8; 8];
        if src.reread_from(cursor, &mut next)? != 8 || &next[4..] != b"IDAT" {
            break;
        }

        len = u32::from_be_bytes([next[0], next[1], next[2], next[3]]);
        cursor += 8;
    }

    Ok(Some((chunks, stream)))
}

/// Emits a regenerated zlib stream re-split at the recorded chunk boundaries, in original
/// container byte order. The sink returns `false` to abort.
struct ChunkSplitter<'c, F: FnMut(&[u8]) -> Result<bool>> {
    sink: F,
    chunks: &'c [IdatChunk],
    index: usize,
    remaining: u32,
    started: bool,
    done: bool,
}

impl<'c, F: FnMut(&[u8]) -> Result<bool>> ChunkSplitter<'c, F> {
    fn new(chunks: &'c [IdatChunk], sink: F) -> ChunkSplitter<'c, F> {
        ChunkSplitter { sink, chunks, index: 0, remaining: 0, started: false, done: false }
    }

    fn feed(&mut self, mut bytes: &[u8]) -> Result<bool> {
        if self.done {
            return Ok(false);
        }

        if !self.started {
            self.started = true;
            self.remaining = self.chunks[0].len;
            if !(self.sink)(b"IDAT")? {
                return Ok(false);
            }
        }

        while !bytes.is_empty() {
            if self.remaining == 0 {
                if !self.close_chunk()? {
                    return Ok(false);
                }
            }

            let take = bytes.len().min(self.remaining as usize);
            if !(self.sink)(&bytes[..take])? {
                return Ok(false);
            }
            self.remaining -= take as u32;
            bytes = &bytes[take..];
        }

        Ok(true)
    }

    /// Emits the trailing CRC once the stream ended exactly on a chunk boundary.
    fn finish(&mut self) -> Result<()> {
        if self.started && !self.done && self.remaining == 0 {
            let crc = self.chunks[self.index].crc;
            (self.sink)(&crc.to_be_bytes())?;
            self.done = true;
        }
        Ok(())
    }

    fn close_chunk(&mut self) -> Result<bool> {
        let crc = self.chunks[self.index].crc;
        if !(self.sink)(&crc.to_be_bytes())? {
            return Ok(false);
        }

        self.index += 1;
        if self.index == self.chunks.len() {
            // The regenerated stream is longer than the recorded chain.
            self.done = true;
            return Ok(false);
        }

        let chunk = self.chunks[self.index];
        self.remaining = chunk.len;

        let mut intro = [0u8; 8];
        intro[..4].copy_from_slice(&chunk.len.to_be_bytes());
        intro[4..].copy_from_slice(b"IDAT");
        (self.sink)(&intro)
    }
}

/// The sidecar: recompression level, the two zlib header bytes, and the chunk table.
struct PngHeader {
    level: u8,
    zlib_header: [u8; 2],
    chunks: Vec<IdatChunk>,
}

impl PngHeader {
    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_byte(self.level)?;
        out.write_buf(&self.zlib_header)?;
        out.write_vlint(self.chunks.len() as u64)?;
        for chunk in &self.chunks {
            out.write_vlint(u64::from(chunk.len))?;
            out.write_be_u32(chunk.crc)?;
        }
        Ok(())
    }

    fn read_from(input: &mut dyn io::Read) -> Result<PngHeader> {
        let level = input.read_byte()?;
        if level < 1 || level > 9 {
            return container_error("invalid png recompression level");
        }

        let mut zlib_header = [0u8; 2];
        input.read_buf_exact(&mut zlib_header)?;

        let count = input.read_vlint()?;
        if count == 0 || count > 1 << 24 {
            return container_error("invalid png chunk count");
        }

        let mut chunks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = input.read_vlint()?;
            if len > u64::from(u32::MAX) {
                return container_error("invalid png chunk length");
            }
            let crc = input.read_be_u32()?;
            chunks.push(IdatChunk { len: len as u32, crc });
        }

        Ok(PngHeader { level, zlib_header, chunks })
    }
}

impl FormatHandler for PngHandler {
    fn name(&self) -> &'static str {
        "png"
    }

    fn format_tags(&self) -> &'static [u8] {
        &[tags::PNG, tags::MULTIPNG]
    }

    fn quick_check(&self, window: &[u8], pos: u64) -> bool {
        pos >= 4 && window.starts_with(b"IDAT")
    }

    fn precompress(
        &mut self,
        src: &mut SourceStream,
        ctx: &mut ScanContext<'_>,
        pos: u64,
    ) -> Result<Option<Precompressed>> {
        if pos < 4 {
            return Ok(None);
        }

        let mut len_field = [0u8; 4];
        if src.reread_from(pos - 4, &mut len_field)? != 4 {
            return Ok(None);
        }
        let first_len = u32::from_be_bytes(len_field);

        let (chunks, stream) = match walk_idat_chain(src, pos, first_len)? {
            Some(walked) => walked,
            None => return Ok(None),
        };

        if stream.len() < 2 || !engine::zlib_header_check(&stream) {
            return Ok(None);
        }

        let zlib_header = [stream[0], stream[1]];

        let inflated = match engine::inflate_raw(&stream[2..]) {
            Some(inflated) => inflated,
            None => return Ok(None),
        };

        if inflated.data.is_empty() {
            return Ok(None);
        }

        // The whole span of the chain in the input: the leading type tag, each chunk's data and
        // CRC, and the length+type intro of every chained chunk.
        let span_len = 4
            + chunks.iter().map(|c| u64::from(c.len) + 4).sum::<u64>()
            + (chunks.len() as u64 - 1) * 8;

        let adler = common::trailer_bytes(common::TrailerKind::Adler32, &inflated.data);

        let mut best: Option<engine::LevelMatch> = None;

        for level in (1..=9u8).rev() {
            let mut comparator = OriginalComparator::new(src, pos);

            {
                let mut splitter = ChunkSplitter::new(&chunks, |piece| comparator.feed(piece));
                splitter.feed(&zlib_header)?;
                engine::deflate_chunks(&inflated.data, level, |piece| splitter.feed(piece))?;
                splitter.feed(&adler)?;
                splitter.finish()?;
            }

            let matched = match comparator.finish() {
                Some(matched) => matched,
                None => continue,
            };

            if matched.is_exact(span_len) {
                best = Some(engine::LevelMatch { level, matched });
                break;
            }

            let better = match &best {
                Some(current) => match_score(&matched) > match_score(&current.matched),
                None => true,
            };
            if better {
                best = Some(engine::LevelMatch { level, matched });
            }
        }

        let found = match best {
            Some(found) => found,
            None => return Ok(None),
        };

        if found.matched.matched_len < 4 + ctx.options.min_ident_size {
            return Ok(None);
        }

        if ctx.options.verify_deflate {
            let mut candidate = Vec::new();
            engine::deflate_to(&mut candidate, &inflated.data, found.level)?;
            if engine::verify_reinflation(&candidate, &inflated.data).is_err() {
                return Ok(None);
            }
        }

        let exact = found.matched.is_exact(span_len);
        let tag = if chunks.len() > 1 { tags::MULTIPNG } else { tags::PNG };

        let mut header_data = Vec::new();
        PngHeader { level: found.level, zlib_header, chunks }.write_to(&mut header_data)?;

        let payload = Payload::new_spilling(
            inflated.data,
            ctx.options.in_memory_limit,
            ctx.scratch,
            "png",
        )?;

        let mut segment = Precompressed::new(tag, found.matched.matched_len, payload);
        segment.header_data = header_data;
        segment.penalty_bytes = found.matched.penalty_bytes;
        if exact {
            segment.format_flags |= SegmentFlags::FORMAT_0;
        }

        Ok(Some(segment))
    }

    fn read_header_data(
        &self,
        input: &mut dyn io::Read,
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<Vec<u8>> {
        let header = PngHeader::read_from(input)?;
        let mut out = Vec::new();
        header.write_to(&mut out)?;
        Ok(out)
    }

    fn recompress(
        &self,
        payload: &mut dyn io::Read,
        out: &mut dyn io::Write,
        header_data: &[u8],
        _flags: SegmentFlags,
        _tag: u8,
    ) -> Result<()> {
        let header = PngHeader::read_from(&mut Cursor::new(header_data))?;

        let mut data = Vec::new();
        payload.read_to_end(&mut data)?;

        let adler = common::trailer_bytes(common::TrailerKind::Adler32, &data);

        let mut splitter = ChunkSplitter::new(&header.chunks, |piece| {
            out.write_all(piece).map_err(prepack_core::errors::Error::from)?;
            Ok(true)
        });

        splitter.feed(&header.zlib_header)?;
        engine::deflate_chunks(&data, header.level, |piece| splitter.feed(piece))?;
        splitter.feed(&adler)?;
        splitter.finish()?;

        Ok(())
    }
}
