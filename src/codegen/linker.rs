//! Linker: block layout, writable-range protection, two-phase flush
//!
//! The linker stamps each stream's base address as it is added, verifies
//! that every byte lands inside a writable range the engine declared, and
//! commits the finished blocks to the output image. Flush is split into a
//! pure build phase and an I/O phase; the block list is cleared between the
//! two, so flushing is idempotent across successful runs only.

use crate::codegen::stream::{StreamArena, StreamId};
use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// The output image handed through the pipeline: open for read and write,
/// seekable, owned by the caller. The framework never closes it.
pub trait PatchFile: Read + Write + Seek {}
impl<T: Read + Write + Seek> PatchFile for T {}

struct Block {
    file_pos: u64,
    streams: Vec<StreamId>,
}

pub struct Linker {
    /// Subtracted from target addresses to obtain file offsets.
    delta: i64,
    /// Next file position in the current block.
    pos: u64,
    blocks: Vec<Block>,
    /// Inclusive intervals in target-address space, kept sorted and merged.
    writable: Vec<(u64, u64)>,
}

impl Linker {
    pub fn new() -> Self {
        Self {
            delta: 0,
            pos: 0,
            blocks: Vec::new(),
            writable: Vec::new(),
        }
    }

    pub fn set_delta(&mut self, delta: i64) {
        self.delta = delta;
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }

    /// Begin a new block at the given file position.
    pub fn set_pos(&mut self, file_pos: u64) {
        self.pos = file_pos;
        self.blocks.push(Block {
            file_pos,
            streams: Vec::new(),
        });
    }

    /// Current file position within the block in progress.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    /// Union `[b, e]` (swapped if reversed) into the writable set, merging
    /// overlapping and adjacent intervals.
    pub fn writable(&mut self, b: u64, e: u64) {
        let (mut lo, mut hi) = if b <= e { (b, e) } else { (e, b) };
        let mut merged = Vec::with_capacity(self.writable.len() + 1);
        for &(a, z) in &self.writable {
            if z.saturating_add(1) >= lo && a <= hi.saturating_add(1) {
                lo = lo.min(a);
                hi = hi.max(z);
            } else {
                merged.push((a, z));
            }
        }
        merged.push((lo, hi));
        merged.sort_unstable();
        self.writable = merged;
    }

    pub fn writable_ranges(&self) -> &[(u64, u64)] {
        &self.writable
    }

    /// Whether `[lo, hi]` lies entirely within one writable range.
    fn covered(&self, lo: u64, hi: u64) -> bool {
        self.writable.iter().any(|&(a, z)| a <= lo && hi <= z)
    }

    /// Stamp the stream's base at the current position and append it to the
    /// block in progress.
    pub fn add_stream(&mut self, streams: &mut StreamArena, id: StreamId) -> Result<()> {
        if self.blocks.is_empty() {
            self.blocks.push(Block {
                file_pos: self.pos,
                streams: Vec::new(),
            });
        }
        let size = streams.get(id).size();
        let base = (self.pos as i64 + self.delta) as u64;
        if size > 0 && !self.covered(base, base + size - 1) {
            return Err(Error::Runtime(format!(
                "Writing to protected range ${:04X}-${:04X}",
                base,
                base + size - 1
            )));
        }
        streams.get_mut(id).set_base(base);
        if let Some(block) = self.blocks.last_mut() {
            block.streams.push(id);
        }
        self.pos += size;
        Ok(())
    }

    /// Commit all blocks. Phase 1 builds `(file_pos, bytes)` pairs for every
    /// block and clears the block list; phase 2 seeks and writes each pair.
    pub fn flush(&mut self, streams: &StreamArena, file: &mut dyn PatchFile) -> Result<()> {
        let mut prepared: Vec<(u64, Vec<u8>)> = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut bytes = Vec::new();
            for &id in &block.streams {
                bytes.extend(streams.build(id)?);
            }
            prepared.push((block.file_pos, bytes));
        }
        self.blocks.clear();

        for (file_pos, bytes) in prepared {
            file.seek(SeekFrom::Start(file_pos))?;
            file.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Seek the file to the file offset of a target address, returning the
    /// offset.
    pub fn seek_delta(&self, file: &mut dyn PatchFile, addr: u64) -> Result<u64> {
        let offset = (addr as i64 - self.delta) as u64;
        file.seek(SeekFrom::Start(offset))?;
        Ok(offset)
    }
}

impl Default for Linker {
    fn default() -> Self {
        Self::new()
    }
}
