//! Streams and the stream arena
//!
//! A stream is an append-only sequence of chunks with named labels and a
//! base address stamped by the linker before emission; it corresponds to one
//! relocatable object in the output. Streams live in an arena owned by the
//! song, and pointer chunks hold arena handles instead of references, so the
//! stream graph may be cyclic without ownership cycles.

use crate::codegen::chunk::Chunk;
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Label present on every stream from construction.
pub const START_LABEL: &str = "START";
/// Label added by channel finalization.
pub const END_LABEL: &str = "END";

/// Stable handle to a stream in a [`StreamArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(usize);

#[derive(Debug)]
pub struct Stream {
    chunks: Vec<Chunk>,
    labels: BTreeMap<String, u64>,
    size: u64,
    base: Option<u64>,
    /// Offsets of pointer chunks within this stream.
    pointer_offsets: Vec<u64>,
}

impl Stream {
    pub fn new() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(START_LABEL.to_string(), 0);
        Self {
            chunks: Vec::new(),
            labels,
            size: 0,
            base: None,
            pointer_offsets: Vec::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn base(&self) -> Option<u64> {
        self.base
    }

    pub(crate) fn set_base(&mut self, base: u64) {
        self.base = Some(base);
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Append a chunk. Pointer chunks record their offset within the stream
    /// so self-relative encodings can recover their own address.
    pub fn push(&mut self, mut chunk: Chunk) {
        if let Chunk::Pointer(p) = &mut chunk {
            p.offset = self.size;
            self.pointer_offsets.push(self.size);
        }
        self.size += chunk.size();
        self.chunks.push(chunk);
    }

    /// Append raw bytes as a byte-string chunk.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.push(Chunk::bytes(data.to_vec()));
    }

    /// Append a bare byte as a 1-byte integer chunk.
    pub fn push_byte(&mut self, value: u8) {
        self.push(Chunk::byte(value));
    }

    /// Remove and return the last chunk.
    pub fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop()?;
        self.size -= chunk.size();
        if matches!(chunk, Chunk::Pointer(_)) {
            self.pointer_offsets.pop();
        }
        Some(chunk)
    }

    /// Add a label at the current end of the stream.
    pub fn add_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::Runtime(format!("Duplicate label '{name}'")));
        }
        self.labels.insert(name.to_string(), self.size);
        Ok(())
    }

    pub fn get_label(&self, name: &str) -> Option<u64> {
        self.labels.get(name).copied()
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, u64)> {
        self.labels.iter().map(|(k, &v)| (k.as_str(), v))
    }

    pub fn pointer_offsets(&self) -> &[u64] {
        &self.pointer_offsets
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena of streams owned by a song. Handles stay valid for the arena's
/// lifetime; streams are never removed.
#[derive(Debug, Default)]
pub struct StreamArena {
    streams: Vec<Stream>,
}

impl StreamArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> StreamId {
        self.streams.push(Stream::new());
        StreamId(self.streams.len() - 1)
    }

    pub fn get(&self, id: StreamId) -> &Stream {
        &self.streams[id.0]
    }

    pub fn get_mut(&mut self, id: StreamId) -> &mut Stream {
        &mut self.streams[id.0]
    }

    pub fn try_get(&self, id: StreamId) -> Option<&Stream> {
        self.streams.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Append `src`'s chunks to `dst` by value; `src` is left intact.
    pub fn join(&mut self, dst: StreamId, src: StreamId) -> Result<()> {
        if dst == src {
            return Err(Error::Runtime("Stream joined to itself".into()));
        }
        let chunks: Vec<Chunk> = self.get(src).chunks.clone();
        let stream = self.get_mut(dst);
        for chunk in chunks {
            stream.push(chunk);
        }
        Ok(())
    }

    /// Concatenate the compiled form of every chunk in the stream. The
    /// stream must have been base-stamped by the linker.
    pub fn build(&self, id: StreamId) -> Result<Vec<u8>> {
        let stream = self.get(id);
        let base = stream
            .base()
            .ok_or_else(|| Error::Runtime("Stream has no base address".into()))?;
        let mut out = Vec::with_capacity(stream.size() as usize);
        let mut offset = 0;
        for chunk in &stream.chunks {
            out.extend(chunk.compile(self, base + offset)?);
            offset += chunk.size();
        }
        Ok(out)
    }
}
