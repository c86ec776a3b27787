//! Per-channel compile-time state
//!
//! A channel owns a stack of stream handles: the bottom entry is its main
//! stream, held for the channel's whole life; nested loop bodies push and
//! pop on top of it. Feature state (mute, key signature, octave, last note)
//! lives in typed slots populated by engine initializers.

use crate::codegen::chunk::Chunk;
use crate::codegen::stream::{StreamArena, StreamId};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Typed slots for feature- and engine-injected channel state.
#[derive(Debug, Clone, Default)]
pub struct ChannelExt {
    pub mute: bool,
    pub keysig: BTreeMap<char, i8>,
    pub octave: i32,
    pub last_note: Option<i64>,
    /// Engine scratch values keyed by name.
    pub vars: HashMap<String, i64>,
}

#[derive(Debug)]
pub struct Channel {
    id: usize,
    /// Whether subsequent MML commands route here.
    pub active: bool,
    stack: Vec<StreamId>,
    /// Chunks appended by the latest emission, available to `unget`.
    last_count: usize,
    pub ext: ChannelExt,
}

impl Channel {
    pub(crate) fn new(id: usize, streams: &mut StreamArena) -> Self {
        let main = streams.alloc();
        Self {
            id,
            active: false,
            stack: vec![main],
            last_count: 0,
            ext: ChannelExt::default(),
        }
    }

    /// 1-based channel index.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn main_stream(&self) -> StreamId {
        self.stack[0]
    }

    /// Top of the stream stack.
    pub fn current_stream(&self) -> StreamId {
        *self.stack.last().expect("stream stack is never empty")
    }

    pub fn stream_depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn var(&self, name: &str) -> i64 {
        self.ext.vars.get(name).copied().unwrap_or(0)
    }

    pub(crate) fn set_var(&mut self, name: &str, value: i64) {
        self.ext.vars.insert(name.to_string(), value);
    }
}

/// Split-borrow view handed to channel handlers: the channel plus the song's
/// stream arena.
pub struct ChannelCtx<'a> {
    pub chan: &'a mut Channel,
    pub streams: &'a mut StreamArena,
}

impl ChannelCtx<'_> {
    /// Append a chunk to the current stream. Muted channels emit nothing.
    pub fn emit(&mut self, chunk: Chunk) {
        if self.chan.ext.mute {
            return;
        }
        self.streams.get_mut(self.chan.current_stream()).push(chunk);
        self.chan.last_count = 1;
    }

    /// Append raw bytes; empty slices are skipped.
    pub fn emit_bytes(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.emit(Chunk::bytes(data.to_vec()));
    }

    pub fn emit_byte(&mut self, value: u8) {
        self.emit(Chunk::byte(value));
    }

    /// Remove the chunks appended by the latest emission. Invalid after a
    /// stream push or pop, and after another `unget`.
    pub fn unget(&mut self) -> Result<()> {
        if self.chan.last_count == 0 {
            return Err(Error::Runtime("Nothing to unget".into()));
        }
        let current = self.chan.current_stream();
        for _ in 0..self.chan.last_count {
            self.streams.get_mut(current).pop();
        }
        self.chan.last_count = 0;
        Ok(())
    }

    /// Open a nested stream (a loop body) and make it current.
    pub fn push_stream(&mut self) -> StreamId {
        let id = self.streams.alloc();
        self.chan.stack.push(id);
        self.chan.last_count = 0;
        id
    }

    /// Close the current nested stream and return its handle. The main
    /// stream cannot be popped.
    pub fn pop_stream(&mut self) -> Result<StreamId> {
        if self.chan.stack.len() <= 1 {
            return Err(Error::Command("Unmatched loop end".into()));
        }
        self.chan.last_count = 0;
        Ok(self.chan.stack.pop().expect("stack checked non-empty"))
    }

    /// Add a label at the current end of the current stream.
    pub fn add_label(&mut self, name: &str) -> Result<()> {
        self.streams
            .get_mut(self.chan.current_stream())
            .add_label(name)
    }

    /// Append a nested stream's chunks to the current stream, once per
    /// `count`.
    pub fn join(&mut self, body: StreamId, count: u64) -> Result<()> {
        let current = self.chan.current_stream();
        for _ in 0..count {
            self.streams.join(current, body)?;
        }
        self.chan.last_count = 0;
        Ok(())
    }
}
