//! Per-song compile-time state
//!
//! A song owns its channels, the stream arena, the preprocessor context and
//! the text-macro/pattern registries. Channel names start as `1`-`9`,
//! `A`-`Z`, `a`-`z` in index order and may be reassigned by `#remap`; the
//! name-to-index map is built (and checked for duplicates) when compilation
//! proper begins.

use crate::codegen::stream::{StreamArena, StreamId, END_LABEL};
use crate::engine::channel::{Channel, ChannelCtx};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::mml::preprocessor::PpContext;
use std::collections::HashMap;

/// Default single-character name of the 0-based channel index.
fn default_name(index: usize) -> Option<char> {
    match index {
        0..=8 => Some((b'1' + index as u8) as char),
        9..=34 => Some((b'A' + (index - 9) as u8) as char),
        35..=60 => Some((b'a' + (index - 35) as u8) as char),
        _ => None,
    }
}

pub struct Song {
    channels: Vec<Channel>,
    pub streams: StreamArena,
    pub pp: PpContext,
    /// Channel index to single-character name; inverted into `chmap` by
    /// `before_default`.
    chnames: Vec<char>,
    chmap: HashMap<char, usize>,
    current: usize,
    /// Text macro bodies.
    pub macros: HashMap<String, String>,
    /// Pattern bodies.
    pub patterns: HashMap<String, String>,
    /// Compiled pattern streams, keyed by pattern name and channel index.
    pub pattern_streams: HashMap<(String, usize), StreamId>,
    /// Engine scratch values keyed by name.
    pub vars: HashMap<String, i64>,
}

impl Song {
    pub(crate) fn new(engine: &Engine) -> Self {
        let mut streams = StreamArena::new();
        let count = engine.channel_count();
        let mut channels = Vec::with_capacity(count);
        for i in 0..count {
            let mut chan = Channel::new(i + 1, &mut streams);
            chan.active = i == 0;
            for init in engine.channel_inits() {
                init(&mut chan);
            }
            channels.push(chan);
        }
        let chnames = (0..count)
            .map(|i| default_name(i).expect("channel count validated by engine"))
            .collect();
        Self {
            channels,
            streams,
            pp: PpContext::new(),
            chnames,
            chmap: HashMap::new(),
            current: 0,
            macros: HashMap::new(),
            patterns: HashMap::new(),
            pattern_streams: HashMap::new(),
            vars: HashMap::new(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    /// 0-based index of the channel commands are currently applied to.
    pub fn current(&self) -> usize {
        self.current
    }

    pub(crate) fn set_current(&mut self, index: usize) {
        self.current = index;
    }

    pub fn current_channel(&self) -> &Channel {
        &self.channels[self.current]
    }

    /// Split borrow: one channel plus the stream arena.
    pub fn channel_split(&mut self, index: usize) -> (&mut Channel, &mut StreamArena) {
        (&mut self.channels[index], &mut self.streams)
    }

    /// Current single-character name of a channel index.
    pub fn channel_name(&self, index: usize) -> char {
        self.chnames[index]
    }

    /// Reassign the 1-based channel `index` to `name`.
    pub fn remap(&mut self, index: i64, name: char) -> Result<()> {
        if index < 1 || index as usize > self.channels.len() {
            return Err(Error::Command(format!("No such channel {index}")));
        }
        self.chnames[index as usize - 1] = name;
        Ok(())
    }

    /// Resolve a channel name through the inverted map. Only valid once
    /// `before_default` has run.
    pub fn resolve_channel(&self, name: char) -> Option<usize> {
        self.chmap.get(&name).copied()
    }

    /// Invert the channel-name table and run pre-compile callbacks:
    /// song-level first, then each channel's.
    pub fn before_default(&mut self, engine: &Engine) -> Result<()> {
        self.chmap.clear();
        for (index, &name) in self.chnames.iter().enumerate() {
            if self.chmap.insert(name, index).is_some() {
                return Err(Error::Runtime(format!("Duplicate channel name '{name}'")));
            }
        }
        for cb in engine.song_pre() {
            cb(self)?;
        }
        for index in 0..self.channels.len() {
            let (chan, streams) = self.channel_split(index);
            let mut ctx = ChannelCtx { chan, streams };
            for cb in engine.chan_pre() {
                cb(&mut ctx)?;
            }
        }
        Ok(())
    }

    /// Finalize: verify every channel closed its loops, run each channel's
    /// post-compile callbacks, seal its main stream with the `END` label,
    /// then run song-level post callbacks.
    pub fn after_default(&mut self, engine: &Engine) -> Result<()> {
        for index in 0..self.channels.len() {
            if self.channels[index].stream_depth() != 1 {
                return Err(Error::Command(format!(
                    "Unmatched loop start on channel '{}'",
                    self.chnames[index]
                )));
            }
            let (chan, streams) = self.channel_split(index);
            let mut ctx = ChannelCtx { chan, streams };
            for cb in engine.chan_post() {
                cb(&mut ctx)?;
            }
            let main = self.channels[index].main_stream();
            self.streams.get_mut(main).add_label(END_LABEL)?;
        }
        for cb in engine.song_post() {
            cb(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mml::parser::Parser;

    fn engine() -> Engine {
        Engine::new("test", 4, Parser::new().unwrap()).unwrap()
    }

    #[test]
    fn test_first_channel_starts_active() {
        let song = engine().make_song();
        assert!(song.channel(0).active);
        assert!(!song.channel(1).active);
        assert_eq!(song.channel(0).id(), 1);
    }

    #[test]
    fn test_default_names() {
        let song = engine().make_song();
        assert_eq!(song.channel_name(0), '1');
        assert_eq!(song.channel_name(3), '4');
    }

    #[test]
    fn test_chmap_inversion() {
        let engine = engine();
        let mut song = engine.make_song();
        song.remap(2, 'P').unwrap();
        song.before_default(&engine).unwrap();
        assert_eq!(song.resolve_channel('P'), Some(1));
        assert_eq!(song.resolve_channel('1'), Some(0));
        assert_eq!(song.resolve_channel('2'), None);
    }

    #[test]
    fn test_duplicate_name_fails() {
        let engine = engine();
        let mut song = engine.make_song();
        song.remap(2, '1').unwrap();
        let err = song.before_default(&engine).unwrap_err();
        assert!(err.to_string().contains("Duplicate channel name"));
    }

    #[test]
    fn test_remap_bounds() {
        let mut song = engine().make_song();
        assert!(song.remap(0, 'X').is_err());
        assert!(song.remap(5, 'X').is_err());
        assert!(song.remap(4, 'X').is_ok());
    }

    #[test]
    fn test_after_default_adds_end_label() {
        let engine = engine();
        let mut song = engine.make_song();
        song.before_default(&engine).unwrap();
        song.after_default(&engine).unwrap();
        let main = song.channel(0).main_stream();
        assert_eq!(song.streams.get(main).get_label(END_LABEL), Some(0));
    }

    #[test]
    fn test_after_default_rejects_open_loop() {
        let engine = engine();
        let mut song = engine.make_song();
        song.before_default(&engine).unwrap();
        {
            let (chan, streams) = song.channel_split(0);
            let mut ctx = ChannelCtx { chan, streams };
            ctx.push_stream();
        }
        let err = song.after_default(&engine).unwrap_err();
        assert!(err.to_string().contains("Unmatched loop start"));
    }
}
