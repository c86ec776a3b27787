//! Engine model
//!
//! An engine is the configuration bundle for one target sound driver: its
//! channel count, its parser (command and directive tables), its linker and
//! its setup/insert/finish callbacks. Setup and finish are single-shot: the
//! framework takes them out before invocation, so a second run is safe.
//! Compiled-in engines are resolved by name through [`create_engine`].

pub mod channel;
pub mod famidrv;
pub mod feature;
pub mod song;

use crate::codegen::chunk::Endian;
use crate::codegen::linker::Linker;
use crate::engine::channel::{Channel, ChannelCtx};
use crate::engine::feature::{Feature, Rename};
use crate::engine::song::Song;
use crate::error::{Error, Result};
use crate::mml::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub use crate::codegen::linker::PatchFile;

/// Highest supported channel count (names `1`-`9`, `A`-`Z`, `a`-`z`).
pub const MAX_CHANNELS: usize = 61;

pub type SetupCb = Box<dyn FnOnce(&mut Engine, &mut dyn PatchFile) -> Result<()>>;
pub type InsertCb = Box<dyn FnMut(&mut Engine, &mut dyn PatchFile, &mut Song, u32) -> Result<()>>;
pub type FinishCb = Box<dyn FnOnce(&mut Engine, &mut dyn PatchFile) -> Result<()>>;

pub type SongCallback = Rc<dyn Fn(&mut Song) -> Result<()>>;
pub type ChanCallback = Rc<dyn Fn(&mut ChannelCtx) -> Result<()>>;
pub type ChanInit = Rc<dyn Fn(&mut Channel)>;

pub struct Engine {
    name: String,
    chcount: usize,
    pub parser: Parser,
    pub linker: Linker,
    /// Engine-specific parameters forwarded from the frontend.
    pub params: Vec<String>,
    setup: Option<SetupCb>,
    insert: Option<InsertCb>,
    finish: Option<FinishCb>,
    features: HashSet<String>,
    song_pre: Vec<SongCallback>,
    song_post: Vec<SongCallback>,
    chan_pre: Vec<ChanCallback>,
    chan_post: Vec<ChanCallback>,
    chan_init: Vec<ChanInit>,
    pattern_ptr: (u8, Endian),
    image_size: u64,
}

impl Engine {
    pub fn new(name: &str, chcount: usize, parser: Parser) -> Result<Self> {
        if name.is_empty() || chcount < 1 || chcount > MAX_CHANNELS {
            return Err(Error::Argument("Invalid engine definition".into()));
        }
        Ok(Self {
            name: name.to_string(),
            chcount,
            parser,
            linker: Linker::new(),
            params: Vec::new(),
            setup: None,
            insert: None,
            finish: None,
            features: HashSet::new(),
            song_pre: Vec::new(),
            song_post: Vec::new(),
            chan_pre: Vec::new(),
            chan_post: Vec::new(),
            chan_init: Vec::new(),
            pattern_ptr: (2, Endian::Little),
            image_size: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_count(&self) -> usize {
        self.chcount
    }

    /// Size the frontend zero-fills a freshly created output image to.
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    pub fn set_image_size(&mut self, size: u64) {
        self.image_size = size;
    }

    /// Width and endianness of pointers emitted by pattern invocation.
    pub fn pattern_pointer(&self) -> (u8, Endian) {
        self.pattern_ptr
    }

    pub fn set_pattern_pointer(&mut self, width: u8, endian: Endian) {
        self.pattern_ptr = (width, endian);
    }

    pub fn on_setup(&mut self, cb: impl FnOnce(&mut Engine, &mut dyn PatchFile) -> Result<()> + 'static) {
        self.setup = Some(Box::new(cb));
    }

    pub fn on_insert(
        &mut self,
        cb: impl FnMut(&mut Engine, &mut dyn PatchFile, &mut Song, u32) -> Result<()> + 'static,
    ) {
        self.insert = Some(Box::new(cb));
    }

    pub fn on_finish(&mut self, cb: impl FnOnce(&mut Engine, &mut dyn PatchFile) -> Result<()> + 'static) {
        self.finish = Some(Box::new(cb));
    }

    /// Run the setup callback at most once; later calls are no-ops.
    pub fn call_setup(&mut self, output: &mut dyn PatchFile) -> Result<()> {
        match self.setup.take() {
            Some(cb) => cb(self, output),
            None => Ok(()),
        }
    }

    /// Run the per-song insert callback.
    pub fn call_insert(
        &mut self,
        output: &mut dyn PatchFile,
        song: &mut Song,
        track: u32,
    ) -> Result<()> {
        match self.insert.take() {
            Some(mut cb) => {
                let result = cb(self, output, song, track);
                self.insert = Some(cb);
                result
            }
            None => Ok(()),
        }
    }

    /// Replace the insert callback with a no-op once all songs are in.
    pub fn clear_insert(&mut self) {
        self.insert = None;
    }

    /// Run the finish callback at most once; later calls are no-ops.
    pub fn call_finish(&mut self, output: &mut dyn PatchFile) -> Result<()> {
        match self.finish.take() {
            Some(cb) => cb(self, output),
            None => Ok(()),
        }
    }

    pub fn add_song_pre(&mut self, cb: impl Fn(&mut Song) -> Result<()> + 'static) {
        self.song_pre.push(Rc::new(cb));
    }

    pub fn add_song_post(&mut self, cb: impl Fn(&mut Song) -> Result<()> + 'static) {
        self.song_post.push(Rc::new(cb));
    }

    pub fn add_chan_pre(&mut self, cb: impl Fn(&mut ChannelCtx) -> Result<()> + 'static) {
        self.chan_pre.push(Rc::new(cb));
    }

    pub fn add_chan_post(&mut self, cb: impl Fn(&mut ChannelCtx) -> Result<()> + 'static) {
        self.chan_post.push(Rc::new(cb));
    }

    pub fn add_chan_init(&mut self, cb: impl Fn(&mut Channel) + 'static) {
        self.chan_init.push(Rc::new(cb));
    }

    pub(crate) fn song_pre(&self) -> &[SongCallback] {
        &self.song_pre
    }

    pub(crate) fn song_post(&self) -> &[SongCallback] {
        &self.song_post
    }

    pub(crate) fn chan_pre(&self) -> &[ChanCallback] {
        &self.chan_pre
    }

    pub(crate) fn chan_post(&self) -> &[ChanCallback] {
        &self.chan_post
    }

    pub(crate) fn channel_inits(&self) -> &[ChanInit] {
        &self.chan_init
    }

    /// Construct a song bound to this engine: `chcount` channels, channel 1
    /// active.
    pub fn make_song(&self) -> Song {
        Song::new(self)
    }

    /// Register a feature at most once: add its commands under their default
    /// names (renamed or suppressed per `renames`), its channel initializers
    /// and its callbacks.
    pub fn import_feature(
        &mut self,
        feature: Feature,
        renames: &HashMap<String, Rename>,
    ) -> Result<()> {
        if !self.features.insert(feature.name.to_string()) {
            return Err(Error::Runtime(format!(
                "Feature '{}' already imported",
                feature.name
            )));
        }
        for (default_name, variants) in feature.commands {
            match renames.get(default_name) {
                Some(Rename::Suppress) => continue,
                Some(Rename::As(name)) => self.parser.commands.add_variants(name, variants),
                None => self.parser.commands.add_variants(default_name, variants),
            }
        }
        self.song_pre.extend(feature.song_pre);
        self.song_post.extend(feature.song_post);
        self.chan_pre.extend(feature.chan_pre);
        self.chan_post.extend(feature.chan_post);
        self.chan_init.extend(feature.chan_init);
        Ok(())
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.contains(name)
    }
}

/// Names of the compiled-in engines.
pub fn list_engines() -> Vec<&'static str> {
    vec!["famidrv"]
}

/// Resolve a compiled-in engine by name.
pub fn create_engine(name: &str) -> Result<Engine> {
    match name {
        "famidrv" => famidrv::engine(),
        _ => Err(Error::Argument(format!("Unknown engine: {name}"))),
    }
}
