//! Importable feature bundles
//!
//! A feature packages commands, per-channel state initialization and
//! pre/post callbacks that an engine can import à la carte. Command names
//! can be renamed or suppressed at import time through the rename map.

use crate::engine::{ChanCallback, ChanInit, SongCallback};
use crate::error::Result;
use crate::mml::command::{Builder, Command};
use crate::mml::lexer::{self, Value};

/// Import-time command renaming: a missing key keeps the default name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rename {
    Suppress,
    As(String),
}

pub struct Feature {
    pub name: &'static str,
    /// Default command name to variant list.
    pub commands: Vec<(&'static str, Vec<Command>)>,
    pub song_pre: Vec<SongCallback>,
    pub song_post: Vec<SongCallback>,
    pub chan_pre: Vec<ChanCallback>,
    pub chan_post: Vec<ChanCallback>,
    pub chan_init: Vec<ChanInit>,
}

impl Feature {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            commands: Vec::new(),
            song_pre: Vec::new(),
            song_post: Vec::new(),
            chan_pre: Vec::new(),
            chan_post: Vec::new(),
            chan_init: Vec::new(),
        }
    }
}

/// Channel muting: `@mute` (or its renamed form) suppresses all byte
/// emission on the selected channels; `@mute0` re-enables it.
pub fn mute() -> Result<Feature> {
    let mut f = Feature::new("mute");
    f.commands.push((
        "@mute",
        Builder::new()
            .param(lexer::ibool)
            .default("1")
            .on_channel(|ctx, params| {
                ctx.chan.ext.mute = params[0].as_int() != 0;
                Ok(())
            })
            .make()?,
    ));
    Ok(f)
}

/// Key signatures: `K+fc` sharpens every following `f` and `c`, `K-b`
/// flattens `b`, `K=ace` neutralizes. Note commands consult the map through
/// [`key_shift`].
pub fn keysig() -> Result<Feature> {
    let mut f = Feature::new("keysig");
    f.commands.push((
        "K",
        Builder::new()
            .param(lexer::keysig)
            .on_channel(|ctx, params| {
                if let Value::KeySig(map) = &params[0] {
                    for (&letter, &delta) in map {
                        ctx.chan.ext.keysig.insert(letter, delta);
                    }
                }
                Ok(())
            })
            .make()?,
    ));
    f.commands.push((
        "K0",
        Builder::new()
            .on_channel(|ctx, _| {
                ctx.chan.ext.keysig.clear();
                Ok(())
            })
            .make()?,
    ));
    Ok(f)
}

/// Semitone shift of a note letter under an accidental run and the
/// channel's key signature: an explicit `=` or any accidental overrides the
/// signature.
pub fn key_shift(keysig: &std::collections::BTreeMap<char, i8>, letter: char, acc: &Value) -> i32 {
    match acc {
        Value::Acc { neutral: true, shift } => *shift,
        Value::Acc { shift, .. } if *shift != 0 => *shift,
        _ => keysig.get(&letter).copied().unwrap_or(0) as i32,
    }
}
