//! Pipeline orchestrator
//!
//! Composes the preprocessor, parser and code generator with the engine's
//! per-song callbacks: setup once, then preprocess / beforeDefault / parse /
//! afterDefault / insert for each song, then finish once. Parsing maintains
//! a stack of source frames so text-macro splices nest, and compiles
//! pattern bodies on their first invocation per channel.

use crate::codegen::chunk::Chunk;
use crate::codegen::stream::START_LABEL;
use crate::engine::channel::ChannelCtx;
use crate::engine::song::Song;
use crate::engine::{Engine, PatchFile};
use crate::error::{Error, Result};
use crate::mml::command::SongAction;
use crate::mml::cursor::Cursor;
use crate::mml::preprocessor::preprocess;
use crate::warning::Warnings;
use std::collections::HashSet;
use std::rc::Rc;

/// Cap on nested macro expansion.
const MAX_SPLICE_DEPTH: usize = 64;

struct Frame {
    text: Rc<str>,
    pos: usize,
}

pub struct Compiler {
    pub warnings: Warnings,
    patterns_in_progress: HashSet<String>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            warnings: Warnings::new(),
            patterns_in_progress: HashSet::new(),
        }
    }

    /// Promote warnings to errors.
    pub fn set_strict(&mut self, strict: bool) {
        self.warnings.set_strict(strict);
    }

    /// Compile each `(mml, track)` pair and patch the results into the
    /// output image through the engine's callbacks.
    pub fn process_file(
        &mut self,
        engine: &mut Engine,
        inputs: &[(String, u32)],
        output: &mut dyn PatchFile,
    ) -> Result<()> {
        engine.call_setup(output)?;
        for (mml, track) in inputs {
            if !mml.is_ascii() {
                self.warnings
                    .warn("non-ascii input", "Input is not 7-bit ASCII".to_string())?;
            }
            let mut song = engine.make_song();
            let stripped = preprocess(&engine.parser, &mut song, mml)?;
            song.before_default(engine)?;
            self.run(engine, &mut song, &stripped)?;
            song.after_default(engine)?;
            engine.call_insert(output, &mut song, *track)?;
        }
        engine.clear_insert();
        engine.call_finish(output)?;
        Ok(())
    }

    /// Pull commands from the source until it is exhausted, applying each
    /// and performing the actions song handlers request.
    fn run(&mut self, engine: &Engine, song: &mut Song, src: &str) -> Result<()> {
        let mut frames = vec![Frame {
            text: Rc::from(src),
            pos: 0,
        }];
        loop {
            let (text, pos) = match frames.last() {
                Some(frame) => (frame.text.clone(), frame.pos),
                None => return Ok(()),
            };
            let mut cur = Cursor::new(&text);
            cur.seek(pos);
            match engine.parser.read_command(&mut cur)? {
                None => {
                    frames.pop();
                }
                Some((start, cmd, params)) => {
                    if let Some(frame) = frames.last_mut() {
                        frame.pos = cur.pos();
                    }
                    let action = cmd
                        .apply(song, &params)
                        .map_err(|e| e.with_trace(&text, start))?;
                    match action {
                        SongAction::None => {}
                        SongAction::Splice(body) => {
                            if frames.len() >= MAX_SPLICE_DEPTH {
                                return Err(Error::Runtime("Macro expansion too deep".into())
                                    .with_trace(&text, start));
                            }
                            frames.push(Frame {
                                text: Rc::from(body.as_str()),
                                pos: 0,
                            });
                        }
                        SongAction::PatternCall(name) => {
                            self.pattern_call(engine, song, &name)
                                .map_err(|e| e.with_trace(&text, start))?;
                        }
                    }
                }
            }
        }
    }

    /// Compile the pattern body once per (name, channel) into a detached
    /// stream, then emit a pointer to each active channel's copy.
    fn pattern_call(&mut self, engine: &Engine, song: &mut Song, name: &str) -> Result<()> {
        let body = song
            .patterns
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Command(format!("Undefined pattern '{name}'")))?;
        if !self.patterns_in_progress.insert(name.to_string()) {
            return Err(Error::Command(format!("Recursive pattern '{name}'")));
        }

        // channels that already compiled this pattern sit the body out
        let mut suspended = Vec::new();
        let mut pushed = Vec::new();
        for index in 0..song.channel_count() {
            if !song.channel(index).active {
                continue;
            }
            if song.pattern_streams.contains_key(&(name.to_string(), index)) {
                suspended.push(index);
                song.channel_mut(index).active = false;
            } else {
                let (chan, streams) = song.channel_split(index);
                let mut ctx = ChannelCtx { chan, streams };
                let id = ctx.push_stream();
                pushed.push((index, id));
            }
        }

        let compiled = if pushed.is_empty() {
            Ok(())
        } else {
            self.run(engine, song, &body)
        };
        self.patterns_in_progress.remove(name);
        compiled?;

        for &(index, id) in &pushed {
            let (chan, streams) = song.channel_split(index);
            let mut ctx = ChannelCtx { chan, streams };
            let popped = ctx.pop_stream()?;
            if popped != id {
                return Err(Error::Runtime(format!(
                    "Unbalanced loop in pattern '{name}'"
                )));
            }
            song.pattern_streams.insert((name.to_string(), index), id);
        }
        for index in suspended {
            song.channel_mut(index).active = true;
        }

        let (width, endian) = engine.pattern_pointer();
        for index in 0..song.channel_count() {
            if !song.channel(index).active {
                continue;
            }
            let id = song
                .pattern_streams
                .get(&(name.to_string(), index))
                .copied()
                .ok_or_else(|| {
                    Error::Runtime(format!("Pattern '{name}' was not compiled"))
                })?;
            let (chan, streams) = song.channel_split(index);
            let mut ctx = ChannelCtx { chan, streams };
            ctx.emit(Chunk::pointer(id, START_LABEL, width, endian)?);
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
