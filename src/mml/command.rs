//! Command objects and the fluent command builder
//!
//! A command couples a chain of parameter lexers with handlers applied to the
//! song and to each active channel. The builder expands optional parameters
//! into an ordered list of variants: the full variant first, then one variant
//! per optional position with that parameter (and all previously elided ones)
//! omitted or replaced by a default synthesized at build time.

use crate::engine::channel::ChannelCtx;
use crate::engine::song::Song;
use crate::error::{Error, Result};
use crate::mml::cursor::Cursor;
use crate::mml::lexer::{Lexer, ParamError, Value};
use std::rc::Rc;

/// Side effect a song handler may request from the parser driver.
///
/// Text-macro expansion and pattern calls need the parser itself, which
/// handlers never hold; they return an action and the driver performs it.
#[derive(Debug, Clone, PartialEq)]
pub enum SongAction {
    None,
    /// Parse the given text before resuming the current source.
    Splice(String),
    /// Compile the named pattern (once per active channel) and emit a
    /// pointer to it.
    PatternCall(String),
}

pub type SongHandler = Rc<dyn Fn(&mut Song, &[Value]) -> Result<SongAction>>;
pub type ChannelHandler = Rc<dyn Fn(&mut ChannelCtx, &[Value]) -> Result<()>>;

#[derive(Clone)]
enum Slot {
    /// A textually present parameter. `delim` is a required delimiter
    /// replacing the default optional-comma rule.
    Read { lexer: Lexer, delim: Option<String> },
    /// An elided optional parameter with a build-time default.
    Synth(Value),
    /// An elided optional parameter without a default; contributes nothing.
    Elide,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Read { delim, .. } => f
                .debug_struct("Read")
                .field("delim", delim)
                .finish_non_exhaustive(),
            Slot::Synth(v) => f.debug_tuple("Synth").field(v).finish(),
            Slot::Elide => write!(f, "Elide"),
        }
    }
}

/// One command variant, stored in a macro table under its name.
#[derive(Clone)]
pub struct Command {
    slots: Vec<Slot>,
    variadic: bool,
    conditional: bool,
    song_handler: Option<SongHandler>,
    channel_handler: Option<ChannelHandler>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("slots", &self.slots)
            .field("variadic", &self.variadic)
            .field("conditional", &self.conditional)
            .field("song_handler", &self.song_handler.is_some())
            .field("channel_handler", &self.channel_handler.is_some())
            .finish()
    }
}

impl Command {
    /// Whether this directive applies even inside a disabled `#if` branch.
    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    /// Consume this variant's parameters. A [`ParamError`] means the variant
    /// does not apply; the cursor is restored before returning it.
    pub fn read_params(&self, cur: &mut Cursor) -> std::result::Result<Vec<Value>, ParamError> {
        let start = cur.pos();
        let mut out = Vec::new();
        let mut first = true;
        let last_read = self
            .slots
            .iter()
            .rposition(|s| matches!(s, Slot::Read { .. }));
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Synth(v) => out.push(v.clone()),
                Slot::Elide => {}
                Slot::Read { lexer, delim } => {
                    if first {
                        cur.skip_inline_space();
                    } else if let Err(e) = consume_delim(cur, delim.as_deref()) {
                        cur.seek(start);
                        return Err(e);
                    }
                    match lexer(cur) {
                        Ok(v) => out.push(v),
                        Err(e) => {
                            cur.seek(start);
                            return Err(e);
                        }
                    }
                    if self.variadic && Some(i) == last_read {
                        read_variadic_tail(cur, lexer, &mut out);
                    }
                    first = false;
                }
            }
        }
        Ok(out)
    }

    /// Apply the command: song handler first, then the channel handler on
    /// each active channel in index order, with `current_channel` updated
    /// before each call. Active-set changes made by the song handler are
    /// honored within the same command.
    pub fn apply(&self, song: &mut Song, params: &[Value]) -> Result<SongAction> {
        let action = self.apply_song(song, params)?;
        if let Some(handler) = &self.channel_handler {
            for idx in 0..song.channel_count() {
                if !song.channel(idx).active {
                    continue;
                }
                song.set_current(idx);
                let (chan, streams) = song.channel_split(idx);
                let mut ctx = ChannelCtx { chan, streams };
                handler(&mut ctx, params)?;
            }
        }
        Ok(action)
    }

    /// Apply only the song-level handler. Preprocessor directives use this;
    /// they must not touch channels.
    pub fn apply_song(&self, song: &mut Song, params: &[Value]) -> Result<SongAction> {
        match &self.song_handler {
            Some(handler) => handler(song, params),
            None => Ok(SongAction::None),
        }
    }
}

/// Consume the inter-parameter delimiter: an optional `,` surrounded by
/// optional inline whitespace, or a required custom delimiter. Delimiters
/// never cross a line end; only variadic repetition does.
fn consume_delim(cur: &mut Cursor, delim: Option<&str>) -> std::result::Result<(), ParamError> {
    cur.skip_inline_space();
    match delim {
        None => {
            cur.trim_literal(",");
        }
        Some(text) => {
            if !cur.trim_literal(text) {
                return Err(ParamError::new("parameter delimiter"));
            }
        }
    }
    cur.skip_inline_space();
    Ok(())
}

/// Repeat the last lexer until it fails or the consumed whitespace between
/// attempts crosses a blank line.
fn read_variadic_tail(cur: &mut Cursor, lexer: &Lexer, out: &mut Vec<Value>) {
    loop {
        let save = cur.pos();
        let ws = cur.skip_space();
        if crosses_blank_line(ws) {
            cur.seek(save);
            return;
        }
        cur.trim_literal(",");
        cur.skip_space();
        match lexer(cur) {
            Ok(v) => out.push(v),
            Err(_) => {
                cur.seek(save);
                return;
            }
        }
    }
}

/// Two newlines separated only by whitespace terminate a variadic run.
fn crosses_blank_line(ws: &str) -> bool {
    ws.matches('\n').count() >= 2 || ws.matches('\r').count() >= 2
}

/// Fluent configurator producing one or more command variants.
pub struct Builder {
    params: Vec<Lexer>,
    delims: Vec<Option<String>>,
    defaults: Vec<Option<String>>,
    option_order: Vec<usize>,
    variadic: bool,
    conditional: bool,
    song_handler: Option<SongHandler>,
    channel_handler: Option<ChannelHandler>,
    misuse: Option<&'static str>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            delims: Vec::new(),
            defaults: Vec::new(),
            option_order: Vec::new(),
            variadic: false,
            conditional: false,
            song_handler: None,
            channel_handler: None,
            misuse: None,
        }
    }

    /// Append a parameter lexer.
    pub fn param(mut self, lexer: impl Fn(&mut Cursor) -> std::result::Result<Value, ParamError> + 'static) -> Self {
        self.params.push(Rc::new(lexer));
        self.delims.push(None);
        self.defaults.push(None);
        self
    }

    fn last_param(&mut self) -> Option<usize> {
        if self.params.is_empty() {
            self.misuse = Some("parameter attribute without a parameter");
            None
        } else {
            Some(self.params.len() - 1)
        }
    }

    /// Require `text` as the delimiter before the most recent parameter.
    pub fn delim(mut self, text: &str) -> Self {
        if let Some(i) = self.last_param() {
            self.delims[i] = Some(text.to_string());
        }
        self
    }

    /// Mark the most recent parameter optional.
    pub fn optional(mut self) -> Self {
        if let Some(i) = self.last_param() {
            if self.option_order.contains(&i) {
                self.misuse = Some("parameter marked optional twice");
            } else {
                self.option_order.push(i);
            }
        }
        self
    }

    /// Default source text for the most recent parameter, used when it is
    /// elided. Implies `optional`.
    pub fn default(mut self, text: &str) -> Self {
        if let Some(i) = self.last_param() {
            self.defaults[i] = Some(text.to_string());
            if !self.option_order.contains(&i) {
                self.option_order.push(i);
            }
        }
        self
    }

    /// The last parameter repeats until its lexer fails or a blank line is
    /// crossed.
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Preprocessor use: the directive applies even inside a disabled `#if`.
    pub fn conditional(mut self) -> Self {
        self.conditional = true;
        self
    }

    pub fn on_song(mut self, handler: impl Fn(&mut Song, &[Value]) -> Result<SongAction> + 'static) -> Self {
        self.song_handler = Some(Rc::new(handler));
        self
    }

    pub fn on_channel(mut self, handler: impl Fn(&mut ChannelCtx, &[Value]) -> Result<()> + 'static) -> Self {
        self.channel_handler = Some(Rc::new(handler));
        self
    }

    /// Produce the variant list: the full variant, then one elided variant
    /// per optional position in declaration order of `optional`/`default`.
    pub fn make(self) -> Result<Vec<Command>> {
        if let Some(reason) = self.misuse {
            return Err(Error::Argument(format!("Invalid command definition: {reason}")));
        }
        if self.variadic && self.params.is_empty() {
            return Err(Error::Argument(
                "Invalid command definition: variadic command without parameters".into(),
            ));
        }

        let full: Vec<Slot> = self
            .params
            .iter()
            .zip(&self.delims)
            .map(|(lexer, delim)| Slot::Read {
                lexer: lexer.clone(),
                delim: delim.clone(),
            })
            .collect();

        let mut variants = Vec::with_capacity(self.option_order.len() + 1);
        let make_variant = |slots: Vec<Slot>, elided_last: bool| Command {
            variadic: self.variadic && !elided_last,
            conditional: self.conditional,
            song_handler: self.song_handler.clone(),
            channel_handler: self.channel_handler.clone(),
            slots,
        };

        variants.push(make_variant(full.clone(), false));

        let mut elided: Vec<usize> = Vec::new();
        for &pos in &self.option_order {
            elided.push(pos);
            let mut slots = full.clone();
            for &e in &elided {
                slots[e] = match &self.defaults[e] {
                    Some(text) => Slot::Synth(synthesize(&self.params[e], text)?),
                    None => Slot::Elide,
                };
            }
            let last = self.params.len() - 1;
            variants.push(make_variant(slots, elided.contains(&last)));
        }
        Ok(variants)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a lexer against a default string at build time.
fn synthesize(lexer: &Lexer, text: &str) -> Result<Value> {
    let mut cur = Cursor::new(text);
    lexer(&mut cur)
        .map_err(|e| Error::Argument(format!("Invalid parameter default '{text}': expected {}", e.expected)))
}
