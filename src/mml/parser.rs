//! Parser driver and the default command set
//!
//! `read_command` pulls one command at a time from the stripped MML source:
//! longest-match name lookup, then each variant's parameter chain in
//! insertion order until one accepts. The default command set installed on
//! every parser covers comments, channel selection, raw byte insertion, text
//! macros and patterns; the symbols they are bound to are configurable.

use crate::engine::song::Song;
use crate::error::{Error, Result};
use crate::mml::command::{Builder, Command, SongAction};
use crate::mml::cursor::Cursor;
use crate::mml::lexer::{self, ParamError, Value};
use crate::mml::preprocessor;
use crate::mml::table::MacroTable;
use std::rc::Rc;

/// Configurable MML symbol set.
#[derive(Debug, Clone)]
pub struct Symbols {
    pub comment: String,
    pub block_comment_open: String,
    pub block_comment_close: String,
    pub raw_insert: String,
    pub chan_select: String,
    pub macro_define: String,
    pub macro_invoke: String,
    pub pattern_define: String,
    pub pattern_invoke: String,
    pub directive_prefix: char,
}

impl Default for Symbols {
    fn default() -> Self {
        Self {
            comment: ";".into(),
            block_comment_open: "/*".into(),
            block_comment_close: "*/".into(),
            raw_insert: "`".into(),
            chan_select: "!".into(),
            macro_define: "$$".into(),
            macro_invoke: "$".into(),
            pattern_define: "$<".into(),
            pattern_invoke: "$>".into(),
            directive_prefix: '#',
        }
    }
}

/// Command and directive tables plus the symbol configuration.
pub struct Parser {
    pub commands: MacroTable,
    pub directives: MacroTable,
    symbols: Symbols,
}

impl Parser {
    pub fn new() -> Result<Self> {
        Self::with_symbols(Symbols::default())
    }

    pub fn with_symbols(symbols: Symbols) -> Result<Self> {
        let mut commands = MacroTable::new();
        install_default_commands(&mut commands, &symbols)?;
        let mut directives = MacroTable::new();
        preprocessor::install_directives(&mut directives)?;
        Ok(Self {
            commands,
            directives,
            symbols,
        })
    }

    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    /// Read the next command from the cursor. Returns `None` at end of
    /// input, otherwise the command start position, the accepted variant and
    /// its parameters.
    pub fn read_command(
        &self,
        cur: &mut Cursor,
    ) -> Result<Option<(usize, Rc<Command>, Vec<Value>)>> {
        cur.skip_space();
        if cur.is_empty() {
            return Ok(None);
        }
        let start = cur.pos();
        let list = match self.commands.read_next(cur) {
            Some(list) => list,
            None => {
                return Err(
                    Error::Syntax("Unknown command".into()).with_trace(cur.src(), start)
                );
            }
        };
        let after_name = cur.pos();
        for cmd in list {
            cur.seek(after_name);
            match cmd.read_params(cur) {
                Ok(params) => return Ok(Some((start, cmd.clone(), params))),
                Err(ParamError { .. }) => continue,
            }
        }
        cur.seek(start);
        Err(Error::Syntax("Illegal command parameters".into()).with_trace(cur.src(), start))
    }

    /// Read a preprocessor directive from a single-line cursor positioned
    /// just past the directive prefix. The remainder of the line must be
    /// whitespace or a single-line comment.
    pub fn read_directive(&self, cur: &mut Cursor) -> Result<(Rc<Command>, Vec<Value>)> {
        cur.skip_space();
        let start = cur.pos();
        let list = match self.directives.read_next(cur) {
            Some(list) => list,
            None => {
                return Err(
                    Error::Syntax("Unknown directive".into()).with_trace(cur.src(), start)
                );
            }
        };
        let after_name = cur.pos();
        let mut found = None;
        for cmd in list {
            cur.seek(after_name);
            match cmd.read_params(cur) {
                Ok(params) => {
                    found = Some((cmd.clone(), params));
                    break;
                }
                Err(ParamError { .. }) => continue,
            }
        }
        let (cmd, params) = match found {
            Some(hit) => hit,
            None => {
                cur.seek(start);
                return Err(
                    Error::Syntax("Illegal directive parameters".into()).with_trace(cur.src(), start)
                );
            }
        };
        cur.skip_space();
        if !cur.is_empty() && !cur.starts_with(&self.symbols.comment) {
            return Err(Error::Runtime("Trailing text after preprocessor directive".into())
                .with_trace(cur.src(), cur.pos()));
        }
        Ok((cmd, params))
    }
}

/// Install the framework-level command set under the configured symbols.
fn install_default_commands(table: &mut MacroTable, symbols: &Symbols) -> Result<()> {
    // single-line comment
    table.add_variants(
        &symbols.comment,
        Builder::new().param(lexer::rest_of_line).make()?,
    );

    // multi-line comment
    let close = symbols.block_comment_close.clone();
    table.add_variants(
        &symbols.block_comment_open,
        Builder::new()
            .param(move |cur: &mut Cursor| match cur.find_literal(&close) {
                Some(end) => {
                    cur.seek(end + close.len());
                    Ok(Value::None)
                }
                None => Err(ParamError::new("comment terminator")),
            })
            .make()?,
    );

    // channel select
    table.add_variants(
        &symbols.chan_select,
        Builder::new()
            .param(lexer::channel)
            .on_song(|song: &mut Song, params: &[Value]| {
                let set = match &params[0] {
                    Value::Chars(set) => set,
                    _ => return Ok(SongAction::None),
                };
                let mut picked = Vec::with_capacity(set.len());
                for &name in set {
                    match song.resolve_channel(name) {
                        Some(idx) => picked.push(idx),
                        None => {
                            return Err(Error::Command(format!("Unknown channel '{name}'")));
                        }
                    }
                }
                for idx in 0..song.channel_count() {
                    song.channel_mut(idx).active = false;
                }
                for idx in picked {
                    song.channel_mut(idx).active = true;
                }
                Ok(SongAction::None)
            })
            .make()?,
    );

    // raw byte insertion
    table.add_variants(
        &symbols.raw_insert,
        Builder::new()
            .param(lexer::uint8)
            .variadic()
            .on_channel(|ctx, params| {
                for value in params {
                    ctx.emit_byte(value.as_int() as u8);
                }
                Ok(())
            })
            .make()?,
    );

    // text macro definition
    table.add_variants(
        &symbols.macro_define,
        Builder::new()
            .param(lexer::ident)
            .param(lexer::rest_of_line)
            .on_song(|song, params| {
                song.macros
                    .insert(params[0].as_str().to_string(), params[1].as_str().to_string());
                Ok(SongAction::None)
            })
            .make()?,
    );

    // text macro invocation
    table.add_variants(
        &symbols.macro_invoke,
        Builder::new()
            .param(lexer::ident)
            .on_song(|song, params| {
                let name = params[0].as_str();
                match song.macros.get(name) {
                    Some(body) => Ok(SongAction::Splice(body.clone())),
                    None => Err(Error::Command(format!("Undefined macro '{name}'"))),
                }
            })
            .make()?,
    );

    // pattern definition
    table.add_variants(
        &symbols.pattern_define,
        Builder::new()
            .param(lexer::ident)
            .param(lexer::rest_of_line)
            .on_song(|song, params| {
                song.patterns
                    .insert(params[0].as_str().to_string(), params[1].as_str().to_string());
                Ok(SongAction::None)
            })
            .make()?,
    );

    // pattern invocation
    table.add_variants(
        &symbols.pattern_invoke,
        Builder::new()
            .param(lexer::ident)
            .on_song(|song, params| {
                let name = params[0].as_str();
                if !song.patterns.contains_key(name) {
                    return Err(Error::Command(format!("Undefined pattern '{name}'")));
                }
                Ok(SongAction::PatternCall(name.to_string()))
            })
            .make()?,
    );

    Ok(())
}
