//! Line-oriented preprocessor
//!
//! Applies `#`-directives in source order and strips them from the MML text
//! while keeping the line count intact: every directive line is replaced by
//! the single-line comment token and every line inside a disabled `#if`
//! branch by the empty string, so downstream traces keep their row numbers.

use crate::engine::song::Song;
use crate::error::{Error, Result};
use crate::mml::command::{Builder, SongAction};
use crate::mml::cursor::Cursor;
use crate::mml::lexer::{self, ParamError, Value};
use crate::mml::parser::Parser;
use crate::mml::table::MacroTable;
use std::collections::HashMap;

/// Per-song preprocessor state.
pub struct PpContext {
    pub defines: HashMap<String, i64>,
    pub if_stack: Vec<bool>,
    /// Directive lines, verbatim; empty for source lines.
    pub pre_lines: Vec<String>,
    /// Source lines with directives replaced by the comment token and
    /// disabled lines by the empty string.
    pub mml_lines: Vec<String>,
}

impl PpContext {
    pub fn new() -> Self {
        Self {
            defines: HashMap::new(),
            if_stack: Vec::new(),
            pre_lines: Vec::new(),
            mml_lines: Vec::new(),
        }
    }

    /// A line is emitted iff the stack is empty or all entries are true.
    pub fn enabled(&self) -> bool {
        self.if_stack.iter().all(|&b| b)
    }

    pub fn get_constant(&self, name: &str) -> Option<i64> {
        self.defines.get(name).copied()
    }
}

impl Default for PpContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `#if` operand: a decimal literal or an identifier resolved against the
/// defines at application time.
fn if_operand(cur: &mut Cursor) -> std::result::Result<Value, ParamError> {
    if let Some(text) = cur.trim("%d+") {
        return Ok(Value::Int(
            text.parse().map_err(|_| ParamError::new("integer out of range"))?,
        ));
    }
    lexer::ident2(cur)
}

fn resolve_operand(song: &Song, value: &Value) -> Result<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Str(name) => song
            .pp
            .get_constant(name)
            .ok_or_else(|| Error::Syntax(format!("Undefined constant '{name}'"))),
        _ => Ok(0),
    }
}

/// Install the default directive set.
pub fn install_directives(table: &mut MacroTable) -> Result<()> {
    table.add_variants(
        "define",
        Builder::new()
            .param(lexer::ident2)
            .param(lexer::int)
            .default("1")
            .on_song(|song, params| {
                let name = params[0].as_str().to_string();
                if song.pp.defines.contains_key(&name) {
                    return Err(Error::Command(format!("Macro '{name}' already defined")));
                }
                song.pp.defines.insert(name, params[1].as_int());
                Ok(SongAction::None)
            })
            .make()?,
    );

    table.add_variants(
        "undef",
        Builder::new()
            .param(lexer::ident2)
            .on_song(|song, params| {
                song.pp.defines.remove(params[0].as_str());
                Ok(SongAction::None)
            })
            .make()?,
    );

    table.add_variants(
        "ifdef",
        Builder::new()
            .param(lexer::ident2)
            .conditional()
            .on_song(|song, params| {
                let defined = song.pp.defines.contains_key(params[0].as_str());
                song.pp.if_stack.push(defined);
                Ok(SongAction::None)
            })
            .make()?,
    );

    table.add_variants(
        "ifndef",
        Builder::new()
            .param(lexer::ident2)
            .conditional()
            .on_song(|song, params| {
                let defined = song.pp.defines.contains_key(params[0].as_str());
                song.pp.if_stack.push(!defined);
                Ok(SongAction::None)
            })
            .make()?,
    );

    table.add_variants(
        "if",
        Builder::new()
            .param(if_operand)
            .param(lexer::compare)
            .param(if_operand)
            .conditional()
            .on_song(|song, params| {
                let lhs = resolve_operand(song, &params[0])?;
                let rhs = resolve_operand(song, &params[2])?;
                let result = match params[1] {
                    Value::Compare(f) => f(lhs, rhs),
                    _ => false,
                };
                song.pp.if_stack.push(result);
                Ok(SongAction::None)
            })
            .make()?,
    );

    table.add_variants(
        "else",
        Builder::new()
            .conditional()
            .on_song(|song, _| match song.pp.if_stack.last_mut() {
                Some(top) => {
                    *top = !*top;
                    Ok(SongAction::None)
                }
                None => Err(Error::Command("'else' without matching 'if'".into())),
            })
            .make()?,
    );

    table.add_variants(
        "endif",
        Builder::new()
            .conditional()
            .on_song(|song, _| match song.pp.if_stack.pop() {
                Some(_) => Ok(SongAction::None),
                None => Err(Error::Command("'endif' without matching 'if'".into())),
            })
            .make()?,
    );

    table.add_variants(
        "remap",
        Builder::new()
            .param(lexer::uint)
            .param(lexer::chr)
            .on_song(|song, params| {
                let index = params[0].as_int();
                let name = params[1].as_str().chars().next().unwrap_or(' ');
                song.remap(index, name)?;
                Ok(SongAction::None)
            })
            .make()?,
    );

    Ok(())
}

/// Run the preprocessor over `src`, applying directives to `song` and
/// returning the stripped MML text.
pub fn preprocess(parser: &Parser, song: &mut Song, src: &str) -> Result<String> {
    let symbols = parser.symbols();
    let comment = symbols.comment.clone();
    let prefix = symbols.directive_prefix;

    for (i, line) in src.split(['\r', '\n']).enumerate() {
        let row = i + 1;
        if i == 0 && line.starts_with("#!") {
            // shebang
            song.pp.pre_lines.push(line.to_string());
            song.pp.mml_lines.push(comment.clone());
            continue;
        }
        if line.starts_with(prefix) {
            song.pp.pre_lines.push(line.to_string());
            song.pp.mml_lines.push(comment.clone());
            let mut cur = Cursor::new(line);
            cur.advance(prefix.len_utf8());
            let (cmd, params) = parser.read_directive(&mut cur).map_err(|e| e.at_row(row))?;
            if cmd.is_conditional() || song.pp.enabled() {
                cmd.apply_song(song, &params)
                    .map_err(|e| e.with_trace(line, 0).at_row(row))?;
            }
        } else {
            let emit = song.pp.enabled();
            song.pp
                .mml_lines
                .push(if emit { line.to_string() } else { String::new() });
            song.pp.pre_lines.push(String::new());
        }
    }

    if !song.pp.if_stack.is_empty() {
        return Err(Error::Command("Unterminated conditional".into()));
    }
    Ok(song.pp.mml_lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;

    fn song_and_parser() -> (Song, Parser) {
        let engine = Engine::new("test", 3, Parser::new().unwrap()).unwrap();
        (engine.make_song(), Parser::new().unwrap())
    }

    #[test]
    fn test_conditional_elision_keeps_line_count() {
        let (mut song, parser) = song_and_parser();
        let src = "#define A 1\n#ifdef A\nc\n#else\nd\n#endif\n";
        let stripped = preprocess(&parser, &mut song, src).unwrap();
        assert_eq!(stripped, ";\n;\nc\n;\n\n;\n");
        assert_eq!(song.pp.defines.get("A"), Some(&1));
        assert_eq!(song.pp.pre_lines.len(), song.pp.mml_lines.len());
    }

    #[test]
    fn test_ifndef_and_undef() {
        let (mut song, parser) = song_and_parser();
        let src = "#define A\n#undef A\n#ifndef A\nc\n#endif";
        let stripped = preprocess(&parser, &mut song, src).unwrap();
        assert_eq!(stripped, ";\n;\n;\nc\n;");
        assert!(!song.pp.defines.contains_key("A"));
    }

    #[test]
    fn test_if_resolves_constants() {
        let (mut song, parser) = song_and_parser();
        let src = "#define SPEED 3\n#if SPEED >= 2\nc\n#endif";
        let stripped = preprocess(&parser, &mut song, src).unwrap();
        assert!(stripped.contains('c'));
    }

    #[test]
    fn test_if_undefined_constant_fails() {
        let (mut song, parser) = song_and_parser();
        let err = preprocess(&parser, &mut song, "#if NOPE == 1\n#endif").unwrap_err();
        assert!(err.to_string().contains("Undefined constant"));
    }

    #[test]
    fn test_disabled_branch_skips_defines() {
        let (mut song, parser) = song_and_parser();
        let src = "#ifdef MISSING\n#define B 2\n#endif";
        preprocess(&parser, &mut song, src).unwrap();
        assert!(!song.pp.defines.contains_key("B"));
    }

    #[test]
    fn test_trailing_text_after_directive_fails() {
        let (mut song, parser) = song_and_parser();
        let err = preprocess(&parser, &mut song, "#endif junk").unwrap_err();
        assert!(err.to_string().contains("Trailing text"));
    }

    #[test]
    fn test_trailing_comment_after_directive_is_fine() {
        let (mut song, parser) = song_and_parser();
        preprocess(&parser, &mut song, "#define A 1 ; note").unwrap();
        assert_eq!(song.pp.defines.get("A"), Some(&1));
    }

    #[test]
    fn test_shebang_becomes_comment() {
        let (mut song, parser) = song_and_parser();
        let stripped = preprocess(&parser, &mut song, "#!/usr/bin/env mgcints\nc").unwrap();
        assert_eq!(stripped, ";\nc");
    }

    #[test]
    fn test_unterminated_conditional_fails() {
        let (mut song, parser) = song_and_parser();
        assert!(preprocess(&parser, &mut song, "#ifdef A\nc").is_err());
    }

    #[test]
    fn test_duplicate_define_fails() {
        let (mut song, parser) = song_and_parser();
        let err = preprocess(&parser, &mut song, "#define A 1\n#define A 2").unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_remap() {
        let (mut song, parser) = song_and_parser();
        preprocess(&parser, &mut song, "#remap 2 X").unwrap();
        assert_eq!(song.channel_name(1), 'X');
    }
}
