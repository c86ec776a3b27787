//! Default parameter lexers
//!
//! A lexer consumes one command parameter from a cursor and yields a
//! [`Value`]. Failure is reported as a [`ParamError`] result, the internal
//! signal telling the parser driver to rewind and try the next command
//! variant; it never surfaces to the user unless an engine leaks it.

use crate::mml::cursor::Cursor;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Recoverable lexer mismatch. The caller restores the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamError {
    pub expected: &'static str,
}

impl ParamError {
    pub fn new(expected: &'static str) -> Self {
        Self { expected }
    }
}

pub type LexResult = std::result::Result<Value, ParamError>;

/// Lexer function stored by command builders.
pub type Lexer = Rc<dyn Fn(&mut Cursor) -> LexResult>;

/// A parsed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Placeholder consumed by parameterless matchers (comments).
    None,
    Int(i64),
    Bool(bool),
    Str(String),
    /// A set of single-character channel names.
    Chars(BTreeSet<char>),
    /// Note letter (lowercase) to semitone shift.
    KeySig(BTreeMap<char, i8>),
    /// Accidental run: explicit shift, or a neutralizing `=`.
    Acc { shift: i32, neutral: bool },
    Binop(fn(i64, i64) -> i64),
    Compare(fn(i64, i64) -> bool),
}

impl Value {
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            Value::Bool(b) => *b as i64,
            _ => 0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(s) => s,
            _ => "",
        }
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            _ => false,
        }
    }
}

fn int_from(text: &str, radix: u32) -> Result<i64, ParamError> {
    i64::from_str_radix(text, radix).map_err(|_| ParamError::new("integer out of range"))
}

/// `0h[0-9A-Fa-f]+` | `0b[01]+` | `[0-9]+`
pub fn uint(cur: &mut Cursor) -> LexResult {
    if let Some(text) = cur.trim("0h%x+") {
        return Ok(Value::Int(int_from(&text[2..], 16)?));
    }
    if let Some(text) = cur.trim("0b[01]+") {
        return Ok(Value::Int(int_from(&text[2..], 2)?));
    }
    if let Some(text) = cur.trim("%d+") {
        return Ok(Value::Int(int_from(text, 10)?));
    }
    Err(ParamError::new("unsigned integer"))
}

fn uint_max(cur: &mut Cursor, max: i64, expected: &'static str) -> LexResult {
    let v = uint(cur)?.as_int();
    if v > max {
        return Err(ParamError::new(expected));
    }
    Ok(Value::Int(v))
}

pub fn uint8(cur: &mut Cursor) -> LexResult {
    uint_max(cur, 0xFF, "8-bit unsigned integer")
}

pub fn uint16(cur: &mut Cursor) -> LexResult {
    uint_max(cur, 0xFFFF, "16-bit unsigned integer")
}

/// Optional `-` followed by an unsigned integer.
pub fn int(cur: &mut Cursor) -> LexResult {
    let neg = cur.trim_literal("-");
    let v = uint(cur)?.as_int();
    Ok(Value::Int(if neg { -v } else { v }))
}

fn int_range(cur: &mut Cursor, lo: i64, hi: i64, expected: &'static str) -> LexResult {
    let v = int(cur)?.as_int();
    if v < lo || v > hi {
        return Err(ParamError::new(expected));
    }
    Ok(Value::Int(v))
}

pub fn int8(cur: &mut Cursor) -> LexResult {
    int_range(cur, -0x80, 0x7F, "8-bit signed integer")
}

pub fn int16(cur: &mut Cursor) -> LexResult {
    int_range(cur, -0x8000, 0x7FFF, "16-bit signed integer")
}

/// `Int8` reinterpreted as unsigned.
pub fn byte(cur: &mut Cursor) -> LexResult {
    let v = int8(cur)?.as_int();
    Ok(Value::Int((v as i8 as u8) as i64))
}

/// `Int16` reinterpreted as unsigned.
pub fn word(cur: &mut Cursor) -> LexResult {
    let v = int16(cur)?.as_int();
    Ok(Value::Int((v as i16 as u16) as i64))
}

/// `0` or `1`.
pub fn boolean(cur: &mut Cursor) -> LexResult {
    match cur.trim("[01]") {
        Some(text) => Ok(Value::Bool(text == "1")),
        None => Err(ParamError::new("0 or 1")),
    }
}

/// As `boolean`, yielding `0`/`1`.
pub fn ibool(cur: &mut Cursor) -> LexResult {
    let b = boolean(cur)?.as_bool();
    Ok(Value::Int(b as i64))
}

/// One non-whitespace character followed by whitespace (or end of input).
pub fn chr(cur: &mut Cursor) -> LexResult {
    match cur.peek() {
        Some(c) if !c.is_ascii_whitespace() => {
            cur.take();
            match cur.peek() {
                None => Ok(Value::Str(c.to_string())),
                Some(next) if next.is_ascii_whitespace() => Ok(Value::Str(c.to_string())),
                Some(_) => Err(ParamError::new("single character")),
            }
        }
        _ => Err(ParamError::new("single character")),
    }
}

/// A non-whitespace run, yielded as a set of characters.
pub fn channel(cur: &mut Cursor) -> LexResult {
    match cur.trim("[^%s]+") {
        Some(text) => Ok(Value::Chars(text.chars().collect())),
        None => Err(ParamError::new("channel list")),
    }
}

/// `"..."` or `'...'` with backslash escapes.
pub fn qstring(cur: &mut Cursor) -> LexResult {
    let quote = match cur.peek() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(ParamError::new("quoted string")),
    };
    let save = cur.pos();
    cur.take();
    let mut out = String::new();
    loop {
        match cur.take() {
            None => {
                cur.seek(save);
                return Err(ParamError::new("unterminated string"));
            }
            Some(c) if c == quote => return Ok(Value::Str(out)),
            Some('\\') => match cur.take() {
                None => {
                    cur.seek(save);
                    return Err(ParamError::new("unterminated string"));
                }
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
            },
            Some(c) => out.push(c),
        }
    }
}

/// `[A-Za-z0-9_]+`
pub fn ident(cur: &mut Cursor) -> LexResult {
    match cur.trim("[A-Za-z0-9_]+") {
        Some(text) => Ok(Value::Str(text.to_string())),
        None => Err(ParamError::new("identifier")),
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn ident2(cur: &mut Cursor) -> LexResult {
    match cur.trim("[A-Za-z_][A-Za-z0-9_]*") {
        Some(text) => Ok(Value::Str(text.to_string())),
        None => Err(ParamError::new("identifier")),
    }
}

/// `[+-=][A-Ga-g]+`: a sign applied to a run of note letters.
pub fn keysig(cur: &mut Cursor) -> LexResult {
    match cur.trim("[+%-=][A-Ga-g]+") {
        Some(text) => {
            let mut chars = text.chars();
            let delta: i8 = match chars.next() {
                Some('+') => 1,
                Some('-') => -1,
                _ => 0,
            };
            let mut map = BTreeMap::new();
            for c in chars {
                map.insert(c.to_ascii_lowercase(), delta);
            }
            Ok(Value::KeySig(map))
        }
        None => Err(ParamError::new("key signature")),
    }
}

/// Optional `=` then `[+-]*`. Always succeeds, possibly consuming nothing.
pub fn acc(cur: &mut Cursor) -> LexResult {
    let neutral = cur.trim_literal("=");
    let mut shift = 0;
    if let Some(text) = cur.trim("[+%-]*") {
        for c in text.chars() {
            shift += if c == '+' { 1 } else { -1 };
        }
    }
    Ok(Value::Acc { shift, neutral })
}

fn op_add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}
fn op_sub(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}
fn op_mul(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}
fn op_div(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a.wrapping_div(b)
    }
}
fn op_pow(a: i64, b: i64) -> i64 {
    if b < 0 {
        0
    } else {
        a.wrapping_pow(b.min(u32::MAX as i64) as u32)
    }
}
fn op_rem(a: i64, b: i64) -> i64 {
    if b == 0 {
        0
    } else {
        a.wrapping_rem(b)
    }
}

/// One of `+ - * / ^ %`, yielded as a binary function.
pub fn binop(cur: &mut Cursor) -> LexResult {
    let f: fn(i64, i64) -> i64 = match cur.peek() {
        Some('+') => op_add,
        Some('-') => op_sub,
        Some('*') => op_mul,
        Some('/') => op_div,
        Some('^') => op_pow,
        Some('%') => op_rem,
        _ => return Err(ParamError::new("binary operator")),
    };
    cur.take();
    Ok(Value::Binop(f))
}

fn cmp_lt(a: i64, b: i64) -> bool {
    a < b
}
fn cmp_gt(a: i64, b: i64) -> bool {
    a > b
}
fn cmp_le(a: i64, b: i64) -> bool {
    a <= b
}
fn cmp_ge(a: i64, b: i64) -> bool {
    a >= b
}
fn cmp_eq(a: i64, b: i64) -> bool {
    a == b
}
fn cmp_ne(a: i64, b: i64) -> bool {
    a != b
}

/// One of `< > <= >= == !=`, yielded as a comparison function.
pub fn compare(cur: &mut Cursor) -> LexResult {
    for (text, f) in [
        ("<=", cmp_le as fn(i64, i64) -> bool),
        (">=", cmp_ge),
        ("==", cmp_eq),
        ("!=", cmp_ne),
        ("<", cmp_lt),
        (">", cmp_gt),
    ] {
        if cur.trim_literal(text) {
            return Ok(Value::Compare(f));
        }
    }
    Err(ParamError::new("comparison operator"))
}

/// Everything up to the end of the current line.
pub fn rest_of_line(cur: &mut Cursor) -> LexResult {
    let text = cur.trim("[^\r\n]*").unwrap_or("");
    Ok(Value::Str(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(f: fn(&mut Cursor) -> LexResult, src: &str) -> LexResult {
        let mut cur = Cursor::new(src);
        f(&mut cur)
    }

    #[test]
    fn test_uint_radices() {
        assert_eq!(lex(uint, "42"), Ok(Value::Int(42)));
        assert_eq!(lex(uint, "0h2F"), Ok(Value::Int(0x2F)));
        assert_eq!(lex(uint, "0b101"), Ok(Value::Int(5)));
        assert!(lex(uint, "-3").is_err());
        assert!(lex(uint, "x").is_err());
    }

    #[test]
    fn test_uint_hex_prefix_falls_back_to_decimal() {
        // "0hz" is not a hex literal, but "0" is a decimal one
        let mut cur = Cursor::new("0hz");
        assert_eq!(uint(&mut cur), Ok(Value::Int(0)));
        assert_eq!(cur.rest(), "hz");
    }

    #[test]
    fn test_ranged_ints() {
        assert_eq!(lex(uint8, "255"), Ok(Value::Int(255)));
        assert!(lex(uint8, "256").is_err());
        assert_eq!(lex(int8, "-128"), Ok(Value::Int(-128)));
        assert!(lex(int8, "-129").is_err());
        assert_eq!(lex(int16, "-32768"), Ok(Value::Int(-32768)));
    }

    #[test]
    fn test_byte_reinterprets_negative() {
        assert_eq!(lex(byte, "-1"), Ok(Value::Int(0xFF)));
        assert_eq!(lex(word, "-2"), Ok(Value::Int(0xFFFE)));
    }

    #[test]
    fn test_boolean() {
        assert_eq!(lex(boolean, "1"), Ok(Value::Bool(true)));
        assert_eq!(lex(ibool, "0"), Ok(Value::Int(0)));
        assert!(lex(boolean, "2").is_err());
    }

    #[test]
    fn test_chr_requires_trailing_whitespace() {
        assert_eq!(lex(chr, "A "), Ok(Value::Str("A".into())));
        assert_eq!(lex(chr, "A"), Ok(Value::Str("A".into())));
        assert!(lex(chr, "AB").is_err());
    }

    #[test]
    fn test_channel_set() {
        match lex(channel, "13A rest").unwrap() {
            Value::Chars(set) => {
                assert_eq!(set.len(), 3);
                assert!(set.contains(&'1') && set.contains(&'3') && set.contains(&'A'));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_qstring_escapes() {
        assert_eq!(lex(qstring, r#""a\nb""#), Ok(Value::Str("a\nb".into())));
        assert_eq!(lex(qstring, r#"'it\'s'"#), Ok(Value::Str("it's".into())));
        assert!(lex(qstring, "\"open").is_err());
    }

    #[test]
    fn test_ident_variants() {
        assert_eq!(lex(ident, "9lives"), Ok(Value::Str("9lives".into())));
        assert!(lex(ident2, "9lives").is_err());
        assert_eq!(lex(ident2, "_x9"), Ok(Value::Str("_x9".into())));
    }

    #[test]
    fn test_keysig_map() {
        match lex(keysig, "-bea").unwrap() {
            Value::KeySig(map) => {
                assert_eq!(map.get(&'b'), Some(&-1));
                assert_eq!(map.get(&'e'), Some(&-1));
                assert_eq!(map.get(&'a'), Some(&-1));
            }
            other => panic!("unexpected value {other:?}"),
        }
        match lex(keysig, "=F").unwrap() {
            Value::KeySig(map) => assert_eq!(map.get(&'f'), Some(&0)),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_acc() {
        assert_eq!(lex(acc, "++c"), Ok(Value::Acc { shift: 2, neutral: false }));
        assert_eq!(lex(acc, "=-"), Ok(Value::Acc { shift: -1, neutral: true }));
        assert_eq!(lex(acc, "c"), Ok(Value::Acc { shift: 0, neutral: false }));
    }

    #[test]
    fn test_binop_apply() {
        match lex(binop, "^").unwrap() {
            Value::Binop(f) => assert_eq!(f(2, 10), 1024),
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_compare_longest_first() {
        let mut cur = Cursor::new("<=3");
        match compare(&mut cur).unwrap() {
            Value::Compare(f) => {
                assert!(f(1, 1));
                assert_eq!(cur.rest(), "3");
            }
            other => panic!("unexpected value {other:?}"),
        }
    }
}
