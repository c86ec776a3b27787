//! Source cursor with pattern-based lexing primitives
//!
//! A cursor is a read-only view of an immutable source string plus a byte
//! offset. All lexers operate on a cursor: they advance it on success and the
//! caller restores it on failure. The matching surface uses POSIX-ish
//! character classes (`%d`, `%a`, `%w`, `%s`, `%x`, bracket classes, `*`,
//! `+`, `-` for non-greedy repetition, `?`); patterns are translated to
//! `regex` syntax once and cached process-wide.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

static PATTERN_CACHE: LazyLock<Mutex<HashMap<String, Regex>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Translate a match pattern into `regex` syntax.
fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.next() {
                Some('d') => out.push_str(if in_class { "0-9" } else { "[0-9]" }),
                Some('D') => out.push_str("[^0-9]"),
                Some('a') => out.push_str(if in_class { "A-Za-z" } else { "[A-Za-z]" }),
                Some('A') => out.push_str("[^A-Za-z]"),
                Some('w') => out.push_str(if in_class { "0-9A-Za-z" } else { "[0-9A-Za-z]" }),
                Some('W') => out.push_str("[^0-9A-Za-z]"),
                Some('x') => out.push_str(if in_class { "0-9A-Fa-f" } else { "[0-9A-Fa-f]" }),
                Some('X') => out.push_str("[^0-9A-Fa-f]"),
                Some('s') => out.push_str(r"\s"),
                Some('S') => out.push_str(r"\S"),
                Some(other) => {
                    // escaped literal
                    if other.is_ascii_alphanumeric() {
                        out.push(other);
                    } else {
                        out.push('\\');
                        out.push(other);
                    }
                }
                None => {}
            },
            '[' if !in_class => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
            }
            ']' if in_class => {
                in_class = false;
                out.push(']');
            }
            '-' if !in_class => out.push_str("*?"),
            '*' | '+' | '?' | '.' if !in_class => out.push(c),
            // regex metacharacters that are literals in this flavor
            '(' | ')' | '{' | '}' | '|' | '^' | '$' | '\\' | '*' | '+' | '?' | '.' | ']' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Fetch the compiled form of `pattern`, translating on first use.
///
/// Patterns are crate-internal constants; an untranslatable one is a
/// programming error.
fn compiled(pattern: &str) -> Regex {
    let mut cache = PATTERN_CACHE.lock().expect("pattern cache poisoned");
    if let Some(re) = cache.get(pattern) {
        return re.clone();
    }
    let re = Regex::new(&translate(pattern)).expect("invalid match pattern");
    cache.insert(pattern.to_string(), re.clone());
    re
}

/// Read-only reference to a source string plus a byte offset.
#[derive(Clone)]
pub struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// The full underlying source (used for trace construction).
    pub fn src(&self) -> &'a str {
        self.src
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Absolute seek.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.src.len());
    }

    /// Relative advance.
    pub fn advance(&mut self, n: usize) {
        self.seek(self.pos + n);
    }

    /// The remaining suffix.
    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Length of the remaining suffix in bytes.
    pub fn len(&self) -> usize {
        self.src.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn starts_with(&self, lit: &str) -> bool {
        self.rest().starts_with(lit)
    }

    /// Consume one character.
    pub fn take(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Match `pattern` at the cursor; on success advance past the match and
    /// return the matched text, otherwise leave the cursor unchanged.
    pub fn trim(&mut self, pattern: &str) -> Option<&'a str> {
        let m = compiled(pattern).find(self.rest())?;
        if m.start() != 0 {
            return None;
        }
        let text = &self.rest()[..m.end()];
        self.pos += m.end();
        Some(text)
    }

    /// Match a literal prefix at the cursor, advancing past it on success.
    pub fn trim_literal(&mut self, lit: &str) -> bool {
        if self.starts_with(lit) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    /// Find the first occurrence of `pattern` in the remaining suffix,
    /// returning absolute byte offsets.
    pub fn find(&self, pattern: &str) -> Option<(usize, usize)> {
        let m = compiled(pattern).find(self.rest())?;
        Some((self.pos + m.start(), self.pos + m.end()))
    }

    /// Find a literal in the remaining suffix, returning its absolute offset.
    pub fn find_literal(&self, lit: &str) -> Option<usize> {
        self.rest().find(lit).map(|i| self.pos + i)
    }

    /// Skip spaces and tabs only, staying on the current line.
    pub fn skip_inline_space(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' {
                self.pos += 1;
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }

    /// Skip ASCII whitespace, returning the skipped run.
    pub fn skip_space(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        &self.src[start..self.pos]
    }
}
