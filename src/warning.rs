//! Compile-time warning channel
//!
//! Warnings are keyed by their format string: each distinct key fires at most
//! once per run, up to a configurable cap. In strict mode a warning is
//! promoted to an error instead of being printed.

use crate::error::{Error, Result};
use std::collections::HashSet;

/// Default cap on the number of distinct warnings printed per run.
pub const DEFAULT_WARNING_LIMIT: usize = 100;

pub struct Warnings {
    seen: HashSet<String>,
    emitted: usize,
    limit: usize,
    strict: bool,
}

impl Warnings {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            emitted: 0,
            limit: DEFAULT_WARNING_LIMIT,
            strict: false,
        }
    }

    /// Promote warnings to errors.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Cap the number of distinct warnings printed per run.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Report a warning. `key` is the format string identifying the warning
    /// class; `message` is the rendered text.
    pub fn warn(&mut self, key: &str, message: String) -> Result<()> {
        if self.strict {
            return Err(Error::Command(message));
        }
        if self.seen.insert(key.to_string()) && self.emitted < self.limit {
            self.emitted += 1;
            tracing::warn!("{message}");
        }
        Ok(())
    }

    /// Number of distinct warnings printed so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}

impl Default for Warnings {
    fn default() -> Self {
        Self::new()
    }
}
