//! Macro table: trie-backed registry of command variants
//!
//! Maps MML command names (arbitrary printable text, possibly sharing
//! prefixes) to ordered lists of command variants. Lookup is longest-match
//! against the cursor's suffix; variants are tried in insertion order.

use crate::mml::command::Command;
use crate::mml::cursor::Cursor;
use crate::mml::trie::Trie;
use std::rc::Rc;

pub struct MacroTable {
    trie: Trie<Vec<Rc<Command>>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self { trie: Trie::new() }
    }

    /// Append one variant under `name`, creating the entry if absent.
    pub fn add(&mut self, name: &str, cmd: Command) {
        self.add_rc(name, Rc::new(cmd));
    }

    /// Append a builder's variant list under `name`, preserving its order.
    pub fn add_variants(&mut self, name: &str, cmds: Vec<Command>) {
        for cmd in cmds {
            self.add(name, cmd);
        }
    }

    fn add_rc(&mut self, name: &str, cmd: Rc<Command>) {
        match self.trie.get_mut(name) {
            Some(list) => list.push(cmd),
            None => {
                self.trie.insert(name, vec![cmd]);
            }
        }
    }

    /// Move the variants under `old` to `new`, appending to any variants
    /// already registered there. A missing `old` key is a no-op.
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        if let Some(list) = self.trie.remove(old) {
            for cmd in list {
                self.add_rc(new, cmd);
            }
        }
    }

    /// Drop all variants under `name`. Missing keys are a no-op.
    pub fn remove(&mut self, name: &str) {
        self.trie.remove(name);
    }

    /// Longest-match lookup at the cursor. On a hit the cursor advances past
    /// the matched name and the variant list is returned.
    pub fn read_next(&self, cur: &mut Cursor) -> Option<&[Rc<Command>]> {
        let (len, list) = self.trie.lookup(cur.rest())?;
        cur.advance(len);
        Some(list)
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }
}

impl Default for MacroTable {
    fn default() -> Self {
        Self::new()
    }
}
