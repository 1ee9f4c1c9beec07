// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-device variable tree and command list.
//!
//! The tree is an insertion-ordered map so `LIST VAR` enumerates variables
//! stably across a single call. Lookup is case-insensitive; the original
//! spelling from the driver is kept for emission.

use indexmap::IndexMap;
use tracing::warn;

/// Variable type/access flags as reported by the driver via `SETFLAGS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StFlags {
    pub rw: bool,
    pub string: bool,
    pub number: bool,
    pub immutable: bool,
}

impl StFlags {
    /// Parse a `SETFLAGS` token list. Unknown tokens are skipped with a log
    /// line; drivers are not trusted to be well-behaved.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let mut flags = Self::default();

        for tok in tokens {
            match tok.as_ref().to_ascii_uppercase().as_str() {
                "RW" => flags.rw = true,
                "STRING" => flags.string = true,
                "NUMBER" => flags.number = true,
                "IMMUTABLE" => flags.immutable = true,
                other => warn!(token = other, "ignoring unknown variable flag"),
            }
        }

        flags
    }
}

/// One variable in the tree.
#[derive(Debug, Clone, Default)]
pub struct StNode {
    /// Original-case name as first reported by the driver.
    pub name: String,
    pub value: String,
    pub flags: StFlags,
    /// Maximum string length when `flags.string` is set.
    pub aux: i64,
    /// Allowed values; empty means any value.
    pub enums: Vec<String>,
    /// Allowed `[min, max]` intervals; a value passes if any contains it.
    pub ranges: Vec<(i64, i64)>,
}

impl StNode {
    fn new(name: &str) -> Self {
        Self { name: name.to_owned(), ..Self::default() }
    }
}

/// Insertion-ordered variable tree, keyed case-insensitively.
#[derive(Debug, Default)]
pub struct StateTree {
    nodes: IndexMap<String, StNode>,
}

impl StateTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or update a variable. Flags and constraints are untouched on
    /// update. Returns false when the node is immutable and the write was
    /// rejected.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let node = self.nodes.entry(name.to_ascii_lowercase()).or_insert_with(|| StNode::new(name));

        if node.flags.immutable {
            warn!(var = name, "rejecting value change for immutable variable");
            return false;
        }

        node.value = value.to_owned();
        true
    }

    pub fn delete(&mut self, name: &str) {
        // shift_remove keeps the enumeration order of the survivors.
        self.nodes.shift_remove(&name.to_ascii_lowercase());
    }

    pub fn lookup(&self, name: &str) -> Option<&StNode> {
        self.nodes.get(&name.to_ascii_lowercase())
    }

    /// Replace the flag set. `STRING` without a sane `aux` is tolerated but
    /// logged; the `SET VAR` path refuses such variables.
    pub fn set_flags(&mut self, name: &str, flags: StFlags) {
        let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) else {
            warn!(var = name, "SETFLAGS for unknown variable");
            return;
        };

        node.flags = flags;

        if flags.string && node.aux < 1 {
            warn!(var = name, "STRING variable has no length limit yet");
        }
    }

    pub fn set_aux(&mut self, name: &str, aux: i64) {
        let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) else {
            warn!(var = name, "SETAUX for unknown variable");
            return;
        };

        node.aux = aux;
    }

    /// Add an allowed value. Membership is byte-exact; duplicates are kept
    /// out, order of first insertion is kept.
    pub fn add_enum(&mut self, name: &str, value: &str) {
        let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) else {
            warn!(var = name, "ADDENUM for unknown variable");
            return;
        };

        if !node.enums.iter().any(|v| v == value) {
            node.enums.push(value.to_owned());
        }
    }

    pub fn del_enum(&mut self, name: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) {
            node.enums.retain(|v| v != value);
        }
    }

    pub fn add_range(&mut self, name: &str, min: i64, max: i64) {
        let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) else {
            warn!(var = name, "ADDRANGE for unknown variable");
            return;
        };

        if !node.ranges.contains(&(min, max)) {
            node.ranges.push((min, max));
        }
    }

    pub fn del_range(&mut self, name: &str, min: i64, max: i64) {
        if let Some(node) = self.nodes.get_mut(&name.to_ascii_lowercase()) {
            node.ranges.retain(|r| *r != (min, max));
        }
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &StNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Atomic swap used when a fresh driver dump completes.
    pub fn replace_all(&mut self, snapshot: StateTree) {
        self.nodes = snapshot.nodes;
    }
}

/// Instant-command list for one device. Order-preserving, case-insensitive
/// membership, no duplicates.
#[derive(Debug, Default)]
pub struct CmdList {
    cmds: Vec<String>,
}

impl CmdList {
    pub fn add(&mut self, name: &str) {
        if !self.contains(name) {
            self.cmds.push(name.to_owned());
        }
    }

    pub fn delete(&mut self, name: &str) {
        self.cmds.retain(|c| !c.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cmds.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.cmds.iter().map(String::as_str)
    }

    pub fn replace_all(&mut self, snapshot: CmdList) {
        self.cmds = snapshot.cmds;
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
