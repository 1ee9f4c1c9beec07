// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable descriptions for well-known variables and commands,
//! loaded once from the optional `cmdvartab` file in the data directory.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::textparse;

#[derive(Debug, Default)]
pub struct DescTable {
    vars: HashMap<String, String>,
    cmds: HashMap<String, String>,
}

impl DescTable {
    /// Load `<datapath>/cmdvartab`. The file is optional; a missing or
    /// unreadable file just disables descriptions.
    pub fn load(datapath: &Path) -> Self {
        let mut table = Self::default();
        let path = datapath.join("cmdvartab");

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                info!(path = %path.display(), err = %e, "cmdvartab not loaded - descriptions disabled");
                return table;
            }
        };

        for parsed in textparse::parse_document(&text) {
            let args = match parsed.args {
                Ok(args) => args,
                Err(e) => {
                    warn!(path = %path.display(), "parse error: {e}");
                    continue;
                }
            };

            if args.len() < 3 {
                continue;
            }

            match args[0].as_str() {
                "VARDESC" => {
                    table.vars.insert(args[1].to_ascii_lowercase(), args[2].clone());
                }
                "CMDDESC" => {
                    table.cmds.insert(args[1].to_ascii_lowercase(), args[2].clone());
                }
                _ => {}
            }
        }

        table
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn cmd(&self, name: &str) -> Option<&str> {
        self.cmds.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[cfg(test)]
#[path = "desc_tests.rs"]
mod tests;
