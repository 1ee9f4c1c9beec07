// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User records from `upsd.users` and the authorization checks built on
//! them. Everything fails safe: no users, no password, no matching action
//! or command all mean "denied".

/// Privileged operations a user can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Login,
    Fsd,
    Primary,
    Set,
}

impl Action {
    /// Parse a configured action token. `MASTER` is the deprecated spelling
    /// of `PRIMARY` and normalizes to it.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "LOGIN" => Some(Self::Login),
            "FSD" => Some(Self::Fsd),
            "PRIMARY" | "MASTER" => Some(Self::Primary),
            "SET" => Some(Self::Set),
            _ => None,
        }
    }
}

/// One `[section]` from `upsd.users`.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub name: String,
    pub password: Option<String>,
    pub actions: Vec<Action>,
    /// Allowed instant commands; the single entry `all` matches any.
    pub instcmds: Vec<String>,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned(), ..Self::default() }
    }

    pub fn grant(&mut self, action: Action) {
        if !self.actions.contains(&action) {
            self.actions.push(action);
        }
    }

    pub fn grant_instcmd(&mut self, cmd: &str) {
        if !self.instcmds.iter().any(|c| c.eq_ignore_ascii_case(cmd)) {
            self.instcmds.push(cmd.to_owned());
        }
    }
}

#[derive(Debug, Default)]
pub struct UserTable {
    users: Vec<User>,
}

impl UserTable {
    pub fn new(users: Vec<User>) -> Self {
        Self { users }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Authenticate `name`/`password` and check that the user may perform
    /// `action`. Username and password compare byte-exactly.
    pub fn check_action(&self, name: &str, password: &str, action: Action) -> bool {
        self.authenticate(name, password).is_some_and(|u| u.actions.contains(&action))
    }

    /// Authenticate and check that `cmd` is among the user's allowed
    /// instant commands (or the wildcard `all`).
    pub fn check_instcmd(&self, name: &str, password: &str, cmd: &str) -> bool {
        self.authenticate(name, password).is_some_and(|u| {
            u.instcmds.iter().any(|c| c.eq_ignore_ascii_case(cmd) || c.eq_ignore_ascii_case("all"))
        })
    }

    fn authenticate(&self, name: &str, password: &str) -> Option<&User> {
        let user = self.users.iter().find(|u| u.name == name)?;
        let stored = user.password.as_deref()?;

        if constant_time_eq(stored, password) {
            Some(user)
        } else {
            None
        }
    }
}

/// Constant-time string comparison to keep password checks free of timing
/// side channels.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "users_tests.rs"]
mod tests;
