// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client protocol verbs and their dispatch.
//!
//! Parsing is pure: a request line maps to a [`Verb`] plus its argument
//! slice, and each verb declares whether the session must have presented a
//! username and password first. Handlers build the full textual reply and
//! never write to the socket themselves.

pub mod get;
pub mod instcmd;
pub mod list;
pub mod misc;
pub mod session;
pub mod set;

use crate::client::Session;
use crate::daemon::Shared;
use crate::error::NetError;

/// Recognized first tokens of a request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Help,
    Ver,
    NetVer,
    StartTls,
    Get,
    List,
    Username,
    Password,
    Login,
    Logout,
    Primary,
    /// Deprecated spelling of [`Verb::Primary`].
    Master,
    Fsd,
    Set,
    InstCmd,
}

impl Verb {
    /// Case-insensitive verb lookup. `PROTVER` is the modern spelling of
    /// `NETVER`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "HELP" => Some(Self::Help),
            "VER" => Some(Self::Ver),
            "NETVER" | "PROTVER" => Some(Self::NetVer),
            "STARTTLS" => Some(Self::StartTls),
            "GET" => Some(Self::Get),
            "LIST" => Some(Self::List),
            "USERNAME" => Some(Self::Username),
            "PASSWORD" => Some(Self::Password),
            "LOGIN" => Some(Self::Login),
            "LOGOUT" => Some(Self::Logout),
            "PRIMARY" => Some(Self::Primary),
            "MASTER" => Some(Self::Master),
            "FSD" => Some(Self::Fsd),
            "SET" => Some(Self::Set),
            "INSTCMD" => Some(Self::InstCmd),
            _ => None,
        }
    }

    /// Verbs that refuse to run before both `USERNAME` and `PASSWORD`
    /// arrived on this session.
    pub fn requires_user(self) -> bool {
        matches!(
            self,
            Self::Login | Self::Primary | Self::Master | Self::Fsd | Self::Set | Self::InstCmd
        )
    }
}

/// What the session loop should do after sending a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// Close the connection (LOGOUT, fatal write states).
    Close,
    /// Begin the TLS handshake on this descriptor.
    StartTls,
}

/// A fully formatted reply plus the follow-up action.
#[derive(Debug, PartialEq, Eq)]
pub struct Reply {
    pub out: String,
    pub control: Control,
}

impl Reply {
    pub fn text(out: impl Into<String>) -> Self {
        Self { out: out.into(), control: Control::Continue }
    }

    pub fn ok() -> Self {
        Self::text("OK\n")
    }

    pub fn err(e: NetError) -> Self {
        Self::text(format!("ERR {e}\n"))
    }
}

impl From<NetError> for Reply {
    fn from(e: NetError) -> Self {
        Self::err(e)
    }
}

/// Dispatch one tokenized request line.
pub fn dispatch(shared: &Shared, sess: &mut Session, args: &[String]) -> Reply {
    let Some(first) = args.first() else {
        return Reply::err(NetError::UnknownCommand);
    };

    let Some(verb) = Verb::parse(first) else {
        return Reply::err(NetError::UnknownCommand);
    };

    if verb.requires_user() {
        if sess.username.is_none() {
            return Reply::err(NetError::UsernameRequired);
        }
        if sess.password.is_none() {
            return Reply::err(NetError::PasswordRequired);
        }
    }

    let mut daemon = shared.borrow_mut();
    let rest = &args[1..];

    match verb {
        Verb::Help => misc::help(rest),
        Verb::Ver => misc::ver(rest),
        Verb::NetVer => misc::netver(rest),
        Verb::StartTls => misc::starttls(&daemon, sess, rest),
        Verb::Get => get::get(&daemon, sess, rest),
        Verb::List => list::list(&daemon, rest),
        Verb::Username => session::username(sess, rest),
        Verb::Password => session::password(sess, rest),
        Verb::Login => session::login(&mut daemon, sess, rest),
        Verb::Logout => session::logout(&mut daemon, sess, rest),
        Verb::Primary => session::primary(&daemon, sess, rest, false),
        Verb::Master => session::primary(&daemon, sess, rest, true),
        Verb::Fsd => session::fsd(&mut daemon, sess, rest),
        Verb::Set => set::set(&mut daemon, sess, rest),
        Verb::InstCmd => instcmd::instcmd(&mut daemon, sess, rest),
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
