// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HELP, VER, NETVER, and the STARTTLS preflight.

use crate::client::Session;
use crate::command::{Control, Reply};
use crate::daemon::Daemon;
use crate::error::NetError;

/// PRIMARY/MASTER and FSD are deliberately not advertised.
const HELP_LINE: &str = "Commands: HELP VER PROTVER GET LIST SET INSTCMD \
                         LOGIN LOGOUT USERNAME PASSWORD STARTTLS\n";

pub fn help(args: &[String]) -> Reply {
    if !args.is_empty() {
        return Reply::err(NetError::InvalidArgument);
    }
    Reply::text(HELP_LINE)
}

pub fn ver(args: &[String]) -> Reply {
    if !args.is_empty() {
        return Reply::err(NetError::InvalidArgument);
    }
    Reply::text(format!("{}\n", crate::server_banner()))
}

pub fn netver(args: &[String]) -> Reply {
    if !args.is_empty() {
        return Reply::err(NetError::InvalidArgument);
    }
    Reply::text(format!("{}\n", crate::NET_VERSION))
}

/// Validate a STARTTLS request; the session loop performs the actual
/// handshake after flushing `OK STARTTLS`.
pub fn starttls(daemon: &Daemon, sess: &Session, args: &[String]) -> Reply {
    if !args.is_empty() {
        return Reply::err(NetError::InvalidArgument);
    }
    if sess.tls_active {
        return Reply::err(NetError::AlreadySslMode);
    }
    if daemon.tls.is_none() {
        return Reply::err(NetError::FeatureNotConfigured);
    }

    Reply { out: "OK STARTTLS\n".to_owned(), control: Control::StartTls }
}
