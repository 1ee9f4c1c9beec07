// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and authorization verbs: USERNAME, PASSWORD, LOGIN, LOGOUT,
//! PRIMARY/MASTER, FSD.

use tracing::{info, warn};

use crate::client::Session;
use crate::command::{Control, Reply};
use crate::daemon::Daemon;
use crate::error::NetError;
use crate::users::Action;

pub fn username(sess: &mut Session, args: &[String]) -> Reply {
    let [name] = args else {
        return Reply::err(NetError::InvalidArgument);
    };

    if sess.username.is_some() {
        info!("client {} tried to set a username twice", sess.addr);
        return Reply::err(NetError::AlreadySetUsername);
    }

    sess.username = Some(name.clone());
    Reply::ok()
}

pub fn password(sess: &mut Session, args: &[String]) -> Reply {
    let [pw] = args else {
        return Reply::err(NetError::InvalidArgument);
    };

    if sess.password.is_some() {
        info!("client {} tried to set a password twice", sess.addr);
        return Reply::err(NetError::AlreadySetPassword);
    }

    sess.password = Some(pw.clone());
    Reply::ok()
}

pub fn login(daemon: &mut Daemon, sess: &mut Session, args: &[String]) -> Reply {
    let [upsname] = args else {
        return Reply::err(NetError::InvalidArgument);
    };

    if daemon.clients.get(&sess.id).is_some_and(|e| e.login_ups.is_some()) {
        info!("client {}@{} tried to login twice", sess.user_label(), sess.addr);
        return Reply::err(NetError::AlreadyLoggedIn);
    }

    if daemon.device(upsname).is_none() {
        return Reply::err(NetError::UnknownUps);
    }

    if !sess.check_action(daemon, Action::Login) {
        return Reply::err(NetError::AccessDenied);
    }

    let Some(dev) = daemon.device_mut(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    dev.numlogins += 1;
    let canonical = dev.name.clone();

    if let Some(entry) = daemon.clients.get_mut(&sess.id) {
        entry.login_ups = Some(canonical.clone());
    }

    info!("user {}@{} logged into UPS [{canonical}]{}", sess.user_label(), sess.addr, sess.tls_suffix());
    Reply::ok()
}

pub fn logout(daemon: &mut Daemon, sess: &Session, args: &[String]) -> Reply {
    if !args.is_empty() {
        return Reply::err(NetError::InvalidArgument);
    }

    if let Some(upsname) = daemon.clients.get(&sess.id).and_then(|e| e.login_ups.as_deref()) {
        info!("user {}@{} logged out from UPS [{upsname}]{}", sess.user_label(), sess.addr, sess.tls_suffix());
    }

    Reply { out: "OK Goodbye\n".to_owned(), control: Control::Close }
}

/// Access-level check shared by PRIMARY and its deprecated MASTER alias;
/// the grant itself carries no state.
pub fn primary(daemon: &Daemon, sess: &Session, args: &[String], legacy: bool) -> Reply {
    let [upsname] = args else {
        return Reply::err(NetError::InvalidArgument);
    };

    if legacy {
        warn!(
            "client {}@{} requested MASTER level for [{upsname}] - deprecated in favor of PRIMARY",
            sess.user_label(),
            sess.addr
        );
    }

    if daemon.device(upsname).is_none() {
        return Reply::err(NetError::UnknownUps);
    }

    if !sess.check_action(daemon, Action::Primary) {
        return Reply::err(NetError::AccessDenied);
    }

    if legacy {
        Reply::text("OK MASTER-GRANTED\n")
    } else {
        Reply::text("OK PRIMARY-GRANTED\n")
    }
}

/// Latch the forced-shutdown flag on a device. From here on its
/// `ups.status` answers carry the `FSD ` prefix until a fresh dump.
pub fn fsd(daemon: &mut Daemon, sess: &Session, args: &[String]) -> Reply {
    let [upsname] = args else {
        return Reply::err(NetError::InvalidArgument);
    };

    if daemon.device(upsname).is_none() {
        return Reply::err(NetError::UnknownUps);
    }

    if !sess.check_action(daemon, Action::Fsd) {
        return Reply::err(NetError::AccessDenied);
    }

    let label = sess.user_label().to_owned();
    let Some(dev) = daemon.device_mut(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    info!("client {label}@{} set FSD on UPS [{}]", sess.addr, dev.name);
    dev.fsd = true;
    Reply::text("OK FSD-SET\n")
}
