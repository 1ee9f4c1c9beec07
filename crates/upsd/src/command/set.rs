// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SET handlers: `SET VAR` (validated and forwarded to the driver) and
//! `SET TRACKING` (per-session receipt switch).

use tracing::{debug, info, warn};

use crate::client::Session;
use crate::command::Reply;
use crate::daemon::Daemon;
use crate::error::NetError;
use crate::textparse::encode;
use crate::users::Action;

const ENC_MAX: usize = 640;

pub fn set(daemon: &mut Daemon, sess: &mut Session, args: &[String]) -> Reply {
    let Some(what) = args.first() else {
        return Reply::err(NetError::InvalidArgument);
    };

    if what.eq_ignore_ascii_case("VAR") {
        let (Some(upsname), Some(varname), Some(value)) = (args.get(1), args.get(2), args.get(3))
        else {
            return Reply::err(NetError::InvalidArgument);
        };
        return set_var(daemon, sess, upsname, varname, value);
    }

    if what.eq_ignore_ascii_case("TRACKING") {
        let Some(toggle) = args.get(1) else {
            return Reply::err(NetError::InvalidArgument);
        };
        return set_tracking(daemon, sess, toggle);
    }

    Reply::err(NetError::InvalidArgument)
}

fn set_var(
    daemon: &mut Daemon,
    sess: &Session,
    upsname: &str,
    varname: &str,
    value: &str,
) -> Reply {
    {
        let Some(dev) = daemon.device(upsname) else {
            return Reply::err(NetError::UnknownUps);
        };
        if let Err(e) = dev.available() {
            return Reply::err(e);
        }
    }

    if !sess.check_action(daemon, Action::Set) {
        return Reply::err(NetError::AccessDenied);
    }

    let Some(dev) = daemon.device_mut(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    let Some(node) = dev.tree.lookup(varname) else {
        return Reply::err(NetError::VarNotSupported);
    };

    if !node.flags.rw {
        return Reply::err(NetError::Readonly);
    }

    if node.flags.string {
        if node.aux < 1 {
            warn!("UPS [{}]: auxdata for {varname} is invalid", dev.name);
            return Reply::err(NetError::SetFailed);
        }
        if (value.len() as i64) > node.aux {
            return Reply::err(NetError::TooLong);
        }
    }

    // Enum membership is byte-exact.
    if !node.enums.is_empty() && !node.enums.iter().any(|v| v == value) {
        return Reply::err(NetError::InvalidValue);
    }

    if !node.ranges.is_empty() {
        let Ok(n) = value.parse::<i64>() else {
            return Reply::err(NetError::InvalidValue);
        };
        if !node.ranges.iter().any(|(min, max)| n >= *min && n <= *max) {
            return Reply::err(NetError::InvalidValue);
        }
    }

    let mut cmd = format!("SET {varname} \"{}\"", encode(value, ENC_MAX));

    let tracking_id = if sess.tracking {
        let id = daemon.tracking.add();
        cmd.push_str(&format!(" TRACKING {id}"));
        Some(id)
    } else {
        None
    };
    cmd.push('\n');

    info!(
        "set variable: {}@{} set {varname} on {upsname} to {value} (tracking ID: {})",
        sess.user_label(),
        sess.addr,
        tracking_id.as_deref().unwrap_or("disabled")
    );

    let Some(dev) = daemon.device_mut(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    if !dev.send_line(&cmd) {
        info!("set command send failed");
        return Reply::err(NetError::SetFailed);
    }

    match tracking_id {
        Some(id) => Reply::text(format!("OK TRACKING {id}\n")),
        None => Reply::ok(),
    }
}

fn set_tracking(daemon: &mut Daemon, sess: &mut Session, toggle: &str) -> Reply {
    if toggle.eq_ignore_ascii_case("ON") {
        if !sess.tracking {
            sess.tracking = true;
            daemon.tracking.enable();
        }
    } else if toggle.eq_ignore_ascii_case("OFF") {
        // Entries stay queryable until they expire even when the last
        // client turns tracking off.
        if sess.tracking {
            sess.tracking = false;
            daemon.tracking.disable();
        }
    } else {
        return Reply::err(NetError::InvalidArgument);
    }

    debug!(
        "tracking: general {}, client {}",
        if daemon.tracking.is_enabled() { "enabled" } else { "disabled" },
        if sess.tracking { "enabled" } else { "disabled" },
    );

    Reply::ok()
}
