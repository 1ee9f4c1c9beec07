// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! INSTCMD: forward an instant command to the driver after checking the
//! device's command list and the user's grants.

use tracing::info;

use crate::client::Session;
use crate::command::Reply;
use crate::daemon::Daemon;
use crate::error::NetError;
use crate::textparse::encode;

const ENC_MAX: usize = 640;

pub fn instcmd(daemon: &mut Daemon, sess: &Session, args: &[String]) -> Reply {
    let (Some(upsname), Some(cmdname)) = (args.first(), args.get(1)) else {
        return Reply::err(NetError::InvalidArgument);
    };
    let param = args.get(2);

    {
        let Some(dev) = daemon.device(upsname) else {
            return Reply::err(NetError::UnknownUps);
        };
        if let Err(e) = dev.available() {
            return Reply::err(e);
        }
        if !dev.cmds.contains(cmdname) {
            return Reply::err(NetError::CmdNotSupported);
        }
    }

    if !sess.check_instcmd(daemon, cmdname) {
        return Reply::err(NetError::AccessDenied);
    }

    let mut cmd = format!("INSTCMD {cmdname}");
    if let Some(param) = param {
        cmd.push_str(&format!(" {}", encode(param, ENC_MAX)));
    }

    let tracking_id = if sess.tracking {
        let id = daemon.tracking.add();
        cmd.push_str(&format!(" TRACKING {id}"));
        Some(id)
    } else {
        None
    };
    cmd.push('\n');

    info!(
        "instant command: {}@{} did {cmdname}{}{} on {upsname} (tracking ID: {})",
        sess.user_label(),
        sess.addr,
        if param.is_some() { " with value " } else { "" },
        param.map(String::as_str).unwrap_or(""),
        tracking_id.as_deref().unwrap_or("disabled")
    );

    let Some(dev) = daemon.device_mut(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    if !dev.send_line(&cmd) {
        info!("instant command send failed");
        return Reply::err(NetError::InstcmdFailed);
    }

    match tracking_id {
        Some(id) => Reply::text(format!("OK TRACKING {id}\n")),
        None => Reply::ok(),
    }
}
