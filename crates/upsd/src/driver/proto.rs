// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Application of driver-to-daemon protocol frames to the device replica.
//!
//! Drivers are external processes; every frame is treated as untrusted.
//! Unknown verbs and malformed argument lists are logged and skipped,
//! never fatal.

use tracing::{debug, info};

use crate::daemon::Daemon;
use crate::state::StFlags;
use crate::tracking::TrackingStatus;

/// Apply one tokenized frame from the named device's driver.
pub fn apply(daemon: &mut Daemon, name: &str, args: &[String]) {
    let Some(verb) = args.first() else {
        return;
    };

    // TRACKING resolves against the process-wide table, not the device.
    if verb.eq_ignore_ascii_case("TRACKING") {
        let (Some(id), Some(status)) = (args.get(1), args.get(2)) else {
            debug!(ups = name, "TRACKING frame missing id or status");
            return;
        };
        match TrackingStatus::from_driver(status) {
            Some(status) => daemon.tracking.resolve(id, status),
            None => debug!(ups = name, status = %status, "TRACKING frame with unknown status"),
        }
        return;
    }

    let Some(dev) = daemon.device_mut(name) else {
        return;
    };

    match verb.to_ascii_uppercase().as_str() {
        "SETINFO" => {
            let (Some(var), Some(value)) = (args.get(1), args.get(2)) else {
                debug!(ups = name, "SETINFO frame missing arguments");
                return;
            };
            dev.target_tree().set(var, value);
        }
        "DELINFO" => {
            if let Some(var) = args.get(1) {
                dev.target_tree().delete(var);
            }
        }
        "SETFLAGS" => {
            let Some(var) = args.get(1) else {
                return;
            };
            let flags = StFlags::from_tokens(&args[2..]);
            dev.target_tree().set_flags(var, flags);
        }
        "SETAUX" => {
            let (Some(var), Some(aux)) = (args.get(1), args.get(2)) else {
                return;
            };
            match aux.parse() {
                Ok(aux) => dev.target_tree().set_aux(var, aux),
                Err(_) => debug!(ups = name, var = %var, aux = %aux, "SETAUX with non-numeric value"),
            }
        }
        "ADDENUM" => {
            if let (Some(var), Some(value)) = (args.get(1), args.get(2)) {
                dev.target_tree().add_enum(var, value);
            }
        }
        "DELENUM" => {
            if let (Some(var), Some(value)) = (args.get(1), args.get(2)) {
                dev.target_tree().del_enum(var, value);
            }
        }
        "ADDRANGE" => {
            if let Some((var, min, max)) = range_args(args) {
                dev.target_tree().add_range(var, min, max);
            } else {
                debug!(ups = name, "ADDRANGE frame with bad arguments");
            }
        }
        "DELRANGE" => {
            if let Some((var, min, max)) = range_args(args) {
                dev.target_tree().del_range(var, min, max);
            }
        }
        "ADDCMD" => {
            if let Some(cmd) = args.get(1) {
                dev.target_cmds().add(cmd);
            }
        }
        "DELCMD" => {
            if let Some(cmd) = args.get(1) {
                dev.target_cmds().delete(cmd);
            }
        }
        "DUMPDONE" => {
            dev.finish_dump();
            info!("UPS [{name}] dump complete ({} variables)", dev.tree.len());
        }
        "DATAOK" => dev.data_ok = true,
        "DATASTALE" => dev.data_ok = false,
        "PONG" => {}
        other => debug!(ups = name, verb = other, "ignoring unknown driver verb"),
    }
}

fn range_args(args: &[String]) -> Option<(&str, i64, i64)> {
    let var = args.get(1)?;
    let min = args.get(2)?.parse().ok()?;
    let max = args.get(3)?.parse().ok()?;
    Some((var.as_str(), min, max))
}
