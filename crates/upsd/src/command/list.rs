// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LIST handlers. Every response is framed by `BEGIN LIST ...` and
//! `END LIST ...` echoing the request arguments; items are produced from
//! one consistent walk of the in-memory state.

use crate::command::Reply;
use crate::daemon::Daemon;
use crate::device::Device;
use crate::error::NetError;
use crate::textparse::encode;

const ENC_MAX: usize = 640;

pub fn list(daemon: &Daemon, args: &[String]) -> Reply {
    let Some(what) = args.first() else {
        return Reply::err(NetError::InvalidArgument);
    };

    match what.to_ascii_uppercase().as_str() {
        "UPS" => ups(daemon),
        "VAR" | "RW" | "CMD" | "CLIENT" => {
            let Some(upsname) = args.get(1) else {
                return Reply::err(NetError::InvalidArgument);
            };
            match what.to_ascii_uppercase().as_str() {
                "VAR" => var(daemon, upsname),
                "RW" => rw(daemon, upsname),
                "CMD" => cmd(daemon, upsname),
                _ => client(daemon, upsname),
            }
        }
        "ENUM" | "RANGE" => {
            let (Some(upsname), Some(varname)) = (args.get(1), args.get(2)) else {
                return Reply::err(NetError::InvalidArgument);
            };
            if what.eq_ignore_ascii_case("ENUM") {
                enums(daemon, upsname, varname)
            } else {
                ranges(daemon, upsname, varname)
            }
        }
        _ => Reply::err(NetError::InvalidArgument),
    }
}

fn framed(header: &str, body: impl FnOnce(&mut String)) -> Reply {
    let mut out = format!("BEGIN LIST {header}\n");
    body(&mut out);
    out.push_str(&format!("END LIST {header}\n"));
    Reply::text(out)
}

fn available<'a>(daemon: &'a Daemon, upsname: &str) -> Result<&'a Device, NetError> {
    let dev = daemon.device(upsname).ok_or(NetError::UnknownUps)?;
    dev.available()?;
    Ok(dev)
}

/// `LIST UPS` works regardless of driver health; monitoring tools use it
/// to discover what exists.
fn ups(daemon: &Daemon) -> Reply {
    framed("UPS", |out| {
        for dev in daemon.devices.values() {
            let desc = dev.desc.as_deref().map_or_else(|| "Unavailable".to_owned(), |d| encode(d, ENC_MAX));
            out.push_str(&format!("UPS {} \"{desc}\"\n", dev.name));
        }
    })
}

fn var(daemon: &Daemon, upsname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    framed(&format!("VAR {upsname}"), |out| {
        for node in dev.tree.iter() {
            out.push_str(&format!(
                "VAR {upsname} {} \"{}\"\n",
                node.name,
                encode(&node.value, ENC_MAX)
            ));
        }
    })
}

fn rw(daemon: &Daemon, upsname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    framed(&format!("RW {upsname}"), |out| {
        for node in dev.tree.iter().filter(|n| n.flags.rw) {
            out.push_str(&format!(
                "RW {upsname} {} \"{}\"\n",
                node.name,
                encode(&node.value, ENC_MAX)
            ));
        }
    })
}

fn cmd(daemon: &Daemon, upsname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    framed(&format!("CMD {upsname}"), |out| {
        for name in dev.cmds.iter() {
            out.push_str(&format!("CMD {upsname} {name}\n"));
        }
    })
}

fn enums(daemon: &Daemon, upsname: &str, varname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    let Some(node) = dev.tree.lookup(varname) else {
        return Reply::err(NetError::VarNotSupported);
    };

    framed(&format!("ENUM {upsname} {varname}"), |out| {
        for value in &node.enums {
            out.push_str(&format!("ENUM {upsname} {varname} \"{}\"\n", encode(value, ENC_MAX)));
        }
    })
}

fn ranges(daemon: &Daemon, upsname: &str, varname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    let Some(node) = dev.tree.lookup(varname) else {
        return Reply::err(NetError::VarNotSupported);
    };

    framed(&format!("RANGE {upsname} {varname}"), |out| {
        for (min, max) in &node.ranges {
            out.push_str(&format!("RANGE {upsname} {varname} \"{min}\" \"{max}\"\n"));
        }
    })
}

/// Addresses of clients currently logged into this device. No freshness
/// gate: the logins are daemon-side state.
fn client(daemon: &Daemon, upsname: &str) -> Reply {
    if daemon.device(upsname).is_none() {
        return Reply::err(NetError::UnknownUps);
    }

    framed(&format!("CLIENT {upsname}"), |out| {
        for addr in daemon.logged_in_addrs(upsname) {
            out.push_str(&format!("CLIENT {upsname} {addr}\n"));
        }
    })
}
