// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GET handlers: VAR, TYPE, DESC, CMDDESC, NUMLOGINS, UPSDESC, TRACKING.

use tracing::warn;

use crate::client::Session;
use crate::command::Reply;
use crate::daemon::Daemon;
use crate::device::Device;
use crate::error::NetError;
use crate::textparse::encode;

/// Cap for encoded values in answer lines (answers stay under 1 KiB).
const ANSWER_ENC_MAX: usize = 640;

pub fn get(daemon: &Daemon, sess: &Session, args: &[String]) -> Reply {
    let Some(what) = args.first() else {
        return Reply::err(NetError::InvalidArgument);
    };

    // GET TRACKING [id]
    if what.eq_ignore_ascii_case("TRACKING") {
        return match args.get(1) {
            None => Reply::text(if sess.tracking { "ON\n" } else { "OFF\n" }),
            Some(id) if sess.tracking => Reply::text(format!("{}\n", daemon.tracking.get(id))),
            Some(_) => Reply::err(NetError::FeatureNotConfigured),
        };
    }

    let Some(upsname) = args.get(1) else {
        return Reply::err(NetError::InvalidArgument);
    };

    match what.to_ascii_uppercase().as_str() {
        "NUMLOGINS" => numlogins(daemon, upsname),
        "UPSDESC" => upsdesc(daemon, upsname),
        "VAR" | "TYPE" | "DESC" | "CMDDESC" => {
            let Some(name) = args.get(2) else {
                return Reply::err(NetError::InvalidArgument);
            };
            match what.to_ascii_uppercase().as_str() {
                "VAR" => var(daemon, upsname, name),
                "TYPE" => type_of(daemon, upsname, name),
                "DESC" => desc(daemon, upsname, name),
                _ => cmddesc(daemon, upsname, name),
            }
        }
        _ => Reply::err(NetError::InvalidArgument),
    }
}

/// Look up a device and apply the availability gate, turning failures into
/// protocol errors.
fn available<'a>(daemon: &'a Daemon, upsname: &str) -> Result<&'a Device, NetError> {
    let dev = daemon.device(upsname).ok_or(NetError::UnknownUps)?;
    dev.available()?;
    Ok(dev)
}

fn numlogins(daemon: &Daemon, upsname: &str) -> Reply {
    match available(daemon, upsname) {
        Ok(dev) => Reply::text(format!("NUMLOGINS {upsname} {}\n", dev.numlogins)),
        Err(e) => Reply::err(e),
    }
}

/// The description comes from ups.conf, so a dead driver doesn't hide it.
fn upsdesc(daemon: &Daemon, upsname: &str) -> Reply {
    let Some(dev) = daemon.device(upsname) else {
        return Reply::err(NetError::UnknownUps);
    };

    let desc = match dev.desc.as_deref() {
        Some(desc) => encode(desc, ANSWER_ENC_MAX),
        None => "Unavailable".to_owned(),
    };

    Reply::text(format!("UPSDESC {upsname} \"{desc}\"\n"))
}

fn var(daemon: &Daemon, upsname: &str, varname: &str) -> Reply {
    // server.* variables come from the daemon itself; the device argument
    // is ignored.
    if varname.to_ascii_lowercase().starts_with("server.") {
        return server_var(upsname, varname);
    }

    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    let Some(node) = dev.tree.lookup(varname) else {
        return Reply::err(NetError::VarNotSupported);
    };

    let value = encode(&node.value, ANSWER_ENC_MAX);

    if varname.eq_ignore_ascii_case("ups.status") && dev.fsd {
        Reply::text(format!("VAR {upsname} {varname} \"FSD {value}\"\n"))
    } else {
        Reply::text(format!("VAR {upsname} {varname} \"{value}\"\n"))
    }
}

fn server_var(upsname: &str, varname: &str) -> Reply {
    match varname.to_ascii_lowercase().as_str() {
        "server.info" => Reply::text(format!("VAR {upsname} {varname} \"{}\"\n", crate::server_banner())),
        "server.version" => {
            Reply::text(format!("VAR {upsname} {varname} \"{}\"\n", crate::UPS_VERSION))
        }
        _ => Reply::err(NetError::VarNotSupported),
    }
}

fn type_of(daemon: &Daemon, upsname: &str, varname: &str) -> Reply {
    let dev = match available(daemon, upsname) {
        Ok(dev) => dev,
        Err(e) => return Reply::err(e),
    };

    let Some(node) = dev.tree.lookup(varname) else {
        return Reply::err(NetError::VarNotSupported);
    };

    let mut line = format!("TYPE {upsname} {varname}");

    if node.flags.rw {
        line.push_str(" RW");
    }

    if node.flags.string {
        line.push_str(&format!(" STRING:{}", node.aux));
    } else {
        // Variables without an explicit type flag count as numbers; check
        // the claim against the current contents.
        if !node.flags.number && !node.value.is_empty() && parse_number(&node.value).is_none() {
            warn!(
                "UPS [{}] variable {varname} has no type flag and a non-numeric value ({})",
                dev.name, node.value
            );
        }
        line.push_str(" NUMBER");
    }

    if !node.enums.is_empty() {
        line.push_str(" ENUM");
    }
    if !node.ranges.is_empty() {
        line.push_str(" RANGE");
    }

    line.push('\n');
    Reply::text(line)
}

fn parse_number(value: &str) -> Option<f64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n as f64);
    }
    value.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn desc(daemon: &Daemon, upsname: &str, varname: &str) -> Reply {
    if let Err(e) = available(daemon, upsname) {
        return Reply::err(e);
    }

    let text = daemon.desc.var(varname).unwrap_or("Description unavailable");
    Reply::text(format!("DESC {upsname} {varname} \"{}\"\n", encode(text, ANSWER_ENC_MAX)))
}

fn cmddesc(daemon: &Daemon, upsname: &str, cmdname: &str) -> Reply {
    if let Err(e) = available(daemon, upsname) {
        return Reply::err(e);
    }

    let text = daemon.desc.cmd(cmdname).unwrap_or("Description unavailable");
    Reply::text(format!("CMDDESC {upsname} {cmdname} \"{}\"\n", encode(text, ANSWER_ENC_MAX)))
}
