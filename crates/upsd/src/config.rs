// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command line flags and the three configuration files (`upsd.conf`,
//! `ups.conf`, `upsd.users`), all sharing the tokenizer grammar.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, warn};

use crate::textparse::{self, DocLine};
use crate::users::{Action, User, UserTable};

/// Default NUT port.
pub const DEFAULT_PORT: u16 = 3493;

/// Network server for UPS data.
#[derive(Debug, Clone, Parser)]
#[command(name = "upsd", about, disable_version_flag = true)]
pub struct Config {
    /// Stay in the foreground (compatibility; the server never detaches).
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Raise the debug level (repeatable).
    #[arg(short = 'D', action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Send a command to the running instance via its PID file.
    #[arg(short = 'c', value_name = "command", value_enum)]
    pub signal: Option<SignalCommand>,

    /// chroot to this directory before serving.
    #[arg(short = 'r', value_name = "dir")]
    pub chroot: Option<PathBuf>,

    /// Run as this user (accepted for compatibility; privilege drop is
    /// handled by the service manager).
    #[arg(short = 'u', value_name = "user")]
    pub user: Option<String>,

    /// Display the version and exit.
    #[arg(short = 'V')]
    pub version: bool,

    /// IPv4 listeners only.
    #[arg(short = '4', overrides_with = "ipv6")]
    pub ipv4: bool,

    /// IPv6 listeners only.
    #[arg(short = '6', overrides_with = "ipv4")]
    pub ipv6: bool,

    /// Directory holding upsd.conf, ups.conf and upsd.users.
    #[arg(long, env = "UPSD_CONFPATH", default_value = "/etc/nut")]
    pub confpath: PathBuf,
}

/// Argument to `-c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SignalCommand {
    /// Re-read the configuration files.
    Reload,
    /// Stop the running daemon.
    Stop,
}

/// One `LISTEN` binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    pub addr: String,
    pub port: u16,
}

/// Parsed `upsd.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsdConf {
    /// Seconds without driver traffic before data is stale.
    pub maxage: u64,
    /// Most simultaneous client connections.
    pub maxconn: usize,
    /// Seconds a tracking entry stays queryable.
    pub tracking_delay: u64,
    /// Start even when ups.conf defines no devices.
    pub allow_no_device: bool,
    pub statepath: PathBuf,
    pub datapath: PathBuf,
    pub certfile: Option<PathBuf>,
    pub listen: Vec<ListenAddr>,
}

impl Default for UpsdConf {
    fn default() -> Self {
        Self {
            maxage: 15,
            maxconn: 1024,
            tracking_delay: 300,
            allow_no_device: false,
            statepath: PathBuf::from("/var/state/ups"),
            datapath: PathBuf::from("/usr/share/nut"),
            certfile: None,
            listen: Vec::new(),
        }
    }
}

impl UpsdConf {
    pub fn maxage(&self) -> Duration {
        Duration::from_secs(self.maxage)
    }

    pub fn tracking_delay(&self) -> Duration {
        Duration::from_secs(self.tracking_delay)
    }

    /// Load `<confpath>/upsd.conf`. An unreadable file is an error (fatal
    /// on first load; the reload path keeps the old configuration).
    pub fn load(confpath: &Path) -> anyhow::Result<Self> {
        let path = confpath.join("upsd.conf");
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("can't read {}", path.display()))?;

        let mut conf = Self::default();

        for parsed in lines(&path, &text) {
            if parsed.is_empty() {
                continue;
            }
            if !conf.apply_directive(&parsed) {
                warn!("upsd.conf: invalid directive {}", parsed.join(" "));
            }
        }

        Ok(conf)
    }

    /// Returns false when the directive is not recognized or malformed.
    fn apply_directive(&mut self, args: &[String]) -> bool {
        if args.len() < 2 {
            return false;
        }

        match args[0].as_str() {
            "MAXAGE" => match args[1].parse() {
                Ok(v) => {
                    self.maxage = v;
                    true
                }
                Err(_) => {
                    error!("MAXAGE has non numeric value ({})", args[1]);
                    false
                }
            },
            "MAXCONN" => match args[1].parse() {
                Ok(v) => {
                    self.maxconn = v;
                    true
                }
                Err(_) => {
                    error!("MAXCONN has non numeric value ({})", args[1]);
                    false
                }
            },
            "TRACKINGDELAY" => match args[1].parse() {
                Ok(v) => {
                    self.tracking_delay = v;
                    true
                }
                Err(_) => {
                    error!("TRACKINGDELAY has non numeric value ({})", args[1]);
                    false
                }
            },
            "ALLOW_NO_DEVICE" => match parse_bool(&args[1]) {
                Some(v) => {
                    self.allow_no_device = v;
                    true
                }
                None => {
                    error!("ALLOW_NO_DEVICE has non boolean value ({})", args[1]);
                    false
                }
            },
            "STATEPATH" => {
                self.statepath = PathBuf::from(&args[1]);
                true
            }
            "DATAPATH" => {
                self.datapath = PathBuf::from(&args[1]);
                true
            }
            "CERTFILE" => {
                self.certfile = Some(PathBuf::from(&args[1]));
                true
            }
            "CERTPATH" | "CERTIDENT" => {
                warn!("{} is for NSS deployments and is not supported by this build", args[0]);
                true
            }
            "LISTEN" => {
                let port = match args.get(2) {
                    None => DEFAULT_PORT,
                    Some(p) => match p.parse() {
                        Ok(port) => port,
                        Err(_) => {
                            error!("LISTEN has invalid port ({p})");
                            return false;
                        }
                    },
                };
                self.listen.push(ListenAddr { addr: args[1].clone(), port });
                true
            }
            // No longer enforced; kept so old configurations still load.
            "ACL" | "ACCEPT" | "REJECT" => {
                warn!("{} in upsd.conf is no longer supported - switch to LISTEN", args[0]);
                true
            }
            _ => false,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if let Ok(n) = s.parse::<i64>() {
        return Some(n != 0);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" => Some(true),
        "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// One `[section]` from `ups.conf` that is complete enough to monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConf {
    pub name: String,
    pub driver: String,
    pub port: String,
    pub desc: Option<String>,
}

impl DeviceConf {
    /// Driver socket filename under the state path.
    pub fn socket_name(&self) -> String {
        format!("{}-{}", self.driver, self.name)
    }
}

/// Load `<confpath>/ups.conf`. Sections missing `driver` or `port` are
/// skipped with a warning. Duplicate names keep the first definition.
pub fn load_ups_conf(confpath: &Path) -> anyhow::Result<Vec<DeviceConf>> {
    let path = confpath.join("ups.conf");
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("can't read {}", path.display()))?;

    #[derive(Default)]
    struct Section {
        name: String,
        driver: Option<String>,
        port: Option<String>,
        desc: Option<String>,
    }

    let mut sections: Vec<Section> = Vec::new();

    for args in lines(&path, &text) {
        if args.is_empty() {
            continue;
        }

        if let Some(name) = section_header(&args) {
            if sections.iter().any(|s| s.name.eq_ignore_ascii_case(name)) {
                error!("UPS name [{name}] is already in use!");
                // Swallow the duplicate's settings into a discarded section.
                sections.push(Section { name: String::new(), ..Section::default() });
            } else {
                sections.push(Section { name: name.to_owned(), ..Section::default() });
            }
            continue;
        }

        let Some((key, value)) = key_value(&args) else {
            continue;
        };

        let Some(current) = sections.last_mut() else {
            warn!("ups.conf: setting {key} outside a section");
            continue;
        };

        match key {
            "driver" => current.driver = Some(value.to_owned()),
            "port" => current.port = Some(value.to_owned()),
            "desc" => current.desc = Some(value.to_owned()),
            // Everything else is driver-side configuration.
            _ => {}
        }
    }

    let mut devices = Vec::new();

    for s in sections {
        if s.name.is_empty() {
            continue;
        }
        match (s.driver, s.port) {
            (Some(driver), Some(port)) => {
                devices.push(DeviceConf { name: s.name, driver, port, desc: s.desc });
            }
            _ => warn!("ignoring incomplete configuration for UPS [{}]", s.name),
        }
    }

    Ok(devices)
}

/// Load `<confpath>/upsd.users`.
pub fn load_users(confpath: &Path) -> anyhow::Result<UserTable> {
    let path = confpath.join("upsd.users");
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("can't read {}", path.display()))?;

    let mut users: Vec<User> = Vec::new();
    // Index of the section being filled in; None outside any section or
    // inside a duplicate (whose settings are dropped).
    let mut current: Option<usize> = None;

    for args in lines(&path, &text) {
        if args.is_empty() {
            continue;
        }

        if let Some(name) = section_header(&args) {
            if users.iter().any(|u| u.name == name) {
                warn!("ignoring duplicate user {name}");
                current = None;
            } else {
                users.push(User::new(name));
                current = Some(users.len() - 1);
            }
            continue;
        }

        let Some((key, first)) = key_value(&args) else {
            continue;
        };

        let Some(user) = current.and_then(|i| users.get_mut(i)) else {
            warn!("ignoring {key} definition outside a user section");
            continue;
        };

        // Multi-valued settings accept every value after the '='.
        let values = args.iter().skip(2).map(String::as_str);

        match key.to_ascii_lowercase().as_str() {
            "password" => {
                if user.password.is_some() {
                    warn!("ignoring duplicate password for {}", user.name);
                } else {
                    user.password = Some(first.to_owned());
                }
            }
            "actions" => {
                for value in values {
                    match Action::parse(value) {
                        Some(action) => user.grant(action),
                        None => warn!("unknown action {value} for user {}", user.name),
                    }
                }
            }
            "instcmds" => {
                for value in values {
                    user.grant_instcmd(value);
                }
            }
            "upsmon" => apply_upsmon(user, first),
            "allowfrom" => {
                warn!("allowfrom is deprecated and no longer enforced");
            }
            other => warn!("unrecognized user setting {other}"),
        }
    }

    Ok(UserTable::new(users))
}

/// Expand the `upsmon = primary|secondary` shorthand (legacy spellings
/// `master`/`slave` included).
fn apply_upsmon(user: &mut User, kind: &str) {
    match kind.to_ascii_lowercase().as_str() {
        "primary" | "master" => {
            user.grant(Action::Login);
            user.grant(Action::Primary);
            user.grant(Action::Fsd);
        }
        "secondary" | "slave" => {
            user.grant(Action::Login);
        }
        other => warn!("unknown upsmon type {other}"),
    }
}

/// `[name]` on a line of its own opens a section.
fn section_header(args: &[String]) -> Option<&str> {
    if args.len() != 1 {
        return None;
    }
    args[0].strip_prefix('[')?.strip_suffix(']')
}

/// `key = value` (the tokenizer always splits `=` out as its own word).
fn key_value(args: &[String]) -> Option<(&str, &str)> {
    if args.len() >= 3 && args[1] == "=" {
        Some((args[0].as_str(), args[2].as_str()))
    } else {
        None
    }
}

/// Tokenize a config file, reporting parse errors and yielding the argument
/// vectors of the good lines.
fn lines(path: &Path, text: &str) -> Vec<Vec<String>> {
    let mut out = Vec::new();

    for DocLine { line, args } in textparse::parse_document(text) {
        match args {
            Ok(args) => out.push(args),
            Err(e) => error!("parse error: {}:{line}: {}", path.display(), e.message),
        }
    }

    out
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
