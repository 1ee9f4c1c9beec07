// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The one shared daemon value: devices, clients, users, tracking, and
//! configuration. Owned by the single-threaded event loop behind an
//! `Rc<RefCell<..>>`; no task holds a borrow across an await.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use indexmap::IndexMap;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{self, DeviceConf, UpsdConf};
use crate::desc::DescTable;
use crate::device::Device;
use crate::driver;
use crate::tracking::TrackingTable;
use crate::users::UserTable;

/// Shared handle to the daemon state.
pub type Shared = Rc<RefCell<Daemon>>;

/// Client-session facts the rest of the daemon needs to see: who is logged
/// into which device, and how to kick a session.
pub struct ClientEntry {
    pub addr: String,
    pub login_ups: Option<String>,
    pub cancel: CancellationToken,
}

pub struct Daemon {
    pub confpath: PathBuf,
    pub conf: UpsdConf,
    /// Keyed by lowercased device name; insertion-ordered for `LIST UPS`.
    pub devices: IndexMap<String, Device>,
    pub clients: HashMap<u64, ClientEntry>,
    next_client: u64,
    pub users: UserTable,
    pub tracking: TrackingTable,
    pub desc: DescTable,
    pub tls: Option<TlsAcceptor>,
    pub shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(confpath: PathBuf, conf: UpsdConf, users: UserTable, desc: DescTable) -> Self {
        let tracking = TrackingTable::new(conf.tracking_delay());
        Self {
            confpath,
            conf,
            devices: IndexMap::new(),
            clients: HashMap::new(),
            next_client: 0,
            users,
            tracking,
            desc,
            tls: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(&name.to_ascii_lowercase())
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(&name.to_ascii_lowercase())
    }

    /// Register an accepted client connection.
    pub fn add_client(&mut self, addr: String) -> (u64, CancellationToken) {
        let id = self.next_client;
        self.next_client += 1;
        // Child of the shutdown token: daemon exit kicks everyone.
        let cancel = self.shutdown.child_token();
        self.clients.insert(id, ClientEntry { addr, login_ups: None, cancel: cancel.clone() });
        (id, cancel)
    }

    /// Common teardown: forget the session and release its login.
    pub fn drop_client(&mut self, id: u64) {
        let Some(entry) = self.clients.remove(&id) else {
            return;
        };

        if let Some(upsname) = entry.login_ups {
            match self.device_mut(&upsname) {
                Some(dev) => {
                    dev.numlogins -= 1;
                    if dev.numlogins < 0 {
                        error!("programming error: UPS [{}] has numlogins={}", dev.name, dev.numlogins);
                    }
                }
                None => info!("tried to decrement logins for missing UPS [{upsname}]"),
            }
        }
    }

    /// Disconnect everyone logged into this device (it is going away).
    pub fn kick_login_clients(&mut self, upsname: &str) {
        for entry in self.clients.values() {
            if entry.login_ups.as_deref().is_some_and(|u| u.eq_ignore_ascii_case(upsname)) {
                info!("kicking client {} (was on UPS [{upsname}])", entry.addr);
                entry.cancel.cancel();
            }
        }
    }

    /// Addresses of clients logged into `upsname`, for `LIST CLIENT`.
    pub fn logged_in_addrs(&self, upsname: &str) -> Vec<String> {
        self.clients
            .values()
            .filter(|e| e.login_ups.as_deref().is_some_and(|u| u.eq_ignore_ascii_case(upsname)))
            .map(|e| e.addr.clone())
            .collect()
    }

    /// Create a device from configuration and hand back its name for the
    /// caller to spawn the driver session.
    pub fn add_device(&mut self, dc: &DeviceConf) {
        let socket_path = self.conf.statepath.join(dc.socket_name());
        let mut dev = Device::new(&dc.name, socket_path, dc.desc.clone());
        dev.cancel = self.shutdown.child_token();
        self.devices.insert(dc.name.to_ascii_lowercase(), dev);
    }
}

/// Reconcile running state with freshly re-read configuration files.
/// Existing device entries (and their logged-in clients) survive; devices
/// whose socket filename changed reconnect; removed devices are torn down.
pub fn reload(shared: &Shared) {
    info!("reloading configuration");

    let confpath = shared.borrow().confpath.clone();

    // upsd.conf first; on failure keep everything as it was.
    let conf = match UpsdConf::load(&confpath) {
        Ok(conf) => conf,
        Err(e) => {
            error!("reload failed: {e:#}");
            return;
        }
    };

    let device_confs = match config::load_ups_conf(&confpath) {
        Ok(devices) => devices,
        Err(e) => {
            error!("reload failed: {e:#}");
            return;
        }
    };

    let mut respawn = Vec::new();

    {
        let mut daemon = shared.borrow_mut();

        // LISTEN changes require a restart; everything else applies live.
        if conf.listen != daemon.conf.listen {
            warn!("LISTEN changes are ignored on reload");
        }
        if conf.statepath != daemon.conf.statepath {
            warn!("STATEPATH changes are ignored on reload");
        }
        let delay = conf.tracking_delay();
        daemon.conf = conf;
        daemon.tracking.set_delay(delay);

        for dev in daemon.devices.values_mut() {
            dev.retain = false;
        }

        let shutdown = daemon.shutdown.clone();

        for dc in &device_confs {
            let socket_path = daemon.conf.statepath.join(dc.socket_name());

            match daemon.device_mut(&dc.name) {
                Some(dev) => {
                    dev.desc = dc.desc.clone();
                    dev.retain = true;

                    if dev.socket_path != socket_path {
                        info!("redefined UPS [{}]", dev.name);
                        dev.cancel.cancel();
                        dev.cancel = shutdown.child_token();
                        dev.socket_path = socket_path;
                        dev.on_disconnect();
                        dev.tree = Default::default();
                        dev.cmds = Default::default();
                        respawn.push(dc.name.clone());
                    }
                }
                None => {
                    daemon.add_device(dc);
                    respawn.push(dc.name.clone());
                }
            }
        }

        // Tear down devices that vanished from ups.conf.
        let doomed: Vec<String> = daemon
            .devices
            .values()
            .filter(|d| !d.retain)
            .map(|d| d.name.clone())
            .collect();

        for name in doomed {
            info!("deleting UPS [{name}]");
            daemon.kick_login_clients(&name);
            if let Some(dev) = daemon.device_mut(&name) {
                dev.cancel.cancel();
            }
            daemon.devices.shift_remove(&name.to_ascii_lowercase());
        }

        if daemon.devices.is_empty() {
            warn!("no UPSes currently defined!");
        }

        match config::load_users(&confpath) {
            Ok(users) => daemon.users = users,
            Err(e) => error!("reload of upsd.users failed: {e:#}"),
        }
    }

    for name in respawn {
        driver::spawn(shared.clone(), name);
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
