// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One monitored UPS: its driver socket, replicated state, and liveness
//! bookkeeping.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::net::unix::OwnedWriteHalf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::NetError;
use crate::state::{CmdList, StateTree};

/// Snapshot being filled while a `DUMPALL` is in flight; swapped into the
/// live tree on `DUMPDONE`.
#[derive(Debug, Default)]
pub struct Staging {
    pub tree: StateTree,
    pub cmds: CmdList,
}

/// A configured device and the live replica of its driver state.
pub struct Device {
    /// Canonical name from ups.conf (case preserved).
    pub name: String,
    /// Unix socket path: `<statepath>/<driver>-<name>`.
    pub socket_path: PathBuf,
    pub desc: Option<String>,

    /// Write half of the driver socket; absent while disconnected.
    pub writer: Option<OwnedWriteHalf>,
    pub last_heard: Instant,
    pub last_ping: Instant,
    /// Rate-limits connect-failure complaints.
    pub last_connfail: Option<Instant>,

    pub dump_done: bool,
    /// Driver's own data-quality claim (DATAOK/DATASTALE); honored once the
    /// dump has completed.
    pub data_ok: bool,
    pub stale: bool,
    /// Forced shutdown latched; cleared only by a fresh dump.
    pub fsd: bool,
    pub numlogins: i32,

    pub tree: StateTree,
    pub cmds: CmdList,
    pub staging: Option<Staging>,

    /// Survives the current reload pass.
    pub retain: bool,
    /// Cancels the driver session task; replaced when the socket path
    /// changes on reload.
    pub cancel: CancellationToken,
}

impl Device {
    pub fn new(name: &str, socket_path: PathBuf, desc: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            name: name.to_owned(),
            socket_path,
            desc,
            writer: None,
            last_heard: now,
            last_ping: now,
            last_connfail: None,
            dump_done: false,
            data_ok: false,
            stale: true,
            fsd: false,
            numlogins: 0,
            tree: StateTree::new(),
            cmds: CmdList::default(),
            staging: None,
            retain: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn connected(&self) -> bool {
        self.writer.is_some()
    }

    /// Gate for data queries: the driver must be connected and fresh.
    pub fn available(&self) -> Result<(), NetError> {
        if !self.connected() {
            return Err(NetError::DriverNotConnected);
        }
        if self.stale {
            return Err(NetError::DataStale);
        }
        Ok(())
    }

    /// True when this device should be treated as stale.
    pub fn dead(&self, maxage: Duration) -> bool {
        if !self.connected() {
            return true;
        }
        if self.dump_done && !self.data_ok {
            return true;
        }
        self.last_heard.elapsed() > maxage
    }

    /// Apply a freshly computed deadness verdict, logging each edge once.
    pub fn note_staleness(&mut self, dead: bool) {
        if dead && !self.stale {
            self.stale = true;
            warn!("data for UPS [{}] is stale - check driver", self.name);
        } else if !dead && self.stale {
            self.stale = false;
            info!("UPS [{}] data is no longer stale", self.name);
        }
    }

    /// Send one protocol line (newline included) to the driver without
    /// blocking. A short or failed write is reported to the caller; the
    /// read side notices actual connection loss.
    pub fn send_line(&mut self, line: &str) -> bool {
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };

        match writer.try_write(line.as_bytes()) {
            Ok(n) if n == line.len() => true,
            Ok(n) => {
                warn!(ups = %self.name, wrote = n, len = line.len(), "short write to driver");
                false
            }
            Err(e) => {
                warn!(ups = %self.name, err = %e, "write to driver failed");
                false
            }
        }
    }

    /// Where driver mutations land: the staging snapshot during a dump,
    /// the live tree afterwards.
    pub fn target_tree(&mut self) -> &mut StateTree {
        match self.staging.as_mut() {
            Some(staging) => &mut staging.tree,
            None => &mut self.tree,
        }
    }

    pub fn target_cmds(&mut self) -> &mut CmdList {
        match self.staging.as_mut() {
            Some(staging) => &mut staging.cmds,
            None => &mut self.cmds,
        }
    }

    /// Reset connection-scoped state when the driver socket opens. The old
    /// tree stays visible (with `ups.status = WAIT`) until the new dump
    /// lands.
    pub fn on_connect(&mut self, writer: OwnedWriteHalf) {
        let now = Instant::now();
        self.writer = Some(writer);
        self.last_heard = now;
        self.last_ping = now;
        self.dump_done = false;
        self.data_ok = false;
        self.staging = Some(Staging::default());
        self.tree.set("ups.status", "WAIT");
    }

    pub fn on_disconnect(&mut self) {
        self.writer = None;
        self.staging = None;
        self.dump_done = false;
    }

    /// Complete a dump: swap the staged snapshot in and trust the data.
    pub fn finish_dump(&mut self) {
        if let Some(staging) = self.staging.take() {
            self.tree.replace_all(staging.tree);
            self.cmds.replace_all(staging.cmds);
        }
        self.dump_done = true;
        self.data_ok = true;
        self.fsd = false;
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
