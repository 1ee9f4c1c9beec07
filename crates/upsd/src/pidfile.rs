// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PID file handling and the `-c reload|stop` signalling path.

use std::path::Path;

use anyhow::Context;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::warn;

use crate::config::SignalCommand;

/// Record our PID. Failure is not fatal; only `-c` stops working.
pub fn write(path: &Path) {
    if let Err(e) = std::fs::write(path, format!("{}\n", std::process::id())) {
        warn!("can't write PID file {}: {e}", path.display());
    }
}

pub fn remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("can't remove PID file {}: {e}", path.display());
    }
}

/// Deliver `-c reload|stop` to the instance recorded in the PID file.
pub fn signal_running(path: &Path, cmd: SignalCommand) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("can't read PID file {}", path.display()))?;
    let pid: i32 = text
        .trim()
        .parse()
        .with_context(|| format!("bad PID file contents in {}", path.display()))?;

    let signal = match cmd {
        SignalCommand::Reload => Signal::SIGHUP,
        SignalCommand::Stop => Signal::SIGTERM,
    };

    kill(Pid::from_raw(pid), signal).with_context(|| format!("can't signal PID {pid}"))?;
    Ok(())
}

#[cfg(test)]
#[path = "pidfile_tests.rs"]
mod tests;
