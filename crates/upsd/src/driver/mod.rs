// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver sessions: one task per configured device, owning the unix-socket
//! connection to that device's driver. Handles connect/reconnect, the
//! initial dump, liveness pings, and staleness transitions.

pub mod proto;

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::daemon::{Daemon, Shared};
use crate::textparse::{Feed, Tokenizer};

/// Poller cadence for reconnects, pings, and staleness checks.
const TICK: Duration = Duration::from_secs(2);

/// Minimum gap between connect-failure complaints per device.
const CONNFAIL_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Largest driver read per wakeup, so one chatty driver cannot tie up the
/// loop.
const MAX_READ: usize = 256;

/// Spawn the session task for a configured device onto the local set.
pub fn spawn(shared: Shared, name: String) {
    tokio::task::spawn_local(run(shared, name));
}

async fn run(shared: Shared, name: String) {
    let Some(cancel) = device_cancel(&shared, &name) else {
        return;
    };

    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }

        {
            let mut daemon = shared.borrow_mut();
            tick_check(&mut daemon, &name);
        }

        let Some(path) = socket_path(&shared, &name) else {
            return;
        };

        match UnixStream::connect(&path).await {
            _ if cancel.is_cancelled() => return,
            Ok(stream) => {
                let (reader, writer) = stream.into_split();
                {
                    let mut daemon = shared.borrow_mut();
                    let Some(dev) = daemon.device_mut(&name) else {
                        return;
                    };

                    dev.on_connect(writer);
                    dev.last_connfail = None;

                    if !dev.send_line("DUMPALL\n") {
                        dev.on_disconnect();
                        continue;
                    }

                    info!("connected to UPS [{name}] at {}", path.display());
                }

                session(&shared, &name, &cancel, reader).await;

                // A cancelled session must not touch the device record: a
                // reload may already have handed it to a new session task.
                if cancel.is_cancelled() {
                    return;
                }

                let mut daemon = shared.borrow_mut();
                let Some(dev) = daemon.device_mut(&name) else {
                    return;
                };
                dev.on_disconnect();
                debug!("driver connection for UPS [{name}] closed");
            }
            Err(e) => {
                let mut daemon = shared.borrow_mut();
                let Some(dev) = daemon.device_mut(&name) else {
                    return;
                };

                let complain = dev
                    .last_connfail
                    .is_none_or(|at| at.elapsed() >= CONNFAIL_LOG_INTERVAL);
                if complain {
                    dev.last_connfail = Some(Instant::now());
                    warn!("can't connect to UPS [{name}] ({}): {e}", path.display());
                }
            }
        }
    }
}

/// Read loop for one established driver connection. Returns on socket
/// error, EOF, or cancellation.
async fn session(shared: &Shared, name: &str, cancel: &CancellationToken, mut reader: OwnedReadHalf) {
    let mut tok = Tokenizer::new();
    let mut buf = [0u8; MAX_READ];

    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {
                if cancel.is_cancelled() {
                    return;
                }
                let mut daemon = shared.borrow_mut();
                tick_check(&mut daemon, name);
            }
            read = reader.read(&mut buf) => {
                if cancel.is_cancelled() {
                    return;
                }
                let n = match read {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        debug!("read error from UPS [{name}] driver: {e}");
                        return;
                    }
                };

                let mut daemon = shared.borrow_mut();
                if daemon.device(name).is_none() {
                    return;
                }

                for &byte in &buf[..n] {
                    match tok.feed(byte) {
                        Feed::Pending => {}
                        Feed::Line(args) => {
                            if let Some(dev) = daemon.device_mut(name) {
                                dev.last_heard = Instant::now();
                            }
                            proto::apply(&mut daemon, name, &args);
                        }
                        Feed::Error(e) => {
                            debug!("unparseable line from UPS [{name}] driver: {e}");
                        }
                    }
                }
            }
        }
    }
}

/// Per-tick bookkeeping: prod a quiet driver with PING and recompute the
/// stale flag.
fn tick_check(daemon: &mut Daemon, name: &str) {
    let maxage = daemon.conf.maxage();
    let Some(dev) = daemon.device_mut(name) else {
        return;
    };

    let prod_after = maxage / 3;
    if dev.connected()
        && dev.last_heard.elapsed() > prod_after
        && dev.last_ping.elapsed() > prod_after
        && dev.send_line("PING\n")
    {
        dev.last_ping = Instant::now();
    }

    let dead = dev.dead(maxage);
    dev.note_staleness(dead);
}

fn device_cancel(shared: &Shared, name: &str) -> Option<CancellationToken> {
    shared.borrow().device(name).map(|d| d.cancel.clone())
}

fn socket_path(shared: &Shared, name: &str) -> Option<std::path::PathBuf> {
    shared.borrow().device(name).map(|d| d.socket_path.clone())
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
