// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Network UPS daemon: replicates device state from per-device driver
//! sockets and serves the text protocol to TCP (and TLS-upgraded) clients.
//!
//! Everything runs on one thread: a current-thread tokio runtime with a
//! `LocalSet`, per-connection tasks, and a single shared daemon value
//! behind `Rc<RefCell>`. No borrows cross an await.

pub mod client;
pub mod command;
pub mod config;
pub mod daemon;
pub mod desc;
pub mod device;
pub mod driver;
pub mod error;
pub mod pidfile;
pub mod state;
pub mod textparse;
pub mod tls;
pub mod tracking;
pub mod users;

use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::{Config, ListenAddr, UpsdConf, DEFAULT_PORT};
use crate::daemon::{Daemon, Shared};
use crate::desc::DescTable;

pub const UPS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client protocol version reported by NETVER/PROTVER.
pub const NET_VERSION: &str = "1.3";

pub const PACKAGE_URL: &str = "https://www.networkupstools.org/";

/// One-line banner for VER and `server.info`.
pub fn server_banner() -> String {
    format!("Network UPS Tools upsd {UPS_VERSION} - {PACKAGE_URL}")
}

/// Cadence of the housekeeping tick (tracking sweep).
const SWEEP_TICK: Duration = Duration::from_secs(2);

/// Run the daemon until a shutdown signal. Must be called from within a
/// `LocalSet` on a current-thread runtime.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Some(dir) = &config.chroot {
        nix::unistd::chroot(dir.as_path())
            .with_context(|| format!("can't chroot to {}", dir.display()))?;
        std::env::set_current_dir("/")?;
    }

    if let Some(user) = &config.user {
        warn!("-u {user}: privilege drop is handled by the service manager; ignoring");
    }

    // Initial configuration load; syntax or access problems here are fatal.
    let conf = UpsdConf::load(&config.confpath)?;
    let device_confs = config::load_ups_conf(&config.confpath)?;

    if device_confs.is_empty() && !conf.allow_no_device {
        anyhow::bail!("at least one UPS must be defined in ups.conf");
    }

    let users = match config::load_users(&config.confpath) {
        Ok(users) => users,
        Err(e) => {
            warn!("{e:#}; all authenticated commands will be denied");
            Default::default()
        }
    };

    if users.is_empty() {
        warn!("no users defined in upsd.users");
    }

    let desc = DescTable::load(&conf.datapath);

    let listeners = bind_listeners(&conf, &config).await?;

    let mut daemon = Daemon::new(config.confpath.clone(), conf, users, desc);

    if let Some(certfile) = daemon.conf.certfile.clone() {
        daemon.tls = Some(tls::make_acceptor(&certfile)?);
        info!("TLS enabled with certificate {}", certfile.display());
    }

    for dc in &device_confs {
        daemon.add_device(dc);
    }

    let pidfile_path = daemon.conf.statepath.join("upsd.pid");
    pidfile::write(&pidfile_path);

    let shutdown = daemon.shutdown.clone();
    let shared: Shared = Rc::new(RefCell::new(daemon));

    for dc in &device_confs {
        driver::spawn(shared.clone(), dc.name.clone());
    }

    for listener in listeners {
        tokio::task::spawn_local(accept_loop(shared.clone(), listener));
    }

    tokio::task::spawn_local(sweeper(shared.clone()));
    tokio::task::spawn_local(signal_task(shared.clone()));

    shutdown.cancelled().await;

    info!("shutting down");
    pidfile::remove(&pidfile_path);
    Ok(())
}

/// Bind every LISTEN directive (or the localhost defaults), honoring the
/// `-4`/`-6` restriction. An explicitly configured binding that fails is
/// fatal; a default binding may be absent (e.g. no IPv6 on the host).
async fn bind_listeners(conf: &UpsdConf, config: &Config) -> anyhow::Result<Vec<TcpListener>> {
    let (binds, defaults) = if conf.listen.is_empty() {
        let mut binds = Vec::new();
        if !config.ipv4 {
            binds.push(ListenAddr { addr: "::1".to_owned(), port: DEFAULT_PORT });
        }
        if !config.ipv6 {
            binds.push(ListenAddr { addr: "127.0.0.1".to_owned(), port: DEFAULT_PORT });
        }
        (binds, true)
    } else {
        (conf.listen.clone(), false)
    };

    let mut listeners = Vec::new();

    for bind in &binds {
        match bind_one(bind, config).await {
            Ok(Some(listener)) => {
                info!("listening on {} port {}", bind.addr, bind.port);
                listeners.push(listener);
            }
            Ok(None) => debug!("skipping {} (address family restricted)", bind.addr),
            Err(e) if defaults => warn!("not listening on {} port {}: {e}", bind.addr, bind.port),
            Err(e) => {
                return Err(e).with_context(|| format!("not listening on {} port {}", bind.addr, bind.port))
            }
        }
    }

    anyhow::ensure!(!listeners.is_empty(), "no listening sockets could be bound");
    Ok(listeners)
}

async fn bind_one(bind: &ListenAddr, config: &Config) -> anyhow::Result<Option<TcpListener>> {
    let addrs: Vec<SocketAddr> = match bind.addr.parse::<IpAddr>() {
        Ok(ip) => vec![SocketAddr::new(ip, bind.port)],
        Err(_) => tokio::net::lookup_host((bind.addr.as_str(), bind.port))
            .await
            .with_context(|| format!("can't resolve {}", bind.addr))?
            .collect(),
    };

    let allowed = |addr: &SocketAddr| {
        if config.ipv4 {
            addr.is_ipv4()
        } else if config.ipv6 {
            addr.is_ipv6()
        } else {
            true
        }
    };

    let mut last_err = None;

    for addr in addrs.iter().filter(|a| allowed(a)) {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(Some(listener)),
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => Err(e.into()),
        // Every resolved address was filtered out by -4/-6.
        None => Ok(None),
    }
}

/// Accept clients on one listening socket, shedding connections beyond
/// MAXCONN.
async fn accept_loop(shared: Shared, listener: TcpListener) {
    let cancel = shared.borrow().shutdown.clone();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let over_limit = {
                        let daemon = shared.borrow();
                        daemon.clients.len() >= daemon.conf.maxconn
                    };

                    if over_limit {
                        warn!("shedding connection from {peer}: MAXCONN reached");
                        drop(stream);
                        continue;
                    }

                    client::spawn(shared.clone(), stream, peer.ip().to_string());
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
}

/// Housekeeping tick: expire tracking entries.
async fn sweeper(shared: Shared) {
    let cancel = shared.borrow().shutdown.clone();
    let mut tick = tokio::time::interval(SWEEP_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => shared.borrow_mut().tracking.sweep(),
        }
    }
}

/// SIGHUP reloads configuration; SIGTERM/SIGINT/SIGQUIT shut down.
async fn signal_task(shared: Shared) {
    use tokio::signal::unix::{signal, SignalKind};

    let cancel = shared.borrow().shutdown.clone();

    let (mut hup, mut term, mut int, mut quit) = match (
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::quit()),
    ) {
        (Ok(h), Ok(t), Ok(i), Ok(q)) => (h, t, i, q),
        _ => {
            warn!("can't install signal handlers; reload and clean shutdown disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = hup.recv() => daemon::reload(&shared),
            _ = term.recv() => break,
            _ = int.recv() => break,
            _ = quit.recv() => break,
        }
    }

    info!("signal: exiting");
    cancel.cancel();
}
