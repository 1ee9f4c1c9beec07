// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client sessions: one task per accepted TCP connection. Reads bytes into
//! the tokenizer, dispatches complete request lines, writes replies, and
//! performs the inline STARTTLS upgrade.

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::command::{self, Control};
use crate::daemon::{Daemon, Shared};
use crate::textparse::{Feed, Tokenizer};
use crate::tls::ClientStream;
use crate::users::Action;

/// Longest request line carried before the buffer is discarded wholesale.
const MAX_LINE: usize = 2048;

const READ_BUF: usize = 1024;

/// Per-session protocol state (the shared [`crate::daemon::ClientEntry`]
/// carries only what other components need to see).
pub struct Session {
    pub id: u64,
    pub addr: String,
    /// Write-once; a second USERNAME is an error.
    pub username: Option<String>,
    /// Write-once; a second PASSWORD is an error.
    pub password: Option<String>,
    /// Per-session receipt switch (`SET TRACKING ON`).
    pub tracking: bool,
    pub tls_active: bool,
}

impl Session {
    fn new(id: u64, addr: String) -> Self {
        Self { id, addr, username: None, password: None, tracking: false, tls_active: false }
    }

    /// Authenticate this session's credentials and check an action grant.
    pub fn check_action(&self, daemon: &Daemon, action: Action) -> bool {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => daemon.users.check_action(user, pass, action),
            _ => false,
        }
    }

    pub fn check_instcmd(&self, daemon: &Daemon, cmd: &str) -> bool {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => daemon.users.check_instcmd(user, pass, cmd),
            _ => false,
        }
    }

    pub fn user_label(&self) -> &str {
        self.username.as_deref().unwrap_or("<unauthenticated>")
    }

    pub fn tls_suffix(&self) -> &'static str {
        if self.tls_active {
            " (TLS)"
        } else {
            ""
        }
    }
}

/// Register and spawn a session for an accepted connection.
pub fn spawn(shared: Shared, stream: TcpStream, addr: String) {
    tokio::task::spawn_local(run(shared, stream, addr));
}

async fn run(shared: Shared, stream: TcpStream, addr: String) {
    let (id, cancel) = shared.borrow_mut().add_client(addr.clone());
    debug!("connection from {addr}");

    let mut sess = Session::new(id, addr);
    let mut stream = ClientStream::Plain(stream);
    let mut tok = Tokenizer::new();
    let mut buf = [0u8; READ_BUF];
    // Bytes collected since the last completed line; lines that outgrow
    // the buffer are dropped, not truncated into a bogus request.
    let mut pending = 0usize;

    'conn: loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break 'conn,
            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    info!("host {} disconnected", sess.addr);
                    break 'conn;
                }
                Ok(n) => n,
                Err(e) => {
                    info!("host {} disconnected (read failure: {e})", sess.addr);
                    break 'conn;
                }
            },
        };

        for &byte in &buf[..n] {
            pending += 1;

            if pending > MAX_LINE && byte != b'\n' {
                // Overflow without a newline: discard what we have and
                // start clean at the next byte.
                tok = Tokenizer::new();
                pending = 0;
                continue;
            }

            let args = match tok.feed(byte) {
                Feed::Pending => continue,
                Feed::Error(e) => {
                    pending = 0;
                    debug!("parse error from {}: {e}", sess.addr);
                    if !write_reply(&mut stream, &mut sess, "ERR UNKNOWN-COMMAND\n").await {
                        break 'conn;
                    }
                    continue;
                }
                Feed::Line(args) => {
                    pending = 0;
                    args
                }
            };

            if args.is_empty() {
                if !write_reply(&mut stream, &mut sess, "ERR UNKNOWN-COMMAND\n").await {
                    break 'conn;
                }
                continue;
            }

            let reply = command::dispatch(&shared, &mut sess, &args);

            if !reply.out.is_empty() && !write_reply(&mut stream, &mut sess, &reply.out).await {
                break 'conn;
            }

            match reply.control {
                Control::Continue => {}
                Control::Close => break 'conn,
                Control::StartTls => {
                    let Some(acceptor) = shared.borrow().tls.clone() else {
                        break 'conn;
                    };

                    match stream.upgrade(&acceptor).await {
                        Ok(upgraded) => {
                            stream = upgraded;
                            sess.tls_active = true;
                            debug!("TLS established with {}", sess.addr);
                        }
                        Err(e) => {
                            warn!("TLS handshake with {} failed: {e}", sess.addr);
                            break 'conn;
                        }
                    }
                }
            }
        }
    }

    teardown(&shared, &sess);
}

async fn write_reply(stream: &mut ClientStream, sess: &mut Session, out: &str) -> bool {
    match stream.write_all(out.as_bytes()).await {
        Ok(()) => true,
        Err(e) => {
            info!("write to {} failed: {e}", sess.addr);
            false
        }
    }
}

/// Common exit path: release the tracking refcount and the login slot.
fn teardown(shared: &Shared, sess: &Session) {
    let mut daemon = shared.borrow_mut();
    if sess.tracking {
        daemon.tracking.disable();
    }
    daemon.drop_client(sess.id);
}
