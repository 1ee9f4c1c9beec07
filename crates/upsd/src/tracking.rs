// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-request receipts for `SET VAR` and `INSTCMD`.
//!
//! When at least one client has tracking enabled, every forwarded set or
//! instant command carries a fresh UUID; the driver acknowledges completion
//! with `TRACKING <id> <status>` and clients poll `GET TRACKING <id>`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

/// Driver-reported outcome of a tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Created, no driver answer yet. Internal; never reported by drivers.
    Pending,
    Ok,
    Unknown,
    Invalid,
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ok => "OK",
            Self::Unknown => "UNKNOWN",
            Self::Invalid => "INVALID",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a driver status token. `PENDING` is not accepted from the
    /// wire; entries only ever leave that state.
    pub fn from_driver(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "UNKNOWN" => Some(Self::Unknown),
            "INVALID" => Some(Self::Invalid),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    status: TrackingStatus,
    created: Instant,
}

/// Process-wide tracking table plus the enablement refcount.
#[derive(Debug)]
pub struct TrackingTable {
    entries: HashMap<String, Entry>,
    /// Number of client sessions with tracking switched on.
    enabled: u32,
    delay: Duration,
}

impl TrackingTable {
    pub fn new(delay: Duration) -> Self {
        Self { entries: HashMap::new(), enabled: 0, delay }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// A client turned tracking on.
    pub fn enable(&mut self) {
        self.enabled += 1;
    }

    /// A client turned tracking off (or disconnected with it on). Existing
    /// entries stay queryable until they expire.
    pub fn disable(&mut self) {
        self.enabled = self.enabled.saturating_sub(1);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled > 0
    }

    /// Register a fresh PENDING entry and return its id.
    pub fn add(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.entries.insert(id.clone(), Entry { status: TrackingStatus::Pending, created: Instant::now() });
        id
    }

    /// Resolve an entry from a driver `TRACKING` frame. Transitions are
    /// one-way; a second resolution or an unknown id is ignored.
    pub fn resolve(&mut self, id: &str, status: TrackingStatus) {
        match self.entries.get_mut(id) {
            Some(entry) if entry.status == TrackingStatus::Pending => entry.status = status,
            Some(_) => debug!(id, "ignoring second resolution for tracking entry"),
            None => debug!(id, "TRACKING for unknown id"),
        }
    }

    /// Textual status for `GET TRACKING <id>`; absent or expired entries
    /// answer `UNKNOWN`.
    pub fn get(&self, id: &str) -> &'static str {
        self.entries.get(id).map_or("UNKNOWN", |e| e.status.as_str())
    }

    /// Drop entries older than the configured delay. Stale PENDING entries
    /// thereby become UNKNOWN to any later query.
    pub fn sweep(&mut self) {
        let delay = self.delay;
        self.entries.retain(|_, e| e.created.elapsed() <= delay);
    }

    #[cfg(test)]
    fn age(&mut self, id: &str, by: Duration) {
        if let Some(e) = self.entries.get_mut(id) {
            e.created = e.created.checked_sub(by).unwrap_or(e.created);
        }
    }
}

#[cfg(test)]
#[path = "tracking_tests.rs"]
mod tests;
