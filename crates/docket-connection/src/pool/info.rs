//! Per-connection bookkeeping

use std::fmt;
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Identifier of a pooled connection, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The execution context holding a connection
///
/// Connections are bound to the thread that acquired them. On a multi-threaded
/// runtime this is the worker thread that polled `acquire()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(ThreadId);

impl OwnerId {
    /// The calling thread
    pub fn current() -> Self {
        Self(std::thread::current().id())
    }
}

impl From<ThreadId> for OwnerId {
    fn from(id: ThreadId) -> Self {
        Self(id)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Live usage record of one pooled connection
///
/// Copies of this record are what the leak detector and the statistics surface
/// look at; the pool's own copy is only changed by the pool and by the holder.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    /// Context currently holding the connection, `None` while idle
    pub owning_thread: Option<OwnerId>,
    /// Context that released it last, used to prefer handing it back to the same thread
    pub last_owner: Option<OwnerId>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    /// Successful checkouts over the connection's whole life
    pub access_count: u64,
    pub transaction_depth: usize,
    /// Set when the depth goes from 0 to 1, cleared when it returns to 0
    pub transaction_started_at: Option<Instant>,
    /// Set by the leak scan; a flagged connection never goes back to idle
    pub flagged_leaked: bool,
    /// Driver-reported memory held for this connection, refreshed on snapshot
    pub estimated_memory_bytes: u64,
}

impl ConnectionInfo {
    /// Record for a connection opened at `now`
    pub fn new(connection_id: ConnectionId, now: Instant) -> Self {
        Self {
            connection_id,
            owning_thread: None,
            last_owner: None,
            created_at: now,
            last_used_at: now,
            access_count: 0,
            transaction_depth: 0,
            transaction_started_at: None,
            flagged_leaked: false,
            estimated_memory_bytes: 0,
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.owning_thread.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth > 0
    }

    /// Time since the connection was opened
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time since the connection was last checked out, used or returned
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Age of the open transaction, if any
    pub fn transaction_age(&self, now: Instant) -> Option<Duration> {
        self.transaction_started_at
            .map(|started| now.saturating_duration_since(started))
    }

    pub(crate) fn claim(&mut self, owner: OwnerId) {
        self.owning_thread = Some(owner);
    }

    /// A checkout succeeded: count it exactly once
    pub(crate) fn check_out(&mut self, owner: OwnerId, now: Instant) {
        self.owning_thread = Some(owner);
        self.access_count += 1;
        self.last_used_at = now;
    }

    pub(crate) fn check_in(&mut self, now: Instant) {
        self.last_owner = self.owning_thread.take();
        self.last_used_at = now;
        self.transaction_depth = 0;
        self.transaction_started_at = None;
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_used_at = now;
    }

    pub(crate) fn set_transaction_depth(&mut self, depth: usize, now: Instant) {
        if depth == 0 {
            self.transaction_started_at = None;
        } else if self.transaction_started_at.is_none() {
            self.transaction_started_at = Some(now);
        }
        self.transaction_depth = depth;
    }
}
