//! Pool statistics types

use docket_monitor::MemorySample;
use serde::{Deserialize, Serialize};

/// Point-in-time view of a connection pool
///
/// Recomputed on every call to `ConnectionPool::statistics`; nothing here is
/// live. Counters are cumulative since the pool was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub max_connections: usize,
    /// Connections checked out right now
    pub active: usize,
    /// Connections waiting in the pool
    pub idle: usize,
    /// Connections being opened right now
    pub opening: usize,
    /// Callers blocked in `acquire`
    pub waiting: usize,
    /// Physical connections opened
    pub created: u64,
    /// Checkouts served from the idle set
    pub reused: u64,
    /// Connections discarded for age, idleness or pressure
    pub expired: u64,
    /// Connections discarded after a failed probe, a leak flag or an unclean release
    pub invalidated: u64,
    /// Checked-out connections closed under their holder
    pub force_closed: u64,
    pub leaks_detected: u64,
    /// Acquisitions that gave up with `PoolExhausted`
    pub exhausted: u64,
    pub under_pressure: bool,
    /// Latest memory sample, when monitoring is on
    pub memory: Option<MemorySample>,
}

impl PoolStatistics {
    /// Connections counted against `max_connections`
    pub fn total(&self) -> usize {
        self.active + self.idle + self.opening
    }

    /// Share of the capacity checked out (0.0 to 1.0)
    ///
    /// Returns 0.0 for a pool with no capacity to avoid division by zero.
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.active as f64 / self.max_connections as f64
        }
    }

    /// Whether a new caller would have to wait
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.total() >= self.max_connections
    }
}
