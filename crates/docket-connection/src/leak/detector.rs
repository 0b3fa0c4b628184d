//! Leak classification and alert fan-out

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::pool::{ConnectionId, ConnectionInfo, OwnerId};

/// Why a connection was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeakReason {
    /// Checked out with an open transaction and no activity for too long
    StalledTransaction,
    /// Transaction open for longer than allowed
    LongTransaction,
    /// Checked out more times than a healthy connection should be
    ExcessiveAccess,
    /// Holding more memory than allowed
    MemoryFootprint,
}

impl fmt::Display for LeakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LeakReason::StalledTransaction => "stalled transaction",
            LeakReason::LongTransaction => "long transaction",
            LeakReason::ExcessiveAccess => "excessive access count",
            LeakReason::MemoryFootprint => "memory footprint",
        };
        f.write_str(label)
    }
}

/// A suspected leak
#[derive(Debug, Clone, PartialEq)]
pub struct LeakAlert {
    pub connection_id: ConnectionId,
    pub reason: LeakReason,
    pub owning_thread: Option<OwnerId>,
    pub detected_at: DateTime<Utc>,
}

/// Limits beyond which a connection is reported
#[derive(Debug, Clone, PartialEq)]
pub struct LeakThresholds {
    pub max_idle_time: Duration,
    pub max_transaction_time: Duration,
    pub max_access_count: u64,
    pub connection_memory_limit: u64,
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self {
            max_idle_time: Duration::from_secs(5 * 60),
            max_transaction_time: Duration::from_secs(10 * 60),
            max_access_count: 1_000,
            connection_memory_limit: 50 * 1024 * 1024,
        }
    }
}

/// Observer invoked for every alert
pub type LeakCallback = Arc<dyn Fn(&LeakAlert) + Send + Sync>;

/// Classifies connection snapshots and notifies observers
pub struct LeakDetector {
    thresholds: LeakThresholds,
    callbacks: RwLock<Vec<LeakCallback>>,
    total_detected: AtomicU64,
}

impl LeakDetector {
    pub fn new(thresholds: LeakThresholds) -> Self {
        Self {
            thresholds,
            callbacks: RwLock::new(Vec::new()),
            total_detected: AtomicU64::new(0),
        }
    }

    pub fn thresholds(&self) -> &LeakThresholds {
        &self.thresholds
    }

    /// Register an observer. Observers run on the scanning task and must not block.
    pub fn register_callback(&self, callback: impl Fn(&LeakAlert) + Send + Sync + 'static) {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Alerts raised since the detector was created
    pub fn total_detected(&self) -> u64 {
        self.total_detected.load(Ordering::Relaxed)
    }

    /// The first rule a connection breaks, if any
    pub fn classify(&self, info: &ConnectionInfo, now: Instant) -> Option<LeakReason> {
        let limits = &self.thresholds;

        if info.is_in_use() && info.in_transaction() && info.idle_time(now) > limits.max_idle_time
        {
            return Some(LeakReason::StalledTransaction);
        }
        if info.in_transaction()
            && info
                .transaction_age(now)
                .is_some_and(|age| age > limits.max_transaction_time)
        {
            return Some(LeakReason::LongTransaction);
        }
        if info.access_count > limits.max_access_count {
            return Some(LeakReason::ExcessiveAccess);
        }
        if info.estimated_memory_bytes > limits.connection_memory_limit {
            return Some(LeakReason::MemoryFootprint);
        }
        None
    }

    /// Classify a snapshot and notify observers of every suspect
    ///
    /// Connections already flagged are skipped so each leak is reported once.
    pub fn scan(&self, snapshot: &[ConnectionInfo], now: Instant) -> Vec<LeakAlert> {
        let detected_at = Utc::now();
        let alerts: Vec<LeakAlert> = snapshot
            .iter()
            .filter(|info| !info.flagged_leaked)
            .filter_map(|info| {
                self.classify(info, now).map(|reason| LeakAlert {
                    connection_id: info.connection_id,
                    reason,
                    owning_thread: info.owning_thread,
                    detected_at,
                })
            })
            .collect();

        if alerts.is_empty() {
            return alerts;
        }

        self.total_detected
            .fetch_add(alerts.len() as u64, Ordering::Relaxed);

        let callbacks = self.callbacks.read().clone();
        for alert in &alerts {
            tracing::warn!(
                connection_id = %alert.connection_id,
                reason = %alert.reason,
                owner = ?alert.owning_thread,
                "possible connection leak"
            );
            for callback in &callbacks {
                callback(alert);
            }
        }

        alerts
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self::new(LeakThresholds::default())
    }
}
