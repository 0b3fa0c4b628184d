//! Physical connection configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings a `ConnectionFactory` needs to open one physical connection.
///
/// This is the subset of the pool configuration that drivers care about; the pool
/// crate projects it out of its own `PoolConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the database file, or `:memory:`
    pub storage_path: String,
    /// Upper bound on simultaneously open connections
    pub max_connections: usize,
    /// How long an operation may wait on a locked store, in milliseconds
    pub connection_timeout_ms: u64,
    /// Idle time after which a pooled connection is discarded, in milliseconds
    pub max_idle_ms: u64,
    /// Age after which a pooled connection is discarded, in milliseconds
    pub max_lifetime_ms: u64,
}

impl StoreConfig {
    /// Create a configuration for the given storage path with default limits
    pub fn new(storage_path: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Get the idle limit as a Duration
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Get the lifetime limit as a Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Whether the store lives only in memory
    pub fn is_in_memory(&self) -> bool {
        self.storage_path == ":memory:"
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_path: "docket.db".to_string(),
            max_connections: 10,
            connection_timeout_ms: 30_000,
            max_idle_ms: 300_000,
            max_lifetime_ms: 1_800_000,
        }
    }
}
