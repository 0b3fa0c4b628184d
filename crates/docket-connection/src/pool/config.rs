//! Pool configuration types

use std::path::Path;
use std::time::Duration;

use docket_core::{DocketError, Result, StoreConfig};
use docket_monitor::MemoryMonitorConfig;
use serde::{Deserialize, Serialize};

use crate::leak::LeakThresholds;

/// Configuration for a connection pool
///
/// Controls pool sizing, expiry, leak heuristics and memory monitoring. All
/// durations are stored in milliseconds so the struct maps directly onto a
/// TOML file; missing keys take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Path of the database file, or `:memory:`
    storage_path: String,
    /// Maximum number of connections (idle + in use + opening)
    max_connections: usize,
    /// Size the pool shrinks toward under memory pressure
    low_watermark: usize,
    /// How long `acquire` waits for a free connection
    connection_timeout_ms: u64,
    /// Upper bound on a single liveness probe
    probe_timeout_ms: u64,
    /// Idle time after which a connection is discarded
    max_idle_ms: u64,
    /// Age after which a connection is discarded
    max_lifetime_ms: u64,
    /// Transaction age after which the holder is considered stuck
    max_transaction_time_ms: u64,
    /// Idle time after which aggressive cleanup closes a connection
    aggressive_idle_ms: u64,
    /// Checkouts after which a connection is flagged
    max_access_count: u64,
    /// System memory fraction that counts as pressure
    memory_pressure_threshold: f64,
    /// Per-connection memory above which a connection is flagged, in bytes
    connection_memory_limit: u64,
    /// Leak detection and background memory sampling
    enable_monitoring: bool,
    leak_scan_interval_ms: u64,
    memory_sample_interval_ms: u64,
    cleanup_interval_ms: u64,
    memory_history_len: usize,
}

impl PoolConfig {
    /// Create a pool configuration for the given store with default limits
    pub fn new(storage_path: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from TOML and validate it
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| DocketError::Configuration(format!("Invalid pool config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DocketError::Configuration(format!("Failed to render config: {}", e)))
    }

    /// Check that the values are consistent
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(DocketError::Configuration(msg));

        if self.storage_path.trim().is_empty() {
            return fail("storage_path must not be empty".into());
        }
        if self.max_connections == 0 {
            return fail("max_connections must be greater than 0".into());
        }
        if self.low_watermark > self.max_connections {
            return fail(format!(
                "low_watermark ({}) cannot exceed max_connections ({})",
                self.low_watermark, self.max_connections
            ));
        }
        if !(self.memory_pressure_threshold > 0.0 && self.memory_pressure_threshold <= 1.0) {
            return fail(format!(
                "memory_pressure_threshold must be in (0, 1], got {}",
                self.memory_pressure_threshold
            ));
        }
        for (name, value) in [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("leak_scan_interval_ms", self.leak_scan_interval_ms),
            ("memory_sample_interval_ms", self.memory_sample_interval_ms),
            ("cleanup_interval_ms", self.cleanup_interval_ms),
        ] {
            if value == 0 {
                return fail(format!("{} must be greater than 0", name));
            }
        }
        if self.memory_history_len == 0 {
            return fail("memory_history_len must be greater than 0".into());
        }
        Ok(())
    }

    pub fn with_storage_path(mut self, storage_path: impl Into<String>) -> Self {
        self.storage_path = storage_path.into();
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_low_watermark(mut self, low_watermark: usize) -> Self {
        self.low_watermark = low_watermark;
        self
    }

    /// Set how long `acquire` waits, in milliseconds
    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    pub fn with_probe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    /// Set the idle expiry in milliseconds
    pub fn with_max_idle_ms(mut self, idle_ms: u64) -> Self {
        self.max_idle_ms = idle_ms;
        self
    }

    /// Set the maximum connection lifetime in milliseconds
    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime_ms = lifetime_ms;
        self
    }

    pub fn with_max_transaction_time_ms(mut self, transaction_ms: u64) -> Self {
        self.max_transaction_time_ms = transaction_ms;
        self
    }

    pub fn with_aggressive_idle_ms(mut self, idle_ms: u64) -> Self {
        self.aggressive_idle_ms = idle_ms;
        self
    }

    pub fn with_max_access_count(mut self, count: u64) -> Self {
        self.max_access_count = count;
        self
    }

    /// Set the pressure threshold as a fraction (0.85 = 85%)
    pub fn with_memory_pressure_threshold(mut self, threshold: f64) -> Self {
        self.memory_pressure_threshold = threshold;
        self
    }

    pub fn with_connection_memory_limit(mut self, bytes: u64) -> Self {
        self.connection_memory_limit = bytes;
        self
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.enable_monitoring = enabled;
        self
    }

    pub fn with_leak_scan_interval_ms(mut self, interval_ms: u64) -> Self {
        self.leak_scan_interval_ms = interval_ms;
        self
    }

    pub fn with_memory_sample_interval_ms(mut self, interval_ms: u64) -> Self {
        self.memory_sample_interval_ms = interval_ms;
        self
    }

    pub fn with_cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.cleanup_interval_ms = interval_ms;
        self
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    /// Get the acquire timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    pub fn max_transaction_time(&self) -> Duration {
        Duration::from_millis(self.max_transaction_time_ms)
    }

    pub fn aggressive_idle(&self) -> Duration {
        Duration::from_millis(self.aggressive_idle_ms)
    }

    pub fn max_access_count(&self) -> u64 {
        self.max_access_count
    }

    pub fn memory_pressure_threshold(&self) -> f64 {
        self.memory_pressure_threshold
    }

    pub fn connection_memory_limit(&self) -> u64 {
        self.connection_memory_limit
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.enable_monitoring
    }

    pub fn leak_scan_interval(&self) -> Duration {
        Duration::from_millis(self.leak_scan_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// The settings a connection factory needs
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            storage_path: self.storage_path.clone(),
            max_connections: self.max_connections,
            connection_timeout_ms: self.connection_timeout_ms,
            max_idle_ms: self.max_idle_ms,
            max_lifetime_ms: self.max_lifetime_ms,
        }
    }

    /// Thresholds for the leak detector
    pub fn leak_thresholds(&self) -> LeakThresholds {
        LeakThresholds {
            max_idle_time: self.max_idle(),
            max_transaction_time: self.max_transaction_time(),
            max_access_count: self.max_access_count,
            connection_memory_limit: self.connection_memory_limit,
        }
    }

    /// Settings for the memory monitor
    pub fn monitor_config(&self) -> MemoryMonitorConfig {
        MemoryMonitorConfig::new(self.memory_pressure_threshold)
            .with_sample_interval_ms(self.memory_sample_interval_ms)
            .with_history_len(self.memory_history_len)
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - max_connections: 10, low_watermark: 2
    /// - connection_timeout: 30 seconds, probe_timeout: 5 seconds
    /// - max_idle: 5 minutes, max_lifetime: 30 minutes
    /// - max_transaction_time: 10 minutes, aggressive_idle: 1 minute
    /// - memory pressure at 85%, 50 MiB per connection
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            storage_path: store.storage_path,
            max_connections: store.max_connections,
            low_watermark: 2,
            connection_timeout_ms: store.connection_timeout_ms,
            probe_timeout_ms: 5_000,
            max_idle_ms: store.max_idle_ms,
            max_lifetime_ms: store.max_lifetime_ms,
            max_transaction_time_ms: 600_000,
            aggressive_idle_ms: 60_000,
            max_access_count: 1_000,
            memory_pressure_threshold: 0.85,
            connection_memory_limit: 50 * 1024 * 1024,
            enable_monitoring: true,
            leak_scan_interval_ms: 60_000,
            memory_sample_interval_ms: 30_000,
            cleanup_interval_ms: 120_000,
            memory_history_len: 120,
        }
    }
}
