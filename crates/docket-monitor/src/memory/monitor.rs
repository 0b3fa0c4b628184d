//! Memory monitor with bounded history and pressure notifications

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use docket_core::Result;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::probe::{MemoryProbe, SysinfoProbe};
use super::sample::{MemorySample, MemoryTrend};

/// Configuration for memory monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMonitorConfig {
    /// System memory fraction at or above which the process is under pressure
    pub pressure_threshold: f64,
    /// Interval between samples, in milliseconds
    pub sample_interval_ms: u64,
    /// Number of samples kept in the history ring buffer
    pub history_len: usize,
}

impl MemoryMonitorConfig {
    /// Create a configuration with the given pressure threshold
    pub fn new(pressure_threshold: f64) -> Self {
        Self {
            pressure_threshold,
            ..Self::default()
        }
    }

    /// Set the sampling interval in milliseconds
    pub fn with_sample_interval_ms(mut self, interval_ms: u64) -> Self {
        self.sample_interval_ms = interval_ms;
        self
    }

    /// Set how many samples are kept
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len.max(1);
        self
    }

    /// Get the sampling interval as a Duration
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for MemoryMonitorConfig {
    /// Defaults: 85% threshold, 30 second interval, one hour of history
    fn default() -> Self {
        Self {
            pressure_threshold: 0.85,
            sample_interval_ms: 30_000,
            history_len: 120,
        }
    }
}

/// Samples memory and tracks pressure.
///
/// The monitor knows nothing about the pool. Consumers either ask
/// `under_pressure()` or subscribe to pressure transitions.
pub struct MemoryMonitor {
    config: MemoryMonitorConfig,
    probe: Mutex<Box<dyn MemoryProbe>>,
    history: RwLock<VecDeque<MemorySample>>,
    pressure_tx: watch::Sender<bool>,
}

impl MemoryMonitor {
    /// Create a monitor reading from the given probe
    pub fn new(config: MemoryMonitorConfig, probe: impl MemoryProbe + 'static) -> Self {
        let (pressure_tx, _) = watch::channel(false);
        let capacity = config.history_len.max(1);
        Self {
            config,
            probe: Mutex::new(Box::new(probe)),
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            pressure_tx,
        }
    }

    /// Create a monitor reading real process and system memory
    pub fn with_system_probe(config: MemoryMonitorConfig) -> Result<Self> {
        Ok(Self::new(config, SysinfoProbe::new()?))
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryMonitorConfig {
        &self.config
    }

    /// Take a sample from the probe and record it
    pub fn sample(&self) -> Result<MemorySample> {
        let reading = self.probe.lock().read()?;
        let sample = MemorySample::from_reading(reading);
        self.record(sample.clone());
        Ok(sample)
    }

    /// Record a sample taken elsewhere
    pub fn record(&self, sample: MemorySample) {
        let pressure = sample.exceeds(self.config.pressure_threshold);
        let system_percent = sample.system_percent;

        {
            let mut history = self.history.write();
            if history.len() >= self.config.history_len.max(1) {
                history.pop_front();
            }
            history.push_back(sample);
        }

        let changed = self.pressure_tx.send_if_modified(|current| {
            if *current != pressure {
                *current = pressure;
                true
            } else {
                false
            }
        });

        if changed && pressure {
            tracing::warn!(
                system_percent = system_percent,
                threshold = self.config.pressure_threshold,
                "memory pressure detected"
            );
        } else if changed {
            tracing::info!(
                system_percent = system_percent,
                "memory pressure subsided"
            );
        }
    }

    /// Whether the most recent sample is at or above the threshold
    ///
    /// False until the first sample is recorded.
    pub fn under_pressure(&self) -> bool {
        self.history
            .read()
            .back()
            .is_some_and(|sample| sample.exceeds(self.config.pressure_threshold))
    }

    /// The most recent sample
    pub fn latest(&self) -> Option<MemorySample> {
        self.history.read().back().cloned()
    }

    /// All retained samples, oldest first
    pub fn history(&self) -> Vec<MemorySample> {
        self.history.read().iter().cloned().collect()
    }

    /// Change in memory use over the samples taken within `window` of the latest one
    ///
    /// Returns None when fewer than two samples fall inside the window.
    pub fn trend(&self, window: Duration) -> Option<MemoryTrend> {
        let history = self.history.read();
        let latest = history.back()?;

        let in_window: Vec<&MemorySample> = history
            .iter()
            .filter(|sample| {
                latest
                    .taken_at
                    .signed_duration_since(sample.taken_at)
                    .to_std()
                    .is_ok_and(|age| age <= window)
            })
            .collect();

        let (first, last) = match in_window.as_slice() {
            [first, .., last] => (*first, *last),
            _ => return None,
        };

        let peak_system_percent = in_window
            .iter()
            .map(|sample| sample.system_percent)
            .fold(f64::MIN, f64::max);

        Some(MemoryTrend {
            samples: in_window.len(),
            system_percent_delta: last.system_percent - first.system_percent,
            process_bytes_delta: last.process_bytes as i64 - first.process_bytes as i64,
            peak_system_percent,
        })
    }

    /// Receive pressure transitions
    ///
    /// The receiver holds `true` while the process is under pressure.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.pressure_tx.subscribe()
    }
}

/// Sample `monitor` on its configured interval until `token` is cancelled.
pub fn spawn_sampler(monitor: Arc<MemoryMonitor>, token: CancellationToken) -> JoinHandle<()> {
    let period = monitor.config().sample_interval().max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("memory sampler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = monitor.sample() {
                        tracing::warn!(error = %e, "memory sample failed");
                    }
                }
            }
        }
    })
}
