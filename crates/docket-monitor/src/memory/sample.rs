//! Memory sample types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw numbers read from a probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryReading {
    /// Memory in use system-wide, in bytes
    pub system_used_bytes: u64,
    /// Total system memory, in bytes
    pub system_total_bytes: u64,
    /// Resident memory of this process, in bytes
    pub process_bytes: u64,
}

impl MemoryReading {
    /// Build a reading from a system utilisation percentage.
    ///
    /// Mostly useful for fake probes, which think in percentages.
    pub fn from_percent(system_percent: f64, process_bytes: u64) -> Self {
        const TOTAL: u64 = 16 * 1024 * 1024 * 1024;
        let used = (TOTAL as f64 * (system_percent.clamp(0.0, 100.0) / 100.0)).round() as u64;
        Self {
            system_used_bytes: used,
            system_total_bytes: TOTAL,
            process_bytes,
        }
    }

    /// System memory utilisation as a percentage (0.0 to 100.0)
    ///
    /// Returns 0.0 if the total is unknown.
    pub fn system_percent(&self) -> f64 {
        if self.system_total_bytes == 0 {
            0.0
        } else {
            self.system_used_bytes as f64 / self.system_total_bytes as f64 * 100.0
        }
    }
}

/// Slack for comparing utilisation fractions, well under one byte in a terabyte
const FRACTION_TOLERANCE: f64 = 1e-9;

/// One timestamped memory reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    /// When the sample was taken
    pub taken_at: DateTime<Utc>,
    /// System memory utilisation, 0.0 to 100.0
    pub system_percent: f64,
    /// Resident memory of this process, in bytes
    pub process_bytes: u64,
    /// Memory in use system-wide, in bytes
    pub system_used_bytes: u64,
    /// Total system memory, in bytes
    pub system_total_bytes: u64,
}

impl MemorySample {
    /// Create a sample taken now
    pub fn new(system_percent: f64, process_bytes: u64) -> Self {
        Self::from_reading(MemoryReading::from_percent(system_percent, process_bytes))
    }

    /// Stamp a probe reading with the current time
    pub fn from_reading(reading: MemoryReading) -> Self {
        Self {
            taken_at: Utc::now(),
            system_percent: reading.system_percent(),
            process_bytes: reading.process_bytes,
            system_used_bytes: reading.system_used_bytes,
            system_total_bytes: reading.system_total_bytes,
        }
    }

    /// Override the timestamp
    pub fn with_taken_at(mut self, taken_at: DateTime<Utc>) -> Self {
        self.taken_at = taken_at;
        self
    }

    /// Whether this sample is at or above `threshold` (a fraction, 0.85 = 85%)
    ///
    /// Compares fractions so a reading of exactly the threshold counts even
    /// after floating-point rounding.
    pub fn exceeds(&self, threshold: f64) -> bool {
        self.system_percent / 100.0 + FRACTION_TOLERANCE >= threshold
    }
}

/// Change in memory use across a window of samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTrend {
    /// Number of samples in the window
    pub samples: usize,
    /// Last minus first system percentage
    pub system_percent_delta: f64,
    /// Last minus first process footprint, in bytes
    pub process_bytes_delta: i64,
    /// Highest system percentage seen in the window
    pub peak_system_percent: f64,
}

impl MemoryTrend {
    /// Whether process memory grew across the window
    pub fn is_growing(&self) -> bool {
        self.process_bytes_delta > 0
    }
}
