//! Sources of memory readings

use std::collections::VecDeque;
use std::sync::Arc;

use docket_core::{DocketError, Result};
use parking_lot::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

use super::sample::MemoryReading;

/// Something that can report current memory use
pub trait MemoryProbe: Send {
    /// Read current memory figures
    fn read(&mut self) -> Result<MemoryReading>;
}

/// Probe backed by the operating system through sysinfo
///
/// Refreshes only system memory and this process on each read.
pub struct SysinfoProbe {
    system: System,
    pid: sysinfo::Pid,
}

impl SysinfoProbe {
    /// Create a probe for the current process
    pub fn new() -> Result<Self> {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_processes(ProcessRefreshKind::nothing().with_memory()),
        );
        let pid = sysinfo::get_current_pid()
            .map_err(|e| DocketError::Monitor(format!("Failed to get current PID: {}", e)))?;

        Ok(Self { system, pid })
    }
}

impl MemoryProbe for SysinfoProbe {
    fn read(&mut self) -> Result<MemoryReading> {
        self.system.refresh_memory();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process_bytes = self
            .system
            .process(self.pid)
            .map(|process| process.memory())
            .ok_or_else(|| DocketError::Monitor("Current process not found".into()))?;

        Ok(MemoryReading {
            system_used_bytes: self.system.used_memory(),
            system_total_bytes: self.system.total_memory(),
            process_bytes,
        })
    }
}

/// Probe returning a reading that can be changed from outside
///
/// Clones share the same reading, so a test can keep one handle and hand the
/// other to a monitor.
#[derive(Clone, Default)]
pub struct FixedProbe {
    reading: Arc<Mutex<MemoryReading>>,
}

impl FixedProbe {
    /// Create a probe reporting the given system percentage
    pub fn new(system_percent: f64, process_bytes: u64) -> Self {
        Self {
            reading: Arc::new(Mutex::new(MemoryReading::from_percent(
                system_percent,
                process_bytes,
            ))),
        }
    }

    /// Change what the probe reports
    pub fn set(&self, system_percent: f64, process_bytes: u64) {
        *self.reading.lock() = MemoryReading::from_percent(system_percent, process_bytes);
    }
}

impl MemoryProbe for FixedProbe {
    fn read(&mut self) -> Result<MemoryReading> {
        Ok(*self.reading.lock())
    }
}

/// Probe that replays a fixed sequence of readings, repeating the last one
pub struct ScriptedProbe {
    readings: VecDeque<MemoryReading>,
    last: Option<MemoryReading>,
}

impl ScriptedProbe {
    /// Create a probe from system percentages (process bytes fixed at 0)
    pub fn from_percents(percents: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: percents
                .into_iter()
                .map(|p| MemoryReading::from_percent(p, 0))
                .collect(),
            last: None,
        }
    }
}

impl MemoryProbe for ScriptedProbe {
    fn read(&mut self) -> Result<MemoryReading> {
        if let Some(next) = self.readings.pop_front() {
            self.last = Some(next);
        }
        self.last
            .ok_or_else(|| DocketError::Monitor("Scripted probe has no readings".into()))
    }
}
