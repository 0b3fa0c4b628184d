//! `docket memory`: sample memory the way the pool's monitor does

use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use docket_connection::PoolConfig;
use docket_monitor::{MemoryMonitor, MemorySample, MemoryTrend};
use serde::Serialize;

use super::format_bytes;

#[derive(Debug, Serialize)]
struct MemoryReport {
    pressure_threshold: f64,
    under_pressure: bool,
    samples: Vec<MemorySample>,
    trend: Option<MemoryTrend>,
}

pub async fn run(config: &PoolConfig, samples: usize, interval: Duration, json: bool) -> Result<()> {
    let monitor = MemoryMonitor::with_system_probe(config.monitor_config())
        .context("cannot read system memory")?;

    let samples = samples.max(1);
    for taken in 0..samples {
        monitor.sample().context("memory sample failed")?;
        if taken + 1 < samples {
            tokio::time::sleep(interval).await;
        }
    }

    let history = monitor.history();
    let window = interval.saturating_mul(samples as u32);
    let report = MemoryReport {
        pressure_threshold: config.memory_pressure_threshold(),
        under_pressure: monitor.under_pressure(),
        trend: monitor.trend(window),
        samples: history,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Taken at", "System", "Process"]);
    for sample in &report.samples {
        table.add_row(vec![
            sample.taken_at.format("%H:%M:%S%.3f").to_string(),
            format!("{:.1}%", sample.system_percent),
            format_bytes(sample.process_bytes),
        ]);
    }
    println!("{table}");

    println!(
        "pressure threshold {:.0}%, under pressure: {}",
        report.pressure_threshold * 100.0,
        report.under_pressure
    );
    match &report.trend {
        Some(trend) => println!(
            "trend over {} samples: system {:+.2}%, process {:+} bytes, peak {:.1}%",
            trend.samples,
            trend.system_percent_delta,
            trend.process_bytes_delta,
            trend.peak_system_percent
        ),
        None => println!("trend: not enough samples"),
    }
    Ok(())
}
