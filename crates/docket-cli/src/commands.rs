//! Subcommand implementations

pub mod check;
pub mod config;
pub mod memory;
pub mod soak;

use comfy_table::{Cell, Table, presets::UTF8_FULL};
use docket_connection::PoolStatistics;

/// Render pool statistics as a two-column table
pub fn statistics_table(stats: &PoolStatistics) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Statistic", "Value"]);

    let rows: Vec<(&str, String)> = vec![
        ("max connections", stats.max_connections.to_string()),
        ("active", stats.active.to_string()),
        ("idle", stats.idle.to_string()),
        ("opening", stats.opening.to_string()),
        ("waiting", stats.waiting.to_string()),
        ("utilization", format!("{:.0}%", stats.utilization() * 100.0)),
        ("created", stats.created.to_string()),
        ("reused", stats.reused.to_string()),
        ("expired", stats.expired.to_string()),
        ("invalidated", stats.invalidated.to_string()),
        ("force closed", stats.force_closed.to_string()),
        ("leaks detected", stats.leaks_detected.to_string()),
        ("exhausted", stats.exhausted.to_string()),
        ("under pressure", stats.under_pressure.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }

    if let Some(sample) = &stats.memory {
        table.add_row(vec![
            Cell::new("system memory"),
            Cell::new(format!("{:.1}%", sample.system_percent)),
        ]);
        table.add_row(vec![
            Cell::new("process memory"),
            Cell::new(format_bytes(sample.process_bytes)),
        ]);
    }
    table
}

/// Format a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MiB");
    }

    #[test]
    fn test_statistics_table_lists_counters() {
        let stats = PoolStatistics {
            max_connections: 4,
            active: 1,
            created: 3,
            ..PoolStatistics::default()
        };
        let rendered = statistics_table(&stats).to_string();
        assert!(rendered.contains("max connections"));
        assert!(rendered.contains("25%"));
        assert!(!rendered.contains("system memory"));
    }
}
