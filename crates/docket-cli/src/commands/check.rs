//! `docket check`: open the store, probe it and report pool state

use std::time::Instant;

use anyhow::{Context, Result};
use comfy_table::{Table, presets::UTF8_FULL};
use docket_connection::{PoolConfig, PoolStatistics, PooledConnection};
use docket_core::{DocketError, Value};
use serde::Serialize;

use super::{format_bytes, statistics_table};
use crate::store::open_sqlite;

#[derive(Debug, Serialize)]
struct CheckReport {
    storage_path: String,
    sqlite_version: String,
    journal_mode: String,
    foreign_keys: bool,
    file_size_bytes: i64,
    round_trip_ms: u128,
    statistics: PoolStatistics,
}

/// What the store reports about itself through a pooled connection
#[derive(Debug, Clone, PartialEq)]
struct StoreInfo {
    sqlite_version: String,
    journal_mode: String,
    foreign_keys: bool,
    file_size_bytes: i64,
}

async fn pragma(conn: &PooledConnection, sql: &str) -> std::result::Result<Value, DocketError> {
    let result = conn.query(sql, &[]).await?;
    Ok(result.scalar().cloned().unwrap_or(Value::Null))
}

async fn read_store_info(conn: &PooledConnection) -> std::result::Result<StoreInfo, DocketError> {
    let sqlite_version = pragma(conn, "SELECT sqlite_version()").await?;
    let journal_mode = pragma(conn, "PRAGMA journal_mode").await?;
    let foreign_keys = pragma(conn, "PRAGMA foreign_keys").await?;
    let page_count = pragma(conn, "PRAGMA page_count").await?;
    let page_size = pragma(conn, "PRAGMA page_size").await?;

    Ok(StoreInfo {
        sqlite_version: sqlite_version.as_str().unwrap_or("unknown").to_string(),
        journal_mode: journal_mode.as_str().unwrap_or("unknown").to_string(),
        foreign_keys: foreign_keys.as_i64() == Some(1),
        file_size_bytes: page_count.as_i64().unwrap_or_default()
            * page_size.as_i64().unwrap_or_default(),
    })
}

pub async fn run(config: PoolConfig, json: bool) -> Result<()> {
    let storage_path = config.storage_path().to_string();
    let database = open_sqlite(config)?;

    let started = Instant::now();
    let info = database
        .with_connection(|conn| Box::pin(async move { read_store_info(conn).await }))
        .await
        .with_context(|| format!("cannot read {}", storage_path))?;
    let round_trip = started.elapsed();
    tracing::info!(path = %storage_path, round_trip_ms = round_trip.as_millis(), "store reachable");

    let report = CheckReport {
        storage_path,
        sqlite_version: info.sqlite_version,
        journal_mode: info.journal_mode,
        foreign_keys: info.foreign_keys,
        file_size_bytes: info.file_size_bytes,
        round_trip_ms: round_trip.as_millis(),
        statistics: database.pool_statistics(),
    };
    database.shutdown().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Store", "Value"]);
    table.add_row(vec!["path".to_string(), report.storage_path.clone()]);
    table.add_row(vec!["sqlite".to_string(), report.sqlite_version.clone()]);
    table.add_row(vec!["journal mode".to_string(), report.journal_mode.clone()]);
    table.add_row(vec!["foreign keys".to_string(), report.foreign_keys.to_string()]);
    table.add_row(vec![
        "file size".to_string(),
        format_bytes(report.file_size_bytes.max(0) as u64),
    ]);
    table.add_row(vec!["round trip".to_string(), format!("{} ms", report.round_trip_ms)]);
    println!("{table}");
    println!("{}", statistics_table(&report.statistics));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_store_info_comes_from_the_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PoolConfig::new(dir.path().join("check.db").to_string_lossy())
            .with_max_connections(1)
            .with_low_watermark(1)
            .with_monitoring(false);
        let database = open_sqlite(config).expect("open");

        let info = database
            .with_connection(|conn| {
                Box::pin(async move {
                    conn.execute("CREATE TABLE filings (id INTEGER PRIMARY KEY)", &[])
                        .await?;
                    read_store_info(conn).await
                })
            })
            .await
            .expect("store info");

        assert_eq!(info.journal_mode.to_lowercase(), "wal");
        assert!(info.foreign_keys);
        assert!(info.file_size_bytes > 0);
        assert_ne!(info.sqlite_version, "unknown");

        let stats = database.pool_statistics();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.idle, 1);
        database.shutdown().await;
    }
}
