//! `docket soak`: concurrent nested-transaction workload
//!
//! Each worker files documents with citations. Every `fail_every`-th filing
//! fails inside the nested scope, which must discard the whole filing.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use docket_connection::{Database, PoolStatistics};
use docket_core::{DocketError, Value};
use serde::Serialize;

use super::statistics_table;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        filed_by INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS citations (
        id INTEGER PRIMARY KEY,
        document_id INTEGER NOT NULL REFERENCES documents(id),
        cites TEXT NOT NULL
    )",
];

/// Workload shape
#[derive(Debug, Clone, Copy)]
pub struct SoakOptions {
    pub workers: usize,
    pub iterations: usize,
    /// Fail every n-th filing in its nested scope, 0 to never fail
    pub fail_every: usize,
    /// Pause between filings, to let maintenance run
    pub pause: Duration,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SoakReport {
    pub committed: usize,
    /// Filings rolled back as a whole after a nested failure
    pub aborted: usize,
    /// Filings that failed for any other reason
    pub failed: usize,
    pub elapsed_ms: u128,
    pub statistics: PoolStatistics,
}

#[derive(Debug, Default)]
struct WorkerTally {
    committed: usize,
    aborted: usize,
    failed: usize,
}

/// Run the workload against `database` and report the outcome
pub async fn execute(database: &Database, options: SoakOptions) -> Result<SoakReport> {
    database
        .with_connection(|conn| {
            Box::pin(async move {
                for statement in SCHEMA {
                    conn.execute(statement, &[]).await?;
                }
                Ok::<_, DocketError>(())
            })
        })
        .await
        .context("failed to create soak schema")?;

    let started = Instant::now();
    let workers = (0..options.workers.max(1)).map(|worker| {
        let database = database.clone();
        tokio::spawn(async move { run_worker(database, worker, options).await })
    });

    let mut report = SoakReport::default();
    for outcome in futures::future::join_all(workers).await {
        let tally = outcome.context("soak worker panicked")?;
        report.committed += tally.committed;
        report.aborted += tally.aborted;
        report.failed += tally.failed;
    }
    report.elapsed_ms = started.elapsed().as_millis();
    report.statistics = database.pool_statistics();

    tracing::info!(
        committed = report.committed,
        aborted = report.aborted,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "soak finished"
    );
    Ok(report)
}

async fn run_worker(database: Database, worker: usize, options: SoakOptions) -> WorkerTally {
    let mut tally = WorkerTally::default();

    for iteration in 0..options.iterations {
        let fail = options.fail_every > 0 && (iteration + 1) % options.fail_every == 0;
        match file_document(&database, worker, iteration, fail).await {
            Ok(()) => tally.committed += 1,
            Err(DocketError::Query(msg)) if fail => {
                tracing::debug!(worker, iteration, error = %msg, "filing rolled back");
                tally.aborted += 1;
            }
            Err(e) => {
                tracing::warn!(worker, iteration, error = %e, "filing failed");
                tally.failed += 1;
            }
        }
        if !options.pause.is_zero() {
            tokio::time::sleep(options.pause).await;
        }
    }
    tally
}

async fn file_document(
    database: &Database,
    worker: usize,
    iteration: usize,
    fail: bool,
) -> std::result::Result<(), DocketError> {
    let title = format!("worker {worker} filing {iteration}");
    database
        .with_transaction(|conn| {
            Box::pin(async move {
                let filed = conn
                    .execute(
                        "INSERT INTO documents (title, filed_by) VALUES (?, ?)",
                        &[title.into(), Value::Int64(worker as i64)],
                    )
                    .await?;
                let document_id = filed.last_insert_id.unwrap_or_default();

                conn.with_transaction(|conn| {
                    Box::pin(async move {
                        conn.execute(
                            "INSERT INTO citations (document_id, cites) VALUES (?, ?)",
                            &[Value::Int64(document_id), "28 U.S.C. § 1331".into()],
                        )
                        .await?;
                        if fail {
                            conn.execute("INSERT INTO no_such_table VALUES (1)", &[])
                                .await?;
                        }
                        Ok::<_, DocketError>(())
                    })
                })
                .await
            })
        })
        .await
}

pub async fn run(database: Database, options: SoakOptions, json: bool) -> Result<()> {
    let maintenance = database.start_maintenance();
    tracing::debug!(maintenance, "background maintenance started");

    let report = execute(&database, options).await;
    database.shutdown().await;
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "committed {}, rolled back {}, failed {} in {} ms",
            report.committed, report.aborted, report.failed, report.elapsed_ms
        );
        println!("{}", statistics_table(&report.statistics));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_sqlite;
    use docket_connection::PoolConfig;
    use pretty_assertions::assert_eq;

    async fn count(database: &Database, sql: &'static str) -> i64 {
        database
            .with_connection(|conn| Box::pin(async move { conn.query(sql, &[]).await }))
            .await
            .expect("count")
            .scalar()
            .and_then(Value::as_i64)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_failed_filings_leave_no_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PoolConfig::new(dir.path().join("soak.db").to_string_lossy())
            .with_max_connections(2)
            .with_low_watermark(1)
            .with_monitoring(false);
        let database = open_sqlite(config).expect("open");

        let report = execute(
            &database,
            SoakOptions {
                workers: 3,
                iterations: 6,
                fail_every: 3,
                pause: Duration::ZERO,
            },
        )
        .await
        .expect("soak");

        assert_eq!(report.committed, 12);
        assert_eq!(report.aborted, 6);
        assert_eq!(report.failed, 0);
        assert!(report.statistics.created <= 2);
        assert_eq!(report.statistics.active, 0);

        assert_eq!(count(&database, "SELECT COUNT(*) FROM documents").await, 12);
        assert_eq!(count(&database, "SELECT COUNT(*) FROM citations").await, 12);
        database.shutdown().await;
    }
}
