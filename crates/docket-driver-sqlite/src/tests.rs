//! Tests for SQLite connections

use docket_core::{Connection, ConnectionFactory, StoreConfig, Value};
use tempfile::TempDir;

use crate::{SqliteConnection, SqliteConnectionFactory};

fn temp_store() -> (TempDir, StoreConfig) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("docket.db");
    let config = StoreConfig::new(path.to_string_lossy().to_string());
    (dir, config)
}

#[tokio::test]
async fn test_open_and_ping() {
    let (_dir, config) = temp_store();
    let conn = SqliteConnection::open(&config).expect("open");
    assert_eq!(conn.driver_name(), "sqlite");
    conn.ping().await.expect("ping");

    let journal_mode = conn.query("PRAGMA journal_mode", &[]).await.expect("journal mode");
    assert_eq!(
        journal_mode.scalar().and_then(Value::as_str).map(str::to_lowercase),
        Some("wal".to_string())
    );
    let foreign_keys = conn.query("PRAGMA foreign_keys", &[]).await.expect("foreign keys");
    assert_eq!(foreign_keys.scalar().and_then(Value::as_i64), Some(1));
}

#[tokio::test]
async fn test_open_rejects_missing_parent_directory() {
    let config = StoreConfig::new("/definitely/not/a/real/dir/docket.db");
    let result = SqliteConnection::open(&config);
    assert!(result.is_err());
    assert!(result.err().unwrap().to_string().contains("Parent directory"));
}

#[tokio::test]
async fn test_execute_and_query_round_trip() {
    let (_dir, config) = temp_store();
    let conn = SqliteConnection::open(&config).expect("open");

    conn.execute(
        "CREATE TABLE documents (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
        &[],
    )
    .await
    .expect("create");
    let inserted = conn
        .execute(
            "INSERT INTO documents (title) VALUES (?1)",
            &[Value::from("Marbury v. Madison")],
        )
        .await
        .expect("insert");
    assert_eq!(inserted.affected_rows, 1);
    assert_eq!(inserted.last_insert_id, Some(1));

    let result = conn
        .query("SELECT id, title FROM documents", &[])
        .await
        .expect("select");
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.columns, vec!["id".to_string(), "title".to_string()]);
    assert_eq!(
        result.rows[0].get_by_name("title").and_then(Value::as_str),
        Some("Marbury v. Madison")
    );
}

#[tokio::test]
async fn test_memory_footprint_ignores_rows_handed_out() {
    let (_dir, config) = temp_store();
    let conn = SqliteConnection::open(&config).expect("open");

    for _ in 0..32 {
        let result = conn
            .query("SELECT zeroblob(1048576)", &[])
            .await
            .expect("select blob");
        assert_eq!(result.row_count(), 1);
    }
    // 32 MiB went through the connection; only its caches count
    let held = conn.memory_footprint();
    assert!(held < 8 * 1024 * 1024, "footprint {held}");

    conn.clear_statement_cache().await.expect("clear cache");
    conn.shrink_memory().await.expect("shrink");
    assert!(conn.memory_footprint() <= held);

    conn.close().await.expect("close");
    assert_eq!(conn.memory_footprint(), 0);
}

#[tokio::test]
async fn test_savepoint_statements_execute() {
    let (_dir, config) = temp_store();
    let conn = SqliteConnection::open(&config).expect("open");
    conn.execute("CREATE TABLE t (v INTEGER)", &[]).await.expect("create");

    conn.execute(docket_core::BEGIN_SQL, &[]).await.expect("begin");
    conn.execute("INSERT INTO t VALUES (1)", &[]).await.expect("insert 1");
    let sp = docket_core::Savepoint::for_depth(2);
    conn.execute(&sp.create_sql(), &[]).await.expect("savepoint");
    conn.execute("INSERT INTO t VALUES (2)", &[]).await.expect("insert 2");
    conn.execute(&sp.rollback_to_sql(), &[]).await.expect("rollback to");
    conn.execute(&sp.release_sql(), &[]).await.expect("release");
    conn.execute(docket_core::COMMIT_SQL, &[]).await.expect("commit");

    let count = conn.query("SELECT COUNT(*) FROM t", &[]).await.expect("count");
    assert_eq!(count.scalar().and_then(Value::as_i64), Some(1));
}

#[tokio::test]
async fn test_close_marks_connection_closed() {
    let (_dir, config) = temp_store();
    let conn = SqliteConnection::open(&config).expect("open");
    conn.close().await.expect("close");
    assert!(conn.is_closed());
    assert!(conn.ping().await.is_err());
    // Closing twice is a no-op
    conn.close().await.expect("second close");
}

#[tokio::test]
async fn test_factory_validate_rejects_closed_connection() {
    let (_dir, config) = temp_store();
    let factory = SqliteConnectionFactory::new(config);
    let conn = factory.create().await.expect("create");
    assert!(factory.validate(&*conn).await);

    conn.close().await.expect("close");
    assert!(!factory.validate(&*conn).await);
}
