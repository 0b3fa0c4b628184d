//! SQLite connection implementation

use async_trait::async_trait;
use docket_core::{
    Connection, DocketError, QueryResult, Result, Row, StatementResult, StoreConfig, Value,
};
use parking_lot::Mutex;
use rusqlite::{Connection as RusqliteConnection, OpenFlags, ffi, params_from_iter};
use std::ffi::c_int;
use std::sync::atomic::{AtomicBool, Ordering};

/// Number of prepared statements kept per connection.
const STATEMENT_CACHE_CAPACITY: usize = 64;

/// SQLite connection wrapper
///
/// The rusqlite handle lives behind a mutex so that the pool's maintenance tasks can
/// roll back and close a stalled connection while its holder still has a reference.
pub struct SqliteConnection {
    conn: Mutex<Option<RusqliteConnection>>,
    closed: AtomicBool,
    path: String,
}

impl SqliteConnection {
    /// Open a SQLite database using the store configuration
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.storage_path.as_str();
        tracing::debug!(path = %path, "opening SQLite database");
        let expanded_path = Self::expand_path(path)?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if config.is_in_memory() {
            RusqliteConnection::open_in_memory().map_err(|e| {
                DocketError::Connection(format!("Failed to open in-memory database: {}", e))
            })?
        } else {
            if !expanded_path.starts_with("file:") {
                let file_path = std::path::Path::new(&expanded_path);
                if let Some(parent) = file_path.parent()
                    && !parent.exists()
                {
                    return Err(DocketError::Connection(format!(
                        "Parent directory does not exist: {}",
                        parent.display()
                    )));
                }
            }

            RusqliteConnection::open_with_flags(&expanded_path, flags).map_err(|e| {
                DocketError::Connection(format!(
                    "Failed to open SQLite database at '{}': {}",
                    expanded_path, e
                ))
            })?
        };

        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| {
            DocketError::Connection(format!("Failed to enable foreign keys: {}", e))
        })?;

        // WAL lets readers proceed while one pooled connection holds the write lock.
        if !config.is_in_memory() {
            conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| {
                DocketError::Connection(format!("Failed to set journal mode: {}", e))
            })?;
        }

        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            DocketError::Connection(format!("Failed to set synchronous mode: {}", e))
        })?;

        conn.busy_timeout(config.connection_timeout())
            .map_err(|e| DocketError::Connection(format!("Failed to set busy timeout: {}", e)))?;

        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

        tracing::debug!(path = %expanded_path, "SQLite database connection established");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
            path: expanded_path,
        })
    }

    /// Expand path to handle ~ (home directory) and relative paths
    fn expand_path(path: &str) -> Result<String> {
        if path == ":memory:" || path.starts_with("file:") {
            return Ok(path.to_string());
        }

        let expanded = if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let home_path = std::path::PathBuf::from(home);
                home_path.join(rest).to_string_lossy().to_string()
            } else {
                return Err(DocketError::Configuration(
                    "Unable to determine HOME directory".into(),
                ));
            }
        } else if path.starts_with('~') {
            return Err(DocketError::Configuration(
                "User-specific home directories (~user) are not supported".into(),
            ));
        } else {
            path.to_string()
        };

        let path_buf = std::path::PathBuf::from(&expanded);
        let result = if path_buf.is_relative() {
            std::env::current_dir()
                .map_err(DocketError::Io)?
                .join(path_buf)
                .to_string_lossy()
                .to_string()
        } else {
            expanded
        };

        Ok(result)
    }

    /// Resolved path of the database file
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run `f` against the open rusqlite handle
    fn with_conn<T>(&self, f: impl FnOnce(&RusqliteConnection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(DocketError::Connection("Connection is closed".into())),
        }
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let rusqlite_params = values_to_rusqlite(params);

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(sql)
                .map_err(|e| DocketError::Query(format!("Failed to prepare statement: {}", e)))?;
            let rows_affected = stmt
                .execute(params_from_iter(rusqlite_params.iter()))
                .map_err(|e| DocketError::Query(format!("Failed to execute statement: {}", e)))?;

            tracing::trace!(affected_rows = rows_affected, "statement executed");
            Ok(StatementResult {
                affected_rows: rows_affected as u64,
                last_insert_id: Some(conn.last_insert_rowid()).filter(|id| *id != 0),
            })
        })
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let start_time = std::time::Instant::now();
        let rusqlite_params = values_to_rusqlite(params);

        let (columns, rows) = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(sql)
                .map_err(|e| DocketError::Query(format!("Failed to prepare query: {}", e)))?;

            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(|name| name.to_string())
                .collect();

            let mut rows = Vec::new();
            let mut query_rows = stmt
                .query(params_from_iter(rusqlite_params.iter()))
                .map_err(|e| DocketError::Query(format!("Failed to execute query: {}", e)))?;

            while let Some(row) = query_rows
                .next()
                .map_err(|e| DocketError::Query(format!("Failed to fetch row: {}", e)))?
            {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    values.push(rusqlite_to_value(row, i)?);
                }
                rows.push(Row::new(columns.clone(), values));
            }

            Ok((columns, rows))
        })?;

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        tracing::trace!(
            row_count = rows.len(),
            execution_time_ms = execution_time_ms,
            "query executed successfully"
        );
        Ok(QueryResult {
            id: uuid::Uuid::new_v4(),
            columns,
            rows,
            execution_time_ms,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| DocketError::Connection(format!("Ping failed: {}", e)))
        })
    }

    async fn clear_statement_cache(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.flush_prepared_statement_cache();
            Ok(())
        })
    }

    async fn shrink_memory(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA shrink_memory")
                .map_err(|e| DocketError::Query(format!("Failed to shrink memory: {}", e)))
        })
    }

    /// Heap held by this connection's page cache and prepared statements
    ///
    /// Rows already handed to callers are theirs and are not counted.
    fn memory_footprint(&self) -> u64 {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return 0;
        };
        db_status(conn, ffi::SQLITE_DBSTATUS_CACHE_USED as c_int)
            + db_status(conn, ffi::SQLITE_DBSTATUS_STMT_USED as c_int)
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        self.closed.store(true, Ordering::SeqCst);
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| {
                DocketError::Connection(format!("Failed to close SQLite connection: {}", e))
            }),
            None => Ok(()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Convert our Value types to rusqlite-compatible types
fn values_to_rusqlite(values: &[Value]) -> Vec<rusqlite::types::Value> {
    values.iter().map(value_to_rusqlite).collect()
}

fn value_to_rusqlite(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Int64(i) => rusqlite::types::Value::Integer(*i),
        Value::Float64(f) => rusqlite::types::Value::Real(*f),
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::DateTimeUtc(dt) => rusqlite::types::Value::Text(dt.to_rfc3339()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

/// Convert rusqlite row value to our Value type
fn rusqlite_to_value(row: &rusqlite::Row, idx: usize) -> Result<Value> {
    use rusqlite::types::ValueRef;

    let value_ref = row
        .get_ref(idx)
        .map_err(|e| DocketError::Query(e.to_string()))?;

    let value = match value_ref {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    };

    Ok(value)
}

/// Current value of one `sqlite3_db_status` counter, 0 if SQLite refuses it
fn db_status(conn: &RusqliteConnection, op: c_int) -> u64 {
    let mut current: c_int = 0;
    let mut highwater: c_int = 0;
    // SAFETY: the handle stays valid while `conn` is borrowed, and both
    // out-pointers refer to live locals.
    let rc = unsafe { ffi::sqlite3_db_status(conn.handle(), op, &mut current, &mut highwater, 0) };
    if rc == ffi::SQLITE_OK as c_int {
        current.max(0) as u64
    } else {
        0
    }
}
