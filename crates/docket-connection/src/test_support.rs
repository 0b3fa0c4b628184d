//! Mock connections shared by the unit tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docket_core::{
    Connection, ConnectionFactory, DocketError, QueryResult, Result, StatementResult, Value,
};
use parking_lot::Mutex;

use crate::pool::PoolConfig;

/// Connection that records every statement it is given
pub(crate) struct MockConnection {
    pub(crate) id: usize,
    closed: AtomicBool,
    statements: Mutex<Vec<String>>,
    fail_prefix: Mutex<Option<String>>,
    ping_fails: AtomicBool,
    ping_delay_ms: AtomicU64,
    footprint: AtomicU64,
    cache_clears: AtomicUsize,
    shrinks: AtomicUsize,
}

impl MockConnection {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            statements: Mutex::new(Vec::new()),
            fail_prefix: Mutex::new(None),
            ping_fails: AtomicBool::new(false),
            ping_delay_ms: AtomicU64::new(0),
            footprint: AtomicU64::new(0),
            cache_clears: AtomicUsize::new(0),
            shrinks: AtomicUsize::new(0),
        }
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Make every statement starting with `prefix` fail
    pub(crate) fn fail_on(&self, prefix: &str) {
        *self.fail_prefix.lock() = Some(prefix.to_string());
    }

    pub(crate) fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    /// Make every ping hang for `delay` before answering
    pub(crate) fn set_ping_delay(&self, delay: Duration) {
        self.ping_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_footprint(&self, bytes: u64) {
        self.footprint.store(bytes, Ordering::SeqCst);
    }

    pub(crate) fn cache_clears(&self) -> usize {
        self.cache_clears.load(Ordering::SeqCst)
    }

    pub(crate) fn shrinks(&self) -> usize {
        self.shrinks.load(Ordering::SeqCst)
    }

    fn run(&self, sql: &str) -> Result<()> {
        if self.is_closed() {
            return Err(DocketError::Connection("Connection is closed".into()));
        }
        self.statements.lock().push(sql.to_string());
        let fails = self
            .fail_prefix
            .lock()
            .as_deref()
            .is_some_and(|prefix| sql.starts_with(prefix));
        if fails {
            Err(DocketError::Query(format!("injected failure: {}", sql)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.run(sql)?;
        Ok(StatementResult::default())
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.run(sql)?;
        Ok(QueryResult::empty())
    }

    async fn ping(&self) -> Result<()> {
        let delay = self.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.is_closed() || self.ping_fails.load(Ordering::SeqCst) {
            Err(DocketError::Connection("ping failed".into()))
        } else {
            Ok(())
        }
    }

    async fn clear_statement_cache(&self) -> Result<()> {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shrink_memory(&self) -> Result<()> {
        self.shrinks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn memory_footprint(&self) -> u64 {
        self.footprint.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Factory that keeps a handle on every connection it opened
#[derive(Default)]
pub(crate) struct MockFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
    fail_create: AtomicBool,
    create_delay_ms: AtomicU64,
}

impl MockFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn count(&self) -> usize {
        self.created.lock().len()
    }

    /// The `n`th connection opened, starting at 0
    pub(crate) fn connection(&self, n: usize) -> Arc<MockConnection> {
        self.created.lock()[n].clone()
    }

    pub(crate) fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make opening a connection take `delay`
    pub(crate) fn set_create_delay(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DocketError::Connection("store unavailable".into()));
        }
        let mut created = self.created.lock();
        let conn = Arc::new(MockConnection::new(created.len()));
        created.push(conn.clone());
        Ok(conn)
    }
}

/// Small pool without monitoring and with a short acquire timeout
pub(crate) fn test_config() -> PoolConfig {
    PoolConfig::new(":memory:")
        .with_max_connections(2)
        .with_low_watermark(1)
        .with_connection_timeout_ms(100)
        .with_monitoring(false)
}

/// [`test_config`] with leak detection switched on
pub(crate) fn monitored_config() -> PoolConfig {
    test_config().with_monitoring(true)
}
