//! The facade business code talks to

use std::sync::Arc;

use docket_core::{Clock, ConnectionFactory, DocketError, Result};
use docket_monitor::MemoryMonitor;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::leak::{LeakAlert, LeakDetector};
use crate::pool::{ConnectionPool, MaintenanceHandle, PoolConfig, PoolStatistics, PooledConnection};


/// Entry point for repositories and services
///
/// Hands out connection and transaction scopes backed by a [`ConnectionPool`].
/// The connection is returned to the pool when the scope ends, whether the
/// closure succeeds, fails or panics.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
    maintenance: Arc<Mutex<Option<MaintenanceHandle>>>,
}

impl Database {
    pub fn builder(config: PoolConfig) -> DatabaseBuilder {
        DatabaseBuilder {
            config,
            factory: None,
            clock: None,
            monitor: None,
            detector: None,
        }
    }

    /// The underlying pool, for diagnostics and maintenance passes
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a connection from the pool
    pub async fn with_connection<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PooledConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DocketError>,
    {
        let mut conn = self.pool.acquire().await?;
        f(&mut conn).await
    }

    /// Run `f` inside a transaction on a connection from the pool
    ///
    /// Commits when `f` succeeds and rolls back when it fails. Scopes nest
    /// through [`PooledConnection::with_transaction`] inside `f`.
    pub async fn with_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PooledConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DocketError>,
    {
        let mut conn = self.pool.acquire().await?;
        conn.with_transaction(f).await
    }

    pub fn pool_statistics(&self) -> PoolStatistics {
        self.pool.statistics()
    }

    /// Be told about every suspected connection leak
    pub fn register_leak_callback(&self, callback: impl Fn(&LeakAlert) + Send + Sync + 'static) {
        self.pool.leak_detector().register_callback(callback);
    }

    /// Start leak scans, cleanup and memory sampling in the background
    ///
    /// Returns false if they are already running.
    pub fn start_maintenance(&self) -> bool {
        let mut maintenance = self.maintenance.lock();
        if maintenance.as_ref().is_some_and(MaintenanceHandle::is_running) {
            return false;
        }
        *maintenance = Some(self.pool.spawn_maintenance());
        true
    }

    /// Stop maintenance and close the pool
    pub async fn shutdown(&self) {
        let maintenance = self.maintenance.lock().take();
        if let Some(maintenance) = maintenance {
            maintenance.shutdown().await;
        }
        self.pool.close().await;
    }
}

/// Builder for a [`Database`]
pub struct DatabaseBuilder {
    config: PoolConfig,
    factory: Option<Arc<dyn ConnectionFactory>>,
    clock: Option<Arc<dyn Clock>>,
    monitor: Option<Arc<MemoryMonitor>>,
    detector: Option<LeakDetector>,
}

impl DatabaseBuilder {
    /// Open physical connections with `factory` (required)
    pub fn with_factory(mut self, factory: impl ConnectionFactory) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn with_shared_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this monitor instead of one reading the operating system
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_leak_detector(mut self, detector: LeakDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Validate the configuration and create the pool
    ///
    /// With monitoring enabled and no monitor given, one backed by the
    /// operating system is created. No connection is opened yet.
    pub fn build(self) -> Result<Database> {
        self.config.validate()?;

        let factory = self.factory.ok_or_else(|| {
            DocketError::Configuration("a connection factory is required".into())
        })?;

        let monitor = match self.monitor {
            Some(monitor) => Some(monitor),
            None if self.config.monitoring_enabled() => Some(Arc::new(
                MemoryMonitor::with_system_probe(self.config.monitor_config())?,
            )),
            None => None,
        };

        let mut builder = ConnectionPool::builder(self.config, factory);
        if let Some(clock) = self.clock {
            builder = builder.with_clock(clock);
        }
        if let Some(monitor) = monitor {
            builder = builder.with_memory_monitor(monitor);
        }
        if let Some(detector) = self.detector {
            builder = builder.with_leak_detector(detector);
        }

        Ok(Database {
            pool: builder.build(),
            maintenance: Arc::new(Mutex::new(None)),
        })
    }
}
