//! Connection factory used by the pool to open SQLite connections

use async_trait::async_trait;
use docket_core::{Connection, ConnectionFactory, DocketError, Result, StoreConfig};
use std::sync::Arc;

use crate::SqliteConnection;

/// Opens physical SQLite connections for the pool
pub struct SqliteConnectionFactory {
    config: StoreConfig,
}

impl SqliteConnectionFactory {
    /// Create a factory for the given store
    pub fn new(config: StoreConfig) -> Self {
        tracing::debug!(path = %config.storage_path, "SQLite connection factory initialized");
        Self { config }
    }

    /// Get the store configuration
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    #[tracing::instrument(skip(self), fields(path = %self.config.storage_path))]
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = SqliteConnection::open(&self.config).map_err(|e| {
            tracing::error!(error = %e, "failed to open SQLite connection");
            match e {
                DocketError::Connection(_) | DocketError::Configuration(_) => e,
                other => DocketError::Connection(format!(
                    "Failed to connect to SQLite database: {}",
                    other
                )),
            }
        })?;

        Ok(Arc::new(conn))
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        if conn.is_closed() {
            return false;
        }
        match conn.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "SQLite liveness probe failed");
                false
            }
        }
    }
}
