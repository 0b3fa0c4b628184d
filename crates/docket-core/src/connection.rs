//! Connection and factory traits

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;
use std::sync::Arc;

/// A single physical connection to the embedded store.
///
/// Implementations must tolerate being called from the pool's maintenance tasks while a
/// holder also uses the connection (forced rollback on a stalled transaction), so all
/// methods take `&self` and synchronise internally.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "sqlite")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data (INSERT/UPDATE/DELETE) or a control
    /// statement such as `BEGIN` or `SAVEPOINT`
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows (SELECT)
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Lightweight liveness check
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    /// Drop cached prepared statements, releasing any statement-level locks they hold
    async fn clear_statement_cache(&self) -> Result<()> {
        Ok(())
    }

    /// Ask the store to give back as much heap memory as it can
    async fn shrink_memory(&self) -> Result<()> {
        Ok(())
    }

    /// Estimated memory held on behalf of this connection, in bytes
    fn memory_footprint(&self) -> u64 {
        0
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// Factory for opening new physical connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that a connection is still usable
    ///
    /// Default implementation rejects closed connections and pings the rest.
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed() && conn.ping().await.is_ok()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }
}
