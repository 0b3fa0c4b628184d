//! The guard handed out by the pool

use std::sync::Arc;

use docket_core::{DocketError, QueryResult, Result, StatementResult, Value};
use futures::future::BoxFuture;

use super::info::{ConnectionId, ConnectionInfo};
use super::pool::{ConnectionSlot, PoolInner};
use crate::transaction::{TransactionManager, TransactionState};

/// A connection borrowed from the pool
///
/// Carries its own [`TransactionManager`], so nesting depth is per checkout.
/// When dropped the connection goes back to the pool; if a transaction is
/// still open it is rolled back and the connection is closed instead.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    slot: Arc<ConnectionSlot>,
    tx: TransactionManager,
}

impl PooledConnection {
    pub(crate) fn new(pool: Arc<PoolInner>, slot: Arc<ConnectionSlot>) -> Self {
        Self {
            pool,
            slot,
            tx: TransactionManager::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.slot.id
    }

    /// Copy of this connection's usage record
    pub fn info(&self) -> ConnectionInfo {
        self.slot.info.lock().clone()
    }

    pub fn driver_name(&self) -> &str {
        self.slot.connection.driver_name()
    }

    pub fn transaction_depth(&self) -> usize {
        self.tx.depth()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.tx.state()
    }

    /// Whether the pool has force-closed this connection
    pub fn is_revoked(&self) -> bool {
        self.slot.is_revoked()
    }

    /// Execute a statement that modifies data
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_usable()?;
        self.touch();
        let result = self.slot.connection.execute(sql, params).await;
        self.map_revoked(result)
    }

    /// Execute a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_usable()?;
        self.touch();
        let result = self.slot.connection.query(sql, params).await;
        self.map_revoked(result)
    }

    /// Open a transaction or a nested savepoint. Returns the new depth.
    pub async fn begin(&mut self) -> Result<usize> {
        self.ensure_usable()?;
        let result = self.tx.begin(self.slot.connection.as_ref()).await;
        self.sync_depth();
        self.map_revoked(result)
    }

    /// Commit the innermost scope. Returns the remaining depth.
    pub async fn commit(&mut self) -> Result<usize> {
        self.ensure_usable()?;
        let result = self.tx.commit(self.slot.connection.as_ref()).await;
        self.sync_depth();
        self.map_revoked(result)
    }

    /// Roll back the innermost scope. Returns the remaining depth.
    pub async fn rollback(&mut self) -> Result<usize> {
        self.ensure_usable()?;
        let result = self.tx.rollback(self.slot.connection.as_ref()).await;
        self.sync_depth();
        self.map_revoked(result)
    }

    /// Run `f` inside a transaction scope
    ///
    /// At depth 0 this is a real transaction, deeper it is a savepoint. When `f`
    /// succeeds the scope commits. When `f` fails the whole transaction is rolled
    /// back, at every depth, and enclosing scopes get `TransactionAborted` if they
    /// try to go on. The outermost scope leaves the connection clean again.
    ///
    /// ```ignore
    /// conn.with_transaction(|conn| Box::pin(async move {
    ///     conn.execute("INSERT INTO documents (title) VALUES (?)", &["Marbury".into()]).await?;
    ///     conn.with_transaction(|conn| Box::pin(async move {
    ///         conn.execute("INSERT INTO citations (doc_id) VALUES (1)", &[]).await
    ///     })).await?;
    ///     Ok::<_, DocketError>(())
    /// })).await?;
    /// ```
    pub async fn with_transaction<T, E, F>(&mut self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PooledConnection) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<DocketError>,
    {
        let level = self.begin().await?;

        match f(self).await {
            Ok(value) => {
                if self.tx.is_aborted() {
                    // An inner scope failed and the error was swallowed.
                    self.end_aborted_scope(level);
                    return Err(DocketError::TransactionAborted.into());
                }
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if !self.tx.is_aborted()
                    && let Err(abort_err) = self.abort().await
                {
                    self.end_aborted_scope(level);
                    return Err(abort_err.into());
                }
                self.end_aborted_scope(level);
                Err(err)
            }
        }
    }

    /// Roll back everything on the error path
    async fn abort(&mut self) -> Result<()> {
        if self.slot.is_revoked() {
            self.tx.invalidate();
            self.sync_depth();
            return Ok(());
        }
        let result = self.tx.abort(self.slot.connection.as_ref()).await;
        self.sync_depth();
        result
    }

    fn end_aborted_scope(&mut self, level: usize) {
        if level == 1 && self.tx.clear_aborted() {
            tracing::debug!(connection_id = %self.slot.id, "aborted transaction cleared");
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.slot.is_revoked() {
            return Err(self.revoked_error());
        }
        if self.tx.is_broken() {
            return Err(DocketError::TransactionIntegrity(format!(
                "connection {} is in an unknown transaction state",
                self.slot.id
            )));
        }
        if self.tx.is_aborted() {
            return Err(DocketError::TransactionAborted);
        }
        Ok(())
    }

    /// A failure caused by the pool closing the connection mid-call is an integrity failure
    fn map_revoked<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Err(_) if self.slot.is_revoked() => Err(self.revoked_error()),
            other => other,
        }
    }

    fn revoked_error(&self) -> DocketError {
        DocketError::TransactionIntegrity(format!(
            "connection {} was force-closed by the pool",
            self.slot.id
        ))
    }

    fn touch(&self) {
        let now = self.pool.clock().now();
        self.slot.info.lock().touch(now);
    }

    fn sync_depth(&self) {
        let now = self.pool.clock().now();
        self.slot
            .info
            .lock()
            .set_transaction_depth(self.tx.depth(), now);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(&self.slot, &self.tx);
    }
}
