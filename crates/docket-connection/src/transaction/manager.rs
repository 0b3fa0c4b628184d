//! Transaction state machine

use docket_core::{
    BEGIN_SQL, COMMIT_SQL, Connection, DocketError, ROLLBACK_SQL, Result, Savepoint,
};

/// Where a connection's transaction stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    /// One open transaction, no savepoints
    Active,
    /// Open transaction with savepoints; holds the depth (always > 1)
    Nested(usize),
    /// Rolled back by a failure; waiting for the outermost scope to end
    Aborted,
}

/// Tracks the transaction depth of one checked-out connection
///
/// Every method takes the connection it should talk to so the manager itself
/// stays plain data. A failed `COMMIT`, `RELEASE` or `ROLLBACK` leaves the
/// store in an unknown state: the manager then refuses any further work and
/// reports `TransactionIntegrity` so the pool discards the connection.
#[derive(Debug, Default)]
pub struct TransactionManager {
    savepoints: Vec<Savepoint>,
    depth: usize,
    aborted: bool,
    broken: bool,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn state(&self) -> TransactionState {
        match (self.aborted, self.depth) {
            (true, _) => TransactionState::Aborted,
            (false, 0) => TransactionState::Idle,
            (false, 1) => TransactionState::Active,
            (false, depth) => TransactionState::Nested(depth),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Whether the store's transaction state is unknown
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Open a transaction, or a savepoint inside the open one.
    ///
    /// Returns the new depth.
    pub async fn begin(&mut self, conn: &dyn Connection) -> Result<usize> {
        self.ensure_not_aborted()?;

        if self.depth == 0 {
            conn.execute(BEGIN_SQL, &[]).await?;
        } else {
            let savepoint = Savepoint::for_depth(self.depth + 1);
            conn.execute(&savepoint.create_sql(), &[]).await?;
            self.savepoints.push(savepoint);
        }

        self.depth += 1;
        tracing::trace!(depth = self.depth, "transaction scope opened");
        Ok(self.depth)
    }

    /// Commit the innermost scope. Returns the remaining depth.
    pub async fn commit(&mut self, conn: &dyn Connection) -> Result<usize> {
        self.ensure_not_aborted()?;

        match self.depth {
            0 => {
                return Err(DocketError::Transaction(
                    "commit called without an active transaction".into(),
                ));
            }
            1 => {
                if let Err(e) = conn.execute(COMMIT_SQL, &[]).await {
                    return Err(self.integrity_failure("COMMIT", e));
                }
            }
            _ => {
                if let Some(savepoint) = self.savepoints.last() {
                    let sql = savepoint.release_sql();
                    if let Err(e) = conn.execute(&sql, &[]).await {
                        return Err(self.integrity_failure("RELEASE SAVEPOINT", e));
                    }
                }
                self.savepoints.pop();
            }
        }

        self.depth -= 1;
        tracing::trace!(depth = self.depth, "transaction scope committed");
        Ok(self.depth)
    }

    /// Roll back the innermost scope only. Returns the remaining depth.
    pub async fn rollback(&mut self, conn: &dyn Connection) -> Result<usize> {
        self.ensure_not_aborted()?;

        match self.depth {
            0 => {
                return Err(DocketError::Transaction(
                    "rollback called without an active transaction".into(),
                ));
            }
            1 => {
                if let Err(e) = conn.execute(ROLLBACK_SQL, &[]).await {
                    return Err(self.integrity_failure("ROLLBACK", e));
                }
            }
            _ => {
                if let Some(savepoint) = self.savepoints.last() {
                    let rollback_to = savepoint.rollback_to_sql();
                    let release = savepoint.release_sql();
                    if let Err(e) = conn.execute(&rollback_to, &[]).await {
                        return Err(self.integrity_failure("ROLLBACK TO SAVEPOINT", e));
                    }
                    if let Err(e) = conn.execute(&release, &[]).await {
                        return Err(self.integrity_failure("RELEASE SAVEPOINT", e));
                    }
                }
                self.savepoints.pop();
            }
        }

        self.depth -= 1;
        tracing::trace!(depth = self.depth, "transaction scope rolled back");
        Ok(self.depth)
    }

    /// Roll back the whole transaction from any depth and enter `Aborted`.
    ///
    /// Also drops the connection's cached statements and asks the store to
    /// release memory, since whatever the failed work built up is garbage now.
    pub async fn abort(&mut self, conn: &dyn Connection) -> Result<()> {
        if self.broken {
            return Err(DocketError::TransactionIntegrity(
                "transaction state is unknown after an earlier failure".into(),
            ));
        }
        if self.depth == 0 {
            return Ok(());
        }

        let depth = self.depth;
        if let Err(e) = conn.execute(ROLLBACK_SQL, &[]).await {
            return Err(self.integrity_failure("ROLLBACK", e));
        }

        self.savepoints.clear();
        self.depth = 0;
        self.aborted = true;
        tracing::debug!(depth, "transaction aborted");

        if let Err(e) = conn.clear_statement_cache().await {
            tracing::warn!(error = %e, "failed to clear statement cache after abort");
        }
        if let Err(e) = conn.shrink_memory().await {
            tracing::warn!(error = %e, "failed to release memory after abort");
        }
        Ok(())
    }

    /// Leave `Aborted` once the outermost scope has ended.
    ///
    /// Returns false when there was nothing to clear or the connection is broken.
    pub fn clear_aborted(&mut self) -> bool {
        if self.aborted && !self.broken {
            self.aborted = false;
            true
        } else {
            false
        }
    }

    /// Forget everything: the connection was closed underneath us.
    pub(crate) fn invalidate(&mut self) {
        self.savepoints.clear();
        self.depth = 0;
        self.aborted = true;
        self.broken = true;
    }

    fn ensure_not_aborted(&self) -> Result<()> {
        if self.broken {
            Err(DocketError::TransactionIntegrity(
                "transaction state is unknown after an earlier failure".into(),
            ))
        } else if self.aborted {
            Err(DocketError::TransactionAborted)
        } else {
            Ok(())
        }
    }

    fn integrity_failure(&mut self, statement: &str, cause: DocketError) -> DocketError {
        tracing::error!(
            depth = self.depth,
            statement,
            error = %cause,
            "transaction control statement failed"
        );
        self.invalidate();
        DocketError::TransactionIntegrity(format!("{} failed: {}", statement, cause))
    }
}
