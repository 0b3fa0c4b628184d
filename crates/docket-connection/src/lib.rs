//! Docket Connection - Connection pooling and nested transactions
//!
//! This crate owns every physical connection to the embedded store and hands
//! them out to business code through the [`Database`] facade:
//!
//! - [`ConnectionPool`] - bounded pool with thread affinity, expiry and forced close
//! - [`LeakDetector`] - heuristics that flag connections held or used suspiciously
//! - [`TransactionManager`] - nested transactions mapped onto savepoints
//! - [`Database`] - `with_connection` / `with_transaction` scopes

mod database;
pub mod leak;
pub mod pool;
pub mod transaction;

#[cfg(test)]
mod test_support;

pub use database::{Database, DatabaseBuilder};
pub use leak::{LeakAlert, LeakCallback, LeakDetector, LeakReason, LeakThresholds};
pub use pool::{
    CleanupReport, ConnectionId, ConnectionInfo, ConnectionPool, MaintenanceHandle, OwnerId,
    PoolBuilder, PoolConfig, PoolStatistics, PooledConnection, ValidationReport,
};
pub use transaction::{TransactionManager, TransactionState};
