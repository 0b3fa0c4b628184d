//! Connection pooling for the embedded store
//!
//! The pool owns every physical connection. Callers borrow one through
//! [`ConnectionPool::acquire`] and give it back by dropping the returned
//! [`PooledConnection`].
//!
//! # Example
//!
//! ```ignore
//! use docket_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let config = PoolConfig::new("cases.db")
//!     .with_max_connections(4)
//!     .with_connection_timeout_ms(5_000);
//!
//! let pool = ConnectionPool::new(config, connection_factory);
//! let conn = pool.acquire().await?;
//! conn.execute("UPDATE documents SET archived = 1 WHERE id = ?", &[id.into()]).await?;
//! // Connection returned to the pool on drop
//! ```

mod config;
mod handle;
mod info;
mod maintenance;
mod pool;
mod stats;


pub use config::PoolConfig;
pub use handle::PooledConnection;
pub use info::{ConnectionId, ConnectionInfo, OwnerId};
pub use maintenance::MaintenanceHandle;
pub use pool::{CleanupReport, ConnectionPool, PoolBuilder, ValidationReport};
pub use stats::PoolStatistics;
