//! Transaction-related types
//!
//! The statements issued by the transaction manager are plain SQL so that they can go
//! through the same `Connection::execute` path as business statements.

mod savepoint;

pub use savepoint::*;

/// Starts the outermost transaction. The write lock is taken on the first write.
pub const BEGIN_SQL: &str = "BEGIN DEFERRED";

/// Commits the outermost transaction.
pub const COMMIT_SQL: &str = "COMMIT";

/// Rolls back the outermost transaction, discarding every open savepoint.
pub const ROLLBACK_SQL: &str = "ROLLBACK";
