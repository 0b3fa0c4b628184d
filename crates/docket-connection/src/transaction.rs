//! Nested transactions on a single connection
//!
//! Depth 1 is a real `BEGIN`/`COMMIT`; every deeper level is a savepoint.
//! A failure at any depth rolls back the whole transaction: enclosing scopes
//! see `DocketError::TransactionAborted` until the outermost scope ends.

mod manager;


pub use manager::{TransactionManager, TransactionState};
