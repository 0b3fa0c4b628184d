//! Docket Core - Core abstractions shared by the connection pool crates
//!
//! This crate provides the fundamental traits and types that all other
//! Docket crates depend on. It defines:
//!
//! - `Connection` - Trait for a single physical connection to the embedded store
//! - `ConnectionFactory` - Trait for opening and probing physical connections
//! - `Clock` - Injectable time source used for expiry decisions
//! - `Savepoint` - Named rollback points used by nested transactions
//! - Common types like `Value`, `Row`, `QueryResult`, etc.

mod clock;
mod config;
mod connection;
mod error;
pub mod transaction;
mod types;

pub use clock::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use transaction::*;
pub use types::*;
