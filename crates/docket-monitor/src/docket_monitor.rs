//! Docket Monitor - memory monitoring for the connection pool
//!
//! This crate samples process and system memory on its own schedule, keeps a bounded
//! history of readings, and tells interested parties when the process is under
//! memory pressure. The pool subscribes to pressure changes instead of polling
//! memory on every acquire or release.

pub mod memory;

pub use memory::*;
