//! Memory monitoring module
//!
//! Provides memory sampling, a bounded sample history with trend queries, and
//! pressure notifications.

mod monitor;
mod probe;
mod sample;

#[cfg(test)]
mod tests;

pub use monitor::*;
pub use probe::*;
pub use sample::*;
