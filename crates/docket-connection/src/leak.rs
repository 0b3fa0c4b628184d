//! Leak detection for pooled connections
//!
//! The detector looks at copies of [`ConnectionInfo`](crate::ConnectionInfo)
//! taken by the pool and reports connections that look abandoned or bloated.
//! It never closes anything itself: the pool flags what it reports and the
//! next validation pass does the closing.

mod detector;

#[cfg(test)]
mod tests;

pub use detector::{LeakAlert, LeakCallback, LeakDetector, LeakReason, LeakThresholds};
