//! Tests for leak classification

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use rstest::rstest;

use super::*;
use crate::pool::{ConnectionId, ConnectionInfo, OwnerId};

const MINUTE: Duration = Duration::from_secs(60);

/// A point far enough ahead that subtracting an hour or two stays valid
fn later() -> Instant {
    Instant::now() + 180 * MINUTE
}

/// A connection opened an hour before `now`, last used at `now - idle`
fn info_at(now: Instant, idle: Duration) -> ConnectionInfo {
    let mut info = ConnectionInfo::new(ConnectionId::new(1), now - 60 * MINUTE);
    info.last_used_at = now - idle;
    info.access_count = 1;
    info
}

fn in_transaction(mut info: ConnectionInfo, now: Instant, age: Duration) -> ConnectionInfo {
    info.owning_thread = Some(OwnerId::current());
    info.transaction_depth = 1;
    info.transaction_started_at = Some(now - age);
    info
}

#[rstest]
#[case::healthy_idle(|now| info_at(now, MINUTE), None)]
#[case::idle_for_hours_without_transaction(|now| info_at(now, 120 * MINUTE), None)]
#[case::stalled(
    |now| in_transaction(info_at(now, 6 * MINUTE), now, 6 * MINUTE),
    Some(LeakReason::StalledTransaction)
)]
#[case::long_but_busy(
    |now| in_transaction(info_at(now, MINUTE), now, 11 * MINUTE),
    Some(LeakReason::LongTransaction)
)]
#[case::stalled_beats_long(
    |now| in_transaction(info_at(now, 20 * MINUTE), now, 20 * MINUTE),
    Some(LeakReason::StalledTransaction)
)]
#[case::short_transaction(
    |now| in_transaction(info_at(now, MINUTE), now, 4 * MINUTE),
    None
)]
#[case::excessive_access(
    |now| ConnectionInfo { access_count: 1_001, ..info_at(now, MINUTE) },
    Some(LeakReason::ExcessiveAccess)
)]
#[case::access_at_limit(
    |now| ConnectionInfo { access_count: 1_000, ..info_at(now, MINUTE) },
    None
)]
#[case::memory_footprint(
    |now| ConnectionInfo { estimated_memory_bytes: 60 * 1024 * 1024, ..info_at(now, MINUTE) },
    Some(LeakReason::MemoryFootprint)
)]
fn test_classify(#[case] build: fn(Instant) -> ConnectionInfo, #[case] expected: Option<LeakReason>) {
    let detector = LeakDetector::default();
    let now = later();
    assert_eq!(detector.classify(&build(now), now), expected);
}

#[test]
fn test_scan_skips_flagged_connections() {
    let detector = LeakDetector::default();
    let now = later();

    let mut flagged = ConnectionInfo {
        access_count: 5_000,
        ..info_at(now, MINUTE)
    };
    flagged.flagged_leaked = true;

    let mut fresh = ConnectionInfo {
        access_count: 5_000,
        ..info_at(now, MINUTE)
    };
    fresh.connection_id = ConnectionId::new(2);

    let alerts = detector.scan(&[flagged, fresh], now);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].connection_id, ConnectionId::new(2));
    assert_eq!(detector.total_detected(), 1);
}

#[test]
fn test_scan_notifies_every_callback() {
    let detector = LeakDetector::new(LeakThresholds {
        max_access_count: 10,
        ..LeakThresholds::default()
    });
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    {
        let first = first.clone();
        detector.register_callback(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = second.clone();
        detector.register_callback(move |alert| {
            assert_eq!(alert.reason, LeakReason::ExcessiveAccess);
            second.fetch_add(1, Ordering::SeqCst);
        });
    }

    let now = later();
    let busy = ConnectionInfo {
        access_count: 11,
        ..info_at(now, MINUTE)
    };
    let quiet = ConnectionInfo {
        connection_id: ConnectionId::new(2),
        ..info_at(now, MINUTE)
    };

    let alerts = detector.scan(&[busy, quiet], now);
    assert_eq!(alerts.len(), 1);
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn test_scan_of_clean_snapshot_is_silent() {
    let detector = LeakDetector::default();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        detector.register_callback(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    let now = later();
    assert!(detector.scan(&[info_at(now, MINUTE)], now).is_empty());
    assert!(detector.scan(&[], now).is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(detector.total_detected(), 0);
}

#[test]
fn test_custom_thresholds() {
    let detector = LeakDetector::new(LeakThresholds {
        max_transaction_time: 2 * MINUTE,
        ..LeakThresholds::default()
    });
    let now = later();
    let info = in_transaction(info_at(now, MINUTE), now, 3 * MINUTE);
    assert_eq!(
        detector.classify(&info, now),
        Some(LeakReason::LongTransaction)
    );
}

#[test]
fn test_reason_display() {
    assert_eq!(
        LeakReason::StalledTransaction.to_string(),
        "stalled transaction"
    );
    assert_eq!(LeakReason::MemoryFootprint.to_string(), "memory footprint");
}
