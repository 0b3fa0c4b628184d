//! Tests for the memory module

use super::*;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn monitor_with(probe: impl MemoryProbe + 'static) -> MemoryMonitor {
    MemoryMonitor::new(MemoryMonitorConfig::new(0.85).with_history_len(4), probe)
}

mod sample_tests {
    use super::*;

    #[test]
    fn test_reading_percent() {
        let reading = MemoryReading {
            system_used_bytes: 3,
            system_total_bytes: 4,
            process_bytes: 0,
        };
        assert!((reading.system_percent() - 75.0).abs() < 0.001);
    }

    #[test]
    fn test_reading_percent_with_unknown_total() {
        assert_eq!(MemoryReading::default().system_percent(), 0.0);
    }

    #[test]
    fn test_sample_threshold_boundary() {
        assert!(MemorySample::new(85.0, 0).exceeds(0.85));
        assert!(!MemorySample::new(84.9, 0).exceeds(0.85));
    }

    #[test]
    fn test_sample_at_threshold_counts_for_any_threshold() {
        for percent in [10.0, 33.3, 70.0, 85.0, 90.0, 95.5, 100.0] {
            let threshold = percent / 100.0;
            assert!(MemorySample::new(percent, 0).exceeds(threshold), "{percent}");
            assert!(!MemorySample::new(percent - 0.01, 0).exceeds(threshold), "{percent}");
        }

        let reading = MemoryReading {
            system_used_bytes: 17,
            system_total_bytes: 20,
            process_bytes: 0,
        };
        assert!(MemorySample::from_reading(reading).exceeds(0.85));
    }

    #[test]
    fn test_sample_serialization() {
        let sample = MemorySample::new(42.0, 1024);
        let json = serde_json::to_string(&sample).expect("serialize");
        let back: MemorySample = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.process_bytes, 1024);
        assert!((back.system_percent - sample.system_percent).abs() < 0.001);
    }
}

mod monitor_tests {
    use super::*;

    #[test]
    fn test_no_pressure_before_first_sample() {
        let monitor = monitor_with(FixedProbe::new(99.0, 0));
        assert!(!monitor.under_pressure());
        assert!(monitor.latest().is_none());
    }

    #[test]
    fn test_sample_reads_probe_and_records() {
        let probe = FixedProbe::new(50.0, 4096);
        let monitor = monitor_with(probe.clone());

        let sample = monitor.sample().expect("sample");
        assert_eq!(sample.process_bytes, 4096);
        assert!(!monitor.under_pressure());

        probe.set(90.0, 8192);
        monitor.sample().expect("sample");
        assert!(monitor.under_pressure());
        assert_eq!(monitor.latest().map(|s| s.process_bytes), Some(8192));
    }

    #[test]
    fn test_pressure_follows_latest_sample_only() {
        let monitor = monitor_with(ScriptedProbe::from_percents([95.0, 40.0]));
        monitor.sample().expect("sample");
        assert!(monitor.under_pressure());
        monitor.sample().expect("sample");
        assert!(!monitor.under_pressure());
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = monitor_with(ScriptedProbe::from_percents([10.0, 20.0, 30.0, 40.0, 50.0, 60.0]));
        for _ in 0..6 {
            monitor.sample().expect("sample");
        }

        let history = monitor.history();
        assert_eq!(history.len(), 4);
        assert!((history[0].system_percent - 30.0).abs() < 0.01);
        assert!((history[3].system_percent - 60.0).abs() < 0.01);
    }

    #[test]
    fn test_scripted_probe_repeats_last_reading() {
        let mut probe = ScriptedProbe::from_percents([70.0]);
        let a = probe.read().expect("first");
        let b = probe.read().expect("second");
        assert_eq!(a, b);

        let mut empty = ScriptedProbe::from_percents([]);
        assert!(empty.read().is_err());
    }

    #[test]
    fn test_trend_over_window() {
        let monitor = monitor_with(FixedProbe::default());
        let now = Utc::now();
        monitor.record(MemorySample::new(50.0, 1_000).with_taken_at(now - ChronoDuration::minutes(10)));
        monitor.record(MemorySample::new(60.0, 2_000).with_taken_at(now - ChronoDuration::minutes(2)));
        monitor.record(MemorySample::new(70.0, 5_000).with_taken_at(now - ChronoDuration::minutes(1)));
        monitor.record(MemorySample::new(65.0, 4_000).with_taken_at(now));

        let trend = monitor.trend(Duration::from_secs(5 * 60)).expect("trend");
        assert_eq!(trend.samples, 3);
        assert!((trend.system_percent_delta - 5.0).abs() < 0.01);
        assert_eq!(trend.process_bytes_delta, 2_000);
        assert!((trend.peak_system_percent - 70.0).abs() < 0.01);
        assert!(trend.is_growing());
    }

    #[test]
    fn test_trend_needs_two_samples() {
        let monitor = monitor_with(FixedProbe::new(10.0, 0));
        assert!(monitor.trend(Duration::from_secs(60)).is_none());
        monitor.sample().expect("sample");
        assert!(monitor.trend(Duration::from_secs(60)).is_none());
    }

    #[tokio::test]
    async fn test_subscribers_see_pressure_transitions() {
        let probe = FixedProbe::new(20.0, 0);
        let monitor = monitor_with(probe.clone());
        let mut rx = monitor.subscribe();
        assert!(!*rx.borrow());

        probe.set(97.0, 0);
        monitor.sample().expect("sample");
        rx.changed().await.expect("changed");
        assert!(*rx.borrow_and_update());

        // Another sample above the threshold is not a transition
        monitor.sample().expect("sample");
        assert!(!rx.has_changed().expect("sender alive"));

        probe.set(30.0, 0);
        monitor.sample().expect("sample");
        rx.changed().await.expect("changed");
        assert!(!*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_runs_until_cancelled() {
        let monitor = Arc::new(MemoryMonitor::new(
            MemoryMonitorConfig::new(0.85)
                .with_sample_interval_ms(1_000)
                .with_history_len(100),
            FixedProbe::new(10.0, 0),
        ));
        let token = CancellationToken::new();
        let handle = spawn_sampler(monitor.clone(), token.clone());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        token.cancel();
        handle.await.expect("sampler task");

        // Ticks at 0s, 1s, 2s and 3s
        assert_eq!(monitor.history().len(), 4);
    }
}
