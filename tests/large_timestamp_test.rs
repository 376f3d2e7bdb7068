use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use windowed_wordcount::{
    LateDataPolicy, PipelineMetrics, Window, WindowAssigner, WindowSnapshot, WindowedAggregator,
    WordEvent,
};

fn aggregator() -> WindowedAggregator {
    let assigner = WindowAssigner::new(Duration::from_secs(5)).unwrap();
    WindowedAggregator::new(
        assigner,
        Duration::ZERO,
        LateDataPolicy::Drop,
        Arc::new(PipelineMetrics::new()),
    )
}

fn run_events(base_timestamp: i64) -> Vec<WindowSnapshot> {
    let mut agg = aggregator();
    let mut emitted = Vec::new();
    for i in 0..10 {
        let timestamp = base_timestamp + i * 1000;
        agg.add(&WordEvent::new(format!("sensor{}", i % 3), timestamp));
        emitted.extend(agg.observe_timestamp(timestamp));
    }
    emitted.extend(agg.flush_all());
    emitted
}

/// Baseline test with small timestamps to verify test structure
#[test]
fn test_small_timestamps_baseline() {
    let emitted = run_events(0);
    assert_eq!(emitted.len(), 2);
    assert_eq!(emitted[0].window, Window::new(0, 5000));
    assert_eq!(emitted[0].total(), 5);
    assert_eq!(emitted[1].total(), 5);
}

/// Real-world epoch milliseconds must bucket exactly like small ones.
#[test]
fn test_large_unix_millisecond_timestamps() {
    // A 5s aligned timestamp around late 2025
    let base_timestamp = 1_760_000_000_000_i64;
    let emitted = run_events(base_timestamp);

    assert_eq!(emitted.len(), 2);
    assert_eq!(
        emitted[0].window,
        Window::new(base_timestamp, base_timestamp + 5000)
    );
    assert_eq!(emitted[0].total(), 5);
}

/// Test that small and large timestamps produce equivalent window behavior
#[test]
fn test_timestamp_normalization_equivalence() {
    let small = run_events(0);
    let large = run_events(1_760_000_000_000);

    let counts = |snapshots: &[WindowSnapshot]| -> Vec<HashMap<String, u64>> {
        snapshots.iter().map(|s| s.counts.clone()).collect()
    };
    assert_eq!(counts(&small), counts(&large));
}

#[test]
fn test_negative_timestamps_floor_into_previous_window() {
    let assigner = WindowAssigner::new(Duration::from_secs(60)).unwrap();
    assert_eq!(assigner.assign(-60_000), Window::new(-60_000, 0));
    assert_eq!(assigner.assign(-60_001), Window::new(-120_000, -60_000));
}

#[test]
fn test_extreme_timestamps_do_not_overflow() {
    let assigner = WindowAssigner::new(Duration::from_secs(60)).unwrap();

    let last = assigner.assign(i64::MAX);
    assert!(last.start <= i64::MAX && last.end == i64::MAX);

    let first = assigner.assign(i64::MIN);
    assert_eq!(first.start, i64::MIN);

    let mut agg = aggregator();
    agg.add(&WordEvent::new("edge", i64::MAX - 1));
    let emitted = agg.flush_all();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].counts.get("edge"), Some(&1));
}
