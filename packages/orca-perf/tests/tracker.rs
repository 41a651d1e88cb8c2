use std::time::Duration;

use orca_perf::{LatencyWindow, NO_SUGGESTIONS, QueryTracker};

#[test]
fn identical_fast_queries_average_to_the_same_time() {
	let tracker = QueryTracker::new(1.0);

	for _ in 0..8 {
		tracker.record("vector_search", 0.25, 4);
	}

	let stats = tracker.stats();
	let summary = stats.get("vector_search").expect("category must be tracked");

	assert_eq!(summary.total_queries, 8);
	assert_eq!(summary.avg_time, 0.25);
	assert_eq!(summary.min_time, 0.25);
	assert_eq!(summary.max_time, 0.25);
	assert_eq!(summary.slow_query_rate, 0.0);
	assert_eq!(summary.avg_result_count, 4.0);
}

#[test]
fn identical_slow_queries_are_all_slow() {
	let tracker = QueryTracker::new(1.0);

	for _ in 0..4 {
		tracker.record("vector_search", 1.5, 0);
	}

	let stats = tracker.stats();
	let summary = &stats["vector_search"];

	assert_eq!(summary.avg_time, 1.5);
	assert_eq!(summary.slow_query_rate, 100.0);
	assert_eq!(summary.slow_query_count, 4);
}

#[test]
fn threshold_is_exclusive() {
	let tracker = QueryTracker::new(1.0);

	tracker.record("lookup", 1.0, 1);

	assert_eq!(tracker.stats()["lookup"].slow_query_count, 0);
}

#[test]
fn min_max_track_extremes() {
	let tracker = QueryTracker::default();

	tracker.record_duration("lookup", Duration::from_millis(500), 1);
	tracker.record_duration("lookup", Duration::from_millis(125), 3);
	tracker.record_duration("lookup", Duration::from_millis(2_000), 5);

	let stats = tracker.stats();
	let summary = &stats["lookup"];

	assert_eq!(summary.min_time, 0.125);
	assert_eq!(summary.max_time, 2.0);
	assert_eq!(summary.avg_result_count, 3.0);
	assert_eq!(summary.slow_query_count, 1);
}

#[test]
fn invalid_timings_are_ignored() {
	let tracker = QueryTracker::default();

	tracker.record("lookup", f64::NAN, 1);
	tracker.record("lookup", -1.0, 1);

	assert!(tracker.stats().is_empty());
}

#[test]
fn healthy_tracker_reports_single_placeholder() {
	let tracker = QueryTracker::default();

	assert_eq!(tracker.suggestions(), vec![NO_SUGGESTIONS.to_string()]);

	tracker.record("lookup", 0.1, 1);

	assert_eq!(tracker.suggestions(), vec![NO_SUGGESTIONS.to_string()]);
}

#[test]
fn slow_rate_rule_fires_above_ten_percent() {
	let tracker = QueryTracker::new(1.0);

	for _ in 0..8 {
		tracker.record("search", 0.5, 1);
	}

	tracker.record("search", 1.5, 1);

	let suggestions = tracker.suggestions();

	assert_eq!(suggestions.len(), 1);
	assert!(suggestions[0].starts_with("search: slow query rate is high (11.1%)"));
}

#[test]
fn average_time_rule_fires_above_two_seconds() {
	let tracker = QueryTracker::new(10.0);

	tracker.record("report", 2.5, 1);

	let suggestions = tracker.suggestions();

	assert_eq!(suggestions.len(), 1);
	assert!(suggestions[0].contains("average execution time is long (2.500s)"));
}

#[test]
fn high_volume_rule_needs_both_conditions() {
	let tracker = QueryTracker::new(10.0);

	for _ in 0..1_001 {
		tracker.record("hot", 0.75, 1);
	}
	for _ in 0..1_001 {
		tracker.record("cheap", 0.25, 1);
	}

	let suggestions = tracker.suggestions();

	assert_eq!(suggestions.len(), 1);
	assert!(suggestions[0].starts_with("hot: high-volume query"));
}

#[test]
fn reset_forgets_categories() {
	let tracker = QueryTracker::default();

	tracker.record("lookup", 0.1, 1);
	tracker.reset();

	assert!(tracker.stats().is_empty());
}

#[test]
fn latency_window_drops_oldest_samples() {
	let mut window = LatencyWindow::new(3);

	for (idx, seconds) in [4.0, 1.0, 2.0, 3.0].into_iter().enumerate() {
		window.record(format!("/endpoint/{idx}"), seconds);
	}

	let summary = window.summary();

	assert_eq!(window.len(), 3);
	assert_eq!(summary.count, 3);
	assert_eq!(summary.avg_time, 2.0);
	assert_eq!(summary.min_time, 1.0);
	assert_eq!(summary.max_time, 3.0);
	assert_eq!(window.samples().next().map(|sample| sample.endpoint.as_str()), Some("/endpoint/1"));
}

#[test]
fn empty_latency_window_summarizes_to_zero() {
	let window = LatencyWindow::default();
	let summary = window.summary();

	assert_eq!(window.capacity(), 1_000);
	assert_eq!(summary.count, 0);
	assert_eq!(summary.avg_time, 0.0);
}
