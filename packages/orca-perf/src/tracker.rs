use std::{
	collections::BTreeMap,
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;

pub const DEFAULT_SLOW_THRESHOLD_SECONDS: f64 = 1.0;
pub const NO_SUGGESTIONS: &str = "Query performance looks healthy; no optimization suggestions.";

const SLOW_RATE_LIMIT_PERCENT: f64 = 10.0;
const AVG_TIME_LIMIT_SECONDS: f64 = 2.0;
const HIGH_VOLUME_COUNT: u64 = 1_000;
const HIGH_VOLUME_AVG_TIME_SECONDS: f64 = 0.5;

/// Running totals for one query category.
#[derive(Clone, Debug, PartialEq)]
struct QueryStat {
	count: u64,
	total_time: f64,
	min_time: f64,
	max_time: f64,
	slow_count: u64,
	total_result_count: u64,
}
impl QueryStat {
	fn first(elapsed: f64) -> Self {
		Self {
			count: 0,
			total_time: 0.0,
			min_time: elapsed,
			max_time: elapsed,
			slow_count: 0,
			total_result_count: 0,
		}
	}

	fn avg_time(&self) -> f64 {
		if self.count == 0 { 0.0 } else { self.total_time / self.count as f64 }
	}

	fn slow_rate(&self) -> f64 {
		if self.count == 0 { 0.0 } else { self.slow_count as f64 / self.count as f64 * 100.0 }
	}

	fn avg_result_count(&self) -> f64 {
		if self.count == 0 { 0.0 } else { self.total_result_count as f64 / self.count as f64 }
	}

	fn summary(&self) -> QueryStatSummary {
		QueryStatSummary {
			total_queries: self.count,
			avg_time: self.avg_time(),
			min_time: self.min_time,
			max_time: self.max_time,
			slow_query_count: self.slow_count,
			slow_query_rate: self.slow_rate(),
			avg_result_count: self.avg_result_count(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryStatSummary {
	pub total_queries: u64,
	pub avg_time: f64,
	pub min_time: f64,
	pub max_time: f64,
	pub slow_query_count: u64,
	/// Percentage of queries slower than the tracker threshold.
	pub slow_query_rate: f64,
	pub avg_result_count: f64,
}

pub struct QueryTracker {
	slow_threshold: f64,
	stats: Mutex<BTreeMap<String, QueryStat>>,
}
impl QueryTracker {
	pub fn new(slow_threshold_seconds: f64) -> Self {
		Self { slow_threshold: slow_threshold_seconds, stats: Mutex::new(BTreeMap::new()) }
	}

	pub fn slow_threshold(&self) -> f64 {
		self.slow_threshold
	}

	pub fn record(&self, category: &str, elapsed_seconds: f64, result_count: usize) {
		if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
			tracing::debug!(category, elapsed_seconds, "Ignoring invalid query timing.");

			return;
		}

		let mut stats = self.lock();
		let stat = stats
			.entry(category.to_string())
			.or_insert_with(|| QueryStat::first(elapsed_seconds));

		stat.count += 1;
		stat.total_time += elapsed_seconds;
		stat.min_time = stat.min_time.min(elapsed_seconds);
		stat.max_time = stat.max_time.max(elapsed_seconds);
		stat.total_result_count += result_count as u64;

		if elapsed_seconds > self.slow_threshold {
			stat.slow_count += 1;

			tracing::warn!(
				category,
				elapsed_seconds,
				threshold_seconds = self.slow_threshold,
				"Slow query detected."
			);
		}
	}

	pub fn record_duration(&self, category: &str, elapsed: Duration, result_count: usize) {
		self.record(category, elapsed.as_secs_f64(), result_count);
	}

	pub fn stats(&self) -> BTreeMap<String, QueryStatSummary> {
		self.lock().iter().map(|(category, stat)| (category.clone(), stat.summary())).collect()
	}

	pub fn suggestions(&self) -> Vec<String> {
		let stats = self.lock();
		let mut out = Vec::new();

		for (category, stat) in stats.iter() {
			if stat.count == 0 {
				continue;
			}

			let avg_time = stat.avg_time();
			let slow_rate = stat.slow_rate();

			if slow_rate > SLOW_RATE_LIMIT_PERCENT {
				out.push(format!(
					"{category}: slow query rate is high ({slow_rate:.1}%); review indexes or query logic."
				));
			}
			if avg_time > AVG_TIME_LIMIT_SECONDS {
				out.push(format!(
					"{category}: average execution time is long ({avg_time:.3}s); add caching or optimize the query."
				));
			}
			if stat.count > HIGH_VOLUME_COUNT && avg_time > HIGH_VOLUME_AVG_TIME_SECONDS {
				out.push(format!(
					"{category}: high-volume query with notable latency; cache its results."
				));
			}
		}

		if out.is_empty() {
			out.push(NO_SUGGESTIONS.to_string());
		}

		out
	}

	pub fn reset(&self) {
		self.lock().clear();
	}

	fn lock(&self) -> MutexGuard<'_, BTreeMap<String, QueryStat>> {
		self.stats.lock().unwrap_or_else(|err| err.into_inner())
	}
}
impl Default for QueryTracker {
	fn default() -> Self {
		Self::new(DEFAULT_SLOW_THRESHOLD_SECONDS)
	}
}
