use std::collections::VecDeque;

use serde::Serialize;
use time::OffsetDateTime;

pub const DEFAULT_LATENCY_CAPACITY: usize = 1_000;

#[derive(Clone, Debug)]
pub struct LatencySample {
	pub endpoint: String,
	pub seconds: f64,
	pub recorded_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LatencySummary {
	pub count: usize,
	pub avg_time: f64,
	pub min_time: f64,
	pub max_time: f64,
}

/// Rolling sample of the most recent latencies; the oldest samples fall off first.
pub struct LatencyWindow {
	capacity: usize,
	samples: VecDeque<LatencySample>,
}
impl LatencyWindow {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);

		Self { capacity, samples: VecDeque::with_capacity(capacity.min(DEFAULT_LATENCY_CAPACITY)) }
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.samples.len()
	}

	pub fn is_empty(&self) -> bool {
		self.samples.is_empty()
	}

	pub fn record(&mut self, endpoint: impl Into<String>, seconds: f64) {
		self.samples.push_back(LatencySample {
			endpoint: endpoint.into(),
			seconds,
			recorded_at: OffsetDateTime::now_utc(),
		});

		while self.samples.len() > self.capacity {
			self.samples.pop_front();
		}
	}

	pub fn samples(&self) -> impl Iterator<Item = &LatencySample> {
		self.samples.iter()
	}

	pub fn summary(&self) -> LatencySummary {
		if self.samples.is_empty() {
			return LatencySummary::default();
		}

		let mut total = 0.0;
		let mut min_time = f64::INFINITY;
		let mut max_time = f64::NEG_INFINITY;

		for sample in &self.samples {
			total += sample.seconds;
			min_time = min_time.min(sample.seconds);
			max_time = max_time.max(sample.seconds);
		}

		LatencySummary {
			count: self.samples.len(),
			avg_time: total / self.samples.len() as f64,
			min_time,
			max_time,
		}
	}

	pub fn clear(&mut self) {
		self.samples.clear();
	}
}
impl Default for LatencyWindow {
	fn default() -> Self {
		Self::new(DEFAULT_LATENCY_CAPACITY)
	}
}
