use std::{collections::BTreeMap, sync::atomic::Ordering};

use serde::Serialize;
use time::OffsetDateTime;

use crate::PerfService;
use orca_perf::{CacheStats, LatencySummary, PoolStats, QueryStatSummary};

const OPTIMAL_HIT_RATE: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheOverview {
	pub main_cache: CacheStats,
	pub search_cache: CacheStats,
}

#[derive(Clone, Debug, Serialize)]
pub struct PerfReport {
	#[serde(with = "crate::time_serde")]
	pub timestamp: OffsetDateTime,
	pub cache_performance: CacheOverview,
	pub resource_pool: PoolStats,
	pub query_performance: BTreeMap<String, QueryStatSummary>,
	pub api_performance: LatencySummary,
	pub vector_search_performance: LatencySummary,
	pub optimization_suggestions: Vec<String>,
	pub cache_operations: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
	Optimal,
	NeedsOptimization,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricsOverview {
	pub main_cache_hit_rate: f64,
	pub search_cache_hit_rate: f64,
	pub cache_operations: u64,
	pub active_resources: usize,
	pub active_rebuilds: usize,
	pub system_status: SystemStatus,
}

impl PerfService {
	/// Records one API response time into the rolling latency window.
	pub fn record_api_latency(&self, endpoint: &str, seconds: f64) {
		if !seconds.is_finite() || seconds < 0.0 {
			tracing::debug!(endpoint, seconds, "Ignoring invalid API latency sample.");

			return;
		}

		crate::lock(&self.inner.api_latency).record(endpoint, seconds);
	}

	/// Collects a performance snapshot. Expired cache entries are purged first so sizes are live.
	pub fn report(&self) -> PerfReport {
		let purged =
			self.inner.main_cache.purge_expired() + self.inner.search_cache.purge_expired();

		if purged > 0 {
			tracing::debug!(purged, "Purged expired cache entries.");
		}

		PerfReport {
			timestamp: OffsetDateTime::now_utc(),
			cache_performance: self.cache_overview(),
			resource_pool: self.inner.pool.stats(),
			query_performance: self.inner.tracker.stats(),
			api_performance: crate::lock(&self.inner.api_latency).summary(),
			vector_search_performance: crate::lock(&self.inner.search_latency).summary(),
			optimization_suggestions: self.inner.tracker.suggestions(),
			cache_operations: self.inner.cache_writes.load(Ordering::Relaxed),
		}
	}

	pub fn metrics(&self) -> MetricsOverview {
		let caches = self.cache_overview();
		let system_status = if caches.main_cache.hit_rate > OPTIMAL_HIT_RATE {
			SystemStatus::Optimal
		} else {
			SystemStatus::NeedsOptimization
		};

		MetricsOverview {
			main_cache_hit_rate: caches.main_cache.hit_rate,
			search_cache_hit_rate: caches.search_cache.hit_rate,
			cache_operations: self.inner.cache_writes.load(Ordering::Relaxed),
			active_resources: self.inner.pool.active(),
			active_rebuilds: self.inner.rebuilds.list_active().len(),
			system_status,
		}
	}

	/// Empties both caches and resets their hit and miss counters.
	pub fn clear_caches(&self) {
		self.inner.main_cache.clear();
		self.inner.search_cache.clear();

		tracing::info!("Caches cleared.");
	}

	fn cache_overview(&self) -> CacheOverview {
		CacheOverview {
			main_cache: self.inner.main_cache.stats(),
			search_cache: self.inner.search_cache.stats(),
		}
	}
}
