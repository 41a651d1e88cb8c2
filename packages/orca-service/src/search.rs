use std::{
	collections::{BTreeMap, HashSet},
	future::Future,
	sync::atomic::Ordering,
	time::Duration,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::{Error, PerfService, Result};
use orca_perf::{CacheStats, cache_key};
use orca_storage::models::SearchHit;

const SEARCH_KEY_PREFIX: &str = "vector_search";
const SEARCH_CATEGORY: &str = "vector_search";
const BATCH_CATEGORY: &str = "batch_vector_search";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchSearchResponse {
	/// Results keyed by the query string as submitted.
	pub results: BTreeMap<String, Vec<SearchHit>>,
	pub cached_queries: usize,
	pub searched_queries: usize,
	pub failed_queries: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WarmupReport {
	pub requested: usize,
	pub processed: usize,
	pub failed: usize,
	pub cache: CacheStats,
}

#[derive(Serialize)]
struct SearchKey<'a> {
	query: &'a str,
	limit: u32,
	filters: Option<&'a Map<String, Value>>,
}

impl PerfService {
	/// Cache-backed vector search.
	///
	/// Results are cached per `(query, limit, filters)`, empty results included. Failures are
	/// returned to the caller and never cached.
	pub async fn search(
		&self,
		query: &str,
		limit: Option<u32>,
		filters: Option<&Map<String, Value>>,
	) -> Result<Vec<SearchHit>> {
		let limit = self.resolve_limit(limit)?;
		let key = search_key(query, limit, filters)?;

		if let Some(hits) = self.inner.search_cache.get(&key) {
			return Ok(hits);
		}

		let hits = self.search_uncached(query, limit, filters).await?;

		self.store_search(key, hits.clone());

		Ok(hits)
	}

	/// Runs many searches at once, serving cached queries directly.
	///
	/// Each uncached query runs in its own task and still passes through the resource pool. A
	/// failed query maps to an empty result and is left uncached.
	pub async fn batch_search(
		&self,
		queries: &[String],
		limit: Option<u32>,
	) -> Result<BatchSearchResponse> {
		let max_queries = self.inner.search_cfg.max_batch_queries;

		if queries.len() > max_queries {
			return Err(Error::InvalidRequest {
				message: format!("Batch search accepts at most {max_queries} queries."),
			});
		}

		let limit = self.resolve_limit(limit)?;
		let started = Instant::now();
		let mut response = BatchSearchResponse {
			results: BTreeMap::new(),
			cached_queries: 0,
			searched_queries: 0,
			failed_queries: Vec::new(),
		};
		let mut seen = HashSet::new();
		let mut pending = Vec::new();

		for query in queries {
			if !seen.insert(query.as_str()) {
				continue;
			}

			let key = search_key(query, limit, None)?;

			if let Some(hits) = self.inner.search_cache.get(&key) {
				response.cached_queries += 1;

				response.results.insert(query.clone(), hits);

				continue;
			}

			let service = self.clone();
			let task_query = query.clone();
			let handle =
				tokio::spawn(async move { service.search_uncached(&task_query, limit, None).await });

			pending.push((query.clone(), key, handle));
		}

		let searched = pending.len();

		for (query, key, handle) in pending {
			let outcome = match handle.await {
				Ok(outcome) => outcome,
				Err(err) => Err(Error::Search { message: format!("Search task aborted: {err}.") }),
			};

			match outcome {
				Ok(hits) => {
					response.searched_queries += 1;

					self.store_search(key, hits.clone());
					response.results.insert(query, hits);
				},
				Err(err) => {
					tracing::warn!(error = %err, query = %query, "Batch sub-search failed.");

					response.failed_queries.push(query.clone());
					response.results.insert(query, Vec::new());
				},
			}
		}

		if searched > 0 {
			self.inner.tracker.record_duration(BATCH_CATEGORY, started.elapsed(), searched);
		}

		Ok(response)
	}

	/// Feeds `queries` through [`PerfService::search`] one at a time to populate the cache.
	pub async fn warmup(&self, queries: &[String]) -> WarmupReport {
		let limit = self.inner.search_cfg.warmup_limit;
		let mut processed = 0;
		let mut failed = 0;

		tracing::info!(count = queries.len(), "Search cache warmup started.");

		for query in queries {
			match self.search(query, Some(limit), None).await {
				Ok(_) => processed += 1,
				Err(err) => {
					failed += 1;

					tracing::warn!(error = %err, query = %query, "Warmup query failed.");
				},
			}
		}

		tracing::info!(processed, failed, "Search cache warmup finished.");

		WarmupReport {
			requested: queries.len(),
			processed,
			failed,
			cache: self.inner.search_cache.stats(),
		}
	}

	/// Memoizes an async computation in the main cache.
	///
	/// The key derives from `prefix` and the serialized `params`. `ttl` overrides the main
	/// cache's default lifetime. Errors from `compute` are returned and not cached.
	pub async fn cached<T, P, F, Fut>(
		&self,
		prefix: &str,
		params: &P,
		ttl: Option<Duration>,
		compute: F,
	) -> Result<T>
	where
		T: Serialize + DeserializeOwned,
		P: Serialize + ?Sized,
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let key = cache_key(prefix, params).map_err(|err| Error::InvalidRequest {
			message: format!("Cache key failed: {err}."),
		})?;

		if let Some(value) = self.inner.main_cache.get(&key) {
			match serde_json::from_value(value) {
				Ok(result) => return Ok(result),
				Err(err) => {
					tracing::warn!(error = %err, prefix, "Cached value has a stale shape.");
				},
			}
		}

		let result = compute().await?;

		match serde_json::to_value(&result) {
			Ok(value) => {
				match ttl {
					Some(ttl) => self.inner.main_cache.set_with_ttl(key, value, ttl),
					None => self.inner.main_cache.set(key, value),
				}

				self.inner.cache_writes.fetch_add(1, Ordering::Relaxed);
			},
			Err(err) => tracing::warn!(error = %err, prefix, "Result is not cacheable."),
		}

		Ok(result)
	}

	fn resolve_limit(&self, limit: Option<u32>) -> Result<u32> {
		match limit {
			Some(0) => Err(Error::InvalidRequest {
				message: "limit must be greater than zero.".to_string(),
			}),
			Some(limit) => Ok(limit),
			None => Ok(self.inner.search_cfg.default_limit),
		}
	}

	async fn search_uncached(
		&self,
		query: &str,
		limit: u32,
		filters: Option<&Map<String, Value>>,
	) -> Result<Vec<SearchHit>> {
		let _permit = self.inner.pool.acquire().await;
		let started = Instant::now();
		let hits = self.inner.backends.search.search(query, limit, filters).await?;
		let elapsed = started.elapsed();

		self.inner.tracker.record_duration(SEARCH_CATEGORY, elapsed, hits.len());
		crate::lock(&self.inner.search_latency).record(SEARCH_CATEGORY, elapsed.as_secs_f64());

		Ok(hits)
	}

	fn store_search(&self, key: String, hits: Vec<SearchHit>) {
		self.inner.search_cache.set(key, hits);
		self.inner.cache_writes.fetch_add(1, Ordering::Relaxed);
	}
}

fn search_key(query: &str, limit: u32, filters: Option<&Map<String, Value>>) -> Result<String> {
	// An empty filter map selects the same points as no filter.
	let filters = filters.filter(|filters| !filters.is_empty());

	cache_key(SEARCH_KEY_PREFIX, &SearchKey { query, limit, filters })
		.map_err(|err| Error::InvalidRequest { message: format!("Cache key failed: {err}.") })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_filters_and_empty_filters_share_a_key() {
		let empty = Map::new();

		assert_eq!(search_key("rust", 5, None).ok(), search_key("rust", 5, Some(&empty)).ok());
	}

	#[test]
	fn limit_is_part_of_the_key() {
		assert_ne!(search_key("rust", 5, None).ok(), search_key("rust", 10, None).ok());
	}
}
