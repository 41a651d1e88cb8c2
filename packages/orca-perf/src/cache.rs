use std::{
	collections::HashMap,
	sync::{Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
	pub size: usize,
	pub max_size: usize,
	pub hit_count: u64,
	pub miss_count: u64,
	/// `hit_count / (hit_count + miss_count)`, or 0 before the first lookup.
	pub hit_rate: f64,
	pub ttl_seconds: u64,
}

struct CacheEntry<V> {
	value: V,
	expires_at: Instant,
	last_access: Instant,
	// Breaks ties between entries touched within the same clock tick.
	access_seq: u64,
}

struct CacheState<V> {
	entries: HashMap<String, CacheEntry<V>>,
	hit_count: u64,
	miss_count: u64,
	next_seq: u64,
}
impl<V> CacheState<V> {
	fn bump_seq(&mut self) -> u64 {
		self.next_seq += 1;

		self.next_seq
	}

	fn evict_lru(&mut self) -> Option<String> {
		let key = self
			.entries
			.iter()
			.min_by_key(|(_, entry)| (entry.last_access, entry.access_seq))
			.map(|(key, _)| key.clone())?;

		self.entries.remove(&key);

		Some(key)
	}
}

/// Keyed store with a fixed time-to-live and least-recently-used eviction at capacity.
///
/// Expired entries are purged lazily on read; a read that finds an expired entry counts as a
/// miss. The store never holds more than `max_size` entries.
pub struct TtlCache<V> {
	max_size: usize,
	ttl: Duration,
	state: Mutex<CacheState<V>>,
}
impl<V> TtlCache<V>
where
	V: Clone,
{
	pub fn new(max_size: usize, ttl: Duration) -> Self {
		Self {
			max_size,
			ttl,
			state: Mutex::new(CacheState {
				entries: HashMap::new(),
				hit_count: 0,
				miss_count: 0,
				next_seq: 0,
			}),
		}
	}

	pub fn max_size(&self) -> usize {
		self.max_size
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	pub fn get(&self, key: &str) -> Option<V> {
		let now = Instant::now();
		let mut guard = self.lock();
		let state = &mut *guard;
		let expired = match state.entries.get(key) {
			Some(entry) => now > entry.expires_at,
			None => {
				state.miss_count += 1;

				return None;
			},
		};

		if expired {
			state.entries.remove(key);

			state.miss_count += 1;

			return None;
		}

		let seq = state.bump_seq();
		let entry = state.entries.get_mut(key)?;

		entry.last_access = now;
		entry.access_seq = seq;

		state.hit_count += 1;

		Some(entry.value.clone())
	}

	pub fn set(&self, key: impl Into<String>, value: V) {
		self.set_with_ttl(key, value, self.ttl);
	}

	/// Stores `value` with a per-entry TTL that overrides the cache default.
	pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
		if self.max_size == 0 {
			return;
		}

		let key = key.into();
		let now = Instant::now();
		let mut guard = self.lock();
		let state = &mut *guard;

		if !state.entries.contains_key(&key)
			&& state.entries.len() >= self.max_size
			&& let Some(evicted) = state.evict_lru()
		{
			tracing::debug!(key = %evicted, "Evicted least recently used cache entry.");
		}

		let seq = state.bump_seq();

		state.entries.insert(
			key,
			CacheEntry {
				value,
				expires_at: now + ttl,
				last_access: now,
				access_seq: seq,
			},
		);
	}

	/// Drops every expired entry without touching the hit and miss counters.
	pub fn purge_expired(&self) -> usize {
		let now = Instant::now();
		let mut state = self.lock();
		let before = state.entries.len();

		state.entries.retain(|_, entry| now <= entry.expires_at);

		before - state.entries.len()
	}

	pub fn clear(&self) {
		let mut state = self.lock();

		state.entries.clear();

		state.hit_count = 0;
		state.miss_count = 0;
	}

	pub fn len(&self) -> usize {
		self.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		let state = self.lock();
		let total = state.hit_count + state.miss_count;
		let hit_rate = if total == 0 { 0.0 } else { state.hit_count as f64 / total as f64 };

		CacheStats {
			size: state.entries.len(),
			max_size: self.max_size,
			hit_count: state.hit_count,
			miss_count: state.miss_count,
			hit_rate,
			ttl_seconds: self.ttl.as_secs(),
		}
	}

	fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
		self.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn lookup_refreshes_recency() {
		let cache = TtlCache::new(2, Duration::from_secs(60));

		cache.set("a", 1);
		tokio::time::advance(Duration::from_secs(1)).await;
		cache.set("b", 2);
		tokio::time::advance(Duration::from_secs(1)).await;

		assert_eq!(cache.get("a"), Some(1));

		cache.set("c", 3);

		assert_eq!(cache.get("b"), None);
		assert_eq!(cache.get("a"), Some(1));
		assert_eq!(cache.get("c"), Some(3));
	}

	#[test]
	fn zero_capacity_stores_nothing() {
		let cache = TtlCache::new(0, Duration::from_secs(60));

		cache.set("a", 1);

		assert!(cache.is_empty());
		assert_eq!(cache.get("a"), None);
	}
}
