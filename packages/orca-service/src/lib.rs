pub mod rebuild;
pub mod report;
pub mod search;
pub mod time_serde;

mod error;

pub use error::{Error, Result};
pub use rebuild::{
	CancelToken, ItemChunks, RebuildOrchestrator, RebuildProgress, RebuildProgressRecord,
	RebuildStatus,
};
pub use report::{CacheOverview, MetricsOverview, PerfReport, SystemStatus};
pub use search::{BatchSearchResponse, WarmupReport};

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, Mutex, MutexGuard, atomic::AtomicU64},
	time::Duration,
};

use serde_json::{Map, Value};

use orca_config::Config;
use orca_perf::{LatencyWindow, QueryTracker, ResourcePool, TtlCache};
use orca_storage::{
	db::Db,
	knowledge,
	models::{KnowledgeItem, SearchHit},
	qdrant::QdrantStore,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of the knowledge items a rebuild walks over.
pub trait KnowledgeRepository
where
	Self: Send + Sync,
{
	/// Lists items in processing order. `None` selects every live item.
	fn list_items<'a>(
		&'a self,
		ids: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<KnowledgeItem>>>;

	fn count_items<'a>(&'a self, ids: Option<&'a [String]>) -> BoxFuture<'a, Result<u64>>;
}

/// Per-item vector index maintenance.
pub trait VectorIndexStore
where
	Self: Send + Sync,
{
	/// Drops a collection. A missing collection is not an error.
	fn delete_collection<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<()>>;

	/// Indexes every chunk of `item` into `collection` and returns the number of chunks written.
	fn index_chunks<'a>(
		&'a self,
		collection: &'a str,
		item: &'a KnowledgeItem,
	) -> BoxFuture<'a, Result<usize>>;
}

pub trait VectorSearchEngine
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		query: &'a str,
		limit: u32,
		filters: Option<&'a Map<String, Value>>,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>>;
}

#[derive(Clone)]
pub struct Backends {
	pub knowledge: Arc<dyn KnowledgeRepository>,
	pub index: Arc<dyn VectorIndexStore>,
	pub search: Arc<dyn VectorSearchEngine>,
}
impl Backends {
	pub fn new(
		knowledge: Arc<dyn KnowledgeRepository>,
		index: Arc<dyn VectorIndexStore>,
		search: Arc<dyn VectorSearchEngine>,
	) -> Self {
		Self { knowledge, index, search }
	}

	/// Backends served by Postgres and Qdrant.
	pub fn from_storage(db: Db, qdrant: QdrantStore) -> Self {
		let storage = Arc::new(StorageBackends { db, qdrant });

		Self { knowledge: storage.clone(), index: storage.clone(), search: storage }
	}
}

/// Cache-backed search, resource gating, reporting, and rebuild control over one set of
/// backends. Clones share all state.
#[derive(Clone)]
pub struct PerfService {
	inner: Arc<PerfInner>,
}
impl PerfService {
	pub fn new(cfg: &Config, backends: Backends) -> Self {
		let rebuilds = RebuildOrchestrator::new(
			backends.knowledge.clone(),
			backends.index.clone(),
			&cfg.rebuild,
		);
		let inner = PerfInner {
			search_cfg: cfg.search.clone(),
			main_cache: TtlCache::new(
				cfg.cache.main.max_size,
				Duration::from_secs(cfg.cache.main.ttl_seconds),
			),
			search_cache: TtlCache::new(
				cfg.cache.search.max_size,
				Duration::from_secs(cfg.cache.search.ttl_seconds),
			),
			pool: ResourcePool::new(cfg.pool.max_concurrency),
			tracker: QueryTracker::new(cfg.tracker.slow_threshold_seconds),
			api_latency: Mutex::new(LatencyWindow::new(cfg.report.max_latency_samples)),
			search_latency: Mutex::new(LatencyWindow::new(cfg.report.max_latency_samples)),
			cache_writes: AtomicU64::new(0),
			backends,
			rebuilds,
		};

		Self { inner: Arc::new(inner) }
	}

	pub fn rebuilds(&self) -> &RebuildOrchestrator {
		&self.inner.rebuilds
	}

	pub fn pool(&self) -> &ResourcePool {
		&self.inner.pool
	}

	pub fn tracker(&self) -> &QueryTracker {
		&self.inner.tracker
	}
}

struct PerfInner {
	search_cfg: orca_config::Search,
	backends: Backends,
	main_cache: TtlCache<Value>,
	search_cache: TtlCache<Vec<SearchHit>>,
	pool: ResourcePool,
	tracker: QueryTracker,
	api_latency: Mutex<LatencyWindow>,
	search_latency: Mutex<LatencyWindow>,
	cache_writes: AtomicU64,
	rebuilds: RebuildOrchestrator,
}

struct StorageBackends {
	db: Db,
	qdrant: QdrantStore,
}

impl KnowledgeRepository for StorageBackends {
	fn list_items<'a>(
		&'a self,
		ids: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<KnowledgeItem>>> {
		Box::pin(async move {
			knowledge::list_items(&self.db.pool, ids)
				.await
				.map_err(|err| Error::Repository { message: err.to_string() })
		})
	}

	fn count_items<'a>(&'a self, ids: Option<&'a [String]>) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			knowledge::count_items(&self.db.pool, ids)
				.await
				.map_err(|err| Error::Repository { message: err.to_string() })
		})
	}
}

impl VectorIndexStore for StorageBackends {
	fn delete_collection<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.qdrant
				.delete_collection(collection)
				.await
				.map_err(|err| Error::Index { message: err.to_string() })
		})
	}

	fn index_chunks<'a>(
		&'a self,
		collection: &'a str,
		item: &'a KnowledgeItem,
	) -> BoxFuture<'a, Result<usize>> {
		Box::pin(async move {
			self.qdrant
				.index_chunks(collection, item)
				.await
				.map_err(|err| Error::Index { message: err.to_string() })
		})
	}
}

impl VectorSearchEngine for StorageBackends {
	fn search<'a>(
		&'a self,
		query: &'a str,
		limit: u32,
		filters: Option<&'a Map<String, Value>>,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			self.qdrant.search(query, limit, filters).await.map_err(|err| match err {
				orca_storage::Error::InvalidArgument(message) => Error::InvalidRequest { message },
				other => Error::Search { message: other.to_string() },
			})
		})
	}
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
