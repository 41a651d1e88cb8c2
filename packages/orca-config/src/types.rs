use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub pool: Pool,
	#[serde(default)]
	pub tracker: Tracker,
	#[serde(default)]
	pub rebuild: Rebuild,
	#[serde(default)]
	pub search: Search,
	#[serde(default)]
	pub report: Report,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	/// Collection queried by the search facade. Per-item rebuild collections are named from
	/// `rebuild.collection_prefix` instead.
	pub search_collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cache {
	#[serde(default = "default_main_cache")]
	pub main: CacheLayer,
	#[serde(default = "default_search_cache")]
	pub search: CacheLayer,
}
impl Default for Cache {
	fn default() -> Self {
		Self { main: default_main_cache(), search: default_search_cache() }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheLayer {
	pub max_size: usize,
	pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pool {
	pub max_concurrency: usize,
}
impl Default for Pool {
	fn default() -> Self {
		Self { max_concurrency: 25 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Tracker {
	pub slow_threshold_seconds: f64,
}
impl Default for Tracker {
	fn default() -> Self {
		Self { slow_threshold_seconds: 1.0 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rebuild {
	pub max_history: usize,
	pub collection_prefix: String,
}
impl Default for Rebuild {
	fn default() -> Self {
		Self { max_history: 100, collection_prefix: "knowledge-".to_string() }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Search {
	pub default_limit: u32,
	pub warmup_limit: u32,
	pub max_batch_queries: usize,
}
impl Default for Search {
	fn default() -> Self {
		Self { default_limit: 10, warmup_limit: 5, max_batch_queries: 50 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Report {
	pub max_latency_samples: usize,
}
impl Default for Report {
	fn default() -> Self {
		Self { max_latency_samples: 1_000 }
	}
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_main_cache() -> CacheLayer {
	CacheLayer { max_size: 2_000, ttl_seconds: 1_800 }
}

fn default_search_cache() -> CacheLayer {
	CacheLayer { max_size: 500, ttl_seconds: 900 }
}
