//! In-process performance building blocks: a TTL/LRU cache, a bounded resource pool, a query
//! performance tracker, and a rolling latency window.
//!
//! Every type here is internally synchronized and safe to share across tokio worker threads.

pub mod cache;
pub mod key;
pub mod latency;
pub mod pool;
pub mod tracker;

pub use cache::{CacheStats, TtlCache};
pub use key::cache_key;
pub use latency::{LatencySample, LatencySummary, LatencyWindow};
pub use pool::{PoolPermit, PoolStats, ResourcePool};
pub use tracker::{NO_SUGGESTIONS, QueryStatSummary, QueryTracker};
