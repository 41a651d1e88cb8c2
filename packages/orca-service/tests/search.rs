use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use orca_service::{Backends, Error, PerfService, SystemStatus};
use orca_testkit::{MemoryIndex, MemoryKnowledge, StubSearch, hit};

fn service_with(search: StubSearch, cfg: orca_config::Config) -> (PerfService, Arc<StubSearch>) {
	let search = Arc::new(search);
	let backends = Backends::new(
		Arc::new(MemoryKnowledge::default()),
		Arc::new(MemoryIndex::new()),
		search.clone(),
	);

	(PerfService::new(&cfg, backends), search)
}

fn service(search: StubSearch) -> (PerfService, Arc<StubSearch>) {
	service_with(search, orca_testkit::test_config())
}

fn queries(raw: &[&str]) -> Vec<String> {
	raw.iter().map(|query| query.to_string()).collect()
}

#[tokio::test]
async fn repeated_search_is_served_from_cache() {
	let (service, search) = service(StubSearch::new());

	search.set_hits("rust", vec![hit("a", 0.9), hit("b", 0.4)]);

	let first = service.search("rust", None, None).await.expect("search failed");
	let second = service.search("rust", None, None).await.expect("search failed");

	assert_eq!(first, second);
	assert_eq!(first.len(), 2);
	assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn empty_results_are_cached_too() {
	let (service, search) = service(StubSearch::new());

	assert!(service.search("nothing", None, None).await.expect("search failed").is_empty());
	assert!(service.search("nothing", None, None).await.expect("search failed").is_empty());
	assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn filters_and_limits_are_part_of_the_cache_identity() {
	let (service, search) = service(StubSearch::new());
	let filters = serde_json::json!({ "item_id": "kb-1" });
	let filters = filters.as_object().expect("object");

	service.search("rust", Some(3), None).await.expect("search failed");
	service.search("rust", Some(4), None).await.expect("search failed");
	service.search("rust", Some(3), Some(filters)).await.expect("search failed");
	service.search("rust", Some(3), Some(filters)).await.expect("search failed");

	assert_eq!(search.calls(), 3);
}

#[tokio::test]
async fn failed_search_is_returned_and_not_cached() {
	let (service, search) = service(StubSearch::new());

	search.fail_query("boom");

	assert!(matches!(service.search("boom", None, None).await, Err(Error::Search { .. })));

	search.recover_query("boom");

	assert!(service.search("boom", None, None).await.is_ok());
	assert_eq!(search.calls(), 2);
}

#[tokio::test]
async fn zero_limit_is_rejected() {
	let (service, search) = service(StubSearch::new());

	assert!(matches!(
		service.search("rust", Some(0), None).await,
		Err(Error::InvalidRequest { .. })
	));
	assert_eq!(search.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_searches_are_tracked() {
	let (service, _search) = service(StubSearch::with_delay(Duration::from_millis(1_500)));

	service.search("slow", None, None).await.expect("search failed");

	let stats = service.tracker().stats();

	assert_eq!(stats["vector_search"].total_queries, 1);
	assert_eq!(stats["vector_search"].slow_query_count, 1);
}

#[tokio::test]
async fn batch_search_shares_cache_entries_with_single_search() {
	let (service, search) = service(StubSearch::new());

	search.set_hits("rust", vec![hit("a", 0.9)]);
	search.set_hits("go", vec![hit("b", 0.8)]);
	service.search("rust", None, None).await.expect("search failed");

	let response =
		service.batch_search(&queries(&["rust", "go"]), None).await.expect("batch failed");

	assert_eq!(response.cached_queries, 1);
	assert_eq!(response.searched_queries, 1);
	assert_eq!(response.results["rust"][0].id, "a");
	assert_eq!(response.results["go"][0].id, "b");
	assert_eq!(search.calls(), 2);

	service.search("go", None, None).await.expect("search failed");

	assert_eq!(search.calls(), 2);
}

#[tokio::test]
async fn batch_failure_maps_to_empty_result_and_stays_uncached() {
	let (service, search) = service(StubSearch::new());

	search.set_hits("ok", vec![hit("a", 1.0)]);
	search.fail_query("bad");

	let response =
		service.batch_search(&queries(&["bad", "ok", "bad"]), None).await.expect("batch failed");

	assert_eq!(response.results.len(), 2);
	assert!(response.results["bad"].is_empty());
	assert_eq!(response.results["ok"].len(), 1);
	assert_eq!(response.failed_queries, vec!["bad".to_string()]);
	assert_eq!(search.calls(), 2);

	search.recover_query("bad");
	service.batch_search(&queries(&["bad"]), None).await.expect("batch failed");

	assert_eq!(search.calls(), 3);
	assert_eq!(service.tracker().stats()["batch_vector_search"].total_queries, 2);
}

#[tokio::test]
async fn fully_cached_batch_is_not_timed() {
	let (service, search) = service(StubSearch::new());

	service.search("rust", None, None).await.expect("search failed");

	let response = service.batch_search(&queries(&["rust"]), None).await.expect("batch failed");

	assert_eq!(response.cached_queries, 1);
	assert_eq!(search.calls(), 1);
	assert!(!service.tracker().stats().contains_key("batch_vector_search"));

	service.batch_search(&queries(&["rust", "go", "zig"]), None).await.expect("batch failed");

	let stats = service.tracker().stats();

	assert_eq!(stats["batch_vector_search"].total_queries, 1);
	assert_eq!(stats["batch_vector_search"].avg_result_count, 2.0);
}

#[tokio::test]
async fn empty_filters_reuse_the_unfiltered_entry() {
	let (service, search) = service(StubSearch::new());
	let empty = serde_json::Map::new();

	service.search("rust", Some(3), None).await.expect("search failed");
	service.search("rust", Some(3), Some(&empty)).await.expect("search failed");

	assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn oversized_batch_is_rejected() {
	let (service, search) = service(StubSearch::new());
	let too_many = (0..51).map(|idx| format!("q{idx}")).collect::<Vec<_>>();

	assert!(matches!(
		service.batch_search(&too_many, None).await,
		Err(Error::InvalidRequest { .. })
	));
	assert_eq!(search.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn batch_sub_searches_respect_the_pool() {
	let mut cfg = orca_testkit::test_config();

	cfg.pool.max_concurrency = 2;

	let (service, search) = service_with(StubSearch::with_delay(Duration::from_millis(10)), cfg);
	let batch = (0..8).map(|idx| format!("q{idx}")).collect::<Vec<_>>();
	let response = service.batch_search(&batch, Some(3)).await.expect("batch failed");
	let stats = service.pool().stats();

	assert_eq!(response.results.len(), 8);
	assert_eq!(search.calls(), 8);
	assert!(search.max_in_flight() <= 2, "Saw {} concurrent searches.", search.max_in_flight());
	assert_eq!(stats.total_acquired, 8);
	assert_eq!(stats.current_active, 0);
	assert!(stats.peak_usage <= 2);
}

#[tokio::test]
async fn warmup_continues_past_failures() {
	let (service, search) = service(StubSearch::new());

	search.fail_query("b");

	let report = service.warmup(&queries(&["a", "b", "c"])).await;

	assert_eq!(report.requested, 3);
	assert_eq!(report.processed, 2);
	assert_eq!(report.failed, 1);
	assert_eq!(report.cache.size, 2);

	service.search("a", Some(5), None).await.expect("search failed");

	assert_eq!(search.calls(), 3);
}

#[tokio::test]
async fn cached_computation_runs_once_per_key() {
	let (service, _search) = service(StubSearch::new());
	let counter = AtomicUsize::new(0);
	let runs = &counter;
	let params = serde_json::json!({ "knowledge_id": "kb-1" });

	for _ in 0..3 {
		let value: Vec<u32> = service
			.cached("knowledge_stats", &params, None, || async move {
				runs.fetch_add(1, Ordering::SeqCst);

				Ok(vec![1, 2, 3])
			})
			.await
			.expect("cached call failed");

		assert_eq!(value, vec![1, 2, 3]);
	}

	assert_eq!(counter.load(Ordering::SeqCst), 1);
	assert_eq!(service.report().cache_operations, 1);
}

#[tokio::test]
async fn cached_errors_are_not_stored() {
	let (service, _search) = service(StubSearch::new());
	let counter = AtomicUsize::new(0);
	let runs = &counter;

	for _ in 0..2 {
		let outcome: Result<String, Error> = service
			.cached("flaky", "same", None, || async move {
				runs.fetch_add(1, Ordering::SeqCst);

				Err(Error::Repository { message: "offline".to_string() })
			})
			.await;

		assert!(outcome.is_err());
	}

	assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn cached_ttl_override_expires_entries() {
	let (service, _search) = service(StubSearch::new());
	let counter = AtomicUsize::new(0);
	let runs = &counter;
	let compute = || async move {
		runs.fetch_add(1, Ordering::SeqCst);

		Ok(7_u8)
	};

	service.cached("short", &1, Some(Duration::from_secs(1)), compute).await.expect("cached");
	tokio::time::advance(Duration::from_secs(2)).await;
	service.cached("short", &1, Some(Duration::from_secs(1)), compute).await.expect("cached");

	assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn report_collects_every_section() {
	let (service, search) = service(StubSearch::new());

	search.set_hits("rust", vec![hit("a", 0.9)]);
	service.search("rust", None, None).await.expect("search failed");
	service.search("rust", None, None).await.expect("search failed");
	service.record_api_latency("/api/v1/knowledge/search", 0.5);
	service.record_api_latency("/api/v1/knowledge/search", 1.5);
	service.record_api_latency("/api/v1/knowledge/search", f64::NAN);

	let report = service.report();

	assert_eq!(report.cache_performance.search_cache.hit_count, 1);
	assert_eq!(report.cache_performance.search_cache.miss_count, 1);
	assert_eq!(report.api_performance.count, 2);
	assert_eq!(report.api_performance.avg_time, 1.0);
	assert_eq!(report.vector_search_performance.count, 1);
	assert_eq!(report.query_performance["vector_search"].total_queries, 1);
	assert_eq!(report.resource_pool.total_acquired, 1);
	assert_eq!(report.cache_operations, 1);
	assert!(!report.optimization_suggestions.is_empty());

	let raw = serde_json::to_value(&report).expect("report serializes");

	assert!(raw["timestamp"].is_string());
}

#[tokio::test(start_paused = true)]
async fn report_drops_expired_entries_without_touching_counters() {
	let (service, _search) = service(StubSearch::new());

	service.search("rust", None, None).await.expect("search failed");
	tokio::time::advance(Duration::from_secs(901)).await;

	let stats = service.report().cache_performance.search_cache;

	assert_eq!(stats.size, 0);
	assert_eq!(stats.miss_count, 1);
	assert_eq!(stats.hit_count, 0);
}

#[tokio::test]
async fn metrics_status_follows_main_cache_hit_rate() {
	let (service, _search) = service(StubSearch::new());

	assert_eq!(service.metrics().system_status, SystemStatus::NeedsOptimization);

	for _ in 0..4 {
		service.cached("lookup", "key", None, || async { Ok(1_u32) }).await.expect("cached");
	}

	let metrics = service.metrics();

	assert_eq!(metrics.main_cache_hit_rate, 0.75);
	assert_eq!(metrics.system_status, SystemStatus::Optimal);
	assert_eq!(serde_json::to_value(metrics.system_status).expect("status"), "optimal");
}

#[tokio::test]
async fn clearing_caches_forces_fresh_searches() {
	let (service, search) = service(StubSearch::new());

	service.search("rust", None, None).await.expect("search failed");
	service.clear_caches();

	let stats = service.report().cache_performance.search_cache;

	assert_eq!(stats.size, 0);
	assert_eq!(stats.hit_count + stats.miss_count, 0);

	service.search("rust", None, None).await.expect("search failed");

	assert_eq!(search.calls(), 2);
}
