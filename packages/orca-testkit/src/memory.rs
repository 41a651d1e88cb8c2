//! In-memory backends with scriptable failures and delays.

use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{
		Mutex, MutexGuard,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, Value};

use orca_service::{
	BoxFuture, Error, KnowledgeRepository, Result, VectorIndexStore, VectorSearchEngine,
};
use orca_storage::models::{KnowledgeItem, SearchHit};

#[derive(Default)]
pub struct MemoryKnowledge {
	items: Mutex<Vec<KnowledgeItem>>,
	list_error: Mutex<Option<String>>,
	count_error: Mutex<Option<String>>,
	count_delay: Duration,
	list_calls: AtomicUsize,
}
impl MemoryKnowledge {
	pub fn new(items: Vec<KnowledgeItem>) -> Self {
		Self { items: Mutex::new(items), ..Default::default() }
	}

	/// Builds `count` items named `item-1..=count`, each with a single chunk.
	pub fn numbered(count: usize) -> Self {
		Self::new(
			(1..=count)
				.map(|idx| {
					KnowledgeItem::new(
						format!("item-{idx}"),
						format!("Item {idx}"),
						vec![format!("chunk for item {idx}")],
					)
				})
				.collect(),
		)
	}

	/// Every `count_items` call sleeps for `delay` first.
	pub fn with_count_delay(mut self, delay: Duration) -> Self {
		self.count_delay = delay;

		self
	}

	pub fn push(&self, item: KnowledgeItem) {
		lock(&self.items).push(item);
	}

	/// Makes every later listing fail with `message`.
	pub fn fail_listing(&self, message: &str) {
		*lock(&self.list_error) = Some(message.to_string());
	}

	pub fn fail_counting(&self, message: &str) {
		*lock(&self.count_error) = Some(message.to_string());
	}

	pub fn list_calls(&self) -> usize {
		self.list_calls.load(Ordering::SeqCst)
	}

	fn select(&self, ids: Option<&[String]>) -> Vec<KnowledgeItem> {
		let items = lock(&self.items);

		match ids {
			Some(ids) => items.iter().filter(|item| ids.contains(&item.id)).cloned().collect(),
			None => items.clone(),
		}
	}
}

impl KnowledgeRepository for MemoryKnowledge {
	fn list_items<'a>(
		&'a self,
		ids: Option<&'a [String]>,
	) -> BoxFuture<'a, Result<Vec<KnowledgeItem>>> {
		Box::pin(async move {
			self.list_calls.fetch_add(1, Ordering::SeqCst);

			if let Some(message) = lock(&self.list_error).clone() {
				return Err(Error::Repository { message });
			}

			Ok(self.select(ids))
		})
	}

	fn count_items<'a>(&'a self, ids: Option<&'a [String]>) -> BoxFuture<'a, Result<u64>> {
		Box::pin(async move {
			if !self.count_delay.is_zero() {
				tokio::time::sleep(self.count_delay).await;
			}

			if let Some(message) = lock(&self.count_error).clone() {
				return Err(Error::Repository { message });
			}

			Ok(self.select(ids).len() as u64)
		})
	}
}

#[derive(Default)]
pub struct MemoryIndex {
	delay: Duration,
	failing_items: Mutex<HashSet<String>>,
	panicking_items: Mutex<HashSet<String>>,
	failing_deletes: AtomicBool,
	collections: Mutex<BTreeMap<String, Vec<String>>>,
	indexed: Mutex<Vec<String>>,
	deleted: Mutex<Vec<String>>,
}
impl MemoryIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Every `index_chunks` call sleeps for `delay` before doing its work.
	pub fn with_delay(delay: Duration) -> Self {
		Self { delay, ..Default::default() }
	}

	pub fn fail_item(&self, item_id: &str) {
		lock(&self.failing_items).insert(item_id.to_string());
	}

	/// Makes `index_chunks` panic for `item_id`.
	pub fn panic_on_item(&self, item_id: &str) {
		lock(&self.panicking_items).insert(item_id.to_string());
	}

	pub fn fail_deletes(&self) {
		self.failing_deletes.store(true, Ordering::SeqCst);
	}

	/// Item ids in the order they were successfully indexed.
	pub fn indexed_items(&self) -> Vec<String> {
		lock(&self.indexed).clone()
	}

	pub fn deleted_collections(&self) -> Vec<String> {
		lock(&self.deleted).clone()
	}

	pub fn collection(&self, name: &str) -> Option<Vec<String>> {
		lock(&self.collections).get(name).cloned()
	}
}

impl VectorIndexStore for MemoryIndex {
	fn delete_collection<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if self.failing_deletes.load(Ordering::SeqCst) {
				return Err(Error::Index { message: format!("Cannot delete {collection}.") });
			}

			lock(&self.collections).remove(collection);
			lock(&self.deleted).push(collection.to_string());

			Ok(())
		})
	}

	fn index_chunks<'a>(
		&'a self,
		collection: &'a str,
		item: &'a KnowledgeItem,
	) -> BoxFuture<'a, Result<usize>> {
		Box::pin(async move {
			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}

			let panics = lock(&self.panicking_items).contains(&item.id);

			if panics {
				panic!("Index backend crashed on {}.", item.id);
			}

			if lock(&self.failing_items).contains(&item.id) {
				return Err(Error::Index { message: format!("Cannot index {}.", item.id) });
			}

			lock(&self.collections).insert(collection.to_string(), item.content.clone());
			lock(&self.indexed).push(item.id.clone());

			Ok(item.content.len())
		})
	}
}

#[derive(Default)]
pub struct StubSearch {
	delay: Duration,
	hits: Mutex<HashMap<String, Vec<SearchHit>>>,
	failing: Mutex<HashSet<String>>,
	calls: AtomicUsize,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
}
impl StubSearch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_delay(delay: Duration) -> Self {
		Self { delay, ..Default::default() }
	}

	pub fn set_hits(&self, query: &str, hits: Vec<SearchHit>) {
		lock(&self.hits).insert(query.to_string(), hits);
	}

	pub fn fail_query(&self, query: &str) {
		lock(&self.failing).insert(query.to_string());
	}

	pub fn recover_query(&self, query: &str) {
		lock(&self.failing).remove(query);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// Highest number of searches observed running at the same time.
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}
}

impl VectorSearchEngine for StubSearch {
	fn search<'a>(
		&'a self,
		query: &'a str,
		limit: u32,
		_filters: Option<&'a Map<String, Value>>,
	) -> BoxFuture<'a, Result<Vec<SearchHit>>> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

			self.max_in_flight.fetch_max(now, Ordering::SeqCst);

			if !self.delay.is_zero() {
				tokio::time::sleep(self.delay).await;
			}

			self.in_flight.fetch_sub(1, Ordering::SeqCst);

			if lock(&self.failing).contains(query) {
				return Err(Error::Search { message: format!("Search for {query} failed.") });
			}

			let mut hits = lock(&self.hits).get(query).cloned().unwrap_or_default();

			hits.truncate(limit as usize);

			Ok(hits)
		})
	}
}

pub fn hit(id: &str, score: f32) -> SearchHit {
	let mut payload = Map::new();

	payload.insert("item_id".to_string(), Value::String(id.to_string()));

	SearchHit { id: id.to_string(), score, payload }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
