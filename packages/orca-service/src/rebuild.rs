//! Background rebuild of per-item vector indexes.
//!
//! A task moves `pending -> running -> {completed, failed, cancelled}`. While it runs it lives
//! in the active registry; once terminal it moves to a bounded history, oldest evicted first.
//! Cancellation is cooperative and observed between items.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, Ordering},
	},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, KnowledgeRepository, PerfService, Result, VectorIndexStore, lock};
use orca_storage::models::KnowledgeItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildStatus {
	Pending,
	Running,
	Completed,
	Failed,
	Cancelled,
}
impl RebuildStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Running => "running",
			Self::Completed => "completed",
			Self::Failed => "failed",
			Self::Cancelled => "cancelled",
		}
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChunks {
	pub item_id: String,
	pub chunks: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RebuildProgress {
	pub task_id: String,
	pub requester_id: String,
	pub status: RebuildStatus,
	pub progress_percent: f64,
	pub processed_count: u64,
	pub total_count: u64,
	pub current_item_id: Option<String>,
	pub current_item_name: Option<String>,
	pub chunks_processed: u64,
	/// Chunk counts of successfully rebuilt items, in processing order.
	pub item_chunks: Vec<ItemChunks>,
	pub cancel_requested: bool,
	pub start_time: OffsetDateTime,
	pub end_time: Option<OffsetDateTime>,
	pub duration_seconds: Option<f64>,
	pub error_message: Option<String>,
	pub failed_item_ids: Vec<String>,
}
impl RebuildProgress {
	fn pending(task_id: &str, requester_id: &str) -> Self {
		Self {
			task_id: task_id.to_string(),
			requester_id: requester_id.to_string(),
			status: RebuildStatus::Pending,
			progress_percent: 0.0,
			processed_count: 0,
			total_count: 0,
			current_item_id: None,
			current_item_name: None,
			chunks_processed: 0,
			item_chunks: Vec::new(),
			cancel_requested: false,
			start_time: OffsetDateTime::now_utc(),
			end_time: None,
			duration_seconds: None,
			error_message: None,
			failed_item_ids: Vec::new(),
		}
	}

	pub fn to_record(&self) -> RebuildProgressRecord {
		RebuildProgressRecord {
			task_id: self.task_id.clone(),
			requester_id: self.requester_id.clone(),
			status: self.status.as_str().to_string(),
			progress: self.progress_percent,
			processed_count: self.processed_count,
			total_count: self.total_count,
			current_item_id: self.current_item_id.clone(),
			current_item_name: self.current_item_name.clone(),
			chunks_processed: self.chunks_processed,
			item_chunks: self.item_chunks.clone(),
			cancel_requested: self.cancel_requested,
			start_time: self.start_time,
			end_time: self.end_time,
			duration_seconds: self.duration_seconds,
			error_message: self.error_message.clone(),
			failed_item_ids: self.failed_item_ids.clone(),
		}
	}

	fn mark_processed(&mut self) {
		self.processed_count += 1;

		if self.total_count > 0 {
			self.progress_percent = self.processed_count as f64 / self.total_count as f64 * 100.0;
		}
	}

	fn finish(&mut self, status: RebuildStatus) {
		let end_time = OffsetDateTime::now_utc();

		self.status = status;
		self.end_time = Some(end_time);
		self.duration_seconds = Some((end_time - self.start_time).as_seconds_f64().max(0.0));
	}
}

/// Flat, serializable view of a [`RebuildProgress`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebuildProgressRecord {
	pub task_id: String,
	pub requester_id: String,
	pub status: String,
	pub progress: f64,
	pub processed_count: u64,
	pub total_count: u64,
	pub current_item_id: Option<String>,
	pub current_item_name: Option<String>,
	pub chunks_processed: u64,
	pub item_chunks: Vec<ItemChunks>,
	pub cancel_requested: bool,
	#[serde(with = "crate::time_serde")]
	pub start_time: OffsetDateTime,
	#[serde(default, with = "crate::time_serde::option")]
	pub end_time: Option<OffsetDateTime>,
	pub duration_seconds: Option<f64>,
	pub error_message: Option<String>,
	pub failed_item_ids: Vec<String>,
}

/// Advisory stop flag shared between the orchestrator and one running task.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

#[derive(Clone)]
pub struct RebuildOrchestrator {
	inner: Arc<OrchestratorInner>,
}
impl RebuildOrchestrator {
	pub fn new(
		knowledge: Arc<dyn KnowledgeRepository>,
		index: Arc<dyn VectorIndexStore>,
		cfg: &orca_config::Rebuild,
	) -> Self {
		let inner = OrchestratorInner {
			knowledge,
			index,
			collection_prefix: cfg.collection_prefix.clone(),
			max_history: cfg.max_history,
			active: Mutex::new(HashMap::new()),
			history: Mutex::new(VecDeque::new()),
		};

		Self { inner: Arc::new(inner) }
	}

	/// Registers a task and spawns its execution on the current tokio runtime.
	///
	/// Returns the pending snapshot without waiting for any item to be processed.
	pub async fn start(
		&self,
		task_id: &str,
		item_ids: Option<Vec<String>>,
		requester_id: &str,
	) -> Result<RebuildProgress> {
		if task_id.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "task_id must be non-empty.".to_string() });
		}

		let total_count = match self.inner.knowledge.count_items(item_ids.as_deref()).await {
			Ok(count) => count,
			Err(err) => {
				tracing::warn!(
					error = %err,
					task_id,
					"Rebuild item count failed. Starting from zero."
				);

				0
			},
		};
		let mut pending = RebuildProgress::pending(task_id, requester_id);

		pending.total_count = total_count;

		let snapshot = pending.clone();
		let progress = Arc::new(Mutex::new(pending));
		let token = CancelToken::new();

		// Registration and spawn must stay free of awaits in between.
		{
			let mut active = lock(&self.inner.active);

			if active.contains_key(task_id) {
				return Err(Error::DuplicateTask { task_id: task_id.to_string() });
			}

			active.insert(
				task_id.to_string(),
				ActiveTask { progress: progress.clone(), token: token.clone() },
			);
			lock(&self.inner.history).retain(|entry| entry.task_id != task_id);
		}

		tokio::spawn(supervise(self.inner.clone(), progress, token, item_ids));
		tracing::info!(task_id, requester_id, total_count, "Rebuild task started.");

		Ok(snapshot)
	}

	/// Requests cancellation of a running task.
	///
	/// Returns `false` when the task is unknown or not running.
	pub fn cancel(&self, task_id: &str) -> bool {
		let active = lock(&self.inner.active);
		let Some(task) = active.get(task_id) else {
			return false;
		};
		let mut progress = lock(&task.progress);

		if progress.status != RebuildStatus::Running {
			return false;
		}

		progress.cancel_requested = true;

		task.token.cancel();
		tracing::info!(task_id, "Rebuild cancellation requested.");

		true
	}

	/// Looks up a task in the active registry, then in history.
	pub fn get_progress(&self, task_id: &str) -> Option<RebuildProgress> {
		{
			let active = lock(&self.inner.active);

			if let Some(task) = active.get(task_id) {
				return Some(lock(&task.progress).clone());
			}
		}

		lock(&self.inner.history).iter().find(|entry| entry.task_id == task_id).cloned()
	}

	/// Active tasks ordered by start time.
	pub fn list_active(&self) -> Vec<RebuildProgress> {
		let mut tasks = lock(&self.inner.active)
			.values()
			.map(|task| lock(&task.progress).clone())
			.collect::<Vec<_>>();

		tasks.sort_by(|a, b| {
			a.start_time.cmp(&b.start_time).then_with(|| a.task_id.cmp(&b.task_id))
		});

		tasks
	}

	/// The `limit` most recent terminal tasks, oldest first.
	pub fn history(&self, limit: usize) -> Vec<RebuildProgress> {
		let history = lock(&self.inner.history);

		history.iter().skip(history.len().saturating_sub(limit)).cloned().collect()
	}
}

struct ActiveTask {
	progress: Arc<Mutex<RebuildProgress>>,
	token: CancelToken,
}

struct OrchestratorInner {
	knowledge: Arc<dyn KnowledgeRepository>,
	index: Arc<dyn VectorIndexStore>,
	collection_prefix: String,
	max_history: usize,
	// Lock order: `active` before `history`, `active` before any task's progress.
	active: Mutex<HashMap<String, ActiveTask>>,
	history: Mutex<VecDeque<RebuildProgress>>,
}
impl OrchestratorInner {
	async fn rebuild_item(&self, item: &KnowledgeItem) -> Result<u64> {
		let collection = format!("{}{}", self.collection_prefix, item.id);

		if let Err(err) = self.index.delete_collection(&collection).await {
			tracing::warn!(error = %err, collection = %collection, "Stale collection delete failed.");
		}

		let chunks = self.index.index_chunks(&collection, item).await?;

		Ok(chunks as u64)
	}

	fn retire(&self, snapshot: RebuildProgress) {
		let mut active = lock(&self.active);
		let mut history = lock(&self.history);

		active.remove(&snapshot.task_id);
		history.retain(|entry| entry.task_id != snapshot.task_id);
		history.push_back(snapshot);

		while history.len() > self.max_history {
			history.pop_front();
		}
	}
}

impl PerfService {
	/// Starts a rebuild. A missing `task_id` gets a generated `rebuild-{uuid}` id.
	pub async fn start_rebuild(
		&self,
		task_id: Option<&str>,
		item_ids: Option<Vec<String>>,
		requester_id: &str,
	) -> Result<RebuildProgress> {
		let task_id = match task_id.map(str::trim).filter(|id| !id.is_empty()) {
			Some(task_id) => task_id.to_string(),
			None => format!("rebuild-{}", Uuid::new_v4()),
		};

		self.inner.rebuilds.start(&task_id, item_ids, requester_id).await
	}

	pub fn get_progress(&self, task_id: &str) -> Result<RebuildProgress> {
		self.inner.rebuilds.get_progress(task_id).ok_or_else(|| Error::NotFound {
			message: format!("Rebuild task {task_id} does not exist."),
		})
	}

	pub fn list_active_rebuilds(&self) -> Vec<RebuildProgress> {
		self.inner.rebuilds.list_active()
	}

	pub fn cancel_rebuild(&self, task_id: &str) -> bool {
		self.inner.rebuilds.cancel(task_id)
	}

	pub fn rebuild_history(&self, limit: usize) -> Vec<RebuildProgress> {
		self.inner.rebuilds.history(limit)
	}
}

/// Runs [`execute`] as its own task so a panicking backend still ends in a FAILED history entry.
async fn supervise(
	inner: Arc<OrchestratorInner>,
	progress: Arc<Mutex<RebuildProgress>>,
	token: CancelToken,
	item_ids: Option<Vec<String>>,
) {
	let run = tokio::spawn(execute(inner.clone(), progress.clone(), token, item_ids));
	let Err(err) = run.await else {
		return;
	};
	let snapshot = {
		let mut progress = lock(&progress);

		progress.error_message = Some(format!("Rebuild task aborted: {err}."));

		progress.finish(RebuildStatus::Failed);

		progress.clone()
	};

	tracing::error!(error = %err, task_id = %snapshot.task_id, "Rebuild task aborted.");
	inner.retire(snapshot);
}

async fn execute(
	inner: Arc<OrchestratorInner>,
	progress: Arc<Mutex<RebuildProgress>>,
	token: CancelToken,
	item_ids: Option<Vec<String>>,
) {
	let task_id = {
		let mut progress = lock(&progress);

		progress.status = RebuildStatus::Running;

		progress.task_id.clone()
	};
	let items = match inner.knowledge.list_items(item_ids.as_deref()).await {
		Ok(items) => items,
		Err(err) => {
			tracing::error!(error = %err, task_id = %task_id, "Rebuild task failed.");

			let snapshot = {
				let mut progress = lock(&progress);

				progress.error_message = Some(err.to_string());

				progress.finish(RebuildStatus::Failed);

				progress.clone()
			};

			inner.retire(snapshot);

			return;
		},
	};

	lock(&progress).total_count = items.len() as u64;

	let mut cancelled = false;

	for item in &items {
		if token.is_cancelled() {
			cancelled = true;

			break;
		}

		{
			let mut progress = lock(&progress);

			progress.current_item_id = Some(item.id.clone());
			progress.current_item_name = Some(item.name.clone());
		}

		let outcome = inner.rebuild_item(item).await;

		{
			let mut progress = lock(&progress);

			match outcome {
				Ok(chunks) => {
					tracing::debug!(task_id = %task_id, item_id = %item.id, chunks, "Item rebuilt.");

					progress.chunks_processed += chunks;
					progress.item_chunks.push(ItemChunks { item_id: item.id.clone(), chunks });
				},
				Err(err) => {
					tracing::warn!(
						error = %err,
						task_id = %task_id,
						item_id = %item.id,
						"Item rebuild failed."
					);

					progress.failed_item_ids.push(item.id.clone());
				},
			}

			progress.mark_processed();
		}
	}

	let snapshot = {
		let mut progress = lock(&progress);

		if cancelled {
			progress.finish(RebuildStatus::Cancelled);
		} else {
			progress.progress_percent = 100.0;
			progress.current_item_id = None;
			progress.current_item_name = None;

			progress.finish(RebuildStatus::Completed);
		}

		progress.clone()
	};

	tracing::info!(
		task_id = %task_id,
		status = snapshot.status.as_str(),
		processed_count = snapshot.processed_count,
		failed_count = snapshot.failed_item_ids.len(),
		"Rebuild task finished."
	);
	inner.retire(snapshot);
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn record_renders_lowercase_status_and_rfc3339_times() {
		let mut progress = RebuildProgress::pending("rebuild-1", "admin");

		progress.finish(RebuildStatus::Cancelled);

		let record = serde_json::to_value(progress.to_record()).expect("record serializes");

		assert_eq!(record["status"], "cancelled");
		assert!(record["start_time"].as_str().is_some_and(|raw| raw.contains('T')));
		assert!(record["end_time"].is_string());
		assert!(record["duration_seconds"].as_f64().is_some_and(|secs| secs >= 0.0));
	}

	#[test]
	fn record_round_trips_through_json() {
		let progress = RebuildProgress::pending("rebuild-2", "admin");
		let record = progress.to_record();
		let raw = serde_json::to_string(&record).expect("record serializes");
		let parsed: RebuildProgressRecord = serde_json::from_str(&raw).expect("record parses");

		assert_eq!(parsed.task_id, "rebuild-2");
		assert_eq!(parsed.end_time, None);
		assert_eq!(parsed.start_time.unix_timestamp(), progress.start_time.unix_timestamp());
	}

	#[test]
	fn progress_percent_follows_processed_count() {
		let mut progress = RebuildProgress::pending("rebuild-3", "admin");

		progress.total_count = 4;

		progress.mark_processed();

		assert_eq!(progress.progress_percent, 25.0);
		assert!(!progress.status.is_terminal());
	}
}
