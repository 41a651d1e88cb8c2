use std::{
	collections::VecDeque,
	sync::{Arc, Mutex, MutexGuard},
	time::Duration,
};

use serde::Serialize;
use tokio::{sync::oneshot, time::Instant};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolStats {
	pub max_concurrency: usize,
	pub current_active: usize,
	pub peak_usage: usize,
	pub total_acquired: u64,
	pub total_released: u64,
	/// Mean seconds spent queued, over callers that had to wait.
	pub average_wait_time: f64,
	pub waiting: usize,
	pub utilization_rate: f64,
}

struct PoolState {
	active: usize,
	peak: usize,
	total_acquired: u64,
	total_released: u64,
	total_wait: Duration,
	wait_samples: u64,
	waiters: VecDeque<oneshot::Sender<()>>,
}

struct PoolInner {
	max: usize,
	state: Mutex<PoolState>,
}

/// Bounded-concurrency gate with a FIFO wait queue.
///
/// `acquire` never times out. A released slot is handed straight to the oldest live waiter, so
/// the active count never exceeds the configured maximum.
#[derive(Clone)]
pub struct ResourcePool {
	inner: Arc<PoolInner>,
}
impl ResourcePool {
	pub fn new(max_concurrency: usize) -> Self {
		Self {
			inner: Arc::new(PoolInner {
				max: max_concurrency.max(1),
				state: Mutex::new(PoolState {
					active: 0,
					peak: 0,
					total_acquired: 0,
					total_released: 0,
					total_wait: Duration::ZERO,
					wait_samples: 0,
					waiters: VecDeque::new(),
				}),
			}),
		}
	}

	pub fn max_concurrency(&self) -> usize {
		self.inner.max
	}

	pub fn active(&self) -> usize {
		self.lock().active
	}

	pub async fn acquire(&self) -> PoolPermit {
		let started = Instant::now();

		loop {
			let rx = {
				let mut state = self.lock();

				if state.active < self.inner.max {
					state.active += 1;
					state.total_acquired += 1;
					state.peak = state.peak.max(state.active);

					return PoolPermit { pool: self.clone() };
				}

				let (tx, rx) = oneshot::channel();

				state.waiters.push_back(tx);

				rx
			};
			let mut waiter = Waiter { pool: self, rx, settled: false };
			let handed_over = (&mut waiter.rx).await.is_ok();

			waiter.settled = true;

			if handed_over {
				let waited = started.elapsed();
				let mut state = self.lock();

				state.total_wait += waited;
				state.wait_samples += 1;

				return PoolPermit { pool: self.clone() };
			}
		}
	}

	pub fn stats(&self) -> PoolStats {
		let state = self.lock();
		let average_wait_time = if state.wait_samples == 0 {
			0.0
		} else {
			state.total_wait.as_secs_f64() / state.wait_samples as f64
		};

		PoolStats {
			max_concurrency: self.inner.max,
			current_active: state.active,
			peak_usage: state.peak,
			total_acquired: state.total_acquired,
			total_released: state.total_released,
			average_wait_time,
			waiting: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
			utilization_rate: state.active as f64 / self.inner.max as f64 * 100.0,
		}
	}

	fn release(&self) {
		let mut state = self.lock();

		state.total_released += 1;

		while let Some(tx) = state.waiters.pop_front() {
			if tx.send(()).is_ok() {
				state.total_acquired += 1;

				return;
			}
		}

		state.active = state.active.saturating_sub(1);
	}

	fn lock(&self) -> MutexGuard<'_, PoolState> {
		self.inner.state.lock().unwrap_or_else(|err| err.into_inner())
	}
}

/// A held pool slot. Dropping the permit releases the slot.
pub struct PoolPermit {
	pool: ResourcePool,
}
impl PoolPermit {
	pub fn release(self) {}
}
impl Drop for PoolPermit {
	fn drop(&mut self) {
		self.pool.release();
	}
}

// Returns a slot that was handed over after the acquiring future was dropped.
struct Waiter<'a> {
	pool: &'a ResourcePool,
	rx: oneshot::Receiver<()>,
	settled: bool,
}
impl Drop for Waiter<'_> {
	fn drop(&mut self) {
		if self.settled {
			return;
		}

		self.rx.close();

		if self.rx.try_recv().is_ok() {
			drop(PoolPermit { pool: self.pool.clone() });
		}
	}
}
