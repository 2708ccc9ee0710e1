// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Composable quiescence barriers over serial lanes.
//!
//! A [`Barrier`] knows how to install a callback at the end of one lane's
//! queue. Sequencing and grouping produce new barriers, so "await quiescence
//! across several lanes in a defined order" is one value built with
//! [`Barrier::sequence`] and [`Barrier::all`] and awaited with
//! [`Barrier::wait`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

type Callback = Box<dyn FnOnce() + Send>;

/// A quiescence point on one or more serial lanes.
///
/// Installing a callback enqueues it behind all work submitted to the
/// underlying lane(s) before the install; the callback runs once that work
/// has completed.
#[derive(Clone)]
pub struct Barrier {
	install: Arc<dyn Fn(Callback) + Send + Sync>,
}

impl Barrier {
	pub fn new(install: impl Fn(Callback) + Send + Sync + 'static) -> Self {
		Self {
			install: Arc::new(install),
		}
	}

	/// The identity barrier: callbacks run immediately.
	pub fn noop() -> Self {
		Self::new(|callback| callback())
	}

	pub fn install(&self, callback: Callback) {
		(self.install)(callback);
	}

	/// Sequential composition: `next` is barriered only after `self` has
	/// quiesced, so work that `self`'s lane schedules onto `next`'s lane is
	/// still awaited.
	pub fn then(self, next: Barrier) -> Barrier {
		Barrier::new(move |callback| {
			let next = next.clone();
			self.install(Box::new(move || next.install(callback)));
		})
	}

	/// Parallel composition: the callback runs once both barriers have
	/// quiesced, in whichever order they do.
	pub fn and(self, other: Barrier) -> Barrier {
		Barrier::new(move |callback| {
			let remaining = Arc::new(AtomicUsize::new(2));
			let callback = Arc::new(Mutex::new(Some(callback)));
			for barrier in [&self, &other] {
				let remaining = Arc::clone(&remaining);
				let callback = Arc::clone(&callback);
				barrier.install(Box::new(move || {
					if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
						let taken = callback.lock().ok().and_then(|mut slot| slot.take());
						if let Some(callback) = taken {
							callback();
						}
					}
				}));
			}
		})
	}

	/// Sequences every barrier in order.
	pub fn sequence(barriers: impl IntoIterator<Item = Barrier>) -> Barrier {
		barriers
			.into_iter()
			.fold(Barrier::noop(), |acc, barrier| acc.then(barrier))
	}

	/// Groups every barrier in parallel.
	pub fn all(barriers: impl IntoIterator<Item = Barrier>) -> Barrier {
		barriers
			.into_iter()
			.fold(Barrier::noop(), |acc, barrier| acc.and(barrier))
	}

	/// Awaits quiescence.
	pub async fn wait(&self) {
		let (tx, rx) = oneshot::channel();
		self.install(Box::new(move || {
			let _ = tx.send(());
		}));
		let _ = rx.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use tokio::sync::mpsc;

	/// A toy lane: jobs drain in FIFO order on one task.
	fn test_lane() -> (mpsc::UnboundedSender<Callback>, Barrier) {
		let (tx, mut rx) = mpsc::unbounded_channel::<Callback>();
		tokio::spawn(async move {
			while let Some(job) = rx.recv().await {
				job();
			}
		});
		let barrier_tx = tx.clone();
		let barrier = Barrier::new(move |callback| {
			let _ = barrier_tx.send(callback);
		});
		(tx, barrier)
	}

	#[tokio::test]
	async fn test_noop_runs_immediately() {
		Barrier::noop().wait().await;
	}

	#[tokio::test]
	async fn test_barrier_waits_for_prior_work() {
		let (tx, barrier) = test_lane();
		let log = Arc::new(Mutex::new(Vec::new()));

		for i in 0..3 {
			let log = Arc::clone(&log);
			let _ = tx.send(Box::new(move || {
				std::thread::sleep(Duration::from_millis(5));
				log.lock().unwrap().push(i);
			}));
		}
		barrier.wait().await;

		assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn test_then_orders_two_lanes() {
		let (tx_a, barrier_a) = test_lane();
		let (tx_b, barrier_b) = test_lane();
		let log = Arc::new(Mutex::new(Vec::new()));

		{
			let log = Arc::clone(&log);
			let _ = tx_a.send(Box::new(move || log.lock().unwrap().push("a")));
		}
		{
			let log = Arc::clone(&log);
			let _ = tx_b.send(Box::new(move || log.lock().unwrap().push("b")));
		}

		barrier_a.then(barrier_b).wait().await;
		let log = log.lock().unwrap();
		assert!(log.contains(&"a"));
		assert!(log.contains(&"b"));
	}

	#[tokio::test]
	async fn test_then_observes_work_scheduled_across_lanes() {
		// Lane A schedules onto lane B; sequencing A then B must catch it.
		let (tx_a, barrier_a) = test_lane();
		let (tx_b, barrier_b) = test_lane();
		let log = Arc::new(Mutex::new(Vec::new()));

		{
			let log = Arc::clone(&log);
			let tx_b = tx_b.clone();
			let _ = tx_a.send(Box::new(move || {
				let log = Arc::clone(&log);
				let _ = tx_b.send(Box::new(move || log.lock().unwrap().push("relayed")));
			}));
		}

		barrier_a.then(barrier_b).wait().await;
		assert_eq!(*log.lock().unwrap(), vec!["relayed"]);
	}

	#[tokio::test]
	async fn test_and_waits_for_both() {
		let (tx_a, barrier_a) = test_lane();
		let (tx_b, barrier_b) = test_lane();
		let counter = Arc::new(AtomicUsize::new(0));

		for tx in [&tx_a, &tx_b] {
			let counter = Arc::clone(&counter);
			let _ = tx.send(Box::new(move || {
				std::thread::sleep(Duration::from_millis(5));
				counter.fetch_add(1, Ordering::SeqCst);
			}));
		}

		barrier_a.and(barrier_b).wait().await;
		assert_eq!(counter.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_sequence_and_all_accept_empty_input() {
		Barrier::sequence([]).wait().await;
		Barrier::all([]).wait().await;
	}
}
