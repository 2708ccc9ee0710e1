// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The shared serial lane backing all batch-file I/O.
//!
//! One blocking thread drains a FIFO of jobs. Every storage mutation across
//! every feature is posted here, which is what makes writes to a batch file
//! totally ordered and makes a lane [`Barrier`] a true quiescence point.

use tokio::sync::mpsc;
use tracing::debug;

use crate::barrier::Barrier;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub(crate) struct SerialLane {
	name: &'static str,
	tx: mpsc::UnboundedSender<Job>,
}

impl SerialLane {
	/// Spawns the lane thread. Must be called within a tokio runtime.
	pub fn spawn(name: &'static str) -> Self {
		let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
		tokio::task::spawn_blocking(move || {
			while let Some(job) = rx.blocking_recv() {
				job();
			}
			debug!(lane = name, "serial lane drained");
		});
		Self { name, tx }
	}

	/// Enqueues a job. Enqueueing is synchronous and never blocks, so a job
	/// posted from another lane's callback is ordered before any job posted
	/// after that callback returns.
	pub fn post(&self, job: impl FnOnce() + Send + 'static) {
		if self.tx.send(Box::new(job)).is_err() {
			debug!(lane = self.name, "job dropped after lane shutdown");
		}
	}

	/// A barrier at the current end of this lane's queue.
	pub fn barrier(&self) -> Barrier {
		let tx = self.tx.clone();
		Barrier::new(move |callback| {
			let _ = tx.send(callback);
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	#[tokio::test]
	async fn test_jobs_run_in_post_order() {
		let lane = SerialLane::spawn("test");
		let log = Arc::new(Mutex::new(Vec::new()));

		for i in 0..10 {
			let log = Arc::clone(&log);
			lane.post(move || {
				std::thread::sleep(Duration::from_millis(1));
				log.lock().unwrap().push(i);
			});
		}
		lane.barrier().wait().await;

		assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
	}

	#[tokio::test]
	async fn test_barrier_sees_jobs_posted_from_jobs() {
		let lane = SerialLane::spawn("test");
		let log = Arc::new(Mutex::new(Vec::new()));

		{
			let log = Arc::clone(&log);
			let inner_lane = lane.clone();
			lane.post(move || {
				log.lock().unwrap().push("outer");
				let log = Arc::clone(&log);
				inner_lane.post(move || log.lock().unwrap().push("inner"));
			});
		}

		// The nested job enqueues behind the outer one but ahead of a
		// barrier installed after the outer job has run.
		lane.barrier().wait().await;
		lane.barrier().wait().await;
		assert_eq!(*log.lock().unwrap(), vec!["outer", "inner"]);
	}
}
