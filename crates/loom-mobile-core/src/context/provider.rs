// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Serial owner of the evolving [`Context`] snapshot.
//!
//! All reads and writes go through one actor task (the context lane), so
//! every callback observes a consistent snapshot and mutations are totally
//! ordered. Committed writes are published to a `watch` channel and to the
//! message bus.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::barrier::Barrier;
use crate::context::Context;

enum Command {
	Read(Box<dyn FnOnce(&Context) + Send>),
	Write(Box<dyn FnOnce(&mut Context) + Send>),
	AddReader(Arc<dyn ContextReader>),
	Barrier(Box<dyn FnOnce() + Send>),
}

/// A pull source bound to the context: evaluated on the context lane before
/// each read callback, so lazily computed fields are fresh at read time.
pub trait ContextReader: Send + Sync {
	fn refresh(&self, context: &mut Context);
}

/// A push source feeding the context, e.g. a reachability monitor or a
/// server-time-offset provider. The publisher owns its own loop and merges
/// new values through the [`ContextEditor`] it is handed.
#[async_trait]
pub trait ContextPublisher: Send + Sync {
	async fn run(&self, editor: ContextEditor);
}

/// Write-only handle given to context publishers.
#[derive(Clone)]
pub struct ContextEditor {
	tx: mpsc::UnboundedSender<Command>,
}

impl ContextEditor {
	pub fn update(&self, mutator: impl FnOnce(&mut Context) + Send + 'static) {
		let _ = self.tx.send(Command::Write(Box::new(mutator)));
	}
}

#[derive(Clone)]
pub struct ContextProvider {
	tx: mpsc::UnboundedSender<Command>,
	current: watch::Receiver<Context>,
}

impl ContextProvider {
	/// Spawns the context lane. `on_change` runs on the lane after every
	/// committed write with the freshly published snapshot; the core uses it
	/// to broadcast context messages on the bus.
	pub(crate) fn new(initial: Context, on_change: impl Fn(&Context) + Send + 'static) -> Self {
		let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
		let (watch_tx, watch_rx) = watch::channel(initial.clone());

		tokio::spawn(async move {
			let mut context = initial;
			let mut readers: Vec<Arc<dyn ContextReader>> = Vec::new();
			while let Some(command) = rx.recv().await {
				match command {
					Command::Read(callback) => {
						for reader in &readers {
							reader.refresh(&mut context);
						}
						callback(&context);
					}
					Command::Write(mutator) => {
						mutator(&mut context);
						context.version += 1;
						let _ = watch_tx.send(context.clone());
						on_change(&context);
					}
					Command::AddReader(reader) => readers.push(reader),
					Command::Barrier(callback) => callback(),
				}
			}
		});

		Self {
			tx,
			current: watch_rx,
		}
	}

	/// Schedules a read callback with a consistent snapshot. A write that
	/// completed before this call is visible to the callback.
	pub fn read(&self, callback: impl FnOnce(&Context) + Send + 'static) {
		let _ = self.tx.send(Command::Read(Box::new(callback)));
	}

	/// Schedules a mutation; the resulting snapshot is published to
	/// subscribers once the mutator has run.
	pub fn write(&self, mutator: impl FnOnce(&mut Context) + Send + 'static) {
		let _ = self.tx.send(Command::Write(Box::new(mutator)));
	}

	/// The most recently published snapshot. Cheap; used by the upload
	/// conditions check. May trail writes still queued on the lane.
	pub fn current(&self) -> Context {
		self.current.borrow().clone()
	}

	/// Binds a pull source evaluated lazily on each read.
	pub fn assign_reader(&self, reader: Arc<dyn ContextReader>) {
		let _ = self.tx.send(Command::AddReader(reader));
	}

	/// Binds a push source; the publisher runs on its own task for the
	/// lifetime of the process or until its sender side hangs up.
	pub fn attach_publisher(&self, publisher: Arc<dyn ContextPublisher>) {
		let editor = self.editor();
		tokio::spawn(async move {
			publisher.run(editor).await;
		});
	}

	/// A write-only handle, for hosts that feed context fields directly.
	pub fn editor(&self) -> ContextEditor {
		ContextEditor {
			tx: self.tx.clone(),
		}
	}

	/// A quiescence barrier at the current end of the context lane.
	pub fn barrier(&self) -> Barrier {
		let tx = self.tx.clone();
		Barrier::new(move |callback| {
			let _ = tx.send(Command::Barrier(callback));
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::TrackingConsent;
	use std::sync::atomic::{AtomicU64, Ordering};
	use std::sync::Mutex;

	fn provider() -> ContextProvider {
		ContextProvider::new(Context::default(), |_| {})
	}

	#[tokio::test]
	async fn test_write_is_visible_to_later_read() {
		let provider = provider();
		provider.write(|ctx| ctx.service = "checkout".to_string());

		let seen = Arc::new(Mutex::new(String::new()));
		{
			let seen = Arc::clone(&seen);
			provider.read(move |ctx| *seen.lock().unwrap() = ctx.service.clone());
		}
		provider.barrier().wait().await;

		assert_eq!(*seen.lock().unwrap(), "checkout");
	}

	#[tokio::test]
	async fn test_versions_are_monotonic() {
		let last_seen = Arc::new(AtomicU64::new(0));
		let observed = Arc::clone(&last_seen);
		let provider = ContextProvider::new(Context::default(), move |ctx| {
			let prev = observed.swap(ctx.version, Ordering::SeqCst);
			assert!(ctx.version > prev, "version went backwards");
		});

		for _ in 0..20 {
			provider.write(|ctx| ctx.server_time_offset_ms += 1);
		}
		provider.barrier().wait().await;

		assert_eq!(last_seen.load(Ordering::SeqCst), 20);
	}

	#[tokio::test]
	async fn test_current_reflects_published_writes() {
		let provider = provider();
		provider.write(|ctx| ctx.tracking_consent = TrackingConsent::Granted);
		provider.barrier().wait().await;

		assert_eq!(provider.current().tracking_consent, TrackingConsent::Granted);
	}

	#[tokio::test]
	async fn test_assigned_reader_runs_on_each_read() {
		struct OffsetReader(AtomicU64);
		impl ContextReader for OffsetReader {
			fn refresh(&self, context: &mut Context) {
				context.server_time_offset_ms =
					self.0.fetch_add(1, Ordering::SeqCst) as i64 + 1;
			}
		}

		let provider = provider();
		provider.assign_reader(Arc::new(OffsetReader(AtomicU64::new(0))));

		let seen = Arc::new(Mutex::new(Vec::new()));
		for _ in 0..2 {
			let seen = Arc::clone(&seen);
			provider.read(move |ctx| seen.lock().unwrap().push(ctx.server_time_offset_ms));
		}
		provider.barrier().wait().await;

		assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
	}

	#[tokio::test]
	async fn test_publisher_merges_through_editor() {
		struct BatteryPublisher;
		#[async_trait]
		impl ContextPublisher for BatteryPublisher {
			async fn run(&self, editor: ContextEditor) {
				editor.update(|ctx| ctx.low_power_mode = true);
			}
		}

		let provider = provider();
		provider.attach_publisher(Arc::new(BatteryPublisher));

		let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
		loop {
			provider.barrier().wait().await;
			if provider.current().low_power_mode {
				break;
			}
			assert!(std::time::Instant::now() < deadline, "publisher never ran");
			tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		}
	}
}
