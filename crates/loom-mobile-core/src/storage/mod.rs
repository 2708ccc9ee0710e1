// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-feature batch storage, partitioned by tracking consent.
//!
//! Each feature owns `granted/`, `pending/` and `unauthorized/` directories
//! under `<root>/<feature>/v2`. New batches land in the directory of the
//! consent they were written under; only `granted/` is ever uploaded.
//! All mutations serialize through the single shared read/write lane.

mod batch;
mod encryption;
mod reader;
mod writer;

pub use batch::{Batch, BatchResolution};
pub use encryption::{AesGcmDataEncryption, DataEncryption, KEY_SIZE};
pub use writer::EventWriter;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::warn;

use crate::config::PerformancePreset;
use crate::context::TrackingConsent;
use crate::error::Result;
use crate::lane::SerialLane;
use crate::platform::DateProvider;
use crate::telemetry::Telemetry;

const VERSION_DIR: &str = "v2";
const GRANTED_DIR: &str = "granted";
const PENDING_DIR: &str = "pending";
const UNAUTHORIZED_DIR: &str = "unauthorized";

/// Handle to one feature's on-disk batches. Cheap to clone; all clones
/// share the same state and the same read/write lane.
#[derive(Clone)]
pub struct FeatureStorage {
	pub(crate) inner: Arc<StorageInner>,
}

pub(crate) struct StorageInner {
	pub(crate) feature: String,
	pub(crate) preset: PerformancePreset,
	pub(crate) encryption: Option<Arc<dyn DataEncryption>>,
	pub(crate) date_provider: Arc<dyn DateProvider>,
	pub(crate) lane: SerialLane,
	pub(crate) telemetry: Telemetry,
	state: Mutex<StorageState>,
	pub(crate) ignore_file_age_when_reading: AtomicBool,
	pub(crate) granted_dir: PathBuf,
	pub(crate) pending_dir: PathBuf,
	pub(crate) unauthorized_dir: PathBuf,
}

#[derive(Default)]
pub(crate) struct StorageState {
	/// At most one open batch per consent value.
	pub(crate) open: HashMap<TrackingConsent, OpenBatch>,
	/// Highest creation timestamp handed out; keeps names strictly
	/// increasing even when the wall clock jumps backwards.
	pub(crate) last_batch_ms: u64,
}

pub(crate) struct OpenBatch {
	pub(crate) path: PathBuf,
	pub(crate) created_ms: u64,
	pub(crate) objects: usize,
	pub(crate) size: u64,
}

impl FeatureStorage {
	pub(crate) fn create(
		feature: &str,
		feature_root: &Path,
		preset: PerformancePreset,
		encryption: Option<Arc<dyn DataEncryption>>,
		date_provider: Arc<dyn DateProvider>,
		lane: SerialLane,
		telemetry: Telemetry,
	) -> Result<Self> {
		let root = feature_root.join(VERSION_DIR);
		let granted_dir = root.join(GRANTED_DIR);
		let pending_dir = root.join(PENDING_DIR);
		let unauthorized_dir = root.join(UNAUTHORIZED_DIR);
		for dir in [&granted_dir, &pending_dir, &unauthorized_dir] {
			std::fs::create_dir_all(dir)?;
		}

		Ok(Self {
			inner: Arc::new(StorageInner {
				feature: feature.to_string(),
				preset,
				encryption,
				date_provider,
				lane,
				telemetry,
				state: Mutex::new(StorageState::default()),
				ignore_file_age_when_reading: AtomicBool::new(false),
				granted_dir,
				pending_dir,
				unauthorized_dir,
			}),
		})
	}

	/// A writer bound to `consent`. `force_new_batch` closes the current
	/// open batch before the writer's first append.
	pub fn writer(&self, consent: TrackingConsent, force_new_batch: bool) -> EventWriter {
		EventWriter::new(Arc::clone(&self.inner), consent, force_new_batch)
	}

	/// The oldest upload-eligible batch, or `None` when the feature has
	/// nothing ready. Each returned batch must be resolved with
	/// [`resolve`](Self::resolve).
	pub async fn next_batch(&self) -> Option<Batch> {
		let (tx, rx) = oneshot::channel();
		let inner = Arc::clone(&self.inner);
		self.inner.lane.post(move || {
			let _ = tx.send(reader::next_batch(&inner));
		});
		rx.await.ok().flatten()
	}

	/// Reports the upload outcome for a batch; `Delete` removes the file,
	/// `Keep` retains it for a later retry.
	pub async fn resolve(&self, batch: Batch, resolution: BatchResolution) {
		let (tx, rx) = oneshot::channel();
		let inner = Arc::clone(&self.inner);
		self.inner.lane.post(move || {
			reader::resolve(&inner, &batch, resolution);
			let _ = tx.send(());
		});
		let _ = rx.await;
	}

	/// Moves `pending/` batches to `granted/` (new consent Granted) or
	/// deletes them (NotGranted). Scheduled on the read/write lane, so
	/// appends enqueued before the migration are included.
	pub(crate) fn migrate_unauthorized(&self, to: TrackingConsent) {
		let inner = Arc::clone(&self.inner);
		self.inner.lane.post(move || inner.migrate_unauthorized_files(to));
	}

	/// Removes every batch across all consent directories.
	pub(crate) fn clear_all_data(&self) {
		let inner = Arc::clone(&self.inner);
		self.inner.lane.post(move || {
			for dir in [&inner.granted_dir, &inner.pending_dir, &inner.unauthorized_dir] {
				inner.remove_batches_in(dir);
			}
			inner.state().open.clear();
		});
	}

	/// Startup purge: drops batches whose consent decision never arrived
	/// (`pending/`) and anything stranded in `unauthorized/`.
	pub(crate) fn clear_unauthorized_data(&self) {
		let inner = Arc::clone(&self.inner);
		self.inner.lane.post(move || {
			for dir in [&inner.pending_dir, &inner.unauthorized_dir] {
				inner.remove_batches_in(dir);
			}
			inner.state().open.remove(&TrackingConsent::Pending);
		});
	}

	pub(crate) fn set_ignore_file_age_when_reading(&self, ignore: bool) {
		self
			.inner
			.ignore_file_age_when_reading
			.store(ignore, Ordering::SeqCst);
	}
}

impl StorageInner {
	pub(crate) fn state(&self) -> MutexGuard<'_, StorageState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	pub(crate) fn now_ms(&self) -> u64 {
		self.date_provider.now().timestamp_millis().max(0) as u64
	}

	pub(crate) fn directory_for(&self, consent: TrackingConsent) -> &Path {
		match consent {
			TrackingConsent::Granted => &self.granted_dir,
			TrackingConsent::Pending => &self.pending_dir,
			TrackingConsent::NotGranted => &self.unauthorized_dir,
		}
	}

	fn migrate_unauthorized_files(&self, to: TrackingConsent) {
		match to {
			TrackingConsent::Granted => {
				for (creation_ms, path) in sorted_batches(&self.pending_dir) {
					let mut target_ms = creation_ms;
					let mut target = self.granted_dir.join(batch::file_name(target_ms));
					while target.exists() {
						target_ms += 1;
						target = self.granted_dir.join(batch::file_name(target_ms));
					}
					if let Err(err) = std::fs::rename(&path, &target) {
						warn!(feature = %self.feature, error = %err, "pending batch migration failed");
					}
				}
			}
			TrackingConsent::NotGranted => self.remove_batches_in(&self.pending_dir),
			TrackingConsent::Pending => {}
		}
		self.state().open.remove(&TrackingConsent::Pending);
	}

	fn remove_batches_in(&self, dir: &Path) {
		for (_, path) in sorted_batches(dir) {
			if let Err(err) = std::fs::remove_file(&path) {
				warn!(feature = %self.feature, error = %err, "batch removal failed");
			}
		}
	}
}

/// Batch files in `dir`, oldest first. Foreign files are ignored.
pub(crate) fn sorted_batches(dir: &Path) -> Vec<(u64, PathBuf)> {
	let mut files = Vec::new();
	if let Ok(entries) = std::fs::read_dir(dir) {
		for entry in entries.flatten() {
			let path = entry.path();
			if let Some(creation_ms) = batch::creation_ms(&path) {
				files.push((creation_ms, path));
			}
		}
	}
	files.sort_by_key(|(creation_ms, _)| *creation_ms);
	files
}
