// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event append path. All disk work happens on the shared read/write lane;
//! the writer itself only frames the request and enqueues it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::context::TrackingConsent;
use crate::error::{CoreError, Result};
use crate::storage::batch;
use crate::storage::{OpenBatch, StorageInner};

/// Writer bound to one feature and the consent value captured when the
/// write scope was entered. Appends are accepted without back-pressure and
/// serialized on the shared read/write lane; failures degrade silently
/// (telemetry only).
pub struct EventWriter {
	inner: Arc<StorageInner>,
	consent: TrackingConsent,
	force_new_batch: AtomicBool,
}

impl EventWriter {
	pub(crate) fn new(inner: Arc<StorageInner>, consent: TrackingConsent, force_new_batch: bool) -> Self {
		Self {
			inner,
			consent,
			force_new_batch: AtomicBool::new(force_new_batch),
		}
	}

	/// Appends one event blob to the current batch of this writer's consent,
	/// opening a new batch when thresholds demand it. Writes under
	/// `NotGranted` are dropped.
	pub fn write(&self, event: &[u8]) {
		if self.consent == TrackingConsent::NotGranted {
			trace!(feature = %self.inner.feature, "event dropped, consent not granted");
			return;
		}
		let force = self.force_new_batch.swap(false, Ordering::SeqCst);
		let payload = event.to_vec();
		let inner = Arc::clone(&self.inner);
		let consent = self.consent;
		self.inner.lane.post(move || write_event(&inner, consent, force, payload));
	}
}

fn write_event(inner: &StorageInner, consent: TrackingConsent, force: bool, payload: Vec<u8>) {
	let limit = inner.preset.max_object_size;
	if payload.len() as u64 > limit {
		let err = CoreError::ObjectTooLarge {
			size: payload.len() as u64,
			limit,
		};
		inner.telemetry.error(err.to_string());
		return;
	}

	let payload = match &inner.encryption {
		Some(encryption) => match encryption.encrypt(&payload) {
			Ok(ciphertext) => ciphertext,
			Err(err) => {
				inner.telemetry.error(err.to_string());
				return;
			}
		},
		None => payload,
	};

	if let Err(err) = append(inner, consent, force, &payload) {
		warn!(feature = %inner.feature, error = %err, "batch append failed");
		inner.telemetry.error(format!("batch append failed: {err}"));
		return;
	}

	enforce_directory_size(inner);
}

fn append(inner: &StorageInner, consent: TrackingConsent, force: bool, payload: &[u8]) -> Result<()> {
	let framed = batch::frame_event(payload);
	let now_ms = inner.now_ms();
	let mut state = inner.state();

	let reusable = if force {
		None
	} else {
		state
			.open
			.get(&consent)
			.filter(|open| {
				open.path.exists()
					&& now_ms.saturating_sub(open.created_ms)
						< inner.preset.max_file_age_for_write.as_millis() as u64
					&& open.objects < inner.preset.max_objects_in_file
					&& open.size + framed.len() as u64 <= inner.preset.max_file_size
			})
			.map(|open| open.path.clone())
	};

	let path = match reusable {
		Some(path) => path,
		None => {
			let creation_ms = now_ms.max(state.last_batch_ms + 1);
			state.last_batch_ms = creation_ms;
			let path: PathBuf = inner
				.directory_for(consent)
				.join(batch::file_name(creation_ms));
			state.open.insert(
				consent,
				OpenBatch {
					path: path.clone(),
					created_ms: creation_ms,
					objects: 0,
					size: 0,
				},
			);
			path
		}
	};

	let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
	file.write_all(&framed)?;

	if let Some(open) = state.open.get_mut(&consent) {
		open.objects += 1;
		open.size += framed.len() as u64;
	}
	Ok(())
}

/// Oldest-first eviction once the feature directory exceeds its byte cap.
fn enforce_directory_size(inner: &StorageInner) {
	let cap = inner.preset.max_directory_size;
	let mut files = Vec::new();
	let mut total: u64 = 0;
	for dir in [&inner.granted_dir, &inner.pending_dir] {
		for (ms, path) in crate::storage::sorted_batches(dir) {
			let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
			total += size;
			files.push((ms, path, size));
		}
	}
	if total <= cap {
		return;
	}

	files.sort_by_key(|(ms, _, _)| *ms);
	let mut state = inner.state();
	for (_, path, size) in files {
		if total <= cap {
			break;
		}
		if let Err(err) = std::fs::remove_file(&path) {
			warn!(feature = %inner.feature, error = %err, "batch eviction failed");
			continue;
		}
		total = total.saturating_sub(size);
		state.open.retain(|_, open| open.path != path);
		inner
			.telemetry
			.debug(format!("evicted oldest batch over directory cap: {}", path.display()));
	}
}
