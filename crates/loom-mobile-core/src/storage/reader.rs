// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch read path: oldest eligible batch first, with age-based purge and
//! corruption handling folded in. Runs on the shared read/write lane.

use std::path::Path;
use std::sync::atomic::Ordering;

use tracing::warn;

use crate::error::{CoreError, Result};
use crate::storage::batch::{self, Batch, BatchResolution};
use crate::storage::StorageInner;

/// Returns the oldest batch in `granted/` whose age is at least
/// `min_file_age_for_read` (unless the ignore flag is set, as during a
/// synchronous flush). Batches past `max_file_age_for_read` are deleted
/// unread; undecodable batches are deleted with telemetry.
pub(crate) fn next_batch(inner: &StorageInner) -> Option<Batch> {
	let ignore_age = inner.ignore_file_age_when_reading.load(Ordering::SeqCst);
	let now_ms = inner.now_ms();
	let min_age_ms = inner.preset.min_file_age_for_read.as_millis() as u64;
	let max_age_ms = inner.preset.max_file_age_for_read.as_millis() as u64;

	for (creation_ms, path) in crate::storage::sorted_batches(&inner.granted_dir) {
		let age_ms = now_ms.saturating_sub(creation_ms);
		if age_ms > max_age_ms {
			if let Err(err) = std::fs::remove_file(&path) {
				warn!(feature = %inner.feature, error = %err, "stale batch removal failed");
			} else {
				inner
					.telemetry
					.debug(format!("expired batch deleted unread: {}", path.display()));
			}
			continue;
		}
		if !ignore_age && age_ms < min_age_ms {
			// Sorted oldest-first: everything after this is younger still.
			break;
		}

		match load(inner, creation_ms, &path) {
			Ok(loaded) => {
				// Once read, the file no longer accepts appends; a later
				// write opens a fresh batch.
				close_if_open(inner, &path);
				return Some(loaded);
			}
			Err(err) => {
				inner.telemetry.error(format!("corrupt batch deleted: {err}"));
				if let Err(remove_err) = std::fs::remove_file(&path) {
					warn!(feature = %inner.feature, error = %remove_err, "corrupt batch removal failed");
				}
				close_if_open(inner, &path);
			}
		}
	}
	None
}

pub(crate) fn resolve(inner: &StorageInner, batch: &Batch, resolution: BatchResolution) {
	match resolution {
		BatchResolution::Delete => {
			if let Err(err) = std::fs::remove_file(&batch.path) {
				if err.kind() != std::io::ErrorKind::NotFound {
					warn!(feature = %inner.feature, batch = %batch.id, error = %err, "batch deletion failed");
				}
			}
			close_if_open(inner, &batch.path);
		}
		BatchResolution::Keep => {}
	}
}

fn load(inner: &StorageInner, creation_ms: u64, path: &Path) -> Result<Batch> {
	let bytes = std::fs::read(path)?;
	let id = creation_ms.to_string();
	let mut events = batch::decode_events(&id, &bytes)?;

	if let Some(encryption) = &inner.encryption {
		events = events
			.iter()
			.map(|event| encryption.decrypt(event))
			.collect::<Result<Vec<_>>>()
			.map_err(|err| CoreError::BatchCorrupt {
				batch_id: id.clone(),
				reason: err.to_string(),
			})?;
	}

	Ok(Batch {
		id,
		events,
		path: path.to_path_buf(),
	})
}

fn close_if_open(inner: &StorageInner, path: &Path) {
	inner.state().open.retain(|_, open| open.path != path);
}
