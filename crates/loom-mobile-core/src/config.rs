// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Performance tuning for the storage and upload pipelines.
//!
//! Every feature runs against an effective [`PerformancePreset`]: the SDK
//! default with the feature's [`PerformanceOverride`] merged on top.

use std::time::Duration;

/// Tuning knobs for batch files and the upload loop.
#[derive(Debug, Clone)]
pub struct PerformancePreset {
	/// Byte cap above which a new batch file opens.
	pub max_file_size: u64,
	/// Per-event byte cap; larger events are dropped with telemetry.
	pub max_object_size: u64,
	/// Event count cap per batch file.
	pub max_objects_in_file: usize,
	/// Age above which the current file is closed on the next write.
	pub max_file_age_for_write: Duration,
	/// Minimum age before a batch becomes eligible for upload.
	pub min_file_age_for_read: Duration,
	/// Age above which a batch is deleted unread.
	pub max_file_age_for_read: Duration,
	/// Total byte cap per feature directory; oldest files evicted first.
	pub max_directory_size: u64,
	/// Delay before the first upload tick.
	pub initial_upload_delay: Duration,
	/// Lower bound for the adaptive upload delay.
	pub min_upload_delay: Duration,
	/// Upper bound for the adaptive upload delay.
	pub max_upload_delay: Duration,
	/// Multiplicative step applied to the delay after each tick:
	/// `delay * (1 - rate)` on success, `delay * (1 + rate)` on retryable
	/// failure, clamped to the bounds above.
	pub upload_delay_change_rate: f64,
}

impl Default for PerformancePreset {
	fn default() -> Self {
		Self {
			max_file_size: 4 * 1024 * 1024,
			max_object_size: 512 * 1024,
			max_objects_in_file: 500,
			max_file_age_for_write: Duration::from_secs(5),
			min_file_age_for_read: Duration::from_millis(5500),
			max_file_age_for_read: Duration::from_secs(18 * 60 * 60),
			max_directory_size: 512 * 1024 * 1024,
			initial_upload_delay: Duration::from_secs(5),
			min_upload_delay: Duration::from_secs(1),
			max_upload_delay: Duration::from_secs(20),
			upload_delay_change_rate: 0.1,
		}
	}
}

/// Per-feature overrides merged over the SDK default preset.
///
/// Only the fields a feature cares about need to be set; everything else
/// inherits from the default.
#[derive(Debug, Clone, Default)]
pub struct PerformanceOverride {
	pub max_file_size: Option<u64>,
	pub max_object_size: Option<u64>,
	pub max_objects_in_file: Option<usize>,
	pub max_file_age_for_write: Option<Duration>,
	pub min_file_age_for_read: Option<Duration>,
	pub max_file_age_for_read: Option<Duration>,
	pub max_directory_size: Option<u64>,
	pub initial_upload_delay: Option<Duration>,
	pub min_upload_delay: Option<Duration>,
	pub max_upload_delay: Option<Duration>,
	pub upload_delay_change_rate: Option<f64>,
}

impl PerformanceOverride {
	/// Produces the effective preset for a feature.
	pub fn merged_over(&self, base: &PerformancePreset) -> PerformancePreset {
		PerformancePreset {
			max_file_size: self.max_file_size.unwrap_or(base.max_file_size),
			max_object_size: self.max_object_size.unwrap_or(base.max_object_size),
			max_objects_in_file: self.max_objects_in_file.unwrap_or(base.max_objects_in_file),
			max_file_age_for_write: self
				.max_file_age_for_write
				.unwrap_or(base.max_file_age_for_write),
			min_file_age_for_read: self
				.min_file_age_for_read
				.unwrap_or(base.min_file_age_for_read),
			max_file_age_for_read: self
				.max_file_age_for_read
				.unwrap_or(base.max_file_age_for_read),
			max_directory_size: self.max_directory_size.unwrap_or(base.max_directory_size),
			initial_upload_delay: self
				.initial_upload_delay
				.unwrap_or(base.initial_upload_delay),
			min_upload_delay: self.min_upload_delay.unwrap_or(base.min_upload_delay),
			max_upload_delay: self.max_upload_delay.unwrap_or(base.max_upload_delay),
			upload_delay_change_rate: self
				.upload_delay_change_rate
				.unwrap_or(base.upload_delay_change_rate),
		}
	}
}
