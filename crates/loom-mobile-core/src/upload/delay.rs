// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Adaptive pacing for the upload loop: multiplicative decrease toward the
//! minimum while the intake accepts batches, multiplicative increase toward
//! the maximum while it does not.

use std::time::Duration;

use crate::config::PerformancePreset;

#[derive(Debug, Clone)]
pub(crate) struct UploadDelay {
	current: Duration,
	min: Duration,
	max: Duration,
	change_rate: f64,
}

impl UploadDelay {
	pub fn new(preset: &PerformancePreset) -> Self {
		Self {
			current: preset
				.initial_upload_delay
				.clamp(preset.min_upload_delay, preset.max_upload_delay),
			min: preset.min_upload_delay,
			max: preset.max_upload_delay,
			change_rate: preset.upload_delay_change_rate,
		}
	}

	pub fn current(&self) -> Duration {
		self.current
	}

	/// Speeds the loop up after a successful upload.
	pub fn decrease(&mut self) {
		self.current = self.current.mul_f64(1.0 - self.change_rate).max(self.min);
	}

	/// Backs the loop off after a retryable failure or an empty read.
	pub fn increase(&mut self) {
		self.current = self.current.mul_f64(1.0 + self.change_rate).min(self.max);
	}
}
