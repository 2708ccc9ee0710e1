// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Preconditions for an upload tick, evaluated against the current context
//! snapshot. Absent platform sources never block.

use crate::context::{BatteryState, Context, Reachability, TrackingConsent};

/// Why a tick was skipped; surfaced as debug telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadBlocker {
	NotReachable,
	LowBattery,
	LowPowerMode,
	ConsentNotGranted,
}

impl std::fmt::Display for UploadBlocker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let reason = match self {
			UploadBlocker::NotReachable => "network not reachable",
			UploadBlocker::LowBattery => "battery critically low",
			UploadBlocker::LowPowerMode => "low power mode active",
			UploadBlocker::ConsentNotGranted => "tracking consent not granted",
		};
		f.write_str(reason)
	}
}

#[derive(Debug, Clone)]
pub struct UploadConditions {
	/// Battery level below which uploads pause unless the device charges.
	pub min_battery_level: f64,
	/// Keep uploading in low power mode.
	pub allow_in_low_power_mode: bool,
}

impl Default for UploadConditions {
	fn default() -> Self {
		Self {
			min_battery_level: 0.1,
			allow_in_low_power_mode: false,
		}
	}
}

impl UploadConditions {
	pub fn verify(&self, context: &Context) -> Result<(), UploadBlocker> {
		if context.tracking_consent != TrackingConsent::Granted {
			return Err(UploadBlocker::ConsentNotGranted);
		}
		if context.network.reachability == Reachability::No {
			return Err(UploadBlocker::NotReachable);
		}
		if let Some(battery) = &context.battery {
			let charging = matches!(battery.state, BatteryState::Charging | BatteryState::Full);
			if !charging && battery.level < self.min_battery_level {
				return Err(UploadBlocker::LowBattery);
			}
		}
		if context.low_power_mode && !self.allow_in_low_power_mode {
			return Err(UploadBlocker::LowPowerMode);
		}
		Ok(())
	}
}
