// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The process-wide context snapshot shared with every event write.

mod provider;

pub use provider::{ContextEditor, ContextProvider, ContextPublisher, ContextReader};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User decision on data collection; selects the consent subdirectory new
/// batches are written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingConsent {
	Granted,
	NotGranted,
	#[default]
	Pending,
}

/// Static description of the host device.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
	pub name: String,
	pub model: String,
	pub os_name: String,
	pub os_version: String,
	pub architecture: String,
}

impl DeviceInfo {
	/// Seeds device info from the compile-time host constants. Embedders on
	/// mobile targets replace this with values read from the OS.
	pub fn host() -> Self {
		Self {
			name: std::env::consts::OS.to_string(),
			model: std::env::consts::ARCH.to_string(),
			os_name: std::env::consts::OS.to_string(),
			os_version: String::new(),
			architecture: std::env::consts::ARCH.to_string(),
		}
	}
}

/// Identity of the current user, attached to every snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserInfo {
	pub id: Option<String>,
	pub name: Option<String>,
	pub email: Option<String>,
	#[serde(default)]
	pub extra: HashMap<String, serde_json::Value>,
}

/// Coarse network reachability as reported by the platform monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
	Yes,
	No,
	/// The platform monitor has not reported yet.
	#[default]
	Maybe,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkInfo {
	pub reachability: Reachability,
	pub is_expensive: Option<bool>,
	pub is_constrained: Option<bool>,
}

/// Cellular carrier details, absent on wifi-only devices and desktops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierInfo {
	pub name: String,
	pub iso_country_code: Option<String>,
	pub radio_technology: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
	Charging,
	Full,
	Unplugged,
	Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatteryStatus {
	/// Charge level in `0.0..=1.0`.
	pub level: f64,
	pub state: BatteryState,
}

/// Foreground/background state of the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
	Active,
	Inactive,
	Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStateChange {
	pub state: AppState,
	pub at: DateTime<Utc>,
}

/// One consistent snapshot of device, app, user and SDK state.
///
/// Snapshots are values: every read callback receives its own copy and the
/// provider mutates only its private instance. `version` increases by one
/// on every committed write, so subscribers can assert monotonicity.
#[derive(Debug, Clone, Default)]
pub struct Context {
	pub site: String,
	pub client_token: String,
	pub service: String,
	pub env: String,
	pub version_tag: String,
	pub sdk_version: String,
	pub source: String,
	pub device: DeviceInfo,
	pub app_state_history: Vec<AppStateChange>,
	pub launch_time: Option<DateTime<Utc>>,
	/// Difference between server time and device time, in milliseconds.
	pub server_time_offset_ms: i64,
	pub network: NetworkInfo,
	pub carrier: Option<CarrierInfo>,
	pub battery: Option<BatteryStatus>,
	pub low_power_mode: bool,
	pub user: UserInfo,
	pub tracking_consent: TrackingConsent,
	/// Opaque sub-contexts contributed by features, keyed by feature name.
	pub baggages: HashMap<String, serde_json::Value>,
	/// Monotonic snapshot version.
	pub version: u64,
}

impl Context {
	/// The most recent application state, if any transition was recorded.
	pub fn current_app_state(&self) -> Option<AppState> {
		self.app_state_history.last().map(|change| change.state)
	}

	/// Device time corrected by the server offset.
	pub fn server_now(&self, device_now: DateTime<Utc>) -> DateTime<Utc> {
		device_now + chrono::Duration::milliseconds(self.server_time_offset_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_tracking_consent_default_is_pending() {
		assert_eq!(TrackingConsent::default(), TrackingConsent::Pending);
	}

	#[test]
	fn test_tracking_consent_serde_round_trip() {
		let json = serde_json::to_string(&TrackingConsent::NotGranted).unwrap();
		assert_eq!(json, "\"not_granted\"");
		let back: TrackingConsent = serde_json::from_str(&json).unwrap();
		assert_eq!(back, TrackingConsent::NotGranted);
	}

	#[test]
	fn test_current_app_state_tracks_last_transition() {
		let mut ctx = Context::default();
		assert_eq!(ctx.current_app_state(), None);

		ctx.app_state_history.push(AppStateChange {
			state: AppState::Active,
			at: Utc::now(),
		});
		ctx.app_state_history.push(AppStateChange {
			state: AppState::Background,
			at: Utc::now(),
		});
		assert_eq!(ctx.current_app_state(), Some(AppState::Background));
	}

	#[test]
	fn test_server_now_applies_offset() {
		let ctx = Context {
			server_time_offset_ms: 1500,
			..Default::default()
		};
		let device_now = Utc::now();
		let corrected = ctx.server_now(device_now);
		assert_eq!((corrected - device_now).num_milliseconds(), 1500);
	}

	#[test]
	fn test_device_info_host_is_populated() {
		let device = DeviceInfo::host();
		assert!(!device.os_name.is_empty());
		assert!(!device.architecture.is_empty());
	}
}
