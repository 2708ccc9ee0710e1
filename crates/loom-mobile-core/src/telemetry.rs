// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Internal self-monitoring: failures inside the pipelines are never
//! surfaced to the caller, they are logged and broadcast on the bus.

use tracing::{debug, warn};

use crate::bus::{Message, MessageBus, TelemetryMessage};

#[derive(Clone)]
pub(crate) struct Telemetry {
	bus: MessageBus,
	feature: String,
}

impl Telemetry {
	pub fn new(bus: MessageBus, feature: impl Into<String>) -> Self {
		Self {
			bus,
			feature: feature.into(),
		}
	}

	pub fn error(&self, message: impl Into<String>) {
		let message = message.into();
		warn!(feature = %self.feature, message = %message, "telemetry error");
		self.bus.send(Message::Telemetry {
			feature: self.feature.clone(),
			telemetry: TelemetryMessage::Error { message },
		});
	}

	pub fn debug(&self, message: impl Into<String>) {
		let message = message.into();
		debug!(feature = %self.feature, message = %message, "telemetry debug");
		self.bus.send(Message::Telemetry {
			feature: self.feature.clone(),
			telemetry: TelemetryMessage::Debug { message },
		});
	}
}
