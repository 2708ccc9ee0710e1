// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OS facilities the engine depends on, behind traits so hosts and tests
//! can substitute them. Absent sources degrade gracefully: the engine works
//! with nothing but a clock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use crate::context::{ContextEditor, ContextPublisher};

/// Source of the current instant. Monotonic within a process run for the
/// purposes of batch naming (the storage layer bumps non-increasing values),
/// but may jump on wall-clock corrections.
pub trait DateProvider: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Default provider backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemDateProvider;

impl DateProvider for SystemDateProvider {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// OS background-task leases held around in-flight uploads while the app is
/// backgrounded. `begin_task` returns a token passed back to `end_task`;
/// the coordinator is free to expire leases on its own.
pub trait BackgroundTaskCoordinator: Send + Sync {
	fn begin_task(&self) -> u64;
	fn end_task(&self, token: u64);
}

/// Bridges a push source of server-time offsets into the context.
///
/// The host resolves offsets (e.g. from intake response headers or NTP) and
/// sends them on the channel; each one is merged into the context as
/// `server_time_offset_ms`.
pub struct ServerDatePublisher {
	rx: Mutex<mpsc::UnboundedReceiver<i64>>,
}

impl ServerDatePublisher {
	pub fn channel() -> (mpsc::UnboundedSender<i64>, Self) {
		let (tx, rx) = mpsc::unbounded_channel();
		(tx, Self { rx: Mutex::new(rx) })
	}
}

#[async_trait]
impl ContextPublisher for ServerDatePublisher {
	async fn run(&self, editor: ContextEditor) {
		let mut rx = self.rx.lock().await;
		while let Some(offset_ms) = rx.recv().await {
			editor.update(move |ctx| ctx.server_time_offset_ms = offset_ms);
		}
	}
}
