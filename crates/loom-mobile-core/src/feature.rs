// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The contract every product feature (Logs, Crash, Analytics, Session
//! Replay, ...) implements to plug into the core.

use std::any::Any;
use std::sync::Arc;

use crate::barrier::Barrier;
use crate::bus::MessageReceiver;
use crate::config::PerformanceOverride;
use crate::upload::RequestBuilder;

/// An independently registered event producer.
///
/// Local-only features implement the two required methods. Remote features
/// additionally return a [`RequestBuilder`], which is what makes the core
/// instantiate a storage and an upload pipeline for them.
pub trait Feature: Send + Sync + 'static {
	/// Unique identifier; doubles as the on-disk directory name.
	fn name(&self) -> &str;

	/// Receiver connected to the message bus under this feature's name.
	fn message_receiver(&self) -> Arc<dyn MessageReceiver>;

	/// Tuning merged over the SDK default preset.
	fn performance_override(&self) -> Option<PerformanceOverride> {
		None
	}

	/// Present for features that upload to a remote intake.
	fn request_builder(&self) -> Option<Arc<dyn RequestBuilder>> {
		None
	}

	/// Continuation-capable features expose a barrier over their own
	/// background work; the harvest sequence drains these in parallel.
	fn flush_barrier(&self) -> Option<Barrier> {
		None
	}

	/// Erased handle for typed lookup through the registry. Implementations
	/// return `self`:
	///
	/// ```ignore
	/// fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
	///     self
	/// }
	/// ```
	fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
