// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The write scope: the contract under which a feature receives a
//! consistent context snapshot and a writer bound to the current consent.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::context::{Context, ContextProvider, TrackingConsent};
use crate::storage::{EventWriter, FeatureStorage};
use crate::telemetry::Telemetry;

/// Event-writing handle for one registered feature.
///
/// The block runs on the context lane with a snapshot that is consistent
/// with every write committed before the scope call; writes it issues are
/// ordered on the shared read/write lane before the block returns.
#[derive(Clone)]
pub struct FeatureScope {
	pub(crate) context: ContextProvider,
	pub(crate) storage: FeatureStorage,
	pub(crate) telemetry: Telemetry,
}

impl FeatureScope {
	/// Schedules `block` with the current context and a writer bound to the
	/// current consent.
	pub fn event_write_context<F>(&self, block: F)
	where
		F: FnOnce(&Context, &EventWriter) + Send + 'static,
	{
		self.event_write_context_with(false, false, block);
	}

	/// Like [`event_write_context`](Self::event_write_context), with
	/// `bypass_consent` forcing the writer to `Granted` (crash reports must
	/// survive a pending consent) and `force_new_batch` closing the current
	/// open batch first.
	///
	/// A panic inside `block` is caught and reported as telemetry; only the
	/// failing event is lost, the surrounding batch stays intact.
	pub fn event_write_context_with<F>(&self, bypass_consent: bool, force_new_batch: bool, block: F)
	where
		F: FnOnce(&Context, &EventWriter) + Send + 'static,
	{
		let storage = self.storage.clone();
		let telemetry = self.telemetry.clone();
		self.context.read(move |context| {
			let consent = if bypass_consent {
				TrackingConsent::Granted
			} else {
				context.tracking_consent
			};
			let writer = storage.writer(consent, force_new_batch);
			let outcome = catch_unwind(AssertUnwindSafe(|| block(context, &writer)));
			if outcome.is_err() {
				telemetry.error("event write block panicked; event dropped");
			}
		});
	}
}
