// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core batching and upload engine for the Loom mobile telemetry SDK.
//!
//! Product features (Logs, Crash, Analytics, Session Replay) register with
//! the core and write events through a [`FeatureScope`]; the core buffers
//! them in consent-partitioned batch files on disk and uploads finalized
//! batches to the intake with adaptive pacing. The engine is built to
//! survive mobile conditions: app suspension, flaky networks, and killed
//! processes leave at worst a replayable batch on disk.
//!
//! # Overview
//!
//! - [`SdkCore`]: feature registry and user-level command surface
//!   (consent, flush, tear-down).
//! - [`ContextProvider`]: serial owner of the evolving device/app/user
//!   snapshot every event is written against.
//! - [`MessageBus`]: fan-out of typed messages between features.
//! - [`FeatureStorage`]: per-feature batch files under `granted/`,
//!   `pending/` and `unauthorized/` directories, with optional
//!   encryption-at-rest.
//! - Upload: per-feature worker draining finalized batches with
//!   retry/backoff classification.
//!
//! # Example
//!
//! ```ignore
//! use loom_mobile_core::{SdkCore, TrackingConsent};
//!
//! let core = SdkCore::builder()
//!     .root_dir("/var/tmp/loom")
//!     .client_token("loomc_xxx")
//!     .service("checkout-app")
//!     .build()?;
//!
//! core.register(logs_feature)?;
//! core.set_tracking_consent(TrackingConsent::Granted);
//!
//! core.scope("logs").unwrap().event_write_context(|ctx, writer| {
//!     writer.write(&encode_log(ctx, "user tapped checkout"));
//! });
//! ```

mod barrier;
mod bus;
mod config;
mod context;
mod core;
mod error;
mod feature;
mod lane;
mod platform;
mod storage;
mod telemetry;
mod upload;

pub use barrier::Barrier;
pub use bus::{Message, MessageBus, MessageReceiver, TelemetryMessage};
pub use config::{PerformanceOverride, PerformancePreset};
pub use context::{
	AppState, AppStateChange, BatteryState, BatteryStatus, CarrierInfo, Context, ContextEditor,
	ContextProvider, ContextPublisher, ContextReader, DeviceInfo, NetworkInfo, Reachability,
	TrackingConsent, UserInfo,
};
pub use crate::core::{FeatureScope, SdkCore, SdkCoreBuilder};
pub use error::{CoreError, Result};
pub use feature::Feature;
pub use platform::{
	BackgroundTaskCoordinator, DateProvider, ServerDatePublisher, SystemDateProvider,
};
pub use storage::{
	AesGcmDataEncryption, Batch, BatchResolution, DataEncryption, EventWriter, FeatureStorage,
	KEY_SIZE,
};
pub use upload::{
	HttpClient, HttpRequest, HttpResponse, RequestBuilder, ReqwestHttpClient, TransportError,
	UploadBlocker, UploadConditions, UploadStatus,
};
