// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The feature registry and user-level command surface.
//!
//! The core exclusively owns the storage and upload pipeline of every
//! registered feature, shares the context provider by handle, and routes
//! user-level operations (consent changes, flush, tear-down) so they stay
//! ordered against background I/O.

mod scope;

pub use scope::FeatureScope;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use crate::barrier::Barrier;
use crate::bus::{Message, MessageBus};
use crate::config::PerformancePreset;
use crate::context::{Context, ContextProvider, DeviceInfo, TrackingConsent, UserInfo};
use crate::error::{CoreError, Result};
use crate::feature::Feature;
use crate::lane::SerialLane;
use crate::platform::{BackgroundTaskCoordinator, DateProvider, SystemDateProvider};
use crate::storage::{DataEncryption, FeatureStorage};
use crate::telemetry::Telemetry;
use crate::upload::{HttpClient, ReqwestHttpClient, UploadConditions, UploadPipeline, Uploader};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for constructing an [`SdkCore`].
pub struct SdkCoreBuilder {
	root_dir: Option<PathBuf>,
	site: String,
	client_token: Option<String>,
	service: String,
	env: String,
	version: String,
	source: String,
	preset: PerformancePreset,
	encryption: Option<Arc<dyn DataEncryption>>,
	date_provider: Arc<dyn DateProvider>,
	http_client: Option<Arc<dyn HttpClient>>,
	upload_conditions: UploadConditions,
	background_tasks_enabled: bool,
	background: Option<Arc<dyn BackgroundTaskCoordinator>>,
	device: Option<DeviceInfo>,
	initial_consent: TrackingConsent,
}

impl SdkCoreBuilder {
	pub fn new() -> Self {
		Self {
			root_dir: None,
			site: "loom.ghuntley.com".to_string(),
			client_token: None,
			service: String::new(),
			env: "production".to_string(),
			version: String::new(),
			source: "loom-mobile".to_string(),
			preset: PerformancePreset::default(),
			encryption: None,
			date_provider: Arc::new(SystemDateProvider),
			http_client: None,
			upload_conditions: UploadConditions::default(),
			background_tasks_enabled: false,
			background: None,
			device: None,
			initial_consent: TrackingConsent::Pending,
		}
	}

	/// Directory under which every feature persists its batches.
	pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.root_dir = Some(dir.into());
		self
	}

	/// Intake site, e.g. `loom.ghuntley.com`.
	pub fn site(mut self, site: impl Into<String>) -> Self {
		self.site = site.into();
		self
	}

	/// Client token identifying the application to the intake.
	pub fn client_token(mut self, token: impl Into<String>) -> Self {
		self.client_token = Some(token.into());
		self
	}

	pub fn service(mut self, service: impl Into<String>) -> Self {
		self.service = service.into();
		self
	}

	/// Example: `production`, `staging`, `development`.
	pub fn env(mut self, env: impl Into<String>) -> Self {
		self.env = env.into();
		self
	}

	/// Host application version.
	pub fn version(mut self, version: impl Into<String>) -> Self {
		self.version = version.into();
		self
	}

	pub fn source(mut self, source: impl Into<String>) -> Self {
		self.source = source.into();
		self
	}

	/// SDK-wide performance preset; features may override per field.
	pub fn performance_preset(mut self, preset: PerformancePreset) -> Self {
		self.preset = preset;
		self
	}

	/// Installs encryption-at-rest for every feature's batches.
	pub fn encryption(mut self, encryption: Arc<dyn DataEncryption>) -> Self {
		self.encryption = Some(encryption);
		self
	}

	pub fn date_provider(mut self, provider: Arc<dyn DateProvider>) -> Self {
		self.date_provider = provider;
		self
	}

	/// Substitutes the HTTP transport; defaults to [`ReqwestHttpClient`].
	pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
		self.http_client = Some(client);
		self
	}

	pub fn upload_conditions(mut self, conditions: UploadConditions) -> Self {
		self.upload_conditions = conditions;
		self
	}

	/// Enables OS background-task leases around in-flight uploads.
	pub fn background_tasks(mut self, coordinator: Arc<dyn BackgroundTaskCoordinator>) -> Self {
		self.background_tasks_enabled = true;
		self.background = Some(coordinator);
		self
	}

	pub fn device(mut self, device: DeviceInfo) -> Self {
		self.device = Some(device);
		self
	}

	pub fn initial_consent(mut self, consent: TrackingConsent) -> Self {
		self.initial_consent = consent;
		self
	}

	/// Builds the core and spawns its lanes. Must be called within a tokio
	/// runtime.
	pub fn build(self) -> Result<Arc<SdkCore>> {
		let root_dir = self.root_dir.ok_or(CoreError::MissingRootDirectory)?;
		let client_token = self.client_token.ok_or(CoreError::MissingClientToken)?;
		std::fs::create_dir_all(&root_dir)?;

		let http_client = match self.http_client {
			Some(client) => client,
			None => Arc::new(ReqwestHttpClient::new(DEFAULT_REQUEST_TIMEOUT)?),
		};

		let bus = MessageBus::spawn();
		let initial = Context {
			site: self.site,
			client_token,
			service: self.service,
			env: self.env,
			version_tag: self.version,
			sdk_version: env!("CARGO_PKG_VERSION").to_string(),
			source: self.source,
			device: self.device.unwrap_or_else(DeviceInfo::host),
			launch_time: Some(self.date_provider.now()),
			tracking_consent: self.initial_consent,
			..Default::default()
		};

		let change_bus = bus.clone();
		let context = ContextProvider::new(initial, move |snapshot| {
			change_bus.send(Message::Context(snapshot.clone()));
		});

		let core = Arc::new(SdkCore {
			bus: bus.clone(),
			context,
			rw_lane: SerialLane::spawn("read-write"),
			root_dir,
			preset: self.preset,
			encryption: self.encryption,
			date_provider: self.date_provider,
			http_client,
			upload_conditions: self.upload_conditions,
			background_tasks_enabled: self.background_tasks_enabled,
			background: self.background,
			features: Mutex::new(HashMap::new()),
			torn_down: AtomicBool::new(false),
		});
		bus.connect_core(Arc::downgrade(&core));

		info!(root = %core.root_dir.display(), "core initialized");
		Ok(core)
	}
}

impl Default for SdkCoreBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct FeatureEntry {
	feature: Arc<dyn Feature>,
	storage: Option<FeatureStorage>,
	uploader: Option<Uploader>,
	telemetry: Telemetry,
}

/// The engine: feature registry, context owner, and orchestrator of the
/// storage and upload pipelines.
pub struct SdkCore {
	bus: MessageBus,
	context: ContextProvider,
	rw_lane: SerialLane,
	root_dir: PathBuf,
	preset: PerformancePreset,
	encryption: Option<Arc<dyn DataEncryption>>,
	date_provider: Arc<dyn DateProvider>,
	http_client: Arc<dyn HttpClient>,
	upload_conditions: UploadConditions,
	background_tasks_enabled: bool,
	background: Option<Arc<dyn BackgroundTaskCoordinator>>,
	features: Mutex<HashMap<String, FeatureEntry>>,
	torn_down: AtomicBool,
}

impl SdkCore {
	pub fn builder() -> SdkCoreBuilder {
		SdkCoreBuilder::new()
	}

	/// Registers a feature: creates its directory tree, derives its
	/// effective preset, and (when the feature uploads remotely) its
	/// storage and upload pipeline. The feature's receiver is connected to
	/// the bus and stale unauthorized data is purged.
	pub fn register(&self, feature: Arc<dyn Feature>) -> Result<()> {
		if self.torn_down.load(Ordering::SeqCst) {
			return Err(CoreError::CoreTornDown);
		}
		let name = feature.name().to_string();
		let mut features = self.features();
		if features.contains_key(&name) {
			return Err(CoreError::DuplicateFeature { name });
		}

		let feature_root = self.root_dir.join(&name);
		std::fs::create_dir_all(&feature_root)?;

		let preset = feature
			.performance_override()
			.map(|over| over.merged_over(&self.preset))
			.unwrap_or_else(|| self.preset.clone());
		let telemetry = Telemetry::new(self.bus.clone(), &name);

		let (storage, uploader) = match feature.request_builder() {
			Some(request_builder) => {
				let storage = FeatureStorage::create(
					&name,
					&feature_root,
					preset.clone(),
					self.encryption.clone(),
					Arc::clone(&self.date_provider),
					self.rw_lane.clone(),
					telemetry.clone(),
				)?;
				storage.clear_unauthorized_data();

				let uploader = Uploader::spawn(UploadPipeline {
					feature: name.clone(),
					storage: storage.clone(),
					request_builder,
					http: Arc::clone(&self.http_client),
					context: self.context.clone(),
					conditions: self.upload_conditions.clone(),
					background_tasks_enabled: self.background_tasks_enabled,
					background: self.background.clone(),
					telemetry: telemetry.clone(),
					preset,
				});
				(Some(storage), Some(uploader))
			}
			None => (None, None),
		};

		self.bus.connect(name.as_str(), feature.message_receiver());
		features.insert(
			name.clone(),
			FeatureEntry {
				feature,
				storage,
				uploader,
				telemetry,
			},
		);

		info!(feature = %name, "feature registered");
		Ok(())
	}

	/// Typed feature lookup.
	pub fn feature<T: Feature>(&self, name: &str) -> Option<Arc<T>> {
		let features = self.features();
		let entry = features.get(name)?;
		Arc::clone(&entry.feature).as_any().downcast::<T>().ok()
	}

	/// The write scope for a remote feature; `None` when the feature is not
	/// registered or has no storage.
	pub fn scope(&self, name: &str) -> Option<FeatureScope> {
		let features = self.features();
		let entry = features.get(name)?;
		Some(FeatureScope {
			context: self.context.clone(),
			storage: entry.storage.clone()?,
			telemetry: entry.telemetry.clone(),
		})
	}

	/// The shared context provider; use it to read, write, or bind platform
	/// sources.
	pub fn context(&self) -> &ContextProvider {
		&self.context
	}

	/// Replaces the user identity in the context.
	pub fn set_user_info(&self, user: UserInfo) {
		self.context.write(move |ctx| ctx.user = user);
	}

	/// Merges additional key-value pairs into the user's extra info.
	pub fn add_user_extra_info(
		&self,
		extra: impl IntoIterator<Item = (String, serde_json::Value)> + Send + 'static,
	) {
		self.context.write(move |ctx| ctx.user.extra.extend(extra));
	}

	/// Changes the tracking consent. Unauthorized data of every feature is
	/// migrated first (on the read/write lane), then the new consent is
	/// published; events written through scopes entered after this call land
	/// under the new consent.
	pub fn set_tracking_consent(&self, consent: TrackingConsent) {
		if self.torn_down.load(Ordering::SeqCst) {
			return;
		}
		if self.context.current().tracking_consent == consent {
			return;
		}
		for entry in self.features().values() {
			if let Some(storage) = &entry.storage {
				storage.migrate_unauthorized(consent);
			}
		}
		self.context.write(move |ctx| ctx.tracking_consent = consent);
	}

	/// Removes every feature's batches across all consent directories.
	pub fn clear_all_data(&self) {
		for entry in self.features().values() {
			if let Some(storage) = &entry.storage {
				storage.clear_all_data();
			}
		}
	}

	/// Attaches an opaque sub-context under `key`.
	pub fn set_baggage(&self, key: impl Into<String>, value: serde_json::Value) {
		let key = key.into();
		self.context.write(move |ctx| {
			ctx.baggages.insert(key, value);
		});
	}

	pub fn remove_baggage(&self, key: &str) {
		let key = key.to_string();
		self.context.write(move |ctx| {
			ctx.baggages.remove(&key);
		});
	}

	/// Forwards a message to the bus.
	pub fn send_message(&self, message: Message) {
		self.bus.send(message);
	}

	/// Forwards a message; `fallback` runs when no receiver handles it.
	pub fn send_message_or_else(&self, message: Message, fallback: impl FnOnce() + Send + 'static) {
		self.bus.send_or_else(message, fallback);
	}

	/// Awaits quiescence of every internal lane in causal order: bus,
	/// feature continuations (parallel), context, read/write. Every path
	/// from a user thread to disk passes through these lanes in this order,
	/// so afterwards all previously submitted events are on disk.
	pub async fn harvest(&self) {
		self.harvest_barrier().wait().await;
	}

	fn harvest_barrier(&self) -> Barrier {
		let continuations = {
			let features = self.features();
			Barrier::all(
				features
					.values()
					.filter_map(|entry| entry.feature.flush_barrier()),
			)
		};
		Barrier::sequence([
			self.bus.barrier(),
			continuations,
			self.context.barrier(),
			self.rw_lane.barrier(),
		])
	}

	/// Harvest-and-upload, then release: awaits the harvest barrier, drains
	/// every feature's batches through a synchronous flush (ages ignored,
	/// batches deleted regardless of outcome), stops the upload workers and
	/// releases all features. Idempotent; the core accepts no work
	/// afterwards.
	pub async fn flush_and_tear_down(&self) {
		if self.torn_down.swap(true, Ordering::SeqCst) {
			return;
		}

		let harvest = self.harvest_barrier();
		harvest.wait().await;

		let entries: Vec<FeatureEntry> = {
			let mut features = self.features();
			features.drain().map(|(_, entry)| entry).collect()
		};

		for entry in &entries {
			if let Some(storage) = &entry.storage {
				storage.set_ignore_file_age_when_reading(true);
			}
		}
		for entry in &entries {
			if let Some(uploader) = &entry.uploader {
				uploader.flush_synchronously().await;
			}
		}
		for entry in &entries {
			if let Some(storage) = &entry.storage {
				storage.set_ignore_file_age_when_reading(false);
			}
			if let Some(uploader) = &entry.uploader {
				uploader.stop();
			}
			self.bus.disconnect(entry.feature.name());
		}

		info!("core flushed and torn down");
	}

	fn features(&self) -> MutexGuard<'_, HashMap<String, FeatureEntry>> {
		self
			.features
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}
}
