// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The upload worker loop. One task per feature, one pending delay at a
//! time; tear-down flips a flag that the next tick observes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::PerformancePreset;
use crate::context::{AppState, Context, ContextProvider};
use crate::platform::BackgroundTaskCoordinator;
use crate::storage::{BatchResolution, FeatureStorage};
use crate::telemetry::Telemetry;
use crate::upload::delay::UploadDelay;
use crate::upload::{HttpClient, HttpRequest, RequestBuilder, UploadConditions, UploadStatus};

struct Shutdown {
	flag: AtomicBool,
	notify: Notify,
}

/// Everything one feature's upload loop needs; shared between the periodic
/// worker and the synchronous flush path.
pub(crate) struct UploadPipeline {
	pub feature: String,
	pub storage: FeatureStorage,
	pub request_builder: Arc<dyn RequestBuilder>,
	pub http: Arc<dyn HttpClient>,
	pub context: ContextProvider,
	pub conditions: UploadConditions,
	pub background_tasks_enabled: bool,
	pub background: Option<Arc<dyn BackgroundTaskCoordinator>>,
	pub telemetry: Telemetry,
	pub preset: PerformancePreset,
}

/// Handle to one feature's running upload worker.
pub(crate) struct Uploader {
	pipeline: Arc<UploadPipeline>,
	shutdown: Arc<Shutdown>,
}

impl Uploader {
	pub fn spawn(pipeline: UploadPipeline) -> Self {
		let pipeline = Arc::new(pipeline);
		let shutdown = Arc::new(Shutdown {
			flag: AtomicBool::new(false),
			notify: Notify::new(),
		});

		let run_pipeline = Arc::clone(&pipeline);
		let run_shutdown = Arc::clone(&shutdown);
		tokio::spawn(async move {
			info!(feature = %run_pipeline.feature, "upload worker started");
			let mut delay = UploadDelay::new(&run_pipeline.preset);
			loop {
				tokio::select! {
					_ = sleep(delay.current()) => {
						if run_shutdown.flag.load(Ordering::SeqCst) {
							break;
						}
						run_pipeline.tick(&mut delay).await;
					}
					_ = run_shutdown.notify.notified() => break,
				}
			}
			debug!(feature = %run_pipeline.feature, "upload worker stopped");
		});

		Self { pipeline, shutdown }
	}

	/// Stops the loop; the current in-flight tick, if any, completes.
	pub fn stop(&self) {
		self.shutdown.flag.store(true, Ordering::SeqCst);
		self.shutdown.notify.notify_one();
	}

	/// Terminal drain used by harvest-and-upload. The caller sets the
	/// storage ignore-age flag first; every batch is deleted regardless of
	/// outcome, and the call returns once the reader is empty.
	pub async fn flush_synchronously(&self) {
		self.pipeline.flush().await;
	}
}

impl UploadPipeline {
	pub(crate) async fn tick(&self, delay: &mut UploadDelay) {
		let context = self.context.current();
		if let Err(blocker) = self.conditions.verify(&context) {
			self.telemetry.debug(format!("upload blocked: {blocker}"));
			return;
		}

		let Some(batch) = self.storage.next_batch().await else {
			delay.increase();
			return;
		};
		let batch_id = batch.id.clone();
		let event_count = batch.events.len();

		let request = match self.request_builder.build(&context, &batch.events) {
			Ok(request) => request,
			Err(err) => {
				self
					.telemetry
					.error(format!("request builder failed for batch {batch_id}: {err}"));
				self.storage.resolve(batch, BatchResolution::Delete).await;
				return;
			}
		};

		match self.send_with_lease(&context, request).await {
			UploadStatus::Success => {
				debug!(
					feature = %self.feature,
					batch = %batch_id,
					events = event_count,
					"batch uploaded"
				);
				self.storage.resolve(batch, BatchResolution::Delete).await;
				delay.decrease();
			}
			UploadStatus::Unrecoverable => {
				self
					.telemetry
					.error(format!("batch {batch_id} rejected by intake, deleted"));
				self.storage.resolve(batch, BatchResolution::Delete).await;
			}
			UploadStatus::Retryable => {
				debug!(feature = %self.feature, batch = %batch_id, "upload failed, batch retained");
				self.storage.resolve(batch, BatchResolution::Keep).await;
				delay.increase();
			}
		}
	}

	/// Holds an OS background-task lease around the request when the app is
	/// backgrounded and the embedder opted in.
	async fn send_with_lease(&self, context: &Context, request: HttpRequest) -> UploadStatus {
		let lease = if self.background_tasks_enabled
			&& context.current_app_state() == Some(AppState::Background)
		{
			self
				.background
				.as_ref()
				.map(|coordinator| (Arc::clone(coordinator), coordinator.begin_task()))
		} else {
			None
		};

		let status = match self.http.send(request).await {
			Ok(response) => UploadStatus::from_status_code(response.status),
			Err(err) => {
				debug!(feature = %self.feature, error = %err, "transport failure");
				UploadStatus::Retryable
			}
		};

		if let Some((coordinator, token)) = lease {
			coordinator.end_task(token);
		}
		status
	}

	pub(crate) async fn flush(&self) {
		loop {
			let context = self.context.current();
			let Some(batch) = self.storage.next_batch().await else {
				break;
			};
			match self.request_builder.build(&context, &batch.events) {
				Ok(request) => {
					let _ = self.http.send(request).await;
				}
				Err(err) => {
					self
						.telemetry
						.error(format!("request builder failed during flush: {err}"));
				}
			}
			// Terminal drain: deleted no matter what the intake said.
			self.storage.resolve(batch, BatchResolution::Delete).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::MessageBus;
	use crate::config::PerformancePreset;
	use crate::context::TrackingConsent;
	use crate::error::CoreError;
	use crate::lane::SerialLane;
	use crate::platform::SystemDateProvider;
	use crate::upload::{HttpResponse, TransportError};
	use async_trait::async_trait;
	use std::collections::VecDeque;
	use std::time::Duration;
	use tempfile::TempDir;
	use tokio::sync::Mutex;

	struct ScriptedHttpClient {
		responses: Mutex<VecDeque<Result<u16, ()>>>,
		requests: Mutex<Vec<HttpRequest>>,
	}

	impl ScriptedHttpClient {
		fn new(script: impl IntoIterator<Item = Result<u16, ()>>) -> Arc<Self> {
			Arc::new(Self {
				responses: Mutex::new(script.into_iter().collect()),
				requests: Mutex::new(Vec::new()),
			})
		}

		async fn request_count(&self) -> usize {
			self.requests.lock().await.len()
		}
	}

	#[async_trait]
	impl HttpClient for ScriptedHttpClient {
		async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
			self.requests.lock().await.push(request);
			match self.responses.lock().await.pop_front() {
				Some(Ok(status)) => Ok(HttpResponse { status }),
				Some(Err(())) => Err(TransportError::new("connection reset")),
				None => Ok(HttpResponse { status: 200 }),
			}
		}
	}

	struct JsonLinesBuilder;

	impl RequestBuilder for JsonLinesBuilder {
		fn build(&self, context: &Context, events: &[Vec<u8>]) -> crate::error::Result<HttpRequest> {
			let mut body = Vec::new();
			for event in events {
				body.extend_from_slice(event);
				body.push(b'\n');
			}
			Ok(HttpRequest {
				url: format!("https://intake.test/api/v2/{}", context.source),
				headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
				body,
			})
		}
	}

	struct FailingBuilder;

	impl RequestBuilder for FailingBuilder {
		fn build(&self, _context: &Context, _events: &[Vec<u8>]) -> crate::error::Result<HttpRequest> {
			Err(CoreError::RequestBuild("no intake configured".to_string()))
		}
	}

	struct Fixture {
		pipeline: UploadPipeline,
		http: Arc<ScriptedHttpClient>,
		_tmp: TempDir,
	}

	async fn fixture(
		script: impl IntoIterator<Item = Result<u16, ()>>,
		builder: Arc<dyn RequestBuilder>,
	) -> Fixture {
		let tmp = TempDir::new().unwrap();
		let bus = MessageBus::spawn();
		let preset = PerformancePreset {
			min_file_age_for_read: Duration::ZERO,
			..Default::default()
		};
		let storage = FeatureStorage::create(
			"logs",
			&tmp.path().join("logs"),
			preset.clone(),
			None,
			Arc::new(SystemDateProvider),
			SerialLane::spawn("upload-test"),
			Telemetry::new(bus.clone(), "logs"),
		)
		.unwrap();

		let context = ContextProvider::new(Context::default(), |_| {});
		context.write(|ctx| ctx.tracking_consent = TrackingConsent::Granted);
		context.barrier().wait().await;

		let http = ScriptedHttpClient::new(script);
		let pipeline = UploadPipeline {
			feature: "logs".to_string(),
			storage,
			request_builder: builder,
			http: Arc::clone(&http) as Arc<dyn HttpClient>,
			context,
			conditions: UploadConditions::default(),
			background_tasks_enabled: false,
			background: None,
			telemetry: Telemetry::new(bus, "logs"),
			preset,
		};
		Fixture {
			pipeline,
			http,
			_tmp: tmp,
		}
	}

	async fn write_and_quiesce(pipeline: &UploadPipeline, payload: &[u8]) {
		pipeline
			.storage
			.writer(TrackingConsent::Granted, false)
			.write(payload);
		pipeline.storage.inner.lane.barrier().wait().await;
	}

	#[tokio::test]
	async fn test_successful_tick_deletes_batch_and_speeds_up() {
		let fx = fixture([Ok(202)], Arc::new(JsonLinesBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		let before = delay.current();
		fx.pipeline.tick(&mut delay).await;

		assert_eq!(fx.http.request_count().await, 1);
		assert!(fx.pipeline.storage.next_batch().await.is_none());
		assert!(delay.current() < before);
	}

	#[tokio::test]
	async fn test_retryable_failure_keeps_batch_and_backs_off() {
		let fx = fixture([Ok(503), Ok(200)], Arc::new(JsonLinesBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		let before = delay.current();
		fx.pipeline.tick(&mut delay).await;

		let after_failure = delay.current();
		assert!(after_failure > before, "delay must increase on 503");

		// The retained batch uploads on the next tick.
		fx.pipeline.tick(&mut delay).await;
		assert_eq!(fx.http.request_count().await, 2);
		assert!(fx.pipeline.storage.next_batch().await.is_none());
		assert!(delay.current() < after_failure);
	}

	#[tokio::test]
	async fn test_client_error_deletes_batch_without_delay_change() {
		let fx = fixture([Ok(403)], Arc::new(JsonLinesBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		let before = delay.current();
		fx.pipeline.tick(&mut delay).await;

		assert!(fx.pipeline.storage.next_batch().await.is_none());
		assert_eq!(delay.current(), before);
	}

	#[tokio::test]
	async fn test_transport_failure_is_retryable() {
		let fx = fixture([Err(())], Arc::new(JsonLinesBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		fx.pipeline.tick(&mut delay).await;

		assert!(fx.pipeline.storage.next_batch().await.is_some());
	}

	#[tokio::test]
	async fn test_builder_failure_deletes_batch() {
		let fx = fixture([], Arc::new(FailingBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		fx.pipeline.tick(&mut delay).await;

		assert_eq!(fx.http.request_count().await, 0);
		assert!(fx.pipeline.storage.next_batch().await.is_none());
	}

	#[tokio::test]
	async fn test_blocked_conditions_skip_the_read() {
		let fx = fixture([Ok(200)], Arc::new(JsonLinesBuilder)).await;
		write_and_quiesce(&fx.pipeline, b"event").await;

		fx.pipeline.context.write(|ctx| {
			ctx.network.reachability = crate::context::Reachability::No;
		});
		fx.pipeline.context.barrier().wait().await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		let before = delay.current();
		fx.pipeline.tick(&mut delay).await;

		assert_eq!(fx.http.request_count().await, 0);
		assert_eq!(delay.current(), before);
		assert!(fx.pipeline.storage.next_batch().await.is_some());
	}

	#[tokio::test]
	async fn test_empty_read_backs_off() {
		let fx = fixture([], Arc::new(JsonLinesBuilder)).await;

		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		let before = delay.current();
		fx.pipeline.tick(&mut delay).await;

		assert!(delay.current() > before);
	}

	#[tokio::test]
	async fn test_flush_drains_everything_despite_failures() {
		let fx = fixture([Ok(500), Err(()), Ok(200)], Arc::new(JsonLinesBuilder)).await;
		for payload in [b"a".as_slice(), b"b", b"c"] {
			fx.pipeline
				.storage
				.writer(TrackingConsent::Granted, true)
				.write(payload);
		}
		fx.pipeline.storage.inner.lane.barrier().wait().await;

		fx.pipeline.storage.set_ignore_file_age_when_reading(true);
		fx.pipeline.flush().await;

		assert_eq!(fx.http.request_count().await, 3);
		assert!(fx.pipeline.storage.next_batch().await.is_none());
	}

	#[tokio::test]
	async fn test_background_lease_wraps_backgrounded_upload() {
		use std::sync::atomic::AtomicUsize;

		struct CountingCoordinator {
			begun: AtomicUsize,
			ended: AtomicUsize,
		}
		impl BackgroundTaskCoordinator for CountingCoordinator {
			fn begin_task(&self) -> u64 {
				self.begun.fetch_add(1, Ordering::SeqCst) as u64
			}
			fn end_task(&self, _token: u64) {
				self.ended.fetch_add(1, Ordering::SeqCst);
			}
		}

		let mut fx = fixture([Ok(200)], Arc::new(JsonLinesBuilder)).await;
		let coordinator = Arc::new(CountingCoordinator {
			begun: AtomicUsize::new(0),
			ended: AtomicUsize::new(0),
		});
		fx.pipeline.background_tasks_enabled = true;
		fx.pipeline.background = Some(Arc::clone(&coordinator) as Arc<dyn BackgroundTaskCoordinator>);

		fx.pipeline.context.write(|ctx| {
			ctx.app_state_history.push(crate::context::AppStateChange {
				state: AppState::Background,
				at: chrono::Utc::now(),
			});
		});
		fx.pipeline.context.barrier().wait().await;

		write_and_quiesce(&fx.pipeline, b"event").await;
		let mut delay = UploadDelay::new(&fx.pipeline.preset);
		fx.pipeline.tick(&mut delay).await;

		assert_eq!(coordinator.begun.load(Ordering::SeqCst), 1);
		assert_eq!(coordinator.ended.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_stopped_worker_ignores_later_batches() {
		let fx = fixture([Ok(200)], Arc::new(JsonLinesBuilder)).await;
		let uploader = Uploader::spawn(fx.pipeline);
		uploader.stop();

		write_and_quiesce(&uploader.pipeline, b"late").await;
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert_eq!(fx.http.request_count().await, 0);
	}
}
