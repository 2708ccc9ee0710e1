// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fan-out delivery of typed messages between features and the core.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::barrier::Barrier;
use crate::context::Context;
use crate::core::SdkCore;

/// Self-monitoring signals emitted by the pipelines; a telemetry feature
/// may subscribe to these on the bus.
#[derive(Debug, Clone)]
pub enum TelemetryMessage {
	Debug { message: String },
	Error { message: String },
}

/// A message carried on the bus.
#[derive(Debug, Clone)]
pub enum Message {
	/// A freshly published context snapshot. Re-delivered to receivers on
	/// connect; all other messages are fire-and-forget.
	Context(Context),
	/// An opaque feature-to-feature payload.
	Payload {
		key: String,
		value: serde_json::Value,
	},
	/// Self-monitoring signal, tagged with the originating feature.
	Telemetry {
		feature: String,
		telemetry: TelemetryMessage,
	},
}

/// Receives bus messages. Returning `true` marks the message as handled;
/// when no receiver handles a message the sender's fallback runs.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
	async fn receive(&self, message: Message) -> bool;
}

enum Command {
	Connect {
		key: String,
		receiver: Arc<dyn MessageReceiver>,
	},
	Disconnect {
		key: String,
	},
	ConnectCore(Weak<SdkCore>),
	Send {
		message: Message,
		fallback: Option<Box<dyn FnOnce() + Send>>,
	},
	Barrier(Box<dyn FnOnce() + Send>),
}

/// Handle to the bus lane. Cloning is cheap; all clones feed one actor, so
/// delivery order from a single sender is preserved.
#[derive(Clone)]
pub struct MessageBus {
	tx: mpsc::UnboundedSender<Command>,
}

impl MessageBus {
	/// Spawns the bus lane. Must be called within a tokio runtime.
	pub(crate) fn spawn() -> Self {
		let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

		tokio::spawn(async move {
			let mut receivers: Vec<(String, Arc<dyn MessageReceiver>)> = Vec::new();
			let mut core: Weak<SdkCore> = Weak::new();

			while let Some(command) = rx.recv().await {
				match command {
					Command::Connect { key, receiver } => {
						receivers.retain(|(existing, _)| *existing != key);
						// New receivers catch up on the current context.
						if let Some(core) = core.upgrade() {
							let context = core.context().current();
							receiver.receive(Message::Context(context)).await;
						}
						receivers.push((key, receiver));
					}
					Command::Disconnect { key } => {
						receivers.retain(|(existing, _)| *existing != key);
					}
					Command::ConnectCore(weak) => core = weak,
					Command::Send { message, fallback } => {
						let mut handled = false;
						for (_, receiver) in &receivers {
							handled |= receiver.receive(message.clone()).await;
						}
						if !handled {
							if let Some(fallback) = fallback {
								fallback();
							}
						}
					}
					Command::Barrier(callback) => callback(),
				}
			}
			debug!("message bus drained");
		});

		Self { tx }
	}

	/// Registers a receiver under `key`, replacing any previous registration
	/// with the same key. The current context is delivered on connect.
	pub fn connect(&self, key: impl Into<String>, receiver: Arc<dyn MessageReceiver>) {
		let _ = self.tx.send(Command::Connect {
			key: key.into(),
			receiver,
		});
	}

	pub fn disconnect(&self, key: &str) {
		let _ = self.tx.send(Command::Disconnect {
			key: key.to_string(),
		});
	}

	/// Stores a weak back-reference to the core; kept weak so the
	/// core → bus → core chain never forms an ownership cycle.
	pub(crate) fn connect_core(&self, core: Weak<SdkCore>) {
		let _ = self.tx.send(Command::ConnectCore(core));
	}

	/// Delivers `message` to every connected receiver, in connect order.
	pub fn send(&self, message: Message) {
		let _ = self.tx.send(Command::Send {
			message,
			fallback: None,
		});
	}

	/// Like [`send`](Self::send), but runs `fallback` if no receiver
	/// acknowledged the message.
	pub fn send_or_else(&self, message: Message, fallback: impl FnOnce() + Send + 'static) {
		let _ = self.tx.send(Command::Send {
			message,
			fallback: Some(Box::new(fallback)),
		});
	}

	/// A quiescence barrier at the current end of the bus lane.
	pub fn barrier(&self) -> Barrier {
		let tx = self.tx.clone();
		Barrier::new(move |callback| {
			let _ = tx.send(Command::Barrier(callback));
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::Mutex;

	struct RecordingReceiver {
		handled: bool,
		seen: Mutex<Vec<String>>,
	}

	impl RecordingReceiver {
		fn new(handled: bool) -> Self {
			Self {
				handled,
				seen: Mutex::new(Vec::new()),
			}
		}
	}

	#[async_trait]
	impl MessageReceiver for RecordingReceiver {
		async fn receive(&self, message: Message) -> bool {
			let tag = match message {
				Message::Context(_) => "context".to_string(),
				Message::Payload { key, .. } => key,
				Message::Telemetry { .. } => "telemetry".to_string(),
			};
			self.seen.lock().unwrap().push(tag);
			self.handled
		}
	}

	fn payload(key: &str) -> Message {
		Message::Payload {
			key: key.to_string(),
			value: serde_json::json!({}),
		}
	}

	#[tokio::test]
	async fn test_send_fans_out_to_all_receivers() {
		let bus = MessageBus::spawn();
		let a = Arc::new(RecordingReceiver::new(true));
		let b = Arc::new(RecordingReceiver::new(true));
		bus.connect("a", Arc::clone(&a) as Arc<dyn MessageReceiver>);
		bus.connect("b", Arc::clone(&b) as Arc<dyn MessageReceiver>);

		bus.send(payload("hello"));
		bus.barrier().wait().await;

		assert_eq!(*a.seen.lock().unwrap(), vec!["hello"]);
		assert_eq!(*b.seen.lock().unwrap(), vec!["hello"]);
	}

	#[tokio::test]
	async fn test_delivery_order_is_preserved_per_receiver() {
		let bus = MessageBus::spawn();
		let receiver = Arc::new(RecordingReceiver::new(true));
		bus.connect("r", Arc::clone(&receiver) as Arc<dyn MessageReceiver>);

		for i in 0..5 {
			bus.send(payload(&format!("m{i}")));
		}
		bus.barrier().wait().await;

		assert_eq!(
			*receiver.seen.lock().unwrap(),
			vec!["m0", "m1", "m2", "m3", "m4"]
		);
	}

	#[tokio::test]
	async fn test_fallback_runs_when_nobody_handles() {
		let bus = MessageBus::spawn();
		let receiver = Arc::new(RecordingReceiver::new(false));
		bus.connect("r", Arc::clone(&receiver) as Arc<dyn MessageReceiver>);

		let fell_back = Arc::new(AtomicBool::new(false));
		{
			let fell_back = Arc::clone(&fell_back);
			bus.send_or_else(payload("unclaimed"), move || {
				fell_back.store(true, Ordering::SeqCst);
			});
		}
		bus.barrier().wait().await;

		assert!(fell_back.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn test_fallback_skipped_when_handled() {
		let bus = MessageBus::spawn();
		let receiver = Arc::new(RecordingReceiver::new(true));
		bus.connect("r", Arc::clone(&receiver) as Arc<dyn MessageReceiver>);

		let fell_back = Arc::new(AtomicBool::new(false));
		{
			let fell_back = Arc::clone(&fell_back);
			bus.send_or_else(payload("claimed"), move || {
				fell_back.store(true, Ordering::SeqCst);
			});
		}
		bus.barrier().wait().await;

		assert!(!fell_back.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn test_disconnect_stops_delivery() {
		let bus = MessageBus::spawn();
		let receiver = Arc::new(RecordingReceiver::new(true));
		bus.connect("r", Arc::clone(&receiver) as Arc<dyn MessageReceiver>);
		bus.disconnect("r");

		bus.send(payload("late"));
		bus.barrier().wait().await;

		assert!(receiver.seen.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_receiver_connected_after_send_misses_it() {
		let bus = MessageBus::spawn();
		bus.send(payload("early"));

		let receiver = Arc::new(RecordingReceiver::new(true));
		bus.connect("r", Arc::clone(&receiver) as Arc<dyn MessageReceiver>);
		bus.barrier().wait().await;

		assert!(receiver.seen.lock().unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_connect_replaces_receiver_with_same_key() {
		let bus = MessageBus::spawn();
		let first = Arc::new(RecordingReceiver::new(true));
		let second = Arc::new(RecordingReceiver::new(true));
		bus.connect("r", Arc::clone(&first) as Arc<dyn MessageReceiver>);
		bus.connect("r", Arc::clone(&second) as Arc<dyn MessageReceiver>);

		bus.send(payload("once"));
		bus.barrier().wait().await;

		assert!(first.seen.lock().unwrap().is_empty());
		assert_eq!(second.seen.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_counts_only_one_delivery_per_receiver() {
		let bus = MessageBus::spawn();
		let count = Arc::new(AtomicUsize::new(0));

		struct CountingReceiver(Arc<AtomicUsize>);
		#[async_trait]
		impl MessageReceiver for CountingReceiver {
			async fn receive(&self, _message: Message) -> bool {
				self.0.fetch_add(1, Ordering::SeqCst);
				true
			}
		}

		bus.connect("c", Arc::new(CountingReceiver(Arc::clone(&count))));
		bus.send(payload("one"));
		bus.barrier().wait().await;

		assert_eq!(count.load(Ordering::SeqCst), 1);
	}
}
