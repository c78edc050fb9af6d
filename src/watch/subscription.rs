//! Subscription fan-out over an external transport
//!
//! The transport (WebSocket, HTTP streaming, ...) lives outside this crate;
//! it hands inbound JSON text to `handle_message` and provides an
//! [`EventSink`] for outbound batches. Subscriptions are keyed by
//! connection + subscription id and reaped when the connection goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::path;
use crate::pattern::{CompiledPattern, MatcherCache, ParsedPattern};
use crate::watch::batch::BatchEmitter;
use crate::watch::event::{WatchEvent, WireMessage};
use crate::watch::manager::{sleep_until_opt, WatchManager, WatcherOptions};
use crate::watch::rate_limit::RateLimiter;

/// Outbound half of a connection. Implementations must not block.
pub trait EventSink: Send + Sync {
	fn send(&self, message: String);
}

impl EventSink for mpsc::UnboundedSender<String> {
	fn send(&self, message: String) {
		let _ = mpsc::UnboundedSender::send(self, message);
	}
}

/// Delivery counters exposed for back-pressure monitoring.
#[derive(Debug, Default)]
pub struct WatchMetrics {
	pub delivered_batches: AtomicU64,
	pub delivered_events: AtomicU64,
	pub dropped_events: AtomicU64,
}

struct Subscription {
	path: String,
	recursive: bool,
	filter: Option<CompiledPattern>,
	limiter: RateLimiter,
}

struct Connection {
	sink: Arc<dyn EventSink>,
	subscriptions: HashMap<String, Subscription>,
}

/// Manages subscribe/unsubscribe wire messages and fans event batches out
/// to every matching subscription.
pub struct SubscriptionManager {
	connections: Mutex<HashMap<String, Connection>>,
	matcher_cache: MatcherCache,
	rate_capacity: u32,
	rate_refill: u32,
	metrics: Arc<WatchMetrics>,
}

impl SubscriptionManager {
	pub fn new(config: &FsConfig) -> Self {
		Self {
			connections: Mutex::new(HashMap::new()),
			matcher_cache: MatcherCache::new(config.matcher_cache_capacity),
			rate_capacity: config.rate_limit_capacity,
			rate_refill: config.rate_limit_refill_per_sec,
			metrics: Arc::new(WatchMetrics::default()),
		}
	}

	pub fn metrics(&self) -> Arc<WatchMetrics> {
		self.metrics.clone()
	}

	/// Register the outbound half of a connection.
	pub fn register_connection(&self, connection_id: &str, sink: Arc<dyn EventSink>) {
		let mut connections = self.connections.lock().expect("subscription table poisoned");
		connections.insert(
			connection_id.to_string(),
			Connection { sink, subscriptions: HashMap::new() },
		);
		debug!("Connection {connection_id} registered");
	}

	/// Release every subscription owned by a connection.
	pub fn disconnect(&self, connection_id: &str) {
		let mut connections = self.connections.lock().expect("subscription table poisoned");
		if let Some(connection) = connections.remove(connection_id) {
			debug!(
				"Connection {connection_id} released {} subscription(s)",
				connection.subscriptions.len()
			);
		}
	}

	/// Handle an inbound wire message for a connection.
	pub fn handle_message(&self, connection_id: &str, text: &str) -> Result<()> {
		let message: WireMessage = serde_json::from_str(text)?;
		match message {
			WireMessage::Subscribe { id, path: sub_path, recursive, filter } => {
				let filter = match filter {
					Some(source) => {
						let parsed = ParsedPattern::parse(&source)?;
						Some(CompiledPattern::compile(parsed, &self.matcher_cache)?)
					}
					None => None,
				};
				let mut connections =
					self.connections.lock().expect("subscription table poisoned");
				let connection = connections
					.get_mut(connection_id)
					.ok_or_else(|| FsError::invalid(format!("unknown connection {connection_id}")))?;
				connection.subscriptions.insert(
					id.clone(),
					Subscription {
						path: path::resolve(&[sub_path.as_str()]),
						recursive,
						filter,
						limiter: RateLimiter::new(self.rate_capacity, self.rate_refill),
					},
				);
				debug!("Connection {connection_id} subscribed {id}");
				Ok(())
			}
			WireMessage::Unsubscribe { id } => {
				let mut connections =
					self.connections.lock().expect("subscription table poisoned");
				if let Some(connection) = connections.get_mut(connection_id) {
					connection.subscriptions.remove(&id);
				}
				Ok(())
			}
			WireMessage::Batch { .. } => {
				Err(FsError::invalid("batch messages are outbound only"))
			}
		}
	}

	/// Bridge a watch manager into this fan-out: a recursive root watcher
	/// feeds a [`BatchEmitter`] whose closed batches are dispatched to
	/// every subscription. Returns the watcher id for `unsubscribe`.
	pub fn attach(
		self: Arc<Self>, manager: &WatchManager, batch_window: std::time::Duration,
	) -> uuid::Uuid {
		let (tx, mut rx) = mpsc::unbounded_channel::<Vec<WatchEvent>>();
		let watcher_id = manager.subscribe_listener(
			"/",
			WatcherOptions { recursive: true, debounce: None },
			Box::new(move |events: Vec<WatchEvent>| {
				let _ = tx.send(events);
			}),
		);

		let dispatcher = self;
		tokio::spawn(async move {
			let mut emitter = BatchEmitter::new(batch_window);
			loop {
				let deadline = emitter.next_deadline();
				tokio::select! {
					incoming = rx.recv() => match incoming {
						None => break,
						Some(events) => emitter.push_many(events, Instant::now()),
					},
					_ = sleep_until_opt(deadline) => {}
				}
				if let Some(batch) = emitter.flush_due(Instant::now()) {
					dispatcher.dispatch(&batch);
				}
			}
			if let Some(batch) = emitter.flush_all() {
				dispatcher.dispatch(&batch);
			}
		});
		watcher_id
	}

	/// Fan a batch of committed events out to every matching subscription.
	/// Delivery is best-effort at-least-once per connection; per-path order
	/// is preserved within a batch.
	pub fn dispatch(&self, events: &[WatchEvent]) {
		if events.is_empty() {
			return;
		}
		let now = Instant::now();
		let mut connections = self.connections.lock().expect("subscription table poisoned");
		for connection in connections.values_mut() {
			for subscription in connection.subscriptions.values_mut() {
				let matching: Vec<WatchEvent> = events
					.iter()
					.filter(|event| subscription_matches(subscription, event))
					.cloned()
					.collect();
				if matching.is_empty() {
					continue;
				}
				let offered = matching.len();
				let admitted = subscription.limiter.admit(matching, now);
				let dropped = offered - admitted.len();
				if dropped > 0 {
					self.metrics.dropped_events.fetch_add(dropped as u64, Ordering::Relaxed);
				}
				if admitted.is_empty() {
					continue;
				}
				self.metrics
					.delivered_events
					.fetch_add(admitted.len() as u64, Ordering::Relaxed);
				self.metrics.delivered_batches.fetch_add(1, Ordering::Relaxed);
				match serde_json::to_string(&WireMessage::Batch { events: admitted }) {
					Ok(payload) => connection.sink.send(payload),
					Err(e) => warn!("Failed to serialize event batch: {e}"),
				}
			}
		}
	}
}

fn subscription_matches(subscription: &Subscription, event: &WatchEvent) -> bool {
	let in_scope = |event_path: &str| {
		if event_path == subscription.path
			|| path::dirname(event_path) == subscription.path
		{
			return true;
		}
		if !subscription.recursive {
			return false;
		}
		let prefix = if subscription.path == "/" {
			"/".to_string()
		} else {
			format!("{}/", subscription.path)
		};
		event_path.starts_with(&prefix)
	};
	if !in_scope(&event.path)
		&& !event.old_path.as_deref().is_some_and(in_scope)
	{
		return false;
	}
	match &subscription.filter {
		None => true,
		Some(filter) => {
			let rel = event.path.trim_start_matches('/');
			let segments = path::segments(rel);
			filter.matches(&segments, event.is_directory.unwrap_or(false))
		}
	}
}
