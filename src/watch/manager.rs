//! Watcher registry and fan-out
//!
//! A single manager task owns every watcher's debouncer and drives the
//! quiet-window clock. Mutations publish committed events into the task;
//! the task routes them to matching watchers, coalesces, and delivers to
//! boxed listeners so listener lifetime is decoupled from the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::path;
use crate::watch::debounce::Debouncer;
use crate::watch::event::WatchEvent;

/// Receives coalesced events for one watcher.
pub trait WatchListener: Send + Sync {
	fn on_events(&self, events: Vec<WatchEvent>);
}

impl<F> WatchListener for F
where
	F: Fn(Vec<WatchEvent>) + Send + Sync,
{
	fn on_events(&self, events: Vec<WatchEvent>) {
		self(events)
	}
}

/// Channel adapter: forwards each coalesced event to an unbounded channel.
struct ChannelListener {
	tx: mpsc::UnboundedSender<WatchEvent>,
}

impl WatchListener for ChannelListener {
	fn on_events(&self, events: Vec<WatchEvent>) {
		for event in events {
			if self.tx.send(event).is_err() {
				trace!("Watch receiver dropped; events discarded");
				return;
			}
		}
	}
}

/// Per-watcher options.
#[derive(Debug, Clone, Default)]
pub struct WatcherOptions {
	pub recursive: bool,
	/// Quiet window override; the manager default applies when absent.
	pub debounce: Option<Duration>,
}

struct WatcherEntry {
	path: String,
	recursive: bool,
	debouncer: Debouncer,
	listener: Box<dyn WatchListener>,
}

enum Command {
	Publish(Vec<WatchEvent>),
	Subscribe { id: Uuid, path: String, options: WatcherOptions, listener: Box<dyn WatchListener> },
	Unsubscribe { id: Uuid },
}

/// Handle to the manager task. Cloneable; the task stops when every handle
/// is gone (remaining events are flushed).
#[derive(Clone, Debug)]
pub struct WatchManager {
	tx: mpsc::UnboundedSender<Command>,
	default_debounce: Duration,
}

impl WatchManager {
	pub fn new(default_debounce: Duration) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		tokio::spawn(run_manager(rx));
		Self { tx, default_debounce }
	}

	/// Offer committed events to every matching watcher.
	pub fn publish(&self, events: Vec<WatchEvent>) {
		if events.is_empty() {
			return;
		}
		let _ = self.tx.send(Command::Publish(events));
	}

	/// Register a watcher delivering into a channel.
	pub fn subscribe(
		&self, watch_path: &str, options: WatcherOptions,
	) -> (Uuid, mpsc::UnboundedReceiver<WatchEvent>) {
		let (event_tx, event_rx) = mpsc::unbounded_channel();
		let id = self.subscribe_listener(watch_path, options, Box::new(ChannelListener { tx: event_tx }));
		(id, event_rx)
	}

	/// Register a watcher with an explicit listener implementation.
	pub fn subscribe_listener(
		&self, watch_path: &str, mut options: WatcherOptions, listener: Box<dyn WatchListener>,
	) -> Uuid {
		if options.debounce.is_none() {
			options.debounce = Some(self.default_debounce);
		}
		let id = Uuid::new_v4();
		let _ = self.tx.send(Command::Subscribe {
			id,
			path: path::resolve(&[watch_path]),
			options,
			listener,
		});
		id
	}

	pub fn unsubscribe(&self, id: Uuid) {
		let _ = self.tx.send(Command::Unsubscribe { id });
	}
}

async fn run_manager(mut rx: mpsc::UnboundedReceiver<Command>) {
	let mut watchers: HashMap<Uuid, WatcherEntry> = HashMap::new();

	loop {
		let deadline = watchers.values().filter_map(|w| w.debouncer.next_deadline()).min();

		tokio::select! {
			command = rx.recv() => {
				match command {
					None => break,
					Some(Command::Publish(events)) => {
						let now = Instant::now();
						for watcher in watchers.values_mut() {
							for event in &events {
								if watcher_matches(watcher, event) {
									watcher.debouncer.offer(event.clone(), now);
								}
							}
						}
					}
					Some(Command::Subscribe { id, path, options, listener }) => {
						debug!("Watcher {id} registered on {path} (recursive: {})", options.recursive);
						watchers.insert(id, WatcherEntry {
							path,
							recursive: options.recursive,
							debouncer: Debouncer::new(options.debounce.unwrap_or(Duration::from_millis(50))),
							listener,
						});
					}
					Some(Command::Unsubscribe { id }) => {
						watchers.remove(&id);
					}
				}
			}
			_ = sleep_until_opt(deadline) => {}
		}

		let now = Instant::now();
		for watcher in watchers.values_mut() {
			let due = watcher.debouncer.flush_due(now);
			if !due.is_empty() {
				watcher.listener.on_events(due);
			}
		}
	}

	// all handles dropped: deliver whatever is still pending
	for watcher in watchers.values_mut() {
		let remaining = watcher.debouncer.flush_all();
		if !remaining.is_empty() {
			watcher.listener.on_events(remaining);
		}
	}
	debug!("Watch manager task finished");
}

pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
		None => std::future::pending::<()>().await,
	}
}

fn watcher_matches(watcher: &WatcherEntry, event: &WatchEvent) -> bool {
	path_matches(watcher, &event.path)
		|| event.old_path.as_deref().is_some_and(|old| path_matches(watcher, old))
}

fn path_matches(watcher: &WatcherEntry, event_path: &str) -> bool {
	if event_path == watcher.path || path::dirname(event_path) == watcher.path {
		return true;
	}
	if !watcher.recursive {
		return false;
	}
	let prefix = if watcher.path == "/" {
		"/".to_string()
	} else {
		format!("{}/", watcher.path)
	};
	event_path.starts_with(&prefix)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::watch::event::ChangeKind;
	use std::time::Duration;

	async fn recv_with_timeout(
		rx: &mut mpsc::UnboundedReceiver<WatchEvent>,
	) -> Option<WatchEvent> {
		tokio::time::timeout(Duration::from_millis(500), rx.recv()).await.ok().flatten()
	}

	#[tokio::test]
	async fn test_recursive_watcher_sees_descendants() {
		let manager = WatchManager::new(Duration::from_millis(10));
		let (_id, mut rx) =
			manager.subscribe("/d", WatcherOptions { recursive: true, debounce: None });
		// subscription command must land before the publish
		tokio::time::sleep(Duration::from_millis(20)).await;

		manager.publish(vec![WatchEvent::create("/d/sub/f.txt")]);
		let event = recv_with_timeout(&mut rx).await.expect("event expected");
		assert_eq!(event.path, "/d/sub/f.txt");
		assert_eq!(event.kind, ChangeKind::Create);
	}

	#[tokio::test]
	async fn test_non_recursive_watcher_sees_only_direct_children() {
		let manager = WatchManager::new(Duration::from_millis(10));
		let (_id, mut rx) =
			manager.subscribe("/d", WatcherOptions { recursive: false, debounce: None });
		tokio::time::sleep(Duration::from_millis(20)).await;

		manager.publish(vec![
			WatchEvent::create("/d/deep/f.txt"),
			WatchEvent::create("/d/direct.txt"),
		]);
		let event = recv_with_timeout(&mut rx).await.expect("event expected");
		assert_eq!(event.path, "/d/direct.txt");
	}

	#[tokio::test]
	async fn test_burst_collapses_to_single_delete() {
		let manager = WatchManager::new(Duration::from_millis(50));
		let (_id, mut rx) =
			manager.subscribe("/d", WatcherOptions { recursive: true, debounce: None });
		tokio::time::sleep(Duration::from_millis(20)).await;

		manager.publish(vec![WatchEvent::modify("/d/f")]);
		manager.publish(vec![WatchEvent::modify("/d/f")]);
		manager.publish(vec![WatchEvent::delete("/d/f")]);

		let event = recv_with_timeout(&mut rx).await.expect("event expected");
		assert_eq!(event.kind, ChangeKind::Delete);
		assert_eq!(event.path, "/d/f");
		// nothing else arrives
		assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
	}

	#[tokio::test]
	async fn test_unsubscribe_stops_delivery() {
		let manager = WatchManager::new(Duration::from_millis(10));
		let (id, mut rx) =
			manager.subscribe("/d", WatcherOptions { recursive: true, debounce: None });
		tokio::time::sleep(Duration::from_millis(20)).await;
		manager.unsubscribe(id);
		tokio::time::sleep(Duration::from_millis(20)).await;

		manager.publish(vec![WatchEvent::create("/d/f")]);
		assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv()).await.is_err());
	}
}
