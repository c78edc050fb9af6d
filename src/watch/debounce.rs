//! Per-path debouncing and coalescing
//!
//! The debouncer is a pure state machine: callers push events in, ask for
//! the next deadline, and drain whatever has gone quiet. Driving time from
//! the outside keeps it deterministic under test; the manager task supplies
//! the clock.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::watch::event::{ChangeKind, WatchEvent};

struct Pending {
	event: WatchEvent,
	quiet_until: Instant,
	/// Arrival order of the first event for this path, for stable flushes.
	sequence: u64,
}

/// Coalesces bursts of events on the same path within a quiet window.
pub struct Debouncer {
	window: Duration,
	pending: HashMap<String, Pending>,
	next_sequence: u64,
}

impl Debouncer {
	pub fn new(window: Duration) -> Self {
		Self { window, pending: HashMap::new(), next_sequence: 0 }
	}

	pub fn is_idle(&self) -> bool {
		self.pending.is_empty()
	}

	/// Offer an event at `now`. Most events are absorbed into the pending
	/// map; a create that cancels against a pending delete (and vice versa)
	/// may collapse to nothing.
	pub fn offer(&mut self, event: WatchEvent, now: Instant) {
		let key = event.path.clone();
		let quiet_until = now + self.window;
		match self.pending.remove(&key) {
			None => {
				let sequence = self.next_sequence;
				self.next_sequence += 1;
				self.pending.insert(key, Pending { event, quiet_until, sequence });
			}
			Some(prior) => {
				if let Some(merged) = coalesce(prior.event, event) {
					self.pending.insert(
						key,
						Pending { event: merged, quiet_until, sequence: prior.sequence },
					);
				}
				// create followed by delete inside the window: suppressed
			}
		}
	}

	/// Earliest moment anything becomes flushable.
	pub fn next_deadline(&self) -> Option<Instant> {
		self.pending.values().map(|p| p.quiet_until).min()
	}

	/// Drain events whose quiet window has elapsed, in arrival order.
	pub fn flush_due(&mut self, now: Instant) -> Vec<WatchEvent> {
		let due: Vec<String> = self
			.pending
			.iter()
			.filter(|(_, p)| p.quiet_until <= now)
			.map(|(path, _)| path.clone())
			.collect();
		let mut flushed: Vec<Pending> =
			due.into_iter().filter_map(|path| self.pending.remove(&path)).collect();
		flushed.sort_by_key(|p| p.sequence);
		flushed.into_iter().map(|p| p.event).collect()
	}

	/// Drain everything regardless of deadlines (shutdown path).
	pub fn flush_all(&mut self) -> Vec<WatchEvent> {
		let mut flushed: Vec<Pending> = self.pending.drain().map(|(_, p)| p).collect();
		flushed.sort_by_key(|p| p.sequence);
		flushed.into_iter().map(|p| p.event).collect()
	}
}

/// Merge two in-window events for the same path. `None` means the pair
/// cancels entirely (create then delete).
fn coalesce(prior: WatchEvent, next: WatchEvent) -> Option<WatchEvent> {
	use ChangeKind::*;
	match (prior.kind, next.kind) {
		(Create, Delete) => None,
		(Modify, Delete) | (Rename, Delete) => Some(next),
		// deleted then recreated inside the window: contents replaced
		(Delete, Create) => Some(WatchEvent { kind: Modify, ..next }),
		// a rename followed by writes keeps the rename and its old path
		(Rename, Modify) => Some(WatchEvent {
			kind: Rename,
			old_path: prior.old_path,
			..next
		}),
		(_, Rename) => Some(next),
		_ => Some(next),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn debouncer() -> Debouncer {
		Debouncer::new(Duration::from_millis(50))
	}

	#[test]
	fn test_modify_bursts_coalesce() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::modify("/f").with_size(1), t0);
		d.offer(WatchEvent::modify("/f").with_size(2), t0 + Duration::from_millis(10));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, ChangeKind::Modify);
		assert_eq!(events[0].size, Some(2));
	}

	#[test]
	fn test_create_write_delete_burst_yields_single_delete() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::create("/d/f"), t0);
		d.offer(WatchEvent::modify("/d/f"), t0 + Duration::from_millis(5));
		d.offer(WatchEvent::delete("/d/f"), t0 + Duration::from_millis(10));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, ChangeKind::Delete);
		assert_eq!(events[0].path, "/d/f");
	}

	#[test]
	fn test_create_then_delete_suppressed() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::create("/f"), t0);
		d.offer(WatchEvent::delete("/f"), t0 + Duration::from_millis(5));
		assert!(d.flush_due(t0 + Duration::from_millis(200)).is_empty());
		assert!(d.is_idle());
	}

	#[test]
	fn test_modify_then_delete_becomes_delete() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::modify("/f"), t0);
		d.offer(WatchEvent::modify("/f"), t0 + Duration::from_millis(5));
		d.offer(WatchEvent::delete("/f"), t0 + Duration::from_millis(10));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, ChangeKind::Delete);
	}

	#[test]
	fn test_delete_then_create_becomes_modify() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::delete("/f"), t0);
		d.offer(WatchEvent::create("/f"), t0 + Duration::from_millis(5));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, ChangeKind::Modify);
	}

	#[test]
	fn test_rename_preserves_old_path_through_modify() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::rename("/old", "/new"), t0);
		d.offer(WatchEvent::modify("/new").with_size(9), t0 + Duration::from_millis(5));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].kind, ChangeKind::Rename);
		assert_eq!(events[0].old_path.as_deref(), Some("/old"));
		assert_eq!(events[0].size, Some(9));
	}

	#[test]
	fn test_new_event_resets_quiet_window() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::modify("/f"), t0);
		// another write 40ms in pushes the deadline out
		d.offer(WatchEvent::modify("/f"), t0 + Duration::from_millis(40));
		assert!(d.flush_due(t0 + Duration::from_millis(60)).is_empty());
		assert_eq!(d.flush_due(t0 + Duration::from_millis(95)).len(), 1);
	}

	#[test]
	fn test_flush_preserves_arrival_order_across_paths() {
		let mut d = debouncer();
		let t0 = Instant::now();
		d.offer(WatchEvent::create("/a"), t0);
		d.offer(WatchEvent::create("/b"), t0 + Duration::from_millis(1));
		d.offer(WatchEvent::create("/c"), t0 + Duration::from_millis(2));

		let events = d.flush_due(t0 + Duration::from_millis(100));
		let paths: Vec<&str> = events.iter().map(|e| e.path.as_str()).collect();
		assert_eq!(paths, vec!["/a", "/b", "/c"]);
	}

	#[test]
	fn test_next_deadline_tracks_earliest() {
		let mut d = debouncer();
		assert!(d.next_deadline().is_none());
		let t0 = Instant::now();
		d.offer(WatchEvent::create("/a"), t0);
		assert_eq!(d.next_deadline(), Some(t0 + Duration::from_millis(50)));
	}
}
