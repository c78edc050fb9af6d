//! Time-window batching of emitted events
//!
//! Pure state machine like the debouncer: the first event buffered opens a
//! window; everything arriving before it closes joins the batch.

use std::time::{Duration, Instant};

use crate::watch::event::WatchEvent;

pub struct BatchEmitter {
	window: Duration,
	buffer: Vec<WatchEvent>,
	window_closes: Option<Instant>,
}

impl BatchEmitter {
	pub fn new(window: Duration) -> Self {
		Self { window, buffer: Vec::new(), window_closes: None }
	}

	pub fn push(&mut self, event: WatchEvent, now: Instant) {
		if self.buffer.is_empty() {
			self.window_closes = Some(now + self.window);
		}
		self.buffer.push(event);
	}

	pub fn push_many(&mut self, events: impl IntoIterator<Item = WatchEvent>, now: Instant) {
		for event in events {
			self.push(event, now);
		}
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		self.window_closes
	}

	/// The closed batch, if the window has elapsed.
	pub fn flush_due(&mut self, now: Instant) -> Option<Vec<WatchEvent>> {
		match self.window_closes {
			Some(deadline) if deadline <= now => self.take(),
			_ => None,
		}
	}

	/// Unconditional flush (shutdown path).
	pub fn flush_all(&mut self) -> Option<Vec<WatchEvent>> {
		self.take()
	}

	fn take(&mut self) -> Option<Vec<WatchEvent>> {
		self.window_closes = None;
		if self.buffer.is_empty() {
			None
		} else {
			Some(std::mem::take(&mut self.buffer))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_window_groups_events() {
		let mut emitter = BatchEmitter::new(Duration::from_millis(10));
		let t0 = Instant::now();
		emitter.push(WatchEvent::create("/a"), t0);
		emitter.push(WatchEvent::create("/b"), t0 + Duration::from_millis(5));

		assert!(emitter.flush_due(t0 + Duration::from_millis(9)).is_none());
		let batch = emitter.flush_due(t0 + Duration::from_millis(11)).unwrap();
		assert_eq!(batch.len(), 2);
		assert!(emitter.flush_due(t0 + Duration::from_millis(20)).is_none());
	}

	#[test]
	fn test_window_opens_on_first_event() {
		let mut emitter = BatchEmitter::new(Duration::from_millis(10));
		let t0 = Instant::now();
		assert!(emitter.next_deadline().is_none());
		emitter.push(WatchEvent::create("/a"), t0);
		assert_eq!(emitter.next_deadline(), Some(t0 + Duration::from_millis(10)));

		// a later event does not extend the window
		emitter.push(WatchEvent::create("/b"), t0 + Duration::from_millis(8));
		assert_eq!(emitter.next_deadline(), Some(t0 + Duration::from_millis(10)));
	}

	#[test]
	fn test_flush_all() {
		let mut emitter = BatchEmitter::new(Duration::from_millis(10));
		emitter.push(WatchEvent::delete("/x"), Instant::now());
		assert_eq!(emitter.flush_all().unwrap().len(), 1);
		assert!(emitter.flush_all().is_none());
	}
}
