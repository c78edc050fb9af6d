//! Token-bucket rate limiting for subscriptions
//!
//! When a batch exceeds the available tokens, the lowest-priority events
//! are dropped first (delete > rename > create > modify) and counted.

use std::time::Instant;

use crate::watch::event::WatchEvent;

pub struct RateLimiter {
	capacity: f64,
	refill_per_sec: f64,
	tokens: f64,
	last_refill: Instant,
	dropped: u64,
}

impl RateLimiter {
	pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
		Self {
			capacity: capacity as f64,
			refill_per_sec: refill_per_sec as f64,
			tokens: capacity as f64,
			last_refill: Instant::now(),
			dropped: 0,
		}
	}

	/// Total events dropped by this limiter so far.
	pub fn dropped(&self) -> u64 {
		self.dropped
	}

	fn refill(&mut self, now: Instant) {
		let elapsed = now.duration_since(self.last_refill).as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
		self.last_refill = now;
	}

	/// Admit as much of the batch as the bucket allows. When tokens run
	/// short, high-priority events are kept and the rest dropped; the
	/// admitted events come back in their original order.
	pub fn admit(&mut self, events: Vec<WatchEvent>, now: Instant) -> Vec<WatchEvent> {
		self.refill(now);
		let budget = self.tokens as usize;
		if events.len() <= budget {
			self.tokens -= events.len() as f64;
			return events;
		}

		// rank indices by priority (stable: earlier event wins a tie)
		let mut ranked: Vec<usize> = (0..events.len()).collect();
		ranked.sort_by_key(|&idx| std::cmp::Reverse(events[idx].kind.priority()));
		let mut keep = vec![false; events.len()];
		for &idx in ranked.iter().take(budget) {
			keep[idx] = true;
		}

		let dropped = events.len() - budget;
		self.dropped += dropped as u64;
		self.tokens -= budget as f64;

		events
			.into_iter()
			.enumerate()
			.filter_map(|(idx, event)| keep[idx].then_some(event))
			.collect()
	}
}
