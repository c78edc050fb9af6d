//! Filesystem configuration for different deployment scenarios

use std::time::Duration;

/// Default hot-tier ceiling: blobs at or below this size stay co-located
/// with metadata.
pub const DEFAULT_HOT_MAX_BYTES: u64 = 1024 * 1024;

/// Default warm-tier ceiling.
pub const DEFAULT_WARM_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Configuration for a filesystem instance
#[derive(Debug, Clone)]
pub struct FsConfig {
	/// Largest blob the hot tier will accept when placement is size-driven
	pub hot_max_bytes: u64,

	/// Largest blob the warm tier will accept when placement is size-driven
	pub warm_max_bytes: u64,

	/// Quiet window for coalescing watch events on the same path
	pub debounce_window: Duration,

	/// Grouping window for batched event delivery
	pub batch_window: Duration,

	/// Capacity of the per-checker include/traverse decision caches
	pub decision_cache_capacity: u64,

	/// Capacity of the compiled-matcher cache shared by a checker instance
	pub matcher_cache_capacity: u64,

	/// Token-bucket burst capacity per subscription
	pub rate_limit_capacity: u32,

	/// Token-bucket refill rate per subscription (events per second)
	pub rate_limit_refill_per_sec: u32,

	/// Abort transactions held longer than this; `None` disables the window
	pub transaction_timeout: Option<Duration>,

	/// Record access times on reads (off by default, like `noatime`)
	pub track_atime: bool,
}

impl FsConfig {
	/// Configuration for small tenants: tight caches, short windows.
	pub fn for_small_tenants() -> Self {
		Self {
			decision_cache_capacity: 1_000,
			matcher_cache_capacity: 100,
			rate_limit_capacity: 100,
			rate_limit_refill_per_sec: 50,
			..Self::default()
		}
	}

	/// Configuration for large tenants with wide namespaces and busy
	/// watch pipelines.
	pub fn for_large_tenants() -> Self {
		Self {
			decision_cache_capacity: 100_000,
			matcher_cache_capacity: 10_000,
			rate_limit_capacity: 10_000,
			rate_limit_refill_per_sec: 5_000,
			debounce_window: Duration::from_millis(100),
			..Self::default()
		}
	}

	/// Validate configuration parameters
	pub fn validate(&self) -> Result<(), String> {
		if self.hot_max_bytes == 0 {
			return Err("Hot tier ceiling must be greater than 0".to_string());
		}

		if self.warm_max_bytes <= self.hot_max_bytes {
			return Err("Warm tier ceiling must be greater than the hot ceiling".to_string());
		}

		if self.decision_cache_capacity == 0 {
			return Err("Decision cache capacity must be greater than 0".to_string());
		}

		if self.rate_limit_capacity == 0 {
			return Err("Rate limit capacity must be greater than 0".to_string());
		}

		if let Some(timeout) = self.transaction_timeout {
			if timeout.is_zero() {
				return Err("Transaction timeout must be greater than 0".to_string());
			}
		}

		Ok(())
	}
}

impl Default for FsConfig {
	fn default() -> Self {
		Self {
			hot_max_bytes: DEFAULT_HOT_MAX_BYTES,
			warm_max_bytes: DEFAULT_WARM_MAX_BYTES,
			debounce_window: Duration::from_millis(50),
			batch_window: Duration::from_millis(10),
			decision_cache_capacity: 10_000,
			matcher_cache_capacity: 1_000,
			rate_limit_capacity: 1_000,
			rate_limit_refill_per_sec: 500,
			transaction_timeout: None,
			track_atime: false,
		}
	}
}
