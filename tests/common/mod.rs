// Shared fixtures for integration tests

use std::sync::Arc;

use tierfs::{FsConfig, Filesystem, MemoryObjectStore};

/// Route crate logs through the test harness; safe to call repeatedly.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).try_init();
}

/// An ephemeral filesystem with only the hot tier.
pub async fn memory_fs() -> Filesystem {
	init_tracing();
	Filesystem::in_memory().await.expect("filesystem should build")
}

/// A filesystem with in-memory warm and cold object stores attached.
#[allow(dead_code)]
pub async fn tiered_fs() -> (Filesystem, Arc<MemoryObjectStore>, Arc<MemoryObjectStore>) {
	init_tracing();
	let warm = Arc::new(MemoryObjectStore::new());
	let cold = Arc::new(MemoryObjectStore::new());
	let fs = Filesystem::builder()
		.warm_store(warm.clone())
		.cold_store(cold.clone())
		.build()
		.await
		.expect("filesystem should build");
	(fs, warm, cold)
}

/// A tiered filesystem with tiny thresholds so tests can cross tier
/// boundaries with small payloads.
#[allow(dead_code)]
pub async fn tiny_tiered_fs(
	hot_max: u64, warm_max: u64,
) -> (Filesystem, Arc<MemoryObjectStore>, Arc<MemoryObjectStore>) {
	init_tracing();
	let warm = Arc::new(MemoryObjectStore::new());
	let cold = Arc::new(MemoryObjectStore::new());
	let config =
		FsConfig { hot_max_bytes: hot_max, warm_max_bytes: warm_max, ..Default::default() };
	let fs = Filesystem::builder()
		.config(config)
		.warm_store(warm.clone())
		.cold_store(cold.clone())
		.build()
		.await
		.expect("filesystem should build");
	(fs, warm, cold)
}
