//! Object stores for warm and cold blob tiers
//!
//! The hot tier lives inside the metadata database; warm and cold tiers sit
//! behind the [`ObjectStore`] trait so real deployments can plug remote
//! object storage while tests use the in-memory or directory-backed
//! implementations.

use std::collections::HashMap;
use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::{FsError, Result};

/// XxHash64 hex digest used as the blob checksum.
pub fn checksum(bytes: &[u8]) -> String {
	let mut hasher = twox_hash::XxHash64::with_seed(0);
	hasher.write(bytes);
	format!("{:016x}", hasher.finish())
}

/// Result of a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
	pub etag: String,
	pub size: u64,
}

/// Metadata answered by `head` without fetching the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
	pub size: u64,
	pub checksum: Option<String>,
}

/// Contract for a single storage tier's byte store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
	async fn put(&self, id: &str, bytes: &[u8]) -> Result<PutResult>;

	async fn get(&self, id: &str) -> Result<Vec<u8>>;

	/// Deleting an absent object is not an error.
	async fn delete(&self, id: &str) -> Result<()>;

	async fn head(&self, id: &str) -> Result<ObjectInfo>;
}

/// In-memory object store for tests and ephemeral tenants.
#[derive(Default)]
pub struct MemoryObjectStore {
	objects: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl MemoryObjectStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.objects.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.objects.read().await.is_empty()
	}

	pub async fn contains(&self, id: &str) -> bool {
		self.objects.read().await.contains_key(id)
	}
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
	async fn put(&self, id: &str, bytes: &[u8]) -> Result<PutResult> {
		let etag = checksum(bytes);
		let size = bytes.len() as u64;
		self.objects.write().await.insert(id.to_string(), Arc::new(bytes.to_vec()));
		trace!("Stored object {id} ({size} bytes)");
		Ok(PutResult { etag, size })
	}

	async fn get(&self, id: &str) -> Result<Vec<u8>> {
		self.objects
			.read()
			.await
			.get(id)
			.map(|bytes| bytes.as_ref().clone())
			.ok_or_else(|| FsError::blob_store(format!("object {id} not found")))
	}

	async fn delete(&self, id: &str) -> Result<()> {
		self.objects.write().await.remove(id);
		Ok(())
	}

	async fn head(&self, id: &str) -> Result<ObjectInfo> {
		let objects = self.objects.read().await;
		let bytes = objects
			.get(id)
			.ok_or_else(|| FsError::blob_store(format!("object {id} not found")))?;
		Ok(ObjectInfo { size: bytes.len() as u64, checksum: Some(checksum(bytes)) })
	}
}

/// Directory-backed object store: one file per blob id, fanned out by the
/// first two id characters to keep directories small.
pub struct FsObjectStore {
	root: PathBuf,
}

impl FsObjectStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn object_path(&self, id: &str) -> PathBuf {
		let fanout = if id.len() >= 2 { &id[..2] } else { "00" };
		self.root.join(fanout).join(id)
	}
}

#[async_trait]
impl ObjectStore for FsObjectStore {
	async fn put(&self, id: &str, bytes: &[u8]) -> Result<PutResult> {
		let path = self.object_path(id);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		// write-then-rename so readers never observe a partial object
		let staging = path.with_extension("part");
		tokio::fs::write(&staging, bytes).await?;
		tokio::fs::rename(&staging, &path).await?;
		debug!("Stored object {id} at {path:?}");
		Ok(PutResult { etag: checksum(bytes), size: bytes.len() as u64 })
	}

	async fn get(&self, id: &str) -> Result<Vec<u8>> {
		match tokio::fs::read(self.object_path(id)).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(FsError::blob_store(format!("object {id} not found")))
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn delete(&self, id: &str) -> Result<()> {
		match tokio::fs::remove_file(self.object_path(id)).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	async fn head(&self, id: &str) -> Result<ObjectInfo> {
		match tokio::fs::metadata(self.object_path(id)).await {
			Ok(meta) => Ok(ObjectInfo { size: meta.len(), checksum: None }),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				Err(FsError::blob_store(format!("object {id} not found")))
			}
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_checksum_is_stable() {
		assert_eq!(checksum(b"hello"), checksum(b"hello"));
		assert_ne!(checksum(b"hello"), checksum(b"world"));
		assert_eq!(checksum(b"hello").len(), 16);
	}

	#[tokio::test]
	async fn test_memory_store_roundtrip() {
		let store = MemoryObjectStore::new();
		let put = store.put("b1", b"payload").await.unwrap();
		assert_eq!(put.size, 7);

		assert_eq!(store.get("b1").await.unwrap(), b"payload");
		let info = store.head("b1").await.unwrap();
		assert_eq!(info.size, 7);
		assert_eq!(info.checksum.as_deref(), Some(put.etag.as_str()));

		store.delete("b1").await.unwrap();
		assert!(store.get("b1").await.is_err());
		// deleting again is fine
		store.delete("b1").await.unwrap();
	}

	#[tokio::test]
	async fn test_fs_store_roundtrip() {
		let dir = tempfile::TempDir::new().unwrap();
		let store = FsObjectStore::new(dir.path());

		store.put("abcdef", b"bytes on disk").await.unwrap();
		assert_eq!(store.get("abcdef").await.unwrap(), b"bytes on disk");
		assert_eq!(store.head("abcdef").await.unwrap().size, 13);

		store.delete("abcdef").await.unwrap();
		assert!(store.get("abcdef").await.is_err());
	}
}
