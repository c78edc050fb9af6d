//! Filesystem assembly
//!
//! [`Filesystem`] owns the metadata store, the per-tier blob stores and the
//! watch pipeline, and exposes the POSIX-like API. One instance belongs to
//! one writer; operations serialize on a coarse async lock, and every
//! mutation runs inside a transaction — the caller's when one is open,
//! otherwise an implicit per-operation scope. Watch events buffer in the
//! transaction and publish in commit order.

pub mod options;

use std::collections::HashSet;
use std::future::Future;
use std::path::Path as StdPath;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{checksum, ObjectStore, TierPolicy, TierSupport};
use crate::config::FsConfig;
use crate::error::{ErrorCode, FsError, Result};
use crate::handle::{FileHandle, OpenFlags, ReadStream, WriteStream};
use crate::metadata::store::ROOT_ID;
use crate::metadata::transaction::{BlobSideEffect, TransactionOptions};
use crate::metadata::types::{
	now_millis, BlobRecord, Entry, EntryKind, EntryUpdate, FsStats, NewEntry, Tier,
	TransactionLogRecord, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
use crate::metadata::MetadataStore;
use crate::path;
use crate::watch::{WatchEvent, WatchManager, WatcherOptions};
use options::{
	CopyOptions, Dirent, MkdirOptions, ReadOptions, ReaddirOptions, ReaddirPage, RemoveOptions,
	WatchOptions, WriteOptions, F_OK, R_OK, W_OK, X_OK,
};

/// Longest symlink chain a path walk will follow before `ELOOP`.
const MAX_SYMLINK_DEPTH: usize = 32;

/// Optional tiering capability. Backends without remote tiers still expose
/// the core API; callers probe this trait at construction, not per call.
#[async_trait]
pub trait TieredStorage {
	fn tier_support(&self) -> TierSupport;

	/// Move a file's content up to `hot` or `warm`.
	async fn promote(&self, target: &str, tier: Tier) -> Result<()>;

	/// Move a file's content down to `warm` or `cold`.
	async fn demote(&self, target: &str, tier: Tier) -> Result<()>;
}

/// Stat snapshot returned by `stat`/`lstat`.
#[derive(Debug, Clone)]
pub struct FileStat {
	pub id: u64,
	pub path: String,
	pub kind: EntryKind,
	/// Full mode word: `S_IFMT` type bits plus permissions.
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	pub nlink: u32,
	pub size: u64,
	pub link_target: Option<String>,
	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub birthtime: i64,
	pub tier: Tier,
}

impl FileStat {
	pub fn is_file(&self) -> bool {
		self.kind == EntryKind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == EntryKind::Directory
	}

	pub fn is_symlink(&self) -> bool {
		self.kind == EntryKind::Symlink
	}
}

/// Orphan-sweep report from `verify_integrity`.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
	/// Files whose `blob_id` has no blob row.
	pub missing_blobs: Vec<(String, String)>,
	/// Blob rows referenced by no file.
	pub orphan_blobs: Vec<String>,
}

impl IntegrityReport {
	pub fn is_clean(&self) -> bool {
		self.missing_blobs.is_empty() && self.orphan_blobs.is_empty()
	}
}

/// A registered watcher together with its event stream. Dropping the
/// stream unsubscribes.
#[derive(Debug)]
pub struct WatchStream {
	id: uuid::Uuid,
	manager: WatchManager,
	receiver: tokio::sync::mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchStream {
	pub fn id(&self) -> uuid::Uuid {
		self.id
	}

	pub async fn next(&mut self) -> Option<WatchEvent> {
		self.receiver.recv().await
	}

	pub fn try_next(&mut self) -> Option<WatchEvent> {
		self.receiver.try_recv().ok()
	}
}

impl Drop for WatchStream {
	fn drop(&mut self) {
		self.manager.unsubscribe(self.id);
	}
}

pub(crate) struct FsState {
	pub store: MetadataStore,
	pending_events: Vec<WatchEvent>,
	event_marks: Vec<usize>,
}

impl FsState {
	fn emit(&mut self, event: WatchEvent) {
		self.pending_events.push(event);
	}
}

struct FsInner {
	state: Mutex<FsState>,
	config: FsConfig,
	policy: TierPolicy,
	warm: Option<Arc<dyn ObjectStore>>,
	cold: Option<Arc<dyn ObjectStore>>,
	watch: WatchManager,
	next_fd: AtomicU64,
	open_fds: std::sync::Mutex<HashSet<u64>>,
}

/// The filesystem instance. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Filesystem {
	inner: Arc<FsInner>,
}

enum StoreLocation {
	Memory,
	File(std::path::PathBuf),
}

/// Builder wiring config and the optional remote tiers.
pub struct FilesystemBuilder {
	config: FsConfig,
	location: StoreLocation,
	warm: Option<Arc<dyn ObjectStore>>,
	cold: Option<Arc<dyn ObjectStore>>,
}

impl FilesystemBuilder {
	pub fn new() -> Self {
		Self {
			config: FsConfig::default(),
			location: StoreLocation::Memory,
			warm: None,
			cold: None,
		}
	}

	pub fn config(mut self, config: FsConfig) -> Self {
		self.config = config;
		self
	}

	pub fn at_path(mut self, path: impl AsRef<StdPath>) -> Self {
		self.location = StoreLocation::File(path.as_ref().to_path_buf());
		self
	}

	pub fn warm_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
		self.warm = Some(store);
		self
	}

	pub fn cold_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
		self.cold = Some(store);
		self
	}

	pub async fn build(self) -> Result<Filesystem> {
		self.config.validate().map_err(FsError::invalid)?;
		let mut store = match &self.location {
			StoreLocation::Memory => MetadataStore::in_memory()?,
			StoreLocation::File(path) => MetadataStore::open(path)?,
		};
		store.recover_transactions()?;

		let support = TierSupport { warm: self.warm.is_some(), cold: self.cold.is_some() };
		let policy = TierPolicy::new(&self.config, support);
		let watch = WatchManager::new(self.config.debounce_window);
		info!(
			"Filesystem ready (warm tier: {}, cold tier: {})",
			support.warm, support.cold
		);

		Ok(Filesystem {
			inner: Arc::new(FsInner {
				state: Mutex::new(FsState {
					store,
					pending_events: Vec::new(),
					event_marks: Vec::new(),
				}),
				config: self.config,
				policy,
				warm: self.warm,
				cold: self.cold,
				watch,
				next_fd: AtomicU64::new(3),
				open_fds: std::sync::Mutex::new(HashSet::new()),
			}),
		})
	}
}

impl Default for FilesystemBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Outcome of a path walk: the entry, or its would-be parent.
enum Resolved {
	Found(Entry),
	Missing { parent: Entry, path: String },
}

impl Filesystem {
	pub fn builder() -> FilesystemBuilder {
		FilesystemBuilder::new()
	}

	/// Ephemeral instance backed by an in-memory metadata store.
	pub async fn in_memory() -> Result<Self> {
		Self::builder().build().await
	}

	/// Persistent instance backed by a database file.
	pub async fn open_at(path: impl AsRef<StdPath>) -> Result<Self> {
		Self::builder().at_path(path).build().await
	}

	pub fn config(&self) -> &FsConfig {
		&self.inner.config
	}

	// ---- content I/O ---------------------------------------------------

	/// Read a file's content, optionally a `start..=end` byte range.
	pub async fn read(&self, target: &str, options: ReadOptions) -> Result<Vec<u8>> {
		check_signal(&options.signal)?;
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let entry = match lookup(&state, target, true)? {
			Resolved::Found(entry) => entry,
			Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
		};
		if entry.is_directory() {
			return Err(FsError::IsDirectory { path: entry.path });
		}
		check_signal(&options.signal)?;
		let bytes = self.load_blob(&state, &entry).await?;

		if self.inner.config.track_atime {
			state.store.update_entry(
				entry.id,
				EntryUpdate { atime: Some(now_millis()), ..Default::default() },
			)?;
		}

		let len = bytes.len();
		let start = options.start.unwrap_or(0) as usize;
		if start >= len {
			return Ok(Vec::new());
		}
		let end = options
			.end
			.map(|e| ((e as usize) + 1).min(len))
			.unwrap_or(len)
			.max(start);
		Ok(bytes[start..end].to_vec())
	}

	/// Read as UTF-8 text.
	pub async fn read_to_string(&self, target: &str, options: ReadOptions) -> Result<String> {
		let bytes = self.read(target, options).await?;
		String::from_utf8(bytes)
			.map_err(|_| FsError::invalid(format!("{target} is not valid UTF-8")))
	}

	/// Write bytes (or UTF-8 text) to a file, creating it when absent.
	pub async fn write(
		&self, target: &str, data: impl AsRef<[u8]>, options: WriteOptions,
	) -> Result<()> {
		check_signal(&options.signal)?;
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = self.write_locked(&mut state, target, data.as_ref(), &options).await;
		self.close_scope(&mut state, ambient, result).await
	}

	/// Append to a file, creating it when absent.
	pub async fn append(
		&self, target: &str, data: impl AsRef<[u8]>, options: WriteOptions,
	) -> Result<()> {
		let options = WriteOptions { flag: options::WriteFlag::Append, ..options };
		self.write(target, data, options).await
	}

	async fn write_locked(
		&self, state: &mut FsState, target: &str, data: &[u8], options: &WriteOptions,
	) -> Result<()> {
		check_signal(&options.signal)?;
		match lookup(state, target, true)? {
			Resolved::Found(entry) => {
				if entry.is_directory() {
					return Err(FsError::IsDirectory { path: entry.path });
				}
				if !entry.is_file() {
					return Err(FsError::NotPermitted {
						message: format!("cannot write {:?} node {}", entry.kind, entry.path),
					});
				}
				if options.flag.is_exclusive() {
					return Err(FsError::already_exists(entry.path));
				}
				let content = if options.flag.is_append() && entry.size > 0 {
					let mut existing = self.load_blob(state, &entry).await?;
					existing.extend_from_slice(data);
					existing
				} else {
					data.to_vec()
				};
				let size = content.len() as u64;
				self.replace_file_content(state, &entry, &content, options.tier).await?;
				state.emit(
					WatchEvent::modify(&entry.path)
						.with_size(size)
						.with_mtime(now_millis())
						.with_directory(false),
				);
			}
			Resolved::Missing { parent, path } => {
				let tier = self.inner.policy.place(data.len() as u64, options.tier);
				let blob = if data.is_empty() {
					None
				} else {
					Some(self.store_blob(state, data, tier).await?)
				};
				let mut new = NewEntry::file(
					&path,
					parent.id,
					options.mode.unwrap_or(DEFAULT_FILE_MODE),
				);
				new.size = data.len() as u64;
				new.blob_id = blob.map(|b| b.id);
				new.tier = tier;
				state.store.create_entry(new)?;
				touch_parent(state, parent.id)?;
				state.emit(
					WatchEvent::create(&path)
						.with_size(data.len() as u64)
						.with_directory(false),
				);
			}
		}
		Ok(())
	}

	/// Shrink or zero-extend a file to `length`.
	pub async fn truncate(&self, target: &str, length: u64) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = async {
			let entry = match lookup(&state, target, true)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if entry.is_directory() {
				return Err(FsError::IsDirectory { path: entry.path });
			}
			if entry.size == length {
				return Ok(());
			}
			let mut bytes = self.load_blob(&state, &entry).await?;
			bytes.resize(length as usize, 0);
			self.replace_file_content(&mut state, &entry, &bytes, None).await?;
			state.emit(
				WatchEvent::modify(&entry.path)
					.with_size(length)
					.with_mtime(now_millis())
					.with_directory(false),
			);
			Ok(())
		}
		.await;
		self.close_scope(&mut state, ambient, result).await
	}

	// ---- namespace mutations -------------------------------------------

	/// Remove a file or symlink (the link itself, never its target).
	pub async fn unlink(&self, target: &str) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let entry = match lookup(&state, target, false)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if entry.is_directory() {
				return Err(FsError::IsDirectory { path: entry.path });
			}
			self.remove_leaf(&mut state, &entry)?;
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Rename a file or directory. A directory rename rewrites every
	/// descendant path inside the same transaction.
	pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let source = match lookup(&state, from, false)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			let destination = path::resolve(&[to]);
			if destination == source.path {
				return Ok(());
			}
			if source.is_directory()
				&& destination.starts_with(&format!("{}/", source.path))
			{
				return Err(FsError::invalid(format!(
					"cannot move {} into its own subtree",
					source.path
				)));
			}

			match lookup(&state, &destination, false)? {
				Resolved::Found(existing) => {
					if source.is_directory() {
						if !existing.is_directory() {
							return Err(FsError::NotADirectory { path: existing.path });
						}
						if state.store.has_children(existing.id)? {
							return Err(FsError::NotEmpty { path: existing.path });
						}
						state.store.delete_entry(existing.id)?;
					} else {
						if existing.is_directory() {
							return Err(FsError::IsDirectory { path: existing.path });
						}
						self.remove_leaf(&mut state, &existing)?;
					}
				}
				Resolved::Missing { .. } => {}
			}

			let new_parent = match lookup(&state, &path::dirname(&destination), true)? {
				Resolved::Found(parent) if parent.is_directory() => parent,
				Resolved::Found(parent) => {
					return Err(FsError::NotADirectory { path: parent.path })
				}
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};

			let rewritten =
				state.store.rename_entry(source.id, new_parent.id, &destination)?;
			if rewritten > 0 {
				debug!("Renamed {} -> {destination} ({rewritten} descendants)", source.path);
			}
			if let Some(old_parent) = source.parent_id {
				touch_parent(&mut state, old_parent)?;
			}
			touch_parent(&mut state, new_parent.id)?;
			state.emit(
				WatchEvent::rename(&source.path, &destination)
					.with_directory(source.is_directory()),
			);
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Copy a single file's content and mode.
	pub async fn copy_file(&self, from: &str, to: &str, options: CopyOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = self.copy_file_locked(&mut state, from, to, &options).await;
		self.close_scope(&mut state, ambient, result).await
	}

	/// Copy a file or (with `recursive`) a directory tree, all-or-nothing.
	pub async fn copy(&self, from: &str, to: &str, options: CopyOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = async {
			let source = match lookup(&state, from, true)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if source.is_directory() {
				if !options.recursive {
					return Err(FsError::IsDirectory { path: source.path });
				}
				let destination = path::resolve(&[to]);
				self.copy_tree(&mut state, source, destination, &options).await
			} else {
				self.copy_file_locked(&mut state, from, to, &options).await
			}
		}
		.await;
		self.close_scope(&mut state, ambient, result).await
	}

	async fn copy_file_locked(
		&self, state: &mut FsState, from: &str, to: &str, options: &CopyOptions,
	) -> Result<()> {
		let source = match lookup(state, from, true)? {
			Resolved::Found(entry) => entry,
			Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
		};
		if source.is_directory() {
			return Err(FsError::IsDirectory { path: source.path });
		}
		let destination = path::resolve(&[to]);
		if let Resolved::Found(existing) = lookup(state, &destination, false)? {
			if options.error_on_exist || !options.overwrite {
				return Err(FsError::already_exists(existing.path));
			}
		}
		let bytes = self.load_blob(state, &source).await?;
		let write_options = WriteOptions { mode: Some(source.mode), ..Default::default() };
		self.write_locked(state, &destination, &bytes, &write_options).await
	}

	// recursion in an async fn needs a boxed future
	fn copy_tree<'a>(
		&'a self, state: &'a mut FsState, source: Entry, destination: String,
		options: &'a CopyOptions,
	) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
		Box::pin(async move {
			match lookup(state, &destination, false)? {
				Resolved::Found(existing) => {
					if options.error_on_exist {
						return Err(FsError::already_exists(existing.path));
					}
					if !existing.is_directory() {
						return Err(FsError::NotADirectory { path: existing.path });
					}
				}
				Resolved::Missing { parent, path } => {
					state
						.store
						.create_entry(NewEntry::directory(&path, parent.id, source.mode))?;
					state.emit(WatchEvent::create(&path).with_directory(true));
				}
			}
			let children = state.store.get_children(source.id)?;
			for child in children {
				let child_destination = path::join(&[destination.as_str(), child.name.as_str()]);
				if child.is_directory() {
					self.copy_tree(&mut *state, child, child_destination, options).await?;
				} else if child.is_file() {
					let bytes = self.load_blob(state, &child).await?;
					let write_options =
						WriteOptions { mode: Some(child.mode), ..Default::default() };
					self.write_locked(state, &child_destination, &bytes, &write_options)
						.await?;
				} else if child.is_symlink() {
					let target = child.link_target.clone().unwrap_or_default();
					self.symlink_locked(state, &target, &child_destination)?;
				}
			}
			Ok(())
		})
	}

	/// Create a directory; `recursive` creates missing ancestors and is
	/// idempotent.
	pub async fn mkdir(&self, target: &str, options: MkdirOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let mode = options.mode.unwrap_or(DEFAULT_DIR_MODE);
		let result = (|| {
			let destination = path::resolve(&[target]);
			if !options.recursive {
				return match lookup(&state, &destination, false)? {
					Resolved::Found(existing) => {
						Err(FsError::already_exists(existing.path))
					}
					Resolved::Missing { parent, path } => {
						state.store.create_entry(NewEntry::directory(&path, parent.id, mode))?;
						touch_parent(&mut state, parent.id)?;
						state.emit(WatchEvent::create(&path).with_directory(true));
						Ok(())
					}
				};
			}

			let mut current = String::new();
			let mut parent_id = ROOT_ID;
			for segment in path::segments(&destination) {
				current = format!("{current}/{segment}");
				match state.store.get_by_path(&current)? {
					Some(existing) if existing.is_directory() => {
						parent_id = existing.id;
					}
					Some(existing) => {
						return Err(FsError::NotADirectory { path: existing.path })
					}
					None => {
						let id = state
							.store
							.create_entry(NewEntry::directory(&current, parent_id, mode))?;
						state.emit(WatchEvent::create(&current).with_directory(true));
						parent_id = id;
					}
				}
			}
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Remove an empty directory (`ENOTEMPTY` otherwise); `recursive`
	/// prunes the whole subtree.
	pub async fn rmdir(&self, target: &str, options: RemoveOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let entry = match lookup(&state, target, false)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if !entry.is_directory() {
				return Err(FsError::NotADirectory { path: entry.path });
			}
			if entry.id == ROOT_ID {
				return Err(FsError::NotPermitted {
					message: "cannot remove the root directory".to_string(),
				});
			}
			if state.store.has_children(entry.id)? {
				if !options.recursive {
					return Err(FsError::NotEmpty { path: entry.path });
				}
				self.remove_tree(&mut state, &entry)?;
				return Ok(());
			}
			let parent_id = entry.parent_id;
			state.store.delete_entry(entry.id)?;
			if let Some(parent_id) = parent_id {
				touch_parent(&mut state, parent_id)?;
			}
			state.emit(WatchEvent::delete(&entry.path).with_directory(true));
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Remove files and directories. With `force`, absent paths succeed
	/// silently; directories need `recursive`. `EBUSY` is retried up to
	/// `max_retries` times.
	pub async fn rm(&self, target: &str, options: RemoveOptions) -> Result<()> {
		let mut attempt = 0;
		loop {
			match self.rm_once(target, &options).await {
				Err(e)
					if e.code() == Some(ErrorCode::Ebusy) && attempt < options.max_retries =>
				{
					attempt += 1;
					tokio::time::sleep(options.retry_delay).await;
				}
				other => return other,
			}
		}
	}

	async fn rm_once(&self, target: &str, options: &RemoveOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let entry = match lookup(&state, target, false) {
				Ok(Resolved::Found(entry)) => entry,
				Ok(Resolved::Missing { path, .. }) => {
					if options.force {
						return Ok(());
					}
					return Err(FsError::not_found(path));
				}
				Err(e) if options.force && e.code() == Some(ErrorCode::Enoent) => {
					return Ok(())
				}
				Err(e) => return Err(e),
			};
			if entry.is_directory() {
				if !options.recursive {
					return Err(FsError::IsDirectory { path: entry.path });
				}
				if entry.id == ROOT_ID {
					return Err(FsError::NotPermitted {
						message: "cannot remove the root directory".to_string(),
					});
				}
				self.remove_tree(&mut state, &entry)?;
			} else {
				self.remove_leaf(&mut state, &entry)?;
			}
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	// ---- listings ------------------------------------------------------

	/// Child names of a directory, ordered.
	pub async fn list(&self, target: &str) -> Result<Vec<String>> {
		let page = self.readdir(target, ReaddirOptions::default()).await?;
		Ok(page.entries.into_iter().map(|d| d.name).collect())
	}

	/// Directory listing with optional recursion and cursor pagination.
	pub async fn readdir(&self, target: &str, options: ReaddirOptions) -> Result<ReaddirPage> {
		check_signal(&options.signal)?;
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let entry = match lookup(&state, target, true)? {
			Resolved::Found(entry) => entry,
			Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
		};
		if !entry.is_directory() {
			return Err(FsError::NotADirectory { path: entry.path });
		}

		if !options.recursive {
			let children = state.store.get_children_page(
				entry.id,
				options.cursor.as_deref(),
				options.limit,
			)?;
			let cursor = match (options.limit, children.last()) {
				(Some(limit), Some(last)) if children.len() == limit => {
					Some(last.name.clone())
				}
				_ => None,
			};
			let entries = children
				.into_iter()
				.map(|child| Dirent {
					name: child.name,
					parent_path: entry.path.clone(),
					kind: child.kind,
				})
				.collect();
			return Ok(ReaddirPage { entries, cursor });
		}

		// recursive walk, depth-first in name order; the cursor is the
		// last emitted full path
		let mut collected: Vec<Dirent> = Vec::new();
		let mut stack: Vec<Entry> = vec![entry.clone()];
		while let Some(dir) = stack.pop() {
			let children = state.store.get_children(dir.id)?;
			// queue subdirectories after emitting this level
			for child in children {
				collected.push(Dirent {
					name: child.name.clone(),
					parent_path: dir.path.clone(),
					kind: child.kind,
				});
				if child.is_directory() {
					stack.push(child);
				}
			}
		}
		collected.sort_by(|a, b| a.path().cmp(&b.path()));
		let after = options.cursor.as_deref().unwrap_or("");
		let filtered: Vec<Dirent> = collected
			.into_iter()
			.filter(|d| after.is_empty() || d.path().as_str() > after)
			.collect();
		let limited: Vec<Dirent> = match options.limit {
			Some(limit) => filtered.into_iter().take(limit).collect(),
			None => filtered,
		};
		let cursor = match (options.limit, limited.last()) {
			(Some(limit), Some(last)) if limited.len() == limit => Some(last.path()),
			_ => None,
		};
		Ok(ReaddirPage { entries: limited, cursor })
	}

	// ---- stat family ---------------------------------------------------

	/// Stat following symlinks.
	pub async fn stat(&self, target: &str) -> Result<FileStat> {
		self.stat_impl(target, true).await
	}

	/// Stat without following a final symlink.
	pub async fn lstat(&self, target: &str) -> Result<FileStat> {
		self.stat_impl(target, false).await
	}

	async fn stat_impl(&self, target: &str, follow: bool) -> Result<FileStat> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let entry = match lookup(&state, target, follow)? {
			Resolved::Found(entry) => entry,
			Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
		};
		stat_of(&state, entry)
	}

	/// Whether a path resolves. Namespace misses report `false`; real
	/// failures (`ELOOP`, storage errors) still surface.
	pub async fn exists(&self, target: &str) -> Result<bool> {
		match self.stat(target).await {
			Ok(_) => Ok(true),
			Err(e)
				if matches!(
					e.code(),
					Some(ErrorCode::Enoent) | Some(ErrorCode::Enotdir)
				) =>
			{
				Ok(false)
			}
			Err(e) => Err(e),
		}
	}

	/// Check owner permission bits against an `R_OK`/`W_OK`/`X_OK` mask.
	pub async fn access(&self, target: &str, mode: u32) -> Result<()> {
		let stat = self.stat(target).await?;
		if mode == F_OK {
			return Ok(());
		}
		let owner_bits = (stat.mode >> 6) & 0o7;
		let mut required = 0;
		if mode & R_OK != 0 {
			required |= 0o4;
		}
		if mode & W_OK != 0 {
			required |= 0o2;
		}
		if mode & X_OK != 0 {
			required |= 0o1;
		}
		if owner_bits & required == required {
			Ok(())
		} else {
			Err(FsError::AccessDenied { path: stat.path })
		}
	}

	// ---- attribute mutations -------------------------------------------

	pub async fn chmod(&self, target: &str, mode: u32) -> Result<()> {
		self.update_attrs(target, EntryUpdate { mode: Some(mode), ..Default::default() })
			.await
	}

	pub async fn chown(&self, target: &str, uid: u32, gid: u32) -> Result<()> {
		self.update_attrs(
			target,
			EntryUpdate { uid: Some(uid), gid: Some(gid), ..Default::default() },
		)
		.await
	}

	/// Set access and modification times (milliseconds since epoch).
	/// `ctime` bumps on every call, directories included.
	pub async fn utimes(&self, target: &str, atime: i64, mtime: i64) -> Result<()> {
		self.update_attrs(
			target,
			EntryUpdate { atime: Some(atime), mtime: Some(mtime), ..Default::default() },
		)
		.await
	}

	async fn update_attrs(&self, target: &str, update: EntryUpdate) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let entry = match lookup(&state, target, true)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			state.store.update_entry(entry.id, update)?;
			state.emit(
				WatchEvent::modify(&entry.path).with_directory(entry.is_directory()),
			);
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	// ---- links ---------------------------------------------------------

	/// Create a symbolic link at `link_path` pointing to `target` (stored
	/// verbatim; it may be relative).
	pub async fn symlink(&self, target: &str, link_path: &str) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = self.symlink_locked(&mut state, target, link_path);
		self.close_scope(&mut state, ambient, result).await
	}

	fn symlink_locked(&self, state: &mut FsState, target: &str, link_path: &str) -> Result<()> {
		match lookup(state, link_path, false)? {
			Resolved::Found(existing) => Err(FsError::already_exists(existing.path)),
			Resolved::Missing { parent, path } => {
				let mut new = NewEntry::symlink(&path, parent.id, target);
				new.size = target.len() as u64;
				state.store.create_entry(new)?;
				touch_parent(state, parent.id)?;
				state.emit(WatchEvent::create(&path).with_directory(false));
				Ok(())
			}
		}
	}

	/// Create a special node (block or character device, fifo, socket).
	/// Regular files, directories and symlinks have their own calls.
	pub async fn mknod(&self, target: &str, kind: EntryKind, mode: u32) -> Result<()> {
		if !matches!(
			kind,
			EntryKind::Block | EntryKind::Character | EntryKind::Fifo | EntryKind::Socket
		) {
			return Err(FsError::invalid(format!("mknod cannot create a {kind:?} entry")));
		}
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			match lookup(&state, target, false)? {
				Resolved::Found(existing) => Err(FsError::already_exists(existing.path)),
				Resolved::Missing { parent, path } => {
					state
						.store
						.create_entry(NewEntry::special(&path, parent.id, kind, mode))?;
					touch_parent(&mut state, parent.id)?;
					state.emit(WatchEvent::create(&path).with_directory(false));
					Ok(())
				}
			}
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Create a hard link: a second entry sharing the file's content.
	pub async fn link(&self, existing: &str, new_path: &str) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = (|| {
			let source = match lookup(&state, existing, true)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if !source.is_file() {
				return Err(FsError::NotPermitted {
					message: format!("hard links require a file, got {}", source.path),
				});
			}
			let (parent, destination) = match lookup(&state, new_path, false)? {
				Resolved::Found(existing) => {
					return Err(FsError::already_exists(existing.path))
				}
				Resolved::Missing { parent, path } => (parent, path),
			};
			let mut new = NewEntry::file(&destination, parent.id, source.mode);
			new.size = source.size;
			new.blob_id = source.blob_id.clone();
			new.tier = source.tier;
			state.store.create_entry(new)?;
			let count = match &source.blob_id {
				Some(blob_id) => state.store.blob_add_ref(blob_id)?,
				None => 2,
			};
			state.store.update_entry(
				source.id,
				EntryUpdate { nlink: Some(count), ..Default::default() },
			)?;
			touch_parent(&mut state, parent.id)?;
			state.emit(WatchEvent::create(&destination).with_directory(false));
			Ok(())
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	/// Target of a symlink.
	pub async fn readlink(&self, target: &str) -> Result<String> {
		let stat = self.lstat(target).await?;
		stat.link_target
			.ok_or_else(|| FsError::invalid(format!("{} is not a symbolic link", stat.path)))
	}

	/// Canonical path with every symlink resolved; `ELOOP` on cycles.
	pub async fn realpath(&self, target: &str) -> Result<String> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		match lookup(&state, target, true)? {
			Resolved::Found(entry) => Ok(entry.path),
			Resolved::Missing { path, .. } => Err(FsError::not_found(path)),
		}
	}

	// ---- handles and streams -------------------------------------------

	/// Open a file handle. Flags follow POSIX `fopen` shorthand:
	/// `r`, `r+`, `w`, `w+`, `a`, `a+`, with `x` variants for exclusive
	/// creation.
	pub async fn open(&self, target: &str, flags: &str, mode: Option<u32>) -> Result<FileHandle> {
		let flags = OpenFlags::parse(flags)?;
		FileHandle::open(self.clone(), target, flags, mode.unwrap_or(DEFAULT_FILE_MODE)).await
	}

	/// Run `f` with an open handle, guaranteeing close on every exit path.
	pub async fn with_handle<R, F>(&self, target: &str, flags: &str, f: F) -> Result<R>
	where
		F: for<'a> FnOnce(
			&'a mut FileHandle,
		) -> Pin<Box<dyn Future<Output = Result<R>> + Send + 'a>>,
	{
		let mut handle = self.open(target, flags, None).await?;
		let result = f(&mut handle).await;
		let close_result = handle.close().await;
		match result {
			Ok(value) => {
				close_result?;
				Ok(value)
			}
			Err(e) => {
				if let Err(close_error) = close_result {
					warn!("Close after failed handle scope also failed: {close_error}");
				}
				Err(e)
			}
		}
	}

	/// Lazy pull stream over a file's content.
	pub async fn create_read_stream(
		&self, target: &str, options: ReadOptions,
	) -> Result<ReadStream> {
		ReadStream::open(self.clone(), target, options).await
	}

	/// Buffered write stream; content lands on `finish()`.
	pub async fn create_write_stream(
		&self, target: &str, options: WriteOptions,
	) -> Result<WriteStream> {
		WriteStream::open(self.clone(), target, options).await
	}

	// ---- watch ---------------------------------------------------------

	/// Watch a path for changes. Events are debounced/coalesced per path
	/// and delivered in commit order.
	pub async fn watch(&self, target: &str, options: WatchOptions) -> Result<WatchStream> {
		let resolved = path::resolve(&[target]);
		{
			let mut state = self.inner.state.lock().await;
			self.ensure_deadline(&mut state).await?;
			match lookup(&state, &resolved, true)? {
				Resolved::Found(_) => {}
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			}
		}
		let (id, receiver) = self.inner.watch.subscribe(
			&resolved,
			WatcherOptions { recursive: options.recursive, debounce: options.debounce },
		);
		Ok(WatchStream { id, manager: self.inner.watch.clone(), receiver })
	}

	/// The watch manager, for wiring external subscription transports.
	pub fn watch_manager(&self) -> WatchManager {
		self.inner.watch.clone()
	}

	// ---- transactions --------------------------------------------------

	/// Open a transaction scope; nested calls open savepoints.
	pub async fn begin_transaction(&self, options: TransactionOptions) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		let result = state.store.begin_transaction(options);
		match &result {
			Ok(()) => {
				let mark = state.pending_events.len();
				state.event_marks.push(mark);
			}
			Err(_) => {
				// a forced rollback may have orphaned remote blobs
				state.pending_events.clear();
				state.event_marks.clear();
				let cleanup = state.store.take_pending_remote_cleanup();
				self.apply_remote_deletes(cleanup).await;
			}
		}
		result
	}

	/// Commit the innermost scope; the outermost commit publishes buffered
	/// watch events and applies deferred remote deletes.
	pub async fn commit_transaction(&self) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		let outcome = state.store.commit()?;
		if outcome.finished {
			let events = std::mem::take(&mut state.pending_events);
			state.event_marks.clear();
			self.apply_remote_deletes(outcome.remote_deletes).await;
			self.inner.watch.publish(events);
		} else {
			state.event_marks.pop();
		}
		Ok(())
	}

	/// Roll back the innermost scope, discarding its buffered events and
	/// reversing its remote blob creations.
	pub async fn rollback_transaction(&self) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		let outcome = state.store.rollback()?;
		if outcome.finished {
			state.pending_events.clear();
			state.event_marks.clear();
		} else {
			let mark = state.event_marks.pop().unwrap_or(0);
			state.pending_events.truncate(mark);
		}
		self.apply_remote_deletes(outcome.remote_deletes).await;
		Ok(())
	}

	/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
	pub async fn with_transaction<R, F>(&self, f: F) -> Result<R>
	where
		F: for<'a> FnOnce(
			&'a Filesystem,
		) -> Pin<Box<dyn Future<Output = Result<R>> + Send + 'a>>,
	{
		self.begin_transaction(TransactionOptions::default()).await?;
		match f(self).await {
			Ok(value) => {
				self.commit_transaction().await?;
				Ok(value)
			}
			Err(error) => {
				if let Err(rollback_error) = self.rollback_transaction().await {
					warn!("Rollback after failed transaction body failed: {rollback_error}");
				}
				Err(error)
			}
		}
	}

	/// Recent transaction log records, oldest first.
	pub async fn transaction_log(&self, limit: usize) -> Result<Vec<TransactionLogRecord>> {
		let state = self.inner.state.lock().await;
		state.store.transaction_log(limit)
	}

	// ---- tiering -------------------------------------------------------

	/// Current tier of a file's content.
	pub async fn tier_of(&self, target: &str) -> Result<Tier> {
		Ok(self.stat(target).await?.tier)
	}

	async fn migrate(&self, target: &str, to: Tier, promote: bool) -> Result<()> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = async {
			let entry = match lookup(&state, target, true)? {
				Resolved::Found(entry) => entry,
				Resolved::Missing { path, .. } => return Err(FsError::not_found(path)),
			};
			if !entry.is_file() || entry.blob_id.is_none() {
				return Err(FsError::invalid(format!(
					"{} has no content to migrate",
					entry.path
				)));
			}
			let from = entry.tier;
			if from == to {
				return Ok(());
			}
			let valid = if promote {
				matches!(to, Tier::Hot | Tier::Warm) && tier_rank(to) < tier_rank(from)
			} else {
				matches!(to, Tier::Warm | Tier::Cold) && tier_rank(to) > tier_rank(from)
			};
			if !valid {
				return Err(FsError::invalid(format!(
					"cannot {} {} from {from} to {to}",
					if promote { "promote" } else { "demote" },
					entry.path
				)));
			}

			// migrate = get + put + delete, all inside this transaction;
			// on failure the original tier stays readable
			let bytes = self.load_blob(&state, &entry).await?;
			let record = self.store_blob(&mut state, &bytes, to).await?;
			let old_blob = entry.blob_id.clone().expect("checked above");
			state.store.update_entry(
				entry.id,
				EntryUpdate {
					tier: Some(to),
					blob_id: Some(Some(record.id)),
					..Default::default()
				},
			)?;
			self.release_blob(&mut state, &old_blob, from)?;
			debug!("Migrated {} from {from} to {to}", entry.path);
			Ok(())
		}
		.await;
		self.close_scope(&mut state, ambient, result).await
	}

	// ---- maintenance ---------------------------------------------------

	/// Aggregate statistics.
	pub async fn stats(&self) -> Result<FsStats> {
		let state = self.inner.state.lock().await;
		state.store.stats()
	}

	/// Orphan sweep: verify every referenced blob exists and find blob
	/// rows no file references. Refused inside a transaction.
	pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
		let state = self.inner.state.lock().await;
		if state.store.in_transaction() {
			return Err(FsError::busy("integrity sweep requires no open transaction"));
		}
		let mut report = IntegrityReport::default();
		let mut referenced: HashSet<String> = HashSet::new();
		let entries = state.store.find_by_pattern("**", None)?;
		for entry in &entries {
			if let Some(blob_id) = &entry.blob_id {
				referenced.insert(blob_id.clone());
				if state.store.get_blob(blob_id)?.is_none() {
					report.missing_blobs.push((entry.path.clone(), blob_id.clone()));
				}
			}
		}
		for blob in state.store.list_blobs()? {
			if !referenced.contains(&blob.id) {
				report.orphan_blobs.push(blob.id);
			}
		}
		Ok(report)
	}

	/// Delete unreferenced blobs found by the orphan sweep. Runs outside
	/// the hot path; returns how many blobs were collected.
	pub async fn collect_garbage(&self) -> Result<usize> {
		let report = self.verify_integrity().await?;
		if report.orphan_blobs.is_empty() {
			return Ok(0);
		}
		let mut state = self.inner.state.lock().await;
		let ambient = state.store.in_transaction();
		if ambient {
			return Err(FsError::busy("garbage collection requires no open transaction"));
		}
		self.open_scope(&mut state)?;
		let result = (|| {
			let mut collected = 0usize;
			for blob_id in &report.orphan_blobs {
				if let Some(record) = state.store.get_blob(blob_id)? {
					state.store.delete_blob(blob_id)?;
					if record.tier != Tier::Hot {
						state.store.journal_side_effect(BlobSideEffect::DeferredDelete {
							tier: record.tier,
							blob_id: blob_id.clone(),
						});
					}
					collected += 1;
				}
			}
			Ok(collected)
		})();
		self.close_scope(&mut state, ambient, result).await
	}

	// ---- internals -----------------------------------------------------

	fn open_scope(&self, state: &mut FsState) -> Result<()> {
		state.store.begin_transaction(TransactionOptions {
			timeout: self.inner.config.transaction_timeout,
		})?;
		let mark = state.pending_events.len();
		state.event_marks.push(mark);
		Ok(())
	}

	async fn close_scope<R>(
		&self, state: &mut FsState, ambient: bool, result: Result<R>,
	) -> Result<R> {
		if ambient {
			return result;
		}
		match result {
			Ok(value) => {
				let outcome = match state.store.commit() {
					Ok(outcome) => outcome,
					Err(commit_error) => {
						state.pending_events.clear();
						state.event_marks.clear();
						return Err(commit_error);
					}
				};
				let events = std::mem::take(&mut state.pending_events);
				state.event_marks.clear();
				self.apply_remote_deletes(outcome.remote_deletes).await;
				self.inner.watch.publish(events);
				Ok(value)
			}
			Err(error) => {
				match state.store.rollback() {
					Ok(outcome) => self.apply_remote_deletes(outcome.remote_deletes).await,
					Err(rollback_error) => {
						warn!("Rollback of implicit scope failed: {rollback_error}")
					}
				}
				let mark = state.event_marks.pop().unwrap_or(0);
				state.pending_events.truncate(mark);
				Err(error)
			}
		}
	}

	/// Enforce the transaction timeout before touching state.
	async fn ensure_deadline(&self, state: &mut FsState) -> Result<()> {
		let result = state.store.check_deadline();
		if result.is_err() {
			state.pending_events.clear();
			state.event_marks.clear();
			let cleanup = state.store.take_pending_remote_cleanup();
			self.apply_remote_deletes(cleanup).await;
		}
		result
	}

	fn object_store(&self, tier: Tier) -> Option<Arc<dyn ObjectStore>> {
		match tier {
			Tier::Hot => None,
			Tier::Warm => self.inner.warm.clone(),
			Tier::Cold => self.inner.cold.clone(),
		}
	}

	/// Store bytes as a new immutable blob in the given tier. Remote
	/// creations are journaled for reversal on rollback.
	async fn store_blob(
		&self, state: &mut FsState, bytes: &[u8], tier: Tier,
	) -> Result<BlobRecord> {
		let record = BlobRecord::new(tier, bytes.len() as u64, Some(checksum(bytes)));
		match tier {
			Tier::Hot => state.store.register_blob(&record, Some(bytes))?,
			remote => {
				let store = self.object_store(remote).ok_or_else(|| {
					FsError::invalid(format!("{remote} tier is not configured"))
				})?;
				store.put(&record.id, bytes).await?;
				state.store.register_blob(&record, None)?;
				state.store.journal_side_effect(BlobSideEffect::CreatedRemote {
					tier: remote,
					blob_id: record.id.clone(),
				});
			}
		}
		Ok(record)
	}

	pub(crate) async fn load_blob(&self, state: &FsState, entry: &Entry) -> Result<Vec<u8>> {
		let Some(blob_id) = entry.blob_id.as_ref() else {
			return Ok(Vec::new());
		};
		match entry.tier {
			Tier::Hot => state.store.get_blob_data(blob_id)?.ok_or_else(|| {
				FsError::blob_store(format!("missing hot payload for blob {blob_id}"))
			}),
			remote => {
				let store = self.object_store(remote).ok_or_else(|| {
					FsError::invalid(format!("{remote} tier is not configured"))
				})?;
				store.get(blob_id).await
			}
		}
	}

	/// Drop one reference to a blob; the last reference deletes it (hot
	/// payloads transactionally, remote payloads deferred to commit).
	fn release_blob(&self, state: &mut FsState, blob_id: &str, tier: Tier) -> Result<()> {
		let remaining = state.store.blob_release(blob_id)?;
		if remaining == 0 {
			state.store.delete_blob(blob_id)?;
			if tier != Tier::Hot {
				state.store.journal_side_effect(BlobSideEffect::DeferredDelete {
					tier,
					blob_id: blob_id.to_string(),
				});
			}
		}
		Ok(())
	}

	/// Swap a file's content for new bytes: new blob in, old blob
	/// released, entry updated (blobs are immutable).
	pub(crate) async fn replace_file_content(
		&self, state: &mut FsState, entry: &Entry, bytes: &[u8], explicit_tier: Option<Tier>,
	) -> Result<()> {
		let tier = self.inner.policy.place(bytes.len() as u64, explicit_tier);
		let new_blob = if bytes.is_empty() {
			None
		} else {
			Some(self.store_blob(state, bytes, tier).await?)
		};
		let old_blob = entry.blob_id.clone();
		state.store.update_entry(
			entry.id,
			EntryUpdate {
				size: Some(bytes.len() as u64),
				blob_id: Some(new_blob.map(|b| b.id)),
				tier: Some(tier),
				touch_mtime: true,
				..Default::default()
			},
		)?;
		if let Some(old_id) = old_blob {
			self.release_blob(state, &old_id, entry.tier)?;
		}
		Ok(())
	}

	fn remove_leaf(&self, state: &mut FsState, entry: &Entry) -> Result<()> {
		let parent_id = entry.parent_id;
		state.store.delete_entry(entry.id)?;
		if let Some(blob_id) = &entry.blob_id {
			self.release_blob(state, blob_id, entry.tier)?;
		}
		if let Some(parent_id) = parent_id {
			touch_parent(state, parent_id)?;
		}
		state.emit(WatchEvent::delete(&entry.path).with_directory(false));
		Ok(())
	}

	/// Depth-first removal of a directory subtree, leaves first.
	fn remove_tree(&self, state: &mut FsState, root: &Entry) -> Result<()> {
		let children = state.store.get_children(root.id)?;
		for child in children {
			if child.is_directory() {
				self.remove_tree(state, &child)?;
			} else {
				self.remove_leaf(state, &child)?;
			}
		}
		let parent_id = root.parent_id;
		state.store.delete_entry(root.id)?;
		if let Some(parent_id) = parent_id {
			touch_parent(state, parent_id)?;
		}
		state.emit(WatchEvent::delete(&root.path).with_directory(true));
		Ok(())
	}

	async fn apply_remote_deletes(&self, deletes: Vec<(Tier, String)>) {
		for (tier, blob_id) in deletes {
			let Some(store) = self.object_store(tier) else {
				continue;
			};
			if let Err(e) = store.delete(&blob_id).await {
				warn!("Failed to delete {tier} blob {blob_id}: {e}");
			}
		}
	}

	pub(crate) fn allocate_fd(&self) -> u64 {
		let fd = self.inner.next_fd.fetch_add(1, Ordering::Relaxed);
		self.inner.open_fds.lock().expect("fd table poisoned").insert(fd);
		fd
	}

	pub(crate) fn release_fd(&self, fd: u64) {
		self.inner.open_fds.lock().expect("fd table poisoned").remove(&fd);
	}

	/// Handle support: resolve/create per open flags, returning the entry
	/// snapshot and its current bytes.
	pub(crate) async fn open_inner(
		&self, target: &str, flags: OpenFlags, mode: u32,
	) -> Result<(Entry, Vec<u8>)> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = async {
			match lookup(&state, target, true)? {
				Resolved::Found(entry) => {
					if entry.is_directory() {
						return Err(FsError::IsDirectory { path: entry.path });
					}
					if flags.exclusive {
						return Err(FsError::already_exists(entry.path));
					}
					if flags.truncate && entry.size > 0 {
						self.replace_file_content(&mut state, &entry, &[], None).await?;
						state.emit(
							WatchEvent::modify(&entry.path)
								.with_size(0)
								.with_directory(false),
						);
						let refreshed = state
							.store
							.get_by_id(entry.id)?
							.ok_or_else(|| FsError::not_found(&entry.path))?;
						return Ok((refreshed, Vec::new()));
					}
					let bytes = self.load_blob(&state, &entry).await?;
					Ok((entry, bytes))
				}
				Resolved::Missing { parent, path } => {
					if !flags.create {
						return Err(FsError::not_found(path));
					}
					let new = NewEntry::file(&path, parent.id, mode);
					let id = state.store.create_entry(new)?;
					touch_parent(&mut state, parent.id)?;
					state.emit(WatchEvent::create(&path).with_size(0).with_directory(false));
					let entry = state
						.store
						.get_by_id(id)?
						.ok_or_else(|| FsError::not_found(&path))?;
					Ok((entry, Vec::new()))
				}
			}
		}
		.await;
		self.close_scope(&mut state, ambient, result).await
	}

	/// Handle support: flush a handle's buffer as the file's new content.
	/// Keyed by entry id so an open handle survives a rename.
	pub(crate) async fn flush_file(&self, entry_id: u64, bytes: &[u8]) -> Result<Entry> {
		let mut state = self.inner.state.lock().await;
		self.ensure_deadline(&mut state).await?;
		let ambient = state.store.in_transaction();
		if !ambient {
			self.open_scope(&mut state)?;
		}
		let result = async {
			let entry = state
				.store
				.get_by_id(entry_id)?
				.ok_or_else(|| FsError::not_found(format!("entry {entry_id}")))?;
			self.replace_file_content(&mut state, &entry, bytes, None).await?;
			let refreshed = state
				.store
				.get_by_id(entry_id)?
				.ok_or_else(|| FsError::not_found(&entry.path))?;
			state.emit(
				WatchEvent::modify(&refreshed.path)
					.with_size(refreshed.size)
					.with_mtime(refreshed.mtime)
					.with_directory(false),
			);
			Ok(refreshed)
		}
		.await;
		self.close_scope(&mut state, ambient, result).await
	}

	/// Handle support: a fresh stat snapshot by entry id.
	pub(crate) async fn stat_by_id(&self, entry_id: u64) -> Result<Entry> {
		let state = self.inner.state.lock().await;
		state
			.store
			.get_by_id(entry_id)?
			.ok_or_else(|| FsError::not_found(format!("entry {entry_id}")))
	}
}

#[async_trait]
impl TieredStorage for Filesystem {
	fn tier_support(&self) -> TierSupport {
		self.inner.policy.support()
	}

	async fn promote(&self, target: &str, tier: Tier) -> Result<()> {
		if !matches!(tier, Tier::Hot | Tier::Warm) {
			return Err(FsError::invalid("promote targets hot or warm"));
		}
		self.migrate(target, tier, true).await
	}

	async fn demote(&self, target: &str, tier: Tier) -> Result<()> {
		if !matches!(tier, Tier::Warm | Tier::Cold) {
			return Err(FsError::invalid("demote targets warm or cold"));
		}
		self.migrate(target, tier, false).await
	}
}

fn tier_rank(tier: Tier) -> u8 {
	match tier {
		Tier::Hot => 0,
		Tier::Warm => 1,
		Tier::Cold => 2,
	}
}

fn check_signal(signal: &Option<CancellationToken>) -> Result<()> {
	if signal.as_ref().is_some_and(|s| s.is_cancelled()) {
		return Err(FsError::Cancelled);
	}
	Ok(())
}

fn touch_parent(state: &mut FsState, parent_id: u64) -> Result<()> {
	state
		.store
		.update_entry(parent_id, EntryUpdate { touch_mtime: true, ..Default::default() })
}

fn stat_of(state: &FsState, entry: Entry) -> Result<FileStat> {
	let nlink = match (&entry.blob_id, entry.kind) {
		(Some(blob_id), EntryKind::File) => state
			.store
			.get_blob(blob_id)?
			.map(|blob| blob.refcount)
			.unwrap_or(entry.nlink),
		_ => entry.nlink,
	};
	Ok(FileStat {
		id: entry.id,
		path: entry.path,
		kind: entry.kind,
		mode: (entry.mode & !crate::metadata::types::S_IFMT) | entry.kind.type_bits(),
		uid: entry.uid,
		gid: entry.gid,
		nlink,
		size: entry.size,
		link_target: entry.link_target,
		atime: entry.atime,
		mtime: entry.mtime,
		ctime: entry.ctime,
		birthtime: entry.birthtime,
		tier: entry.tier,
	})
}

/// Walk a path, resolving intermediate (and optionally the final)
/// symlinks. Returns the entry or its would-be parent directory.
fn lookup(state: &FsState, input: &str, follow_final: bool) -> Result<Resolved> {
	let resolved = path::resolve(&[input]);
	lookup_abs(state, &resolved, follow_final, 0)
}

fn lookup_abs(
	state: &FsState, absolute: &str, follow_final: bool, depth: usize,
) -> Result<Resolved> {
	if depth > MAX_SYMLINK_DEPTH {
		return Err(FsError::SymlinkLoop { path: absolute.to_string() });
	}
	let segments = path::segments(absolute);
	if segments.is_empty() {
		let root = state
			.store
			.get_by_id(ROOT_ID)?
			.ok_or_else(|| FsError::not_found("/"))?;
		return Ok(Resolved::Found(root));
	}

	let mut current = String::new();
	for (index, segment) in segments.iter().enumerate() {
		let child_path = format!("{current}/{segment}");
		let last = index + 1 == segments.len();
		match state.store.get_by_path(&child_path)? {
			None => {
				if last {
					let parent = dir_at(state, &current)?;
					return Ok(Resolved::Missing { parent, path: child_path });
				}
				return Err(FsError::not_found(child_path));
			}
			Some(entry) => {
				if entry.is_symlink() && (!last || follow_final) {
					let target = entry.link_target.clone().ok_or_else(|| {
						FsError::invalid(format!("symlink {child_path} has no target"))
					})?;
					let base = path::dirname(&child_path);
					let mut rebuilt = path::resolve(&[base.as_str(), target.as_str()]);
					for rest in &segments[index + 1..] {
						rebuilt = format!("{}/{rest}", rebuilt.trim_end_matches('/'));
					}
					let rebuilt = path::resolve(&[rebuilt.as_str()]);
					return lookup_abs(state, &rebuilt, follow_final, depth + 1);
				}
				if last {
					return Ok(Resolved::Found(entry));
				}
				if !entry.is_directory() {
					return Err(FsError::NotADirectory { path: child_path });
				}
				current = child_path;
			}
		}
	}
	Err(FsError::not_found(absolute))
}

fn dir_at(state: &FsState, dir_path: &str) -> Result<Entry> {
	if dir_path.is_empty() {
		return state.store.get_by_id(ROOT_ID)?.ok_or_else(|| FsError::not_found("/"));
	}
	state
		.store
		.get_by_path(dir_path)?
		.ok_or_else(|| FsError::not_found(dir_path))
}
