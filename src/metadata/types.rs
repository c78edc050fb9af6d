//! Type definitions for metadata storage

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// POSIX file-type bits carried in the upper part of `mode`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Default permission bits for files and directories.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Milliseconds since the epoch, the timestamp unit used throughout.
pub fn now_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

/// Storage tier of a blob, in ascending latency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	Hot,
	Warm,
	Cold,
}

impl Tier {
	pub fn as_str(&self) -> &'static str {
		match self {
			Tier::Hot => "hot",
			Tier::Warm => "warm",
			Tier::Cold => "cold",
		}
	}
}

impl std::fmt::Display for Tier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Namespace entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	File,
	Directory,
	Symlink,
	Block,
	Character,
	Fifo,
	Socket,
}

impl EntryKind {
	/// The `S_IFMT` bits for this kind.
	pub fn type_bits(&self) -> u32 {
		match self {
			EntryKind::File => S_IFREG,
			EntryKind::Directory => S_IFDIR,
			EntryKind::Symlink => S_IFLNK,
			EntryKind::Block => S_IFBLK,
			EntryKind::Character => S_IFCHR,
			EntryKind::Fifo => S_IFIFO,
			EntryKind::Socket => S_IFSOCK,
		}
	}
}

/// A namespace entry: file, directory, symlink or special node.
///
/// Invariants maintained by the store:
/// - `path` and `(parent_id, name)` are uniquely indexed
/// - `parent_id` is `None` only for root (`path == "/"`)
/// - `blob_id` is set iff this is a file with content (`size > 0`)
/// - `link_target` is set iff this is a symlink
/// - `birthtime` never changes after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
	/// Stable id, monotonically assigned, never reused within a session
	pub id: u64,

	/// Canonical absolute path
	pub path: String,

	/// Leaf name (empty for root)
	pub name: String,

	pub parent_id: Option<u64>,

	pub kind: EntryKind,

	/// Lower 9 bits rwx for u/g/o; upper bits mirror `kind`
	pub mode: u32,

	pub uid: u32,
	pub gid: u32,
	pub nlink: u32,

	/// Content size in bytes
	pub size: u64,

	/// Content blob, only for files with `size > 0`
	pub blob_id: Option<String>,

	/// Symlink target, only for symlinks
	pub link_target: Option<String>,

	pub atime: i64,
	pub mtime: i64,
	pub ctime: i64,
	pub birthtime: i64,

	/// Tier of the content blob (meaningful for content-bearing entries)
	pub tier: Tier,
}

impl Entry {
	pub fn is_file(&self) -> bool {
		self.kind == EntryKind::File
	}

	pub fn is_directory(&self) -> bool {
		self.kind == EntryKind::Directory
	}

	pub fn is_symlink(&self) -> bool {
		self.kind == EntryKind::Symlink
	}

	/// Full mode word: permission bits plus `S_IFMT` type bits.
	pub fn full_mode(&self) -> u32 {
		(self.mode & !S_IFMT) | self.kind.type_bits()
	}
}

/// Fields for creating an entry. Timestamps default to "now" (all four
/// equal); tier defaults to hot.
#[derive(Debug, Clone)]
pub struct NewEntry {
	pub path: String,
	pub name: String,
	pub parent_id: Option<u64>,
	pub kind: EntryKind,
	pub mode: u32,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	pub blob_id: Option<String>,
	pub link_target: Option<String>,
	pub tier: Tier,
}

impl NewEntry {
	pub fn file(path: impl Into<String>, parent_id: u64, mode: u32) -> Self {
		let path = path.into();
		let name = crate::path::basename(&path, None);
		Self {
			path,
			name,
			parent_id: Some(parent_id),
			kind: EntryKind::File,
			mode,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: None,
			link_target: None,
			tier: Tier::Hot,
		}
	}

	pub fn directory(path: impl Into<String>, parent_id: u64, mode: u32) -> Self {
		let path = path.into();
		let name = crate::path::basename(&path, None);
		Self {
			path,
			name,
			parent_id: Some(parent_id),
			kind: EntryKind::Directory,
			mode,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: None,
			link_target: None,
			tier: Tier::Hot,
		}
	}

	pub fn special(path: impl Into<String>, parent_id: u64, kind: EntryKind, mode: u32) -> Self {
		let path = path.into();
		let name = crate::path::basename(&path, None);
		Self {
			path,
			name,
			parent_id: Some(parent_id),
			kind,
			mode,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: None,
			link_target: None,
			tier: Tier::Hot,
		}
	}

	pub fn symlink(path: impl Into<String>, parent_id: u64, target: impl Into<String>) -> Self {
		let path = path.into();
		let name = crate::path::basename(&path, None);
		Self {
			path,
			name,
			parent_id: Some(parent_id),
			kind: EntryKind::Symlink,
			mode: 0o777,
			uid: 0,
			gid: 0,
			size: 0,
			blob_id: None,
			link_target: Some(target.into()),
			tier: Tier::Hot,
		}
	}
}

/// Partial update of an entry. `ctime` always refreshes; explicit
/// `atime`/`mtime` override the refresh; `birthtime` is immutable.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
	pub mode: Option<u32>,
	pub uid: Option<u32>,
	pub gid: Option<u32>,
	pub nlink: Option<u32>,
	pub size: Option<u64>,
	/// `Some(None)` clears the blob pointer, `Some(Some(id))` swaps it
	pub blob_id: Option<Option<String>>,
	pub link_target: Option<Option<String>>,
	pub atime: Option<i64>,
	pub mtime: Option<i64>,
	pub tier: Option<Tier>,
	/// When true, `mtime` is bumped to "now" unless given explicitly
	pub touch_mtime: bool,
}

/// Storage descriptor for an immutable content blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
	pub id: String,
	pub tier: Tier,
	pub size: u64,
	pub checksum: Option<String>,
	pub created_at: i64,
	/// Entries sharing this content (hard links)
	pub refcount: u32,
}

impl BlobRecord {
	pub fn new(tier: Tier, size: u64, checksum: Option<String>) -> Self {
		Self {
			id: Uuid::new_v4().simple().to_string(),
			tier,
			size,
			checksum,
			created_at: now_millis(),
			refcount: 1,
		}
	}
}

/// Blob counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
	pub hot: u64,
	pub warm: u64,
	pub cold: u64,
}

impl TierCounts {
	pub fn get(&self, tier: Tier) -> u64 {
		match tier {
			Tier::Hot => self.hot,
			Tier::Warm => self.warm,
			Tier::Cold => self.cold,
		}
	}
}

/// Aggregate statistics maintained transactionally by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsStats {
	pub file_count: u64,
	pub dir_count: u64,
	pub symlink_count: u64,
	pub total_size: u64,
	pub blobs_by_tier: TierCounts,
}

/// Final status of a finished transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	Committed,
	RolledBack,
}

/// One row of the transaction log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogRecord {
	pub id: Uuid,
	pub started_at: i64,
	pub ended_at: i64,
	pub status: TransactionStatus,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_mode_bits() {
		let entry = Entry {
			id: 2,
			path: "/f".to_string(),
			name: "f".to_string(),
			parent_id: Some(1),
			kind: EntryKind::File,
			mode: 0o644,
			uid: 0,
			gid: 0,
			nlink: 1,
			size: 0,
			blob_id: None,
			link_target: None,
			atime: 0,
			mtime: 0,
			ctime: 0,
			birthtime: 0,
			tier: Tier::Hot,
		};
		assert_eq!(entry.full_mode(), S_IFREG | 0o644);
		assert_eq!(entry.full_mode() & S_IFMT, S_IFREG);
	}

	#[test]
	fn test_new_entry_builders() {
		let file = NewEntry::file("/a/b.txt", 1, 0o644);
		assert_eq!(file.name, "b.txt");
		assert_eq!(file.kind, EntryKind::File);

		let link = NewEntry::symlink("/a/l", 1, "/a/b.txt");
		assert_eq!(link.link_target.as_deref(), Some("/a/b.txt"));
		assert_eq!(link.mode, 0o777);
	}

	#[test]
	fn test_blob_record_ids_are_unique() {
		let a = BlobRecord::new(Tier::Hot, 10, None);
		let b = BlobRecord::new(Tier::Hot, 10, None);
		assert_ne!(a.id, b.id);
		assert_eq!(a.refcount, 1);
	}

	#[test]
	fn test_entry_kind_serializes_lowercase() {
		let json = serde_json::to_string(&EntryKind::Directory).unwrap();
		assert_eq!(json, "\"directory\"");
		let tier: Tier = serde_json::from_str("\"warm\"").unwrap();
		assert_eq!(tier, Tier::Warm);
	}
}
