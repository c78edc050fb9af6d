//! Option objects accepted by the filesystem API

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{FsError, Result};
use crate::metadata::types::{EntryKind, Tier};

/// `access()` mode bits, POSIX-style.
pub const F_OK: u32 = 0;
pub const X_OK: u32 = 1;
pub const W_OK: u32 = 2;
pub const R_OK: u32 = 4;

/// Write-path flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteFlag {
	/// Truncate or create (`w`).
	#[default]
	Write,
	/// Append or create (`a`).
	Append,
	/// Create, failing when the file exists (`wx`).
	WriteExclusive,
	/// Append, failing when the file exists (`ax`).
	AppendExclusive,
}

impl WriteFlag {
	pub fn parse(flag: &str) -> Result<Self> {
		match flag {
			"w" => Ok(WriteFlag::Write),
			"a" => Ok(WriteFlag::Append),
			"wx" => Ok(WriteFlag::WriteExclusive),
			"ax" => Ok(WriteFlag::AppendExclusive),
			other => Err(FsError::invalid(format!("unknown write flag {other:?}"))),
		}
	}

	pub fn is_append(&self) -> bool {
		matches!(self, WriteFlag::Append | WriteFlag::AppendExclusive)
	}

	pub fn is_exclusive(&self) -> bool {
		matches!(self, WriteFlag::WriteExclusive | WriteFlag::AppendExclusive)
	}
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
	/// Inclusive start byte.
	pub start: Option<u64>,
	/// Inclusive end byte.
	pub end: Option<u64>,
	pub signal: Option<CancellationToken>,
	/// Chunk size hint for streaming reads.
	pub high_water_mark: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
	/// Permission bits for a newly created file (default `0o644`).
	pub mode: Option<u32>,
	pub flag: WriteFlag,
	/// Explicit tier placement, overriding the size-driven policy.
	pub tier: Option<Tier>,
	/// Flush eagerly. Writes are durable at commit either way; accepted
	/// for API parity.
	pub flush: bool,
	pub signal: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct ReaddirOptions {
	pub recursive: bool,
	/// Page size; absent means everything.
	pub limit: Option<usize>,
	/// Resume cursor from a previous page.
	pub cursor: Option<String>,
	pub signal: Option<CancellationToken>,
}

#[derive(Debug, Clone, Default)]
pub struct MkdirOptions {
	pub recursive: bool,
	pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct RemoveOptions {
	pub recursive: bool,
	/// Absent paths succeed silently.
	pub force: bool,
	pub max_retries: u32,
	pub retry_delay: Duration,
}

impl Default for RemoveOptions {
	fn default() -> Self {
		Self {
			recursive: false,
			force: false,
			max_retries: 0,
			retry_delay: Duration::from_millis(100),
		}
	}
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
	pub overwrite: bool,
	pub error_on_exist: bool,
	pub recursive: bool,
}

impl Default for CopyOptions {
	fn default() -> Self {
		Self { overwrite: true, error_on_exist: false, recursive: false }
	}
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
	pub recursive: bool,
	/// Quiet-window override for this watcher.
	pub debounce: Option<Duration>,
}

/// A directory-listing record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
	pub name: String,
	pub parent_path: String,
	pub kind: EntryKind,
}

impl Dirent {
	pub fn path(&self) -> String {
		crate::path::join(&[self.parent_path.as_str(), self.name.as_str()])
	}

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

/// One page of a directory listing.
#[derive(Debug, Clone)]
pub struct ReaddirPage {
	pub entries: Vec<Dirent>,
	/// Pass back as `ReaddirOptions::cursor` to resume; `None` when the
	/// listing is complete.
	pub cursor: Option<String>,
}
