//! tierfs: a POSIX-like virtual filesystem for single-writer tenant hosts
//!
//! Metadata lives in an embedded transactional store; file content lives in
//! tiered blob storage (hot co-located with metadata, warm/cold behind
//! object-store contracts). Clients get an asynchronous file API, optional
//! sparse views filtered by gitignore-style patterns, and a watch pipeline
//! with debounced, batched event delivery.

pub mod blob;
pub mod config;
pub mod error;
pub mod fs;
pub mod handle;
pub mod metadata;
pub mod path;
pub mod pattern;
pub mod sparse;
pub mod watch;

pub use blob::{FsObjectStore, MemoryObjectStore, ObjectStore, TierPolicy, TierSupport};
pub use config::FsConfig;
pub use error::{ErrorCode, FsError, Result};
pub use fs::options::{
	CopyOptions, Dirent, MkdirOptions, ReadOptions, ReaddirOptions, ReaddirPage, RemoveOptions,
	WatchOptions, WriteFlag, WriteOptions,
};
pub use fs::{
	FileStat, Filesystem, FilesystemBuilder, IntegrityReport, TieredStorage, WatchStream,
};
pub use handle::{FileHandle, OpenFlags, ReadStream, WriteStream};
pub use metadata::{
	EntryKind, FsStats, MetadataStore, Tier, TransactionLogRecord, TransactionOptions,
	TransactionStatus,
};
pub use pattern::{IncludeChecker, IncludeCheckerOptions};
pub use sparse::{SparseReaddirOptions, SparseView};
pub use watch::{
	ChangeKind, SubscriptionManager, WatchEvent, WatchManager, WatchMetrics, WireMessage,
};
