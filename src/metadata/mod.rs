//! Metadata engine: a single-writer relational index over namespace
//! entries and blob descriptors, persisted in an embedded `redb` store.

pub mod store;
pub mod tables;
pub mod transaction;
pub mod types;

pub use store::{MetadataStore, ROOT_ID};
pub use transaction::{BlobSideEffect, TransactionOptions, TxnOutcome};
pub use types::{
	now_millis, BlobRecord, Entry, EntryKind, EntryUpdate, FsStats, NewEntry, TierCounts,
	Tier, TransactionLogRecord, TransactionStatus,
};
