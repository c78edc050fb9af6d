//! Table definitions for the redb-backed metadata store
//!
//! Centralizing table definitions here keeps the schema in one place and
//! makes evolution easier. Values are bincode-serialized records; composite
//! keys are byte-encoded with big-endian ids so range scans stay ordered.

use std::sync::Arc;

use redb::{Database, TableDefinition};

use crate::error::Result;

/// Entries by id (`id -> Entry`).
pub const ENTRIES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("entries");

/// Unique path index (`path -> id`).
pub const PATH_INDEX_TABLE: TableDefinition<&str, u64> = TableDefinition::new("path_index");

/// Unique `(parent_id, name)` index. Key is parent id in big-endian bytes
/// followed by the raw name, so a prefix range scan yields a directory's
/// children ordered by name.
pub const CHILD_INDEX_TABLE: TableDefinition<&[u8], u64> = TableDefinition::new("child_index");

/// Blob descriptors (`blob_id -> BlobRecord`).
pub const BLOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// Hot-tier blob payloads, co-located with metadata (`blob_id -> bytes`).
pub const BLOB_DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("blob_data");

/// Persistent counters for O(1) statistics. All counter keys must be
/// updated transactionally with the mutation they count.
pub const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Transaction log (`sequence -> TransactionLogRecord`).
pub const TXN_LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("txn_log");

pub const NEXT_ENTRY_ID_KEY: &str = "next_entry_id";
pub const FILE_COUNT_KEY: &str = "file_count";
pub const DIR_COUNT_KEY: &str = "dir_count";
pub const SYMLINK_COUNT_KEY: &str = "symlink_count";
pub const TOTAL_SIZE_KEY: &str = "total_size";
pub const TXN_LOG_SEQ_KEY: &str = "txn_log_seq";

/// Counter key for blob counts per tier.
pub fn blob_count_key(tier: crate::metadata::types::Tier) -> &'static str {
	match tier {
		crate::metadata::types::Tier::Hot => "blob_count:hot",
		crate::metadata::types::Tier::Warm => "blob_count:warm",
		crate::metadata::types::Tier::Cold => "blob_count:cold",
	}
}

/// Composite `(parent_id, name)` key.
pub fn child_key(parent_id: u64, name: &str) -> Vec<u8> {
	let mut key = Vec::with_capacity(8 + name.len());
	key.extend_from_slice(&parent_id.to_be_bytes());
	key.extend_from_slice(name.as_bytes());
	key
}

/// Half-open key range covering every child of `parent_id`.
pub fn child_range(parent_id: u64) -> (Vec<u8>, Vec<u8>) {
	let lower = parent_id.to_be_bytes().to_vec();
	let upper = (parent_id + 1).to_be_bytes().to_vec();
	(lower, upper)
}

/// Create all tables so later read transactions never observe a missing
/// table.
pub fn initialize_tables(database: &Arc<Database>) -> Result<()> {
	let write_txn = database.begin_write()?;
	{
		let _entries = write_txn.open_table(ENTRIES_TABLE)?;
		let _paths = write_txn.open_table(PATH_INDEX_TABLE)?;
		let _children = write_txn.open_table(CHILD_INDEX_TABLE)?;
		let _blobs = write_txn.open_table(BLOBS_TABLE)?;
		let _blob_data = write_txn.open_table(BLOB_DATA_TABLE)?;
		let _counters = write_txn.open_table(COUNTERS_TABLE)?;
		let _txn_log = write_txn.open_table(TXN_LOG_TABLE)?;
	}
	write_txn.commit()?;
	Ok(())
}
