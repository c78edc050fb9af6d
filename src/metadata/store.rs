//! Metadata store over redb
//!
//! Single-writer relational index over entries and blob descriptors:
//! path -> id and (parent, name) -> id lookups, atomic batch creation,
//! counter-backed statistics, and the transaction API (savepoint nesting,
//! blob journal, log, recovery). Reads issued inside an active transaction
//! route through it, so a transaction observes its own writes.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::{debug, info, warn};

use crate::error::{FsError, Result};
use crate::metadata::tables::{
	blob_count_key, child_key, child_range, initialize_tables, BLOBS_TABLE, BLOB_DATA_TABLE,
	CHILD_INDEX_TABLE, COUNTERS_TABLE, DIR_COUNT_KEY, ENTRIES_TABLE, FILE_COUNT_KEY,
	NEXT_ENTRY_ID_KEY, PATH_INDEX_TABLE, SYMLINK_COUNT_KEY, TOTAL_SIZE_KEY, TXN_LOG_SEQ_KEY,
	TXN_LOG_TABLE,
};
use crate::metadata::transaction::{
	ActiveTransaction, BlobSideEffect, SavepointFrame, TransactionOptions, TxnOutcome,
};
use crate::metadata::types::{
	now_millis, BlobRecord, Entry, EntryKind, EntryUpdate, FsStats, NewEntry, TierCounts,
	TransactionLogRecord, TransactionStatus, Tier, DEFAULT_DIR_MODE,
};

/// Id of the root directory entry, created at initialization.
pub const ROOT_ID: u64 = 1;

/// Single-writer metadata store.
pub struct MetadataStore {
	db: Arc<Database>,
	active: Option<ActiveTransaction>,
	/// Remote blobs orphaned by a forced rollback, awaiting cleanup by the
	/// owner of the object stores.
	pending_remote_cleanup: Vec<(Tier, String)>,
}

impl MetadataStore {
	/// Open (or create) a store backed by a database file.
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		if let Some(parent) = path.as_ref().parent() {
			std::fs::create_dir_all(parent)?;
		}
		let database = Database::create(path.as_ref())?;
		debug!("Opened metadata database at {:?}", path.as_ref());
		Self::from_database(database)
	}

	/// Open a store backed by an in-memory database (tests, ephemeral
	/// tenants).
	pub fn in_memory() -> Result<Self> {
		let database =
			Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
		Self::from_database(database)
	}

	fn from_database(database: Database) -> Result<Self> {
		let db = Arc::new(database);
		initialize_tables(&db)?;
		let mut store =
			Self { db, active: None, pending_remote_cleanup: Vec::new() };
		store.ensure_root()?;
		Ok(store)
	}

	fn ensure_root(&mut self) -> Result<()> {
		self.with_write(|txn| {
			let exists = {
				let entries = txn.open_table(ENTRIES_TABLE)?;
				let exists = entries.get(ROOT_ID)?.is_some();
				exists
			};
			if exists {
				return Ok(());
			}
			let now = now_millis();
			let root = Entry {
				id: ROOT_ID,
				path: "/".to_string(),
				name: String::new(),
				parent_id: None,
				kind: EntryKind::Directory,
				mode: DEFAULT_DIR_MODE,
				uid: 0,
				gid: 0,
				nlink: 2,
				size: 0,
				blob_id: None,
				link_target: None,
				atime: now,
				mtime: now,
				ctime: now,
				birthtime: now,
				tier: Tier::Hot,
			};
			write_entry_rows(txn, &root)?;
			counter_put(txn, NEXT_ENTRY_ID_KEY, ROOT_ID + 1)?;
			counter_add(txn, DIR_COUNT_KEY, 1)?;
			info!("Initialized metadata store with root directory");
			Ok(())
		})
	}

	/// Run a write under the active transaction when one exists, otherwise
	/// under a one-shot transaction committed on success (dropped, hence
	/// rolled back, on error).
	fn with_write<R>(
		&mut self, f: impl FnOnce(&redb::WriteTransaction) -> Result<R>,
	) -> Result<R> {
		match self.active.as_ref() {
			Some(active) => f(&active.txn),
			None => {
				let txn = self.db.begin_write()?;
				let out = f(&txn)?;
				txn.commit()?;
				Ok(out)
			}
		}
	}

	// ---- entry lookups -------------------------------------------------

	pub fn get_by_path(&self, path: &str) -> Result<Option<Entry>> {
		match self.active.as_ref() {
			Some(active) => {
				let paths = active.txn.open_table(PATH_INDEX_TABLE)?;
				let entries = active.txn.open_table(ENTRIES_TABLE)?;
				lookup_by_path(&paths, &entries, path)
			}
			None => {
				let read = self.db.begin_read()?;
				let paths = read.open_table(PATH_INDEX_TABLE)?;
				let entries = read.open_table(ENTRIES_TABLE)?;
				lookup_by_path(&paths, &entries, path)
			}
		}
	}

	pub fn get_by_id(&self, id: u64) -> Result<Option<Entry>> {
		match self.active.as_ref() {
			Some(active) => {
				let entries = active.txn.open_table(ENTRIES_TABLE)?;
				read_entry(&entries, id)
			}
			None => {
				let read = self.db.begin_read()?;
				let entries = read.open_table(ENTRIES_TABLE)?;
				read_entry(&entries, id)
			}
		}
	}

	/// Children of a directory, ordered by name.
	pub fn get_children(&self, parent_id: u64) -> Result<Vec<Entry>> {
		self.get_children_page(parent_id, None, None)
	}

	/// Paged children listing. `after` is an exclusive name cursor; a
	/// repeat call with the last returned name resumes deterministically.
	pub fn get_children_page(
		&self, parent_id: u64, after: Option<&str>, limit: Option<usize>,
	) -> Result<Vec<Entry>> {
		match self.active.as_ref() {
			Some(active) => {
				let children = active.txn.open_table(CHILD_INDEX_TABLE)?;
				let entries = active.txn.open_table(ENTRIES_TABLE)?;
				scan_children(&children, &entries, parent_id, after, limit)
			}
			None => {
				let read = self.db.begin_read()?;
				let children = read.open_table(CHILD_INDEX_TABLE)?;
				let entries = read.open_table(ENTRIES_TABLE)?;
				scan_children(&children, &entries, parent_id, after, limit)
			}
		}
	}

	pub fn has_children(&self, parent_id: u64) -> Result<bool> {
		Ok(!self.get_children_page(parent_id, None, Some(1))?.is_empty())
	}

	/// Entries whose path (relative to `scope`, root when absent) matches
	/// the glob. The pattern's literal leading segments narrow the index
	/// scan before the matcher runs.
	pub fn find_by_pattern(&self, pattern: &str, scope: Option<&str>) -> Result<Vec<Entry>> {
		let cache = crate::pattern::MatcherCache::new(16);
		let parsed = crate::pattern::ParsedPattern::parse(pattern)?;
		let compiled = crate::pattern::CompiledPattern::compile(parsed, &cache)?;

		let base = crate::path::resolve(&[scope.unwrap_or("/")]);
		let scan_prefix = scan_prefix_for(&base, &compiled);
		let candidates = self.paths_with_prefix(&scan_prefix)?;

		let mut matches = Vec::new();
		for (candidate_path, id) in candidates {
			let rel = relative_to(&base, &candidate_path);
			if rel.is_empty() {
				continue;
			}
			let segments = crate::path::segments(&rel);
			let Some(entry) = self.get_by_id(id)? else { continue };
			if compiled.matches(&segments, entry.is_directory()) {
				matches.push(entry);
			}
		}
		Ok(matches)
	}

	/// All `(path, id)` rows whose path starts with the prefix (inclusive
	/// of the prefix itself).
	fn paths_with_prefix(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
		let upper = format!("{prefix}\u{10FFFF}");
		match self.active.as_ref() {
			Some(active) => {
				let paths = active.txn.open_table(PATH_INDEX_TABLE)?;
				scan_paths(&paths, prefix, &upper)
			}
			None => {
				let read = self.db.begin_read()?;
				let paths = read.open_table(PATH_INDEX_TABLE)?;
				scan_paths(&paths, prefix, &upper)
			}
		}
	}

	// ---- entry mutations -----------------------------------------------

	/// Create an entry. Timestamps default to "now" with all four equal;
	/// `EEXIST` when the path is taken, `ENOENT`/`ENOTDIR` when the parent
	/// is missing or not a directory.
	pub fn create_entry(&mut self, new: NewEntry) -> Result<u64> {
		let now = now_millis();
		self.with_write(|txn| insert_entry(txn, &new, now))
	}

	/// Create all entries or none. Order matters: parents first.
	pub fn create_entries_atomic(&mut self, batch: Vec<NewEntry>) -> Result<Vec<u64>> {
		let now = now_millis();
		self.with_write(|txn| {
			let mut ids = Vec::with_capacity(batch.len());
			for new in &batch {
				ids.push(insert_entry(txn, new, now)?);
			}
			Ok(ids)
		})
	}

	/// Apply a partial update. A nonexistent id is silently ignored;
	/// `ctime` always refreshes; `birthtime` never changes.
	pub fn update_entry(&mut self, id: u64, update: EntryUpdate) -> Result<()> {
		self.with_write(|txn| {
			let Some(mut entry) = ({
				let entries = txn.open_table(ENTRIES_TABLE)?;
				read_entry(&entries, id)?
			}) else {
				return Ok(());
			};

			let now = now_millis();
			entry.ctime = now;
			if update.touch_mtime && update.mtime.is_none() {
				entry.mtime = now;
			}
			if let Some(mode) = update.mode {
				entry.mode = mode & 0o7777;
			}
			if let Some(uid) = update.uid {
				entry.uid = uid;
			}
			if let Some(gid) = update.gid {
				entry.gid = gid;
			}
			if let Some(nlink) = update.nlink {
				entry.nlink = nlink;
			}
			if let Some(size) = update.size {
				let delta = size as i64 - entry.size as i64;
				add_counter_signed(txn, TOTAL_SIZE_KEY, delta)?;
				entry.size = size;
			}
			if let Some(blob_id) = update.blob_id {
				entry.blob_id = blob_id;
			}
			if let Some(link_target) = update.link_target {
				entry.link_target = link_target;
			}
			if let Some(atime) = update.atime {
				entry.atime = atime;
			}
			if let Some(mtime) = update.mtime {
				entry.mtime = mtime;
			}
			if let Some(tier) = update.tier {
				entry.tier = tier;
			}

			let payload = bincode::serialize(&entry)?;
			let mut entries = txn.open_table(ENTRIES_TABLE)?;
			entries.insert(id, payload.as_slice())?;
			Ok(())
		})
	}

	/// Remove an entry and its index rows. Nonexistent ids are silently
	/// ignored (delete is idempotent). Blob refcounts are the caller's
	/// concern.
	pub fn delete_entry(&mut self, id: u64) -> Result<()> {
		self.with_write(|txn| {
			let Some(entry) = ({
				let entries = txn.open_table(ENTRIES_TABLE)?;
				read_entry(&entries, id)?
			}) else {
				return Ok(());
			};
			{
				let mut entries = txn.open_table(ENTRIES_TABLE)?;
				entries.remove(id)?;
			}
			{
				let mut paths = txn.open_table(PATH_INDEX_TABLE)?;
				paths.remove(entry.path.as_str())?;
			}
			if let Some(parent_id) = entry.parent_id {
				let key = child_key(parent_id, &entry.name);
				let mut children = txn.open_table(CHILD_INDEX_TABLE)?;
				children.remove(key.as_slice())?;
			}
			bump_kind_counter(txn, entry.kind, -1)?;
			add_counter_signed(txn, TOTAL_SIZE_KEY, -(entry.size as i64))?;
			Ok(())
		})
	}

	/// Move an entry to a new path/parent. A directory rename rewrites all
	/// descendant paths in the same transaction; returns how many
	/// descendants were rewritten.
	pub fn rename_entry(&mut self, id: u64, new_parent_id: u64, new_path: &str) -> Result<usize> {
		let new_path = new_path.to_string();
		self.with_write(|txn| {
			let Some(mut entry) = ({
				let entries = txn.open_table(ENTRIES_TABLE)?;
				read_entry(&entries, id)?
			}) else {
				return Err(FsError::not_found(&new_path));
			};
			{
				let paths = txn.open_table(PATH_INDEX_TABLE)?;
				if paths.get(new_path.as_str())?.is_some() {
					return Err(FsError::already_exists(&new_path));
				}
			}

			let old_path = entry.path.clone();
			let old_parent = entry.parent_id;
			let old_name = entry.name.clone();
			let new_name = crate::path::basename(&new_path, None);

			// descendant prefix rewrite for directories
			let mut rewritten = 0usize;
			if entry.is_directory() {
				let prefix = format!("{}/", old_path.trim_end_matches('/'));
				let upper = format!("{prefix}\u{10FFFF}");
				let descendants = {
					let paths = txn.open_table(PATH_INDEX_TABLE)?;
					scan_paths(&paths, &prefix, &upper)?
				};
				for (descendant_path, descendant_id) in descendants {
					let suffix = &descendant_path[old_path.trim_end_matches('/').len()..];
					let updated_path =
						format!("{}{}", new_path.trim_end_matches('/'), suffix);
					rewrite_entry_path(txn, descendant_id, &descendant_path, &updated_path)?;
					rewritten += 1;
				}
			}

			// the entry's own rows
			{
				let mut paths = txn.open_table(PATH_INDEX_TABLE)?;
				paths.remove(old_path.as_str())?;
				paths.insert(new_path.as_str(), id)?;
			}
			if let Some(parent_id) = old_parent {
				let key = child_key(parent_id, &old_name);
				let mut children = txn.open_table(CHILD_INDEX_TABLE)?;
				children.remove(key.as_slice())?;
			}
			{
				let key = child_key(new_parent_id, &new_name);
				let mut children = txn.open_table(CHILD_INDEX_TABLE)?;
				children.insert(key.as_slice(), id)?;
			}

			entry.path = new_path.clone();
			entry.name = new_name;
			entry.parent_id = Some(new_parent_id);
			entry.ctime = now_millis();
			let payload = bincode::serialize(&entry)?;
			let mut entries = txn.open_table(ENTRIES_TABLE)?;
			entries.insert(id, payload.as_slice())?;
			Ok(rewritten)
		})
	}

	// ---- blob metadata -------------------------------------------------

	/// Register a blob descriptor; a hot payload is stored co-located.
	pub fn register_blob(&mut self, record: &BlobRecord, hot_payload: Option<&[u8]>) -> Result<()> {
		self.with_write(|txn| {
			let payload = bincode::serialize(record)?;
			{
				let mut blobs = txn.open_table(BLOBS_TABLE)?;
				blobs.insert(record.id.as_str(), payload.as_slice())?;
			}
			if let Some(bytes) = hot_payload {
				let mut data = txn.open_table(BLOB_DATA_TABLE)?;
				data.insert(record.id.as_str(), bytes)?;
			}
			counter_add(txn, blob_count_key(record.tier), 1)?;
			Ok(())
		})
	}

	pub fn get_blob(&self, id: &str) -> Result<Option<BlobRecord>> {
		match self.active.as_ref() {
			Some(active) => {
				let blobs = active.txn.open_table(BLOBS_TABLE)?;
				read_blob(&blobs, id)
			}
			None => {
				let read = self.db.begin_read()?;
				let blobs = read.open_table(BLOBS_TABLE)?;
				read_blob(&blobs, id)
			}
		}
	}

	/// Hot-tier payload bytes.
	pub fn get_blob_data(&self, id: &str) -> Result<Option<Vec<u8>>> {
		match self.active.as_ref() {
			Some(active) => {
				let data = active.txn.open_table(BLOB_DATA_TABLE)?;
				let result = data.get(id)?.map(|guard| guard.value().to_vec());
				Ok(result)
			}
			None => {
				let read = self.db.begin_read()?;
				let data = read.open_table(BLOB_DATA_TABLE)?;
				Ok(data.get(id)?.map(|guard| guard.value().to_vec()))
			}
		}
	}

	pub fn update_blob_tier(&mut self, id: &str, tier: Tier) -> Result<()> {
		self.with_write(|txn| {
			let Some(mut record) = ({
				let blobs = txn.open_table(BLOBS_TABLE)?;
				read_blob(&blobs, id)?
			}) else {
				return Ok(());
			};
			if record.tier == tier {
				return Ok(());
			}
			counter_add(txn, blob_count_key(record.tier), -1)?;
			counter_add(txn, blob_count_key(tier), 1)?;
			record.tier = tier;
			let payload = bincode::serialize(&record)?;
			let mut blobs = txn.open_table(BLOBS_TABLE)?;
			blobs.insert(id, payload.as_slice())?;
			Ok(())
		})
	}

	/// Remove a blob row and any hot payload. Idempotent.
	pub fn delete_blob(&mut self, id: &str) -> Result<()> {
		self.with_write(|txn| {
			let Some(record) = ({
				let blobs = txn.open_table(BLOBS_TABLE)?;
				read_blob(&blobs, id)?
			}) else {
				return Ok(());
			};
			{
				let mut blobs = txn.open_table(BLOBS_TABLE)?;
				blobs.remove(id)?;
			}
			{
				let mut data = txn.open_table(BLOB_DATA_TABLE)?;
				data.remove(id)?;
			}
			counter_add(txn, blob_count_key(record.tier), -1)?;
			Ok(())
		})
	}

	/// Increment the hard-link refcount; returns the new count.
	pub fn blob_add_ref(&mut self, id: &str) -> Result<u32> {
		self.adjust_refcount(id, 1)
	}

	/// Decrement the hard-link refcount; returns the remaining count. The
	/// caller deletes the blob when it reaches zero.
	pub fn blob_release(&mut self, id: &str) -> Result<u32> {
		self.adjust_refcount(id, -1)
	}

	fn adjust_refcount(&mut self, id: &str, delta: i32) -> Result<u32> {
		self.with_write(|txn| {
			let Some(mut record) = ({
				let blobs = txn.open_table(BLOBS_TABLE)?;
				read_blob(&blobs, id)?
			}) else {
				return Ok(0);
			};
			record.refcount = if delta >= 0 {
				record.refcount.saturating_add(delta as u32)
			} else {
				record.refcount.saturating_sub((-delta) as u32)
			};
			let remaining = record.refcount;
			let payload = bincode::serialize(&record)?;
			let mut blobs = txn.open_table(BLOBS_TABLE)?;
			blobs.insert(id, payload.as_slice())?;
			Ok(remaining)
		})
	}

	/// Every blob descriptor, for the integrity sweep.
	pub fn list_blobs(&self) -> Result<Vec<BlobRecord>> {
		match self.active.as_ref() {
			Some(active) => {
				let blobs = active.txn.open_table(BLOBS_TABLE)?;
				collect_blobs(&blobs)
			}
			None => {
				let read = self.db.begin_read()?;
				let blobs = read.open_table(BLOBS_TABLE)?;
				collect_blobs(&blobs)
			}
		}
	}

	// ---- statistics ----------------------------------------------------

	pub fn stats(&self) -> Result<FsStats> {
		match self.active.as_ref() {
			Some(active) => {
				let counters = active.txn.open_table(COUNTERS_TABLE)?;
				read_stats(&counters)
			}
			None => {
				let read = self.db.begin_read()?;
				let counters = read.open_table(COUNTERS_TABLE)?;
				read_stats(&counters)
			}
		}
	}

	// ---- transactions --------------------------------------------------

	pub fn in_transaction(&self) -> bool {
		self.active.is_some()
	}

	pub fn transaction_depth(&self) -> usize {
		self.active.as_ref().map_or(0, ActiveTransaction::depth)
	}

	/// Start a transaction scope. With one already active this opens a
	/// savepoint; an expired active transaction is rolled back first and
	/// the caller observes `EBUSY`.
	pub fn begin_transaction(&mut self, options: TransactionOptions) -> Result<()> {
		if self.active.is_some() {
			self.check_deadline()?;
			let active = self.active.as_mut().expect("checked above");
			let savepoint = active.txn.ephemeral_savepoint()?;
			let journal_mark = active.journal.len();
			active.savepoints.push(SavepointFrame { savepoint, journal_mark });
			return Ok(());
		}
		let txn = self.db.begin_write()?;
		self.active = Some(ActiveTransaction::new(txn, options.timeout));
		Ok(())
	}

	/// Commit the innermost scope. Only the outermost commit makes effects
	/// durable and releases deferred remote deletes.
	pub fn commit(&mut self) -> Result<TxnOutcome> {
		{
			let Some(active) = self.active.as_mut() else {
				return Err(FsError::invalid("commit without an active transaction"));
			};
			if !active.savepoints.is_empty() {
				// inner scope: release the savepoint, keep its effects
				active.savepoints.pop();
				return Ok(TxnOutcome::default());
			}
		}
		let active = self.active.take().expect("checked above");
		let record = TransactionLogRecord {
			id: active.id,
			started_at: active.started_at,
			ended_at: now_millis(),
			status: TransactionStatus::Committed,
		};
		append_txn_log(&active.txn, &record)?;
		active.txn.commit()?;
		let remote_deletes = active
			.journal
			.into_iter()
			.filter_map(|effect| match effect {
				BlobSideEffect::DeferredDelete { tier, blob_id } => Some((tier, blob_id)),
				BlobSideEffect::CreatedRemote { .. } => None,
			})
			.collect();
		debug!("Committed transaction {}", record.id);
		Ok(TxnOutcome { finished: true, remote_deletes })
	}

	/// Roll back the innermost scope. An inner rollback restores its
	/// savepoint; the outermost rollback aborts the write transaction and
	/// returns the remote creations to reverse.
	pub fn rollback(&mut self) -> Result<TxnOutcome> {
		{
			let Some(active) = self.active.as_mut() else {
				return Err(FsError::invalid("rollback without an active transaction"));
			};
			if let Some(frame) = active.savepoints.pop() {
				active.txn.restore_savepoint(&frame.savepoint)?;
				let undo = active
					.journal
					.drain(frame.journal_mark..)
					.filter_map(|effect| match effect {
						BlobSideEffect::CreatedRemote { tier, blob_id } => Some((tier, blob_id)),
						BlobSideEffect::DeferredDelete { .. } => None,
					})
					.collect();
				return Ok(TxnOutcome { finished: false, remote_deletes: undo });
			}
		}
		let active = self.active.take().expect("checked above");
		let id = active.id;
		let started_at = active.started_at;
		active.txn.abort()?;
		let undo = active
			.journal
			.into_iter()
			.filter_map(|effect| match effect {
				BlobSideEffect::CreatedRemote { tier, blob_id } => Some((tier, blob_id)),
				BlobSideEffect::DeferredDelete { .. } => None,
			})
			.collect();

		// the aborted transaction cannot carry its own log row
		let txn = self.db.begin_write()?;
		append_txn_log(
			&txn,
			&TransactionLogRecord {
				id,
				started_at,
				ended_at: now_millis(),
				status: TransactionStatus::RolledBack,
			},
		)?;
		txn.commit()?;
		debug!("Rolled back transaction {id}");
		Ok(TxnOutcome { finished: true, remote_deletes: undo })
	}

	/// Journal a blob side effect under the active transaction. Without a
	/// transaction the effect is already final and nothing is recorded.
	pub fn journal_side_effect(&mut self, effect: BlobSideEffect) {
		if let Some(active) = self.active.as_mut() {
			active.journal.push(effect);
		}
	}

	/// Enforce the transaction timeout: an expired transaction is rolled
	/// back in full and the caller observes `EBUSY`. Remote blobs orphaned
	/// by the forced rollback are parked for `take_pending_remote_cleanup`.
	pub fn check_deadline(&mut self) -> Result<()> {
		if !self.active.as_ref().is_some_and(ActiveTransaction::expired) {
			return Ok(());
		}
		warn!("Transaction held beyond its timeout, forcing rollback");
		if let Some(active) = self.active.as_mut() {
			active.savepoints.clear();
		}
		let outcome = self.rollback()?;
		self.pending_remote_cleanup.extend(outcome.remote_deletes);
		Err(FsError::busy("transaction held beyond its timeout"))
	}

	/// Remote deletions owed after a forced rollback.
	pub fn take_pending_remote_cleanup(&mut self) -> Vec<(Tier, String)> {
		std::mem::take(&mut self.pending_remote_cleanup)
	}

	/// Latest transaction log records, oldest first.
	pub fn transaction_log(&self, limit: usize) -> Result<Vec<TransactionLogRecord>> {
		let read = self.db.begin_read()?;
		let log = read.open_table(TXN_LOG_TABLE)?;
		let mut records: Vec<TransactionLogRecord> = Vec::new();
		for item in log.iter()?.rev().take(limit) {
			let (_, value) = item?;
			records.push(bincode::deserialize(value.value())?);
		}
		records.reverse();
		Ok(records)
	}

	/// Startup recovery: redb rolls back any write transaction that was in
	/// flight when the previous incarnation died, so recovery reduces to
	/// reporting the last commit point.
	pub fn recover_transactions(&mut self) -> Result<Option<TransactionLogRecord>> {
		let last = self.transaction_log(1)?.pop();
		match &last {
			Some(record) => info!(
				"Recovered metadata store; last transaction {} finished as {:?}",
				record.id, record.status
			),
			None => debug!("Recovered metadata store; transaction log is empty"),
		}
		Ok(last)
	}
}

impl Drop for MetadataStore {
	fn drop(&mut self) {
		if let Some(active) = self.active.take() {
			warn!("Metadata store dropped with transaction {} still open", active.id);
		}
	}
}

// ---- free helpers (shared by read- and write-transaction paths) --------

fn lookup_by_path(
	paths: &impl ReadableTable<&'static str, u64>,
	entries: &impl ReadableTable<u64, &'static [u8]>, path: &str,
) -> Result<Option<Entry>> {
	let Some(id_guard) = paths.get(path)? else {
		return Ok(None);
	};
	let id = id_guard.value();
	read_entry(entries, id)
}

fn read_entry(
	entries: &impl ReadableTable<u64, &'static [u8]>, id: u64,
) -> Result<Option<Entry>> {
	match entries.get(id)? {
		Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
		None => Ok(None),
	}
}

fn read_blob(
	blobs: &impl ReadableTable<&'static str, &'static [u8]>, id: &str,
) -> Result<Option<BlobRecord>> {
	match blobs.get(id)? {
		Some(bytes) => Ok(Some(bincode::deserialize(bytes.value())?)),
		None => Ok(None),
	}
}

fn collect_blobs(
	blobs: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<BlobRecord>> {
	let mut records = Vec::new();
	for item in blobs.iter()? {
		let (_, value) = item?;
		records.push(bincode::deserialize(value.value())?);
	}
	Ok(records)
}

fn scan_children(
	children: &impl ReadableTable<&'static [u8], u64>,
	entries: &impl ReadableTable<u64, &'static [u8]>, parent_id: u64, after: Option<&str>,
	limit: Option<usize>,
) -> Result<Vec<Entry>> {
	let (mut lower, upper) = child_range(parent_id);
	if let Some(after) = after {
		// exclusive cursor: everything strictly past (parent, after)
		lower = child_key(parent_id, after);
		lower.push(0);
	}
	let limit = limit.unwrap_or(usize::MAX);
	let mut out = Vec::new();
	for item in children.range::<&[u8]>(lower.as_slice()..upper.as_slice())? {
		if out.len() >= limit {
			break;
		}
		let (_, id_guard) = item?;
		if let Some(entry) = read_entry(entries, id_guard.value())? {
			out.push(entry);
		}
	}
	Ok(out)
}

fn scan_paths(
	paths: &impl ReadableTable<&'static str, u64>, lower: &str, upper: &str,
) -> Result<Vec<(String, u64)>> {
	let mut out = Vec::new();
	for item in paths.range::<&str>(lower..upper)? {
		let (path_guard, id_guard) = item?;
		out.push((path_guard.value().to_string(), id_guard.value()));
	}
	Ok(out)
}

fn insert_entry(txn: &redb::WriteTransaction, new: &NewEntry, now: i64) -> Result<u64> {
	{
		let paths = txn.open_table(PATH_INDEX_TABLE)?;
		if paths.get(new.path.as_str())?.is_some() {
			return Err(FsError::already_exists(&new.path));
		}
	}
	if let Some(parent_id) = new.parent_id {
		let parent = {
			let entries = txn.open_table(ENTRIES_TABLE)?;
			read_entry(&entries, parent_id)?
		};
		match parent {
			None => return Err(FsError::not_found(crate::path::dirname(&new.path))),
			Some(parent) if !parent.is_directory() => {
				return Err(FsError::NotADirectory { path: parent.path })
			}
			Some(_) => {}
		}
	}

	let id = next_entry_id(txn)?;
	let entry = Entry {
		id,
		path: new.path.clone(),
		name: new.name.clone(),
		parent_id: new.parent_id,
		kind: new.kind,
		mode: new.mode,
		uid: new.uid,
		gid: new.gid,
		nlink: if new.kind == EntryKind::Directory { 2 } else { 1 },
		size: new.size,
		blob_id: new.blob_id.clone(),
		link_target: new.link_target.clone(),
		atime: now,
		mtime: now,
		ctime: now,
		birthtime: now,
		tier: new.tier,
	};
	write_entry_rows(txn, &entry)?;
	bump_kind_counter(txn, new.kind, 1)?;
	add_counter_signed(txn, TOTAL_SIZE_KEY, new.size as i64)?;
	Ok(id)
}

fn write_entry_rows(txn: &redb::WriteTransaction, entry: &Entry) -> Result<()> {
	let payload = bincode::serialize(entry)?;
	{
		let mut entries = txn.open_table(ENTRIES_TABLE)?;
		entries.insert(entry.id, payload.as_slice())?;
	}
	{
		let mut paths = txn.open_table(PATH_INDEX_TABLE)?;
		paths.insert(entry.path.as_str(), entry.id)?;
	}
	if let Some(parent_id) = entry.parent_id {
		let key = child_key(parent_id, &entry.name);
		let mut children = txn.open_table(CHILD_INDEX_TABLE)?;
		children.insert(key.as_slice(), entry.id)?;
	}
	Ok(())
}

fn rewrite_entry_path(
	txn: &redb::WriteTransaction, id: u64, old_path: &str, new_path: &str,
) -> Result<()> {
	let Some(mut entry) = ({
		let entries = txn.open_table(ENTRIES_TABLE)?;
		read_entry(&entries, id)?
	}) else {
		return Ok(());
	};
	entry.path = new_path.to_string();
	entry.ctime = now_millis();
	let payload = bincode::serialize(&entry)?;
	{
		let mut entries = txn.open_table(ENTRIES_TABLE)?;
		entries.insert(id, payload.as_slice())?;
	}
	let mut paths = txn.open_table(PATH_INDEX_TABLE)?;
	paths.remove(old_path)?;
	paths.insert(new_path, id)?;
	Ok(())
}

fn next_entry_id(txn: &redb::WriteTransaction) -> Result<u64> {
	let mut counters = txn.open_table(COUNTERS_TABLE)?;
	let next = counters.get(NEXT_ENTRY_ID_KEY)?.map(|g| g.value()).unwrap_or(ROOT_ID + 1);
	counters.insert(NEXT_ENTRY_ID_KEY, next + 1)?;
	Ok(next)
}

fn counter_put(txn: &redb::WriteTransaction, key: &str, value: u64) -> Result<()> {
	let mut counters = txn.open_table(COUNTERS_TABLE)?;
	counters.insert(key, value)?;
	Ok(())
}

fn counter_add(txn: &redb::WriteTransaction, key: &str, delta: i64) -> Result<u64> {
	add_counter_signed(txn, key, delta)
}

fn add_counter_signed(txn: &redb::WriteTransaction, key: &str, delta: i64) -> Result<u64> {
	let mut counters = txn.open_table(COUNTERS_TABLE)?;
	let current = counters.get(key)?.map(|g| g.value()).unwrap_or(0);
	let next = if delta >= 0 {
		current.saturating_add(delta as u64)
	} else {
		current.saturating_sub(delta.unsigned_abs())
	};
	counters.insert(key, next)?;
	Ok(next)
}

fn bump_kind_counter(txn: &redb::WriteTransaction, kind: EntryKind, delta: i64) -> Result<()> {
	let key = match kind {
		EntryKind::File => FILE_COUNT_KEY,
		EntryKind::Directory => DIR_COUNT_KEY,
		EntryKind::Symlink => SYMLINK_COUNT_KEY,
		// special nodes fold into the file count
		_ => FILE_COUNT_KEY,
	};
	add_counter_signed(txn, key, delta)?;
	Ok(())
}

fn read_stats(counters: &impl ReadableTable<&'static str, u64>) -> Result<FsStats> {
	let get = |key: &str| -> Result<u64> {
		Ok(counters.get(key)?.map(|g| g.value()).unwrap_or(0))
	};
	Ok(FsStats {
		file_count: get(FILE_COUNT_KEY)?,
		dir_count: get(DIR_COUNT_KEY)?,
		symlink_count: get(SYMLINK_COUNT_KEY)?,
		total_size: get(TOTAL_SIZE_KEY)?,
		blobs_by_tier: TierCounts {
			hot: get(blob_count_key(Tier::Hot))?,
			warm: get(blob_count_key(Tier::Warm))?,
			cold: get(blob_count_key(Tier::Cold))?,
		},
	})
}

fn append_txn_log(txn: &redb::WriteTransaction, record: &TransactionLogRecord) -> Result<()> {
	let seq = {
		let mut counters = txn.open_table(COUNTERS_TABLE)?;
		let seq = counters.get(TXN_LOG_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0);
		counters.insert(TXN_LOG_SEQ_KEY, seq + 1)?;
		seq
	};
	let payload = bincode::serialize(record)?;
	let mut log = txn.open_table(TXN_LOG_TABLE)?;
	log.insert(seq, payload.as_slice())?;
	Ok(())
}

fn scan_prefix_for(base: &str, compiled: &crate::pattern::CompiledPattern) -> String {
	let mut literal: Vec<&str> = Vec::new();
	for segment in &compiled.parsed.segments {
		if segment.chars().any(|c| matches!(c, '*' | '?' | '[' | '{')) || segment == "**" {
			break;
		}
		literal.push(segment);
	}
	// basename patterns match at any depth, so only the scope narrows
	if compiled.parsed.is_basename_style() {
		literal.clear();
	}
	let mut prefix = base.trim_end_matches('/').to_string();
	for segment in literal {
		prefix.push('/');
		prefix.push_str(segment);
	}
	if prefix.is_empty() {
		prefix.push('/');
	}
	prefix
}

fn relative_to(base: &str, path: &str) -> String {
	if base == "/" {
		return path.trim_start_matches('/').to_string();
	}
	path.strip_prefix(base)
		.filter(|rest| rest.is_empty() || rest.starts_with('/'))
		.map(|rest| rest.trim_start_matches('/').to_string())
		.unwrap_or_default()
}
