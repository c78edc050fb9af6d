//! Transaction state for the metadata store
//!
//! One outer write transaction at most; nested scopes map onto redb
//! savepoints. Side effects that live outside the metadata engine (blobs in
//! remote tiers) are journaled so rollback can reverse creations and commit
//! can apply deferred deletes — no orphaned blobs after any aborted
//! operation.

use std::time::{Duration, Instant};

use redb::{Savepoint, WriteTransaction};
use uuid::Uuid;

use crate::metadata::types::{now_millis, Tier};

/// Options accepted by `begin_transaction`.
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
	/// Abort the transaction once held longer than this window; waiters
	/// then observe `EBUSY`.
	pub timeout: Option<Duration>,
}

/// A journaled blob side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobSideEffect {
	/// A blob was created in a remote tier during this transaction;
	/// rollback must delete it.
	CreatedRemote { tier: Tier, blob_id: String },
	/// A remote blob delete deferred until commit; rollback drops it.
	DeferredDelete { tier: Tier, blob_id: String },
}

pub(crate) struct SavepointFrame {
	pub savepoint: Savepoint,
	pub journal_mark: usize,
}

pub(crate) struct ActiveTransaction {
	pub txn: WriteTransaction,
	pub id: Uuid,
	pub started_at: i64,
	pub deadline: Option<Instant>,
	pub savepoints: Vec<SavepointFrame>,
	pub journal: Vec<BlobSideEffect>,
}

impl ActiveTransaction {
	pub fn new(txn: WriteTransaction, timeout: Option<Duration>) -> Self {
		Self {
			txn,
			id: Uuid::new_v4(),
			started_at: now_millis(),
			deadline: timeout.map(|t| Instant::now() + t),
			savepoints: Vec::new(),
			journal: Vec::new(),
		}
	}

	pub fn depth(&self) -> usize {
		self.savepoints.len() + 1
	}

	pub fn expired(&self) -> bool {
		self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
	}
}

/// What resolved at a transaction boundary, and the remote cleanup the
/// caller owes: deferred deletes after a commit, reversal deletes after a
/// rollback.
#[derive(Debug, Default)]
pub struct TxnOutcome {
	/// True when the outermost scope finished.
	pub finished: bool,
	pub remote_deletes: Vec<(Tier, String)>,
}
