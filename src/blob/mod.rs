//! Tiered blob storage: object-store contracts for the remote tiers and
//! the size-driven placement policy.

pub mod store;
pub mod tier;

pub use store::{checksum, FsObjectStore, MemoryObjectStore, ObjectInfo, ObjectStore, PutResult};
pub use tier::{TierPolicy, TierSupport};
