//! ocs-storage
//!
//! Storage authority: keeps every dataset snapshot, hands out versions and
//! attestations, serves snapshots back by root, and drops snapshots the
//! ledger has moved past.

pub mod authority;
pub mod gc;
pub mod persistence;
pub mod server;

pub use crate::authority::{AuthorityError, StorageAuthority};
pub use crate::gc::{GcError, GcScanResult, SnapshotCollector};
pub use crate::persistence::{FileStateStore, MemoryStateStore, PersistenceError, StateStore};
