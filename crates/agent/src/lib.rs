//! # OCS Agent
//!
//! Client side of the protocol: talks to a storage authority, drives sync
//! cycles against a ledger, and retries cycles that lost a race.
//!
//! ## Module Overview
//!
//! | Module | Fungsi |
//! |--------|--------|
//! | `client` | [`AuthorityApi`] seam, HTTP [`StorageClient`] |
//! | `sync` | [`SyncClient`] cycle, [`increment_leaf`] |
//! | `retry` | exponential backoff for restarted cycles |

pub mod client;
pub mod retry;
pub mod sync;

pub use client::{AuthorityApi, ClientError, StorageClient};
pub use retry::{RetryConfig, RetryResult};
pub use sync::{increment_leaf, CycleOutcome, SyncClient, SyncError};
