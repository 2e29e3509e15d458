//! # OCS Chain
//!
//! Reference commitment ledger. Models the on-chain account that holds the
//! confirmed `(root, version)` per dataset and only moves it forward through
//! [`ocs_validator::UpdateValidator`].
//!
//! ## Module Overview
//!
//! | Module | Fungsi |
//! |--------|--------|
//! | `ledger` | In-memory [`CommitmentLedger`]: deploy, read, write |
//! | `rpc` | axum router exposing the ledger over HTTP |
//! | `client` | [`HttpLedgerClient`]: reqwest client for that router |
//!
//! ## Write Path
//!
//! ```text
//! proof.old == account.record ?  ── no ──▶ StaleCommitment
//!          │ yes
//!          ▼
//! validator.validate(account.record, updates, attestation)
//!          │ ok
//!          ▼
//! account.record = new record
//! ```

pub mod client;
pub mod ledger;
pub mod rpc;

use async_trait::async_trait;
use ocs_common::{CommitmentRecord, DatasetId, LedgerReader, MerkleError, UpdateProof};
use ocs_validator::ValidationError;
use thiserror::Error;

pub use client::HttpLedgerClient;
pub use ledger::CommitmentLedger;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no ledger account for identity {0}")]
    UnknownIdentity(DatasetId),

    #[error("ledger account for identity {0} already exists")]
    AlreadyDeployed(DatasetId),

    #[error("invalid tree height: {0}")]
    InvalidHeight(#[from] MerkleError),

    #[error("proof was built against {claimed}, ledger holds {current}")]
    StaleCommitment {
        current: CommitmentRecord,
        claimed: CommitmentRecord,
    },

    #[error("transition rejected: {0}")]
    Rejected(#[from] ValidationError),

    /// Rejection reported by a remote ledger; the validator's verdict
    /// arrives as text only.
    #[error("remote ledger rejected transition ({code}): {message}")]
    RemoteRejected { code: String, message: String },

    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// True when re-reading the ledger and rebuilding the batch may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::StaleCommitment { .. } | LedgerError::Transport(_) => true,
            LedgerError::Rejected(v) => v.is_stale(),
            LedgerError::RemoteRejected { code, .. } => ValidationError::code_is_stale(code),
            _ => false,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// WRITE SEAM
// ════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Submits a transition; returns the record now confirmed on the ledger.
    async fn submit_update(
        &self,
        identity: &DatasetId,
        proof: UpdateProof,
    ) -> Result<CommitmentRecord, LedgerError>;
}

/// Read and write access together, as a sync client needs.
pub trait Ledger: LedgerReader + LedgerWriter {}

impl<T: LedgerReader + LedgerWriter + ?Sized> Ledger for T {}
