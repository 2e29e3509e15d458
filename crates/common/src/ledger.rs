//! Read side of the external commitment ledger.
//!
//! The storage authority's GC only needs "what is the confirmed
//! `(root, version)` for this identity right now". Write access lives with
//! the ledger implementation itself (`ocs-chain`).

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{CommitmentRecord, DatasetId};

#[derive(Debug, Clone, Error)]
pub enum LedgerQueryError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Confirmed commitment for `identity`, or `None` when the ledger has
    /// no account for it.
    async fn confirmed_commitment(
        &self,
        identity: &DatasetId,
    ) -> Result<Option<CommitmentRecord>, LedgerQueryError>;
}
