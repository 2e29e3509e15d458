//! # OCS Validator
//!
//! The single trust boundary of the protocol: decides whether a claimed
//! transition `(old_root, old_version) -> (new_root, new_version)` is
//! legitimate using only the old commitment, a batch of leaf updates with
//! witnesses, and the authority's attestation.
//!
//! ## Algorithm
//!
//! ```text
//! current = old_root
//! for update in batch:
//!     require witness.compute_root(old_leaf_hash) == current
//!     current = witness.compute_root(new_leaf_hash)
//! require attestation.root == current
//! require verify(authority_key, (current, attestation.version), signature)
//! require attestation.version > old_version
//! ```
//!
//! Each update chains off the root produced by the one before it, so
//! repeated or overlapping indices inside one batch are self-consistent by
//! construction. Nothing is applied on failure; the caller restarts from
//! the ledger's current record.
//!
//! The function is pure. It can run as-is on a ledger node or be wrapped
//! by a proof system; that encoding is not this crate's concern.

pub mod policy;

use ocs_common::{Attestation, AuthorityPublicKey, CommitmentRecord, Hash32, LeafIndex, Update, Version};
use thiserror::Error;
use tracing::debug;

pub use policy::{policy_by_name, AnyTransition, IncrementByOne, LeafPolicy};

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Every variant is terminal for the attempted transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("update #{position} (leaf {index}): witness does not prove the old leaf under the current root")]
    StaleOrForgedWitness { position: usize, index: LeafIndex },

    #[error("update #{position}: witness height {found} does not match tree height {expected}")]
    MalformedWitness {
        position: usize,
        expected: usize,
        found: usize,
    },

    #[error("recomputed root {recomputed} differs from attested root {claimed}")]
    RootMismatch { claimed: Hash32, recomputed: Hash32 },

    #[error("attestation signature does not verify under the authority key")]
    BadSignature,

    #[error("version {claimed} is not greater than current version {current}")]
    NonIncreasingVersion { current: Version, claimed: Version },

    #[error("update #{position} (leaf {index}) violates leaf policy: {reason}")]
    PolicyViolation {
        position: usize,
        index: LeafIndex,
        reason: String,
    },
}

impl ValidationError {
    /// Variant name, used as the error code when a verdict crosses a wire.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::StaleOrForgedWitness { .. } => "StaleOrForgedWitness",
            ValidationError::MalformedWitness { .. } => "MalformedWitness",
            ValidationError::RootMismatch { .. } => "RootMismatch",
            ValidationError::BadSignature => "BadSignature",
            ValidationError::NonIncreasingVersion { .. } => "NonIncreasingVersion",
            ValidationError::PolicyViolation { .. } => "PolicyViolation",
        }
    }

    /// True when the same transition rebuilt against a fresh ledger read
    /// may pass.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            ValidationError::StaleOrForgedWitness { .. }
                | ValidationError::NonIncreasingVersion { .. }
        )
    }

    /// [`is_stale`](Self::is_stale) for a verdict known only by its code.
    pub fn code_is_stale(code: &str) -> bool {
        code == "StaleOrForgedWitness" || code == "NonIncreasingVersion"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CORE ALGORITHM
// ════════════════════════════════════════════════════════════════════════════

/// Folds `updates` over `old_root`, checking each old leaf against the
/// running root. Returns the independently recomputed new root.
pub fn recompute_root(old_root: &Hash32, updates: &[Update]) -> Result<Hash32, ValidationError> {
    let mut current = *old_root;
    for (position, update) in updates.iter().enumerate() {
        let old_hash = update.old_leaf_hash();
        if update.witness.compute_root(&old_hash) != current {
            return Err(ValidationError::StaleOrForgedWitness {
                position,
                index: update.index(),
            });
        }
        current = update.witness.compute_root(&update.new_leaf_hash());
    }
    Ok(current)
}

/// Verifies a transition from `current` and returns the new commitment.
///
/// The attestation is taken by value: it is spent here and must not be
/// reused.
pub fn assert_root_update_valid(
    authority: &AuthorityPublicKey,
    current: &CommitmentRecord,
    updates: &[Update],
    attestation: Attestation,
) -> Result<CommitmentRecord, ValidationError> {
    let recomputed = recompute_root(&current.root, updates)?;

    if recomputed != attestation.root {
        return Err(ValidationError::RootMismatch {
            claimed: attestation.root,
            recomputed,
        });
    }

    if !authority.verify_attestation(&recomputed, attestation.version, &attestation.signature) {
        return Err(ValidationError::BadSignature);
    }

    if attestation.version <= current.version {
        return Err(ValidationError::NonIncreasingVersion {
            current: current.version,
            claimed: attestation.version,
        });
    }

    Ok(CommitmentRecord::new(recomputed, attestation.version))
}

// ════════════════════════════════════════════════════════════════════════════
// VALIDATOR
// ════════════════════════════════════════════════════════════════════════════

/// Per-dataset validator: authority key, tree height and leaf policy are
/// fixed when the ledger account is created.
pub struct UpdateValidator {
    authority: AuthorityPublicKey,
    height: u8,
    policy: Box<dyn LeafPolicy>,
}

impl std::fmt::Debug for UpdateValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateValidator")
            .field("authority", &self.authority)
            .field("height", &self.height)
            .field("policy", &self.policy.name())
            .finish()
    }
}

impl UpdateValidator {
    pub fn new(authority: AuthorityPublicKey, height: u8, policy: Box<dyn LeafPolicy>) -> Self {
        Self {
            authority,
            height,
            policy,
        }
    }

    pub fn authority(&self) -> &AuthorityPublicKey {
        &self.authority
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Shape and policy checks, then [`assert_root_update_valid`].
    pub fn validate(
        &self,
        current: &CommitmentRecord,
        updates: &[Update],
        attestation: Attestation,
    ) -> Result<CommitmentRecord, ValidationError> {
        let expected = self.height as usize;
        for (position, update) in updates.iter().enumerate() {
            let found = update.witness.height();
            if found != expected {
                return Err(ValidationError::MalformedWitness {
                    position,
                    expected,
                    found,
                });
            }
            if let Err(reason) = self.policy.check(update) {
                return Err(ValidationError::PolicyViolation {
                    position,
                    index: update.index(),
                    reason,
                });
            }
        }

        let result = assert_root_update_valid(&self.authority, current, updates, attestation);
        if let Err(e) = &result {
            debug!("transition from {} rejected: {}", current, e);
        }
        result
    }
}
