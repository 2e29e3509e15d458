//! Records describing a claimed state transition.
//!
//! A client builds one [`Update`] per leaf edit, pairs the batch with the
//! authority's [`Attestation`], and submits the resulting [`UpdateProof`]
//! to the ledger, which runs the validator against its own record.

use serde::{Deserialize, Serialize};

use crate::crypto::AttestationSignature;
use crate::merkle::{leaf_hash_or_empty, MerkleWitness};
use crate::types::{CommitmentRecord, Hash32, LeafIndex, LeafValue, Version};

/// One leaf edit with the witness taken from the pre-edit tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub old_leaf: LeafValue,
    pub old_leaf_is_empty: bool,
    pub new_leaf: LeafValue,
    pub new_leaf_is_empty: bool,
    pub witness: MerkleWitness,
}

impl Update {
    pub fn old_leaf_hash(&self) -> Hash32 {
        leaf_hash_or_empty(&self.old_leaf, self.old_leaf_is_empty)
    }

    pub fn new_leaf_hash(&self) -> Hash32 {
        leaf_hash_or_empty(&self.new_leaf, self.new_leaf_is_empty)
    }

    /// Leaf index this update targets, read from the witness bits.
    pub fn index(&self) -> LeafIndex {
        self.witness.index()
    }
}

/// The authority's signed claim, bound to the root the client expects.
///
/// Not `Clone`; see [`AttestationSignature`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Attestation {
    pub root: Hash32,
    pub version: Version,
    pub signature: AttestationSignature,
}

/// Everything the ledger needs to accept a transition.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateProof {
    /// Commitment the client built its witnesses against.
    pub old: CommitmentRecord,
    pub updates: Vec<Update>,
    pub attestation: Attestation,
}
