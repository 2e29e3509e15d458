//! # Fixed-Height Merkle Commitment Tree
//!
//! Sparse binary Merkle tree over leaf hashes. Height `h` gives `2^(h-1)`
//! leaves and `h-1` sibling levels between a leaf and the root.
//!
//! ## Algorithm
//!
//! - Leaf: `SHA3-256(0x00 || u32_be(len) || scalar_0 || scalar_1 || ...)`
//! - Parent: `SHA3-256(0x01 || left || right)`
//! - Empty leaf: `SHA3-256(0x02 || "ocs.empty-leaf")`
//! - Unset subtrees take the precomputed all-empty hash for their level
//!
//! The three domain tags keep the empty-leaf sentinel out of the range of
//! both leaf and parent hashing, so a present leaf can never be mistaken
//! for an absent one.
//!
//! ## Determinism
//!
//! The root is a pure function of `(height, {(index, leaf_hash)})`.
//! Insertion order does not matter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::types::{Hash32, LeafIndex, Scalar};

/// Largest height the tree accepts (`2^63` leaves).
pub const MAX_TREE_HEIGHT: u8 = 64;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const EMPTY_TAG: u8 = 0x02;
const EMPTY_LEAF_LABEL: &[u8] = b"ocs.empty-leaf";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    #[error("invalid tree height {height}: must be within 1..={max}")]
    InvalidHeight { height: u8, max: u8 },

    #[error("leaf index {index} out of range for height {height} (capacity {capacity})")]
    IndexOutOfRange {
        index: LeafIndex,
        height: u8,
        capacity: u64,
    },
}

// ════════════════════════════════════════════════════════════════════════════
// HASHING
// ════════════════════════════════════════════════════════════════════════════

fn finalize(hasher: Sha3_256) -> Hash32 {
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Hash32::new(out)
}

/// Hash of a present leaf.
#[must_use]
pub fn hash_leaf(value: &[Scalar]) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update([LEAF_TAG]);
    hasher.update((value.len() as u32).to_be_bytes());
    for scalar in value {
        hasher.update(scalar.to_be_bytes());
    }
    finalize(hasher)
}

/// Hash of an interior node.
#[must_use]
pub fn hash_node(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    finalize(hasher)
}

/// Sentinel hash of an absent leaf.
#[must_use]
pub fn empty_leaf_hash() -> Hash32 {
    let mut hasher = Sha3_256::new();
    hasher.update([EMPTY_TAG]);
    hasher.update(EMPTY_LEAF_LABEL);
    finalize(hasher)
}

/// `empty_leaf_hash()` when `is_empty`, otherwise `hash_leaf(value)`.
///
/// `value` is ignored for empty leaves.
#[must_use]
pub fn leaf_hash_or_empty(value: &[Scalar], is_empty: bool) -> Hash32 {
    if is_empty {
        empty_leaf_hash()
    } else {
        hash_leaf(value)
    }
}

fn check_height(height: u8) -> Result<(), MerkleError> {
    if height == 0 || height > MAX_TREE_HEIGHT {
        return Err(MerkleError::InvalidHeight {
            height,
            max: MAX_TREE_HEIGHT,
        });
    }
    Ok(())
}

/// Number of leaves in a tree of `height`: `2^(height-1)`.
pub fn leaf_capacity(height: u8) -> Result<u64, MerkleError> {
    check_height(height)?;
    Ok(1u64 << (height - 1))
}

/// All-empty hash per level, index 0 being the leaf level.
fn zero_hashes(height: u8) -> Vec<Hash32> {
    let mut zeros = Vec::with_capacity(height as usize);
    let mut current = empty_leaf_hash();
    zeros.push(current);
    for _ in 1..height {
        current = hash_node(&current, &current);
        zeros.push(current);
    }
    zeros
}

/// Root of a tree with no leaves set.
pub fn empty_root(height: u8) -> Result<Hash32, MerkleError> {
    check_height(height)?;
    let zeros = zero_hashes(height);
    Ok(zeros[zeros.len() - 1])
}

// ════════════════════════════════════════════════════════════════════════════
// WITNESS
// ════════════════════════════════════════════════════════════════════════════

/// One step of a witness path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessNode {
    pub sibling: Hash32,
    /// `true` when the sibling sits to the left of the path node.
    pub sibling_is_left: bool,
}

/// Sibling path from a leaf to the root, leaf level first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleWitness {
    pub path: Vec<WitnessNode>,
}

impl MerkleWitness {
    pub fn new(path: Vec<WitnessNode>) -> Self {
        Self { path }
    }

    /// Height of the tree this witness was taken from.
    pub fn height(&self) -> usize {
        self.path.len() + 1
    }

    /// Leaf index encoded by the positional bits.
    pub fn index(&self) -> LeafIndex {
        self.path
            .iter()
            .enumerate()
            .fold(0u64, |acc, (level, node)| {
                if node.sibling_is_left {
                    acc | (1u64 << level)
                } else {
                    acc
                }
            })
    }

    /// Root produced by placing `leaf_hash` at this witness's position.
    ///
    /// Pure function of `(self, leaf_hash)`; no tree is consulted.
    #[must_use]
    pub fn compute_root(&self, leaf_hash: &Hash32) -> Hash32 {
        self.path.iter().fold(*leaf_hash, |current, node| {
            if node.sibling_is_left {
                hash_node(&node.sibling, &current)
            } else {
                hash_node(&current, &node.sibling)
            }
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TREE
// ════════════════════════════════════════════════════════════════════════════

/// Sparse fixed-height Merkle tree.
///
/// Only touched nodes are stored; every other node resolves to the
/// all-empty hash of its level. `set_leaf` rehashes the single path
/// to the root, so the root is always current.
#[derive(Debug, Clone)]
pub struct MerkleCommitmentTree {
    height: u8,
    zeros: Vec<Hash32>,
    levels: Vec<HashMap<u64, Hash32>>,
}

impl MerkleCommitmentTree {
    pub fn new(height: u8) -> Result<Self, MerkleError> {
        check_height(height)?;
        Ok(Self {
            height,
            zeros: zero_hashes(height),
            levels: vec![HashMap::new(); height as usize],
        })
    }

    /// Builds a tree from `(index, leaf_hash)` pairs.
    pub fn from_leaves<I>(height: u8, leaves: I) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = (LeafIndex, Hash32)>,
    {
        let mut tree = Self::new(height)?;
        for (index, hash) in leaves {
            tree.set_leaf(index, hash)?;
        }
        Ok(tree)
    }

    pub fn height(&self) -> u8 {
        self.height
    }

    pub fn capacity(&self) -> u64 {
        1u64 << (self.height - 1)
    }

    fn check_index(&self, index: LeafIndex) -> Result<(), MerkleError> {
        let capacity = self.capacity();
        if index >= capacity {
            return Err(MerkleError::IndexOutOfRange {
                index,
                height: self.height,
                capacity,
            });
        }
        Ok(())
    }

    fn node(&self, level: usize, position: u64) -> Hash32 {
        self.levels[level]
            .get(&position)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    /// Overwrites the leaf hash at `index` and rehashes its path.
    pub fn set_leaf(&mut self, index: LeafIndex, hash: Hash32) -> Result<(), MerkleError> {
        self.check_index(index)?;

        let mut position = index;
        let mut current = hash;
        self.levels[0].insert(position, current);

        for level in 0..(self.height as usize - 1) {
            let sibling = self.node(level, position ^ 1);
            current = if position % 2 == 0 {
                hash_node(&current, &sibling)
            } else {
                hash_node(&sibling, &current)
            };
            position >>= 1;
            self.levels[level + 1].insert(position, current);
        }
        Ok(())
    }

    /// Leaf hash at `index`; the empty sentinel when unset.
    pub fn get_leaf(&self, index: LeafIndex) -> Result<Hash32, MerkleError> {
        self.check_index(index)?;
        Ok(self.node(0, index))
    }

    pub fn get_root(&self) -> Hash32 {
        self.node(self.height as usize - 1, 0)
    }

    /// Sibling path for `index` at the tree's current state.
    pub fn get_witness(&self, index: LeafIndex) -> Result<MerkleWitness, MerkleError> {
        self.check_index(index)?;

        let mut path = Vec::with_capacity(self.height as usize - 1);
        let mut position = index;
        for level in 0..(self.height as usize - 1) {
            let is_right = position % 2 == 1;
            path.push(WitnessNode {
                sibling: self.node(level, position ^ 1),
                sibling_is_left: is_right,
            });
            position >>= 1;
        }
        Ok(MerkleWitness::new(path))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
