//! Leaf transition policies.
//!
//! A policy constrains `old -> new` for each update independently of the
//! Merkle checks. The ledger account picks one at creation time.

use ocs_common::Update;

pub trait LeafPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err(reason)` when the edit is not admissible.
    fn check(&self, update: &Update) -> Result<(), String>;
}

/// Accepts any edit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyTransition;

impl LeafPolicy for AnyTransition {
    fn name(&self) -> &'static str {
        "any"
    }

    fn check(&self, _update: &Update) -> Result<(), String> {
        Ok(())
    }
}

/// Counter leaves: the new leaf is one scalar equal to old + 1, an empty
/// old leaf counting as 0. Deleting a counter is not allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IncrementByOne;

impl LeafPolicy for IncrementByOne {
    fn name(&self) -> &'static str {
        "increment-by-one"
    }

    fn check(&self, update: &Update) -> Result<(), String> {
        if update.new_leaf_is_empty {
            return Err("counter leaf cannot be cleared".to_string());
        }
        let new = match update.new_leaf.as_slice() {
            [v] => *v,
            other => return Err(format!("expected 1 scalar in new leaf, found {}", other.len())),
        };
        let old = if update.old_leaf_is_empty {
            ocs_common::Scalar::ZERO
        } else {
            match update.old_leaf.as_slice() {
                [v] => *v,
                other => {
                    return Err(format!("expected 1 scalar in old leaf, found {}", other.len()))
                }
            }
        };
        match old.checked_add_u64(1) {
            Some(expected) if expected == new => Ok(()),
            Some(expected) => Err(format!("expected {}, found {}", expected, new)),
            None => Err("counter overflow".to_string()),
        }
    }
}

/// Looks up a policy by its [`LeafPolicy::name`].
pub fn policy_by_name(name: &str) -> Option<Box<dyn LeafPolicy>> {
    match name {
        "any" => Some(Box::new(AnyTransition)),
        "increment-by-one" => Some(Box::new(IncrementByOne)),
        _ => None,
    }
}
