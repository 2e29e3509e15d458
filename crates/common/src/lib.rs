//! # OCS Common Crate
//!
//! Shared building blocks for the authenticated off-chain storage protocol.
//!
//! ## Modules
//! - `types`: hashes, scalars, dataset identities, commitment records
//! - `merkle`: fixed-height Merkle commitment tree and witnesses
//! - `crypto`: authority signing key and attestation signatures (Ed25519)
//! - `transition`: the update/attestation records handed to the validator
//! - `wire`: JSON request/response bodies of the authority HTTP surface
//! - `ledger`: read-side trait for the external commitment ledger
//! - `config`: authority configuration (TOML + environment overrides)
//!
//! ## Data Flow
//! ```text
//! ┌────────────┐  fetch/store   ┌──────────────────┐
//! │ SyncClient │───────────────▶│ StorageAuthority │
//! └─────┬──────┘                └────────┬─────────┘
//!       │ UpdateProof                    │ GC query
//!       ▼                                ▼
//! ┌────────────┐   validate     ┌──────────────────┐
//! │   Ledger   │───────────────▶│ UpdateValidator  │
//! └────────────┘                └──────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod merkle;
pub mod transition;
pub mod types;
pub mod wire;

pub use crypto::{AttestationSignature, AuthorityKeypair, AuthorityPublicKey, CryptoError};
pub use ledger::{LedgerQueryError, LedgerReader};
pub use merkle::{MerkleCommitmentTree, MerkleError, MerkleWitness, WitnessNode};
pub use transition::{Attestation, Update, UpdateProof};
pub use types::{CommitmentRecord, DatasetId, Hash32, LeafIndex, LeafValue, ParseError, Scalar, Version};
