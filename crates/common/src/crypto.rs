//! Attestation crypto: the authority's Ed25519 signing key, its base58
//! public key, and signatures over `(root, version)`.
//!
//! Signed message:
//!   `"ocs.attestation.v1" || root (32 bytes) || u64_be(version)`
//!
//! Wire form of a signature is two decimal scalars (`R`, `s`), the same
//! shape as the field-list signatures the ledger side consumes.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::{Hash32, Scalar, Version};

/// Domain tag prefixed to every attestation message.
pub const ATTESTATION_DOMAIN: &[u8] = b"ocs.attestation.v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, found {found}")]
    InvalidKeyLength { expected: usize, found: usize },

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("base58 decode error: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Bytes covered by an attestation signature.
pub fn attestation_message(root: &Hash32, version: Version) -> Vec<u8> {
    let mut msg = Vec::with_capacity(ATTESTATION_DOMAIN.len() + 32 + 8);
    msg.extend_from_slice(ATTESTATION_DOMAIN);
    msg.extend_from_slice(root.as_bytes());
    msg.extend_from_slice(&version.to_be_bytes());
    msg
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNING KEY
// ════════════════════════════════════════════════════════════════════════════

/// The storage authority's signing key.
///
/// Secret bytes never appear in `Debug` output.
pub struct AuthorityKeypair {
    signing_key: SigningKey,
}

impl AuthorityKeypair {
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                found: bytes.len(),
            });
        }
        let mut sk = [0u8; 32];
        sk.copy_from_slice(bytes);
        Ok(Self {
            signing_key: SigningKey::from_bytes(&sk),
        })
    }

    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(s)?;
        Self::from_secret_bytes(&raw)
    }

    /// Hex form of the 32-byte secret, for the persisted state document only.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key(&self) -> AuthorityPublicKey {
        AuthorityPublicKey(self.signing_key.verifying_key())
    }

    pub fn sign_attestation(&self, root: &Hash32, version: Version) -> AttestationSignature {
        let sig = self.signing_key.sign(&attestation_message(root, version));
        AttestationSignature(sig.to_bytes())
    }
}

impl fmt::Debug for AuthorityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityKeypair")
            .field("public_key", &self.public_key().to_base58())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PUBLIC KEY
// ════════════════════════════════════════════════════════════════════════════

/// Ed25519 verifying key; text form is base58.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AuthorityPublicKey(VerifyingKey);

impl AuthorityPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                found: bytes.len(),
            });
        }
        let mut pk = [0u8; 32];
        pk.copy_from_slice(bytes);
        let vk = VerifyingKey::from_bytes(&pk).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(vk))
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0.to_bytes()).into_string()
    }

    pub fn from_base58(s: &str) -> Result<Self, CryptoError> {
        let raw = bs58::decode(s).into_vec()?;
        Self::from_bytes(&raw)
    }

    /// Strict Ed25519 check of `signature` over `(root, version)`.
    pub fn verify_attestation(
        &self,
        root: &Hash32,
        version: Version,
        signature: &AttestationSignature,
    ) -> bool {
        let sig = Signature::from_bytes(&signature.0);
        self.0
            .verify_strict(&attestation_message(root, version), &sig)
            .is_ok()
    }
}

impl fmt::Display for AuthorityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for AuthorityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorityPublicKey({})", self.to_base58())
    }
}

impl FromStr for AuthorityPublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for AuthorityPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for AuthorityPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(serde::de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNATURE
// ════════════════════════════════════════════════════════════════════════════

/// Authority signature over `(root, version)`.
///
/// Deliberately not `Clone`: an attestation is consumed once by the
/// validator. Tests that need a replay rebuild it from bytes.
#[derive(PartialEq, Eq)]
pub struct AttestationSignature([u8; 64]);

impl AttestationSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0
    }

    /// `[R, s]` as big-endian scalars.
    pub fn to_scalars(&self) -> [Scalar; 2] {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&self.0[..32]);
        s.copy_from_slice(&self.0[32..]);
        [Scalar::from_be_bytes(r), Scalar::from_be_bytes(s)]
    }

    pub fn from_scalars(parts: &[Scalar]) -> Result<Self, CryptoError> {
        if parts.len() != 2 {
            return Err(CryptoError::InvalidSignature(format!(
                "expected 2 scalars, found {}",
                parts.len()
            )));
        }
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&parts[0].to_be_bytes());
        out[32..].copy_from_slice(&parts[1].to_be_bytes());
        Ok(Self(out))
    }
}

impl fmt::Debug for AttestationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(f, "AttestationSignature({}…)", h.get(0..16).unwrap_or(&h))
    }
}

impl Serialize for AttestationSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_scalars().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttestationSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parts = Vec::<Scalar>::deserialize(deserializer)?;
        Self::from_scalars(&parts).map_err(serde::de::Error::custom)
    }
}
