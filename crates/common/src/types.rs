//! Core value types: 32-byte hashes, field-sized scalars, dataset identities
//! and the `(root, version)` commitment record.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Leaf position inside a tree of fixed height.
pub type LeafIndex = u64;

/// Strictly increasing sequence number of accepted snapshots.
pub type Version = u64;

/// Ordered scalars stored at one leaf.
pub type LeafValue = Vec<Scalar>;

/// Maximum length of a dataset identity string.
pub const MAX_IDENTITY_LEN: usize = 128;

// ════════════════════════════════════════════════════════════════════════════
// PARSE ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid scalar: {0}")]
    InvalidScalar(String),

    #[error("scalar exceeds 256 bits")]
    ScalarOverflow,

    #[error("invalid dataset identity: {0}")]
    InvalidIdentity(String),
}

// ════════════════════════════════════════════════════════════════════════════
// HASH32
// ════════════════════════════════════════════════════════════════════════════

/// SHA3-256 digest. Text form is 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32([u8; 32]);

impl Hash32 {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let raw = hex::decode(s).map_err(|e| ParseError::InvalidHash(e.to_string()))?;
        if raw.len() != 32 {
            return Err(ParseError::InvalidHash(format!(
                "expected 32 bytes, found {}",
                raw.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&raw);
        Ok(Self(out))
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> String {
        let h = self.to_hex();
        h.get(0..12).unwrap_or(&h).to_string()
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.short())
    }
}

impl FromStr for Hash32 {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SCALAR
// ════════════════════════════════════════════════════════════════════════════

/// Unsigned field-sized integer (< 2^256), big-endian.
///
/// Always rendered as a decimal string on the wire so that values above
/// 2^53 survive JSON consumers that parse numbers as doubles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Scalar([u8; 32]);

impl Scalar {
    pub const ZERO: Scalar = Scalar([0u8; 32]);

    pub fn from_u64(v: u64) -> Self {
        let mut out = [0u8; 32];
        out[24..].copy_from_slice(&v.to_be_bytes());
        Self(out)
    }

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    pub fn from_biguint(n: &BigUint) -> Result<Self, ParseError> {
        let raw = n.to_bytes_be();
        if raw.len() > 32 {
            return Err(ParseError::ScalarOverflow);
        }
        let mut out = [0u8; 32];
        out[32 - raw.len()..].copy_from_slice(&raw);
        Ok(Self(out))
    }

    /// `self + rhs`, or `None` when the sum leaves the 256-bit range.
    pub fn checked_add_u64(&self, rhs: u64) -> Option<Scalar> {
        let sum = self.to_biguint() + BigUint::from(rhs);
        Self::from_biguint(&sum).ok()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_biguint())
    }
}

impl fmt::Debug for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scalar({})", self)
    }
}

impl FromStr for Scalar {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidScalar(s.to_string()));
        }
        let n = BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| ParseError::InvalidScalar(s.to_string()))?;
        Self::from_biguint(&n)
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Self::from_u64(v)
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// DATASET IDENTITY
// ════════════════════════════════════════════════════════════════════════════

/// Opaque namespace key (the ledger account address in practice).
///
/// Accepts 1..=128 ASCII alphanumeric characters, which covers base58 and
/// hex encoded addresses.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ParseError> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > MAX_IDENTITY_LEN {
            return Err(ParseError::InvalidIdentity(format!(
                "length {} outside 1..={}",
                raw.len(),
                MAX_IDENTITY_LEN
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ParseError::InvalidIdentity(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DatasetId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DatasetId> for String {
    fn from(id: DatasetId) -> Self {
        id.0
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMMITMENT RECORD
// ════════════════════════════════════════════════════════════════════════════

/// `(root, version)` pair held by the ledger for one dataset identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub root: Hash32,
    pub version: Version,
}

impl CommitmentRecord {
    pub fn new(root: Hash32, version: Version) -> Self {
        Self { root, version }
    }
}

impl fmt::Display for CommitmentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(root={}, version={})", self.root.short(), self.version)
    }
}
