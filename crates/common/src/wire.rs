//! JSON bodies of the storage authority HTTP surface.
//!
//! | Endpoint | Method | Body / Query | Response |
//! |----------|--------|--------------|----------|
//! | `/data` | POST | [`StoreRequest`] | [`StoreResponse`] |
//! | `/data` | GET | [`FetchQuery`] | [`FetchResponse`] |
//! | `/publicKey` | GET | - | [`PublicKeyResponse`] |
//!
//! Scalars and versions travel as decimal strings.

use serde::{Deserialize, Serialize};

use crate::crypto::{AttestationSignature, AuthorityPublicKey};
use crate::types::{DatasetId, Hash32, LeafIndex, LeafValue, Version};

/// `[index, [scalar, ...]]`
pub type WireItem = (LeafIndex, LeafValue);

pub const ERR_HEIGHT_MISMATCH: &str = "HeightMismatch";
pub const ERR_HEIGHT_OUT_OF_RANGE: &str = "HeightOutOfRange";
pub const ERR_TOO_MANY_ITEMS: &str = "TooManyItems";
pub const ERR_INDEX_OUT_OF_RANGE: &str = "IndexOutOfRange";
pub const ERR_DUPLICATE_INDEX: &str = "DuplicateIndex";
pub const ERR_UNKNOWN_ROOT: &str = "UnknownRoot";
pub const ERR_BAD_REQUEST: &str = "BadRequest";
pub const ERR_INTERNAL: &str = "Internal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    pub identity: DatasetId,
    pub height: u8,
    pub items: Vec<WireItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    #[serde(with = "decimal_u64")]
    pub version: Version,
    pub signature: AttestationSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchQuery {
    pub identity: DatasetId,
    pub root: Hash32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub items: Vec<WireItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    #[serde(rename = "publicKey")]
    pub public_key: AuthorityPublicKey,
}

/// `{ "error": { "code": .., "message": .. } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// `u64` as a decimal JSON string.
pub mod decimal_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>().map_err(serde::de::Error::custom)
    }
}
