//! Blob identifiers, location hints and the blob service trait.

use crate::error::FsError;
use crate::hash::Hash;
use crate::msgpack::Value;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

/// Identifies a blob by content hash and size.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlobId {
    pub hash: Hash,
    pub size: u64,
}

impl BlobId {
    pub fn new(hash: Hash, size: u64) -> Self {
        Self { hash, size }
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.hash.fmt_short(), self.size)
    }
}

/// Describes where and how a blob's content can be retrieved without going
/// through the blob service.
///
/// Encoded as a small map `{0: variant_id, 1: payload}` so decoders can skip
/// unknown variants.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BlobLocation {
    /// Raw bytes embedded directly in the location (small blobs).
    IdentityRawBinary(Bytes),
    /// The blob can be fetched from a URL.
    Http(String),
}

const LOCATION_IDENTITY: u64 = 0;
const LOCATION_HTTP: u64 = 1;

/// Errors produced when interpreting a decoded location value.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BlobLocationError {
    #[error("blob location is not a map")]
    NotAMap,
    #[error("blob location is missing variant id or payload")]
    MissingField,
    #[error("unknown blob location variant: {0}")]
    UnknownVariant(u64),
    #[error("blob location payload has the wrong type")]
    PayloadType,
}

impl BlobLocation {
    pub fn to_value(&self) -> Value {
        let (id, payload) = match self {
            BlobLocation::IdentityRawBinary(bytes) => {
                (LOCATION_IDENTITY, Value::Bin(bytes.clone()))
            }
            BlobLocation::Http(url) => (LOCATION_HTTP, Value::Str(url.clone())),
        };
        Value::Map(vec![
            (Value::Str("0".into()), Value::Uint(id)),
            (Value::Str("1".into()), payload),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, BlobLocationError> {
        let entries = value.as_map().ok_or(BlobLocationError::NotAMap)?;
        let mut id = None;
        let mut payload = None;
        for (k, v) in entries {
            match location_key(k) {
                Some(0) => id = v.as_uint(),
                Some(1) => payload = Some(v),
                _ => {}
            }
        }
        let id = id.ok_or(BlobLocationError::MissingField)?;
        let payload = payload.ok_or(BlobLocationError::MissingField)?;
        match id {
            LOCATION_IDENTITY => payload
                .as_bin()
                .map(|b| BlobLocation::IdentityRawBinary(b.clone()))
                .ok_or(BlobLocationError::PayloadType),
            LOCATION_HTTP => payload
                .as_str()
                .map(|s| BlobLocation::Http(s.to_owned()))
                .ok_or(BlobLocationError::PayloadType),
            other => Err(BlobLocationError::UnknownVariant(other)),
        }
    }
}

fn location_key(key: &Value) -> Option<u64> {
    match key {
        Value::Uint(n) => Some(*n),
        Value::Str(s) => s.parse().ok(),
        _ => None,
    }
}

/// The immutable blob service consumed by the filesystem engine.
///
/// Blobs are keyed by their bare Blake3 hash; the service deduplicates at
/// its own discretion.
#[async_trait]
pub trait BlobApi: Send + Sync {
    /// Stores a blob and returns its content identifier.
    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobId, FsError>;

    /// Fetches a blob by bare hash. The caller is responsible for verifying
    /// that the returned bytes hash to `hash`.
    async fn download_blob(&self, hash: &Hash) -> Result<Bytes, FsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_round_trip() {
        for loc in [
            BlobLocation::IdentityRawBinary(Bytes::from_static(b"inline")),
            BlobLocation::Http("https://example.com/blob".into()),
        ] {
            assert_eq!(BlobLocation::from_value(&loc.to_value()).unwrap(), loc);
        }
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let value = Value::Map(vec![
            (Value::Str("0".into()), Value::Uint(99)),
            (Value::Str("1".into()), Value::Str("?".into())),
        ]);
        assert_eq!(
            BlobLocation::from_value(&value),
            Err(BlobLocationError::UnknownVariant(99))
        );
    }
}
