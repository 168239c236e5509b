//! Content hashes.
//!
//! Every blob and directory snapshot is addressed by its Blake3-256
//! digest. The bare 32 digest bytes key the blob service; links, file
//! records and index nodes embed the *tagged* form, a 1-byte
//! multihash-style algorithm tag followed by the digest.

use std::fmt;

/// Multihash-style type tag for Blake3-256, the first byte of every
/// tagged hash and fixed-hash link.
pub const MULTIHASH_BLAKE3: u8 = 0x1e;

/// Length of the tagged form (`0x1e ‖ digest`).
pub const TAGGED_HASH_SIZE: usize = 33;

/// A Blake3-256 content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; 32]);

/// Errors produced when decoding the 33-byte tagged hash form.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TaggedHashError {
    #[error("invalid tagged hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown hash type tag: 0x{0:02x}")]
    UnknownTag(u8),
}

impl Hash {
    /// Hashes `data` with Blake3-256.
    pub fn new(data: impl AsRef<[u8]>) -> Self {
        Self(*blake3::hash(data.as_ref()).as_bytes())
    }

    /// Wraps an existing digest.
    pub const fn from_bytes(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The bare digest, as the blob service keys it.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The 33-byte tagged form (`0x1e ‖ digest`) embedded in links,
    /// serialized file references and index nodes.
    pub fn to_tagged(&self) -> [u8; TAGGED_HASH_SIZE] {
        let mut bytes = [0u8; TAGGED_HASH_SIZE];
        bytes[0] = MULTIHASH_BLAKE3;
        bytes[1..].copy_from_slice(&self.0);
        bytes
    }

    /// Parses the tagged form back into a `Hash`, rejecting wrong lengths
    /// and unknown algorithm tags.
    pub fn from_tagged(bytes: &[u8]) -> Result<Self, TaggedHashError> {
        if bytes.len() != TAGGED_HASH_SIZE {
            return Err(TaggedHashError::InvalidLength {
                expected: TAGGED_HASH_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != MULTIHASH_BLAKE3 {
            return Err(TaggedHashError::UnknownTag(bytes[0]));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[1..]);
        Ok(Self(digest))
    }

    /// First five digest bytes in hex, for log lines and summaries.
    pub fn fmt_short(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0[..5])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}…)", self.fmt_short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_round_trip() {
        let hash = Hash::new(b"fs5");
        let tagged = hash.to_tagged();
        assert_eq!(tagged[0], MULTIHASH_BLAKE3);
        assert_eq!(&tagged[1..], hash.as_bytes());
        assert_eq!(Hash::from_tagged(&tagged).unwrap(), hash);
    }

    #[test]
    fn tagged_rejects_bad_input() {
        let hash = Hash::new(b"fs5");
        let mut tagged = hash.to_tagged();
        tagged[0] = 0x12;
        assert_eq!(
            Hash::from_tagged(&tagged),
            Err(TaggedHashError::UnknownTag(0x12))
        );
        assert_eq!(
            Hash::from_tagged(&tagged[..32]),
            Err(TaggedHashError::InvalidLength {
                expected: 33,
                actual: 32
            })
        );
    }

    #[test]
    fn display_is_hex_and_debug_is_short() {
        let hash = Hash::from_bytes([0xab; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
        assert_eq!(format!("{hash:?}"), "Hash(ababababab…)");
    }
}
