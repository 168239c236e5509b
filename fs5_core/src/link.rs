//! Directory links: 33-byte tagged pointers to directory objects.

use crate::PublicKeyEd25519;
use crate::hash::{Hash, MULTIHASH_BLAKE3};

/// Algorithm tag prefixing an Ed25519 public key in serialized links and
/// registry records.
pub const MULTIKEY_ED25519: u8 = 0xed;

/// A pointer to a directory object.
///
/// Serialized as a 33-byte byte-string: a 1-byte algorithm tag followed by
/// either a Blake3 digest (immutable, content-addressed) or an Ed25519
/// public key (mutable, resolved through the registry).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DirLink {
    /// Immutable pointer to a serialized directory blob.
    FixedHashBlake3(Hash),
    /// Pointer to the registry entry whose current value is itself a
    /// serialized `DirLink` (typically the fixed-hash form).
    MutableRegistryEd25519(PublicKeyEd25519),
}

/// Errors produced when decoding a serialized link.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DirLinkError {
    #[error("input byte slice has an incorrect length")]
    InvalidLength,
    #[error("tag byte is unknown or invalid")]
    InvalidTag,
}

impl DirLink {
    pub const SERIALIZED_SIZE: usize = 33;

    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut bytes = [0u8; Self::SERIALIZED_SIZE];
        match self {
            DirLink::FixedHashBlake3(hash) => {
                bytes[0] = MULTIHASH_BLAKE3;
                bytes[1..].copy_from_slice(hash.as_bytes());
            }
            DirLink::MutableRegistryEd25519(pubkey) => {
                bytes[0] = MULTIKEY_ED25519;
                bytes[1..].copy_from_slice(pubkey);
            }
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<DirLink, DirLinkError> {
        if bytes.len() != Self::SERIALIZED_SIZE {
            return Err(DirLinkError::InvalidLength);
        }
        let mut raw = [0u8; 32];
        raw.copy_from_slice(&bytes[1..]);
        match bytes[0] {
            MULTIHASH_BLAKE3 => Ok(DirLink::FixedHashBlake3(Hash::from_bytes(raw))),
            MULTIKEY_ED25519 => Ok(DirLink::MutableRegistryEd25519(raw)),
            _ => Err(DirLinkError::InvalidTag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_link_round_trip() {
        let link = DirLink::FixedHashBlake3(Hash::new(b"dir"));
        let bytes = link.to_bytes();
        assert_eq!(bytes[0], 0x1e);
        assert_eq!(DirLink::from_bytes(&bytes).unwrap(), link);
    }

    #[test]
    fn mutable_link_round_trip() {
        let link = DirLink::MutableRegistryEd25519([7u8; 32]);
        let bytes = link.to_bytes();
        assert_eq!(bytes[0], 0xed);
        assert_eq!(DirLink::from_bytes(&bytes).unwrap(), link);
    }

    #[test]
    fn rejects_malformed() {
        assert_eq!(
            DirLink::from_bytes(&[0x1e; 32]),
            Err(DirLinkError::InvalidLength)
        );
        assert_eq!(
            DirLink::from_bytes(&[0u8; 33]),
            Err(DirLinkError::InvalidTag)
        );
    }
}
