//! Signed registry records and the registry service trait.
//!
//! A registry entry is a small mutable record keyed by Ed25519 public key.
//! The service keeps only the entry with the highest revision for a key and
//! rejects updates whose revision is not strictly greater than the stored
//! one, which is the foundation of the client's compare-and-swap loop.
//!
//! ## Wire Format Summary
//!
//! | Field | Size (bytes) | Description |
//! |---|---|---|
//! | Public Key | 33 | `0xed` ‖ Ed25519 public key |
//! | Revision | 8 | Big-endian `u64` |
//! | Signature | 64 | Ed25519 signature over `revision_be8 ‖ data` |
//! | Data | Variable | Opaque payload (here: a serialized `DirLink`) |

use crate::PublicKeyEd25519;
use crate::crypto::CryptoProvider;
use crate::error::FsError;
use crate::link::MULTIKEY_ED25519;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the tagged public key in a serialized entry.
pub const ENTRY_PUBLIC_KEY_SIZE: usize = 33;

/// Size of an Ed25519 signature in bytes.
pub const ENTRY_SIGNATURE_SIZE: usize = 64;

/// Maximum allowed payload size for an entry. Registry records are meant to
/// stay small enough for cheap replication; directory pointers need 33
/// bytes.
pub const MAX_ENTRY_DATA_SIZE: usize = 1024;

/// A signed registry record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Tagged public key: `0xed ‖ ed25519_public_key`.
    pub public_key: [u8; ENTRY_PUBLIC_KEY_SIZE],

    /// Monotonically increasing revision number.
    pub revision: u64,

    /// Opaque payload.
    pub data: Bytes,

    /// Ed25519 signature over `revision_be8 ‖ data`.
    pub signature: [u8; ENTRY_SIGNATURE_SIZE],
}

/// Errors that can occur when constructing or decoding registry entries.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum EntryError {
    #[error("unknown public key algorithm tag: 0x{0:02x}")]
    UnknownKeyTag(u8),

    #[error("entry data too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },

    #[error("insufficient bytes for deserialization")]
    InsufficientBytes,
}

impl Entry {
    /// Creates an entry after validating key tag and payload size.
    ///
    /// Note: this function does not perform cryptographic verification.
    pub fn new(
        public_key: [u8; ENTRY_PUBLIC_KEY_SIZE],
        revision: u64,
        data: Bytes,
        signature: [u8; ENTRY_SIGNATURE_SIZE],
    ) -> Result<Self, EntryError> {
        if public_key[0] != MULTIKEY_ED25519 {
            return Err(EntryError::UnknownKeyTag(public_key[0]));
        }
        if data.len() > MAX_ENTRY_DATA_SIZE {
            return Err(EntryError::DataTooLarge {
                size: data.len(),
                max: MAX_ENTRY_DATA_SIZE,
            });
        }
        Ok(Self {
            public_key,
            revision,
            data,
            signature,
        })
    }

    /// Creates and signs an entry with the given keypair.
    pub fn signed(
        crypto: &dyn CryptoProvider,
        secret_key: &[u8; 64],
        public_key: &PublicKeyEd25519,
        revision: u64,
        data: Bytes,
    ) -> Result<Self, EntryError> {
        let signature = crypto.sign_ed25519(secret_key, &Self::signed_message(revision, &data));
        let mut tagged = [0u8; ENTRY_PUBLIC_KEY_SIZE];
        tagged[0] = MULTIKEY_ED25519;
        tagged[1..].copy_from_slice(public_key);
        Self::new(tagged, revision, data, signature)
    }

    /// The message bytes covered by the signature: `revision_be8 ‖ data`.
    pub fn signed_message(revision: u64, data: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(8 + data.len());
        msg.extend_from_slice(&revision.to_be_bytes());
        msg.extend_from_slice(data);
        msg
    }

    /// The bare Ed25519 public key (without the algorithm tag).
    pub fn bare_public_key(&self) -> PublicKeyEd25519 {
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&self.public_key[1..]);
        pk
    }

    /// Verifies the entry's signature against its public key.
    pub fn verify(&self, crypto: &dyn CryptoProvider) -> bool {
        crypto.verify_ed25519(
            &self.bare_public_key(),
            &Self::signed_message(self.revision, &self.data),
            &self.signature,
        )
    }

    /// Serializes the entry for wire transport.
    ///
    /// The fixed-length signature precedes the variable-length data so no
    /// length prefix is needed.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            ENTRY_PUBLIC_KEY_SIZE + 8 + ENTRY_SIGNATURE_SIZE + self.data.len(),
        );
        buf.put_slice(&self.public_key);
        buf.put_u64(self.revision);
        buf.put_slice(&self.signature);
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Deserializes an entry from wire format.
    pub fn deserialize(mut bytes: Bytes) -> Result<Self, EntryError> {
        if bytes.remaining() < ENTRY_PUBLIC_KEY_SIZE + 8 + ENTRY_SIGNATURE_SIZE {
            return Err(EntryError::InsufficientBytes);
        }
        let mut public_key = [0u8; ENTRY_PUBLIC_KEY_SIZE];
        bytes.copy_to_slice(&mut public_key);
        let revision = bytes.get_u64();
        let mut signature = [0u8; ENTRY_SIGNATURE_SIZE];
        bytes.copy_to_slice(&mut signature);
        let data = bytes.copy_to_bytes(bytes.remaining());
        Self::new(public_key, revision, data, signature)
    }
}

/// The mutable registry service consumed by the filesystem engine.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Retrieves the latest entry for a public key, or `None` if the key has
    /// never been written.
    async fn registry_get(&self, pk: &PublicKeyEd25519) -> Result<Option<Entry>, FsError>;

    /// Publishes a new version of an entry. The service rejects updates
    /// whose revision is not strictly greater than the stored one with
    /// [`FsError::RevisionConflict`].
    async fn registry_set(&self, entry: Entry) -> Result<(), FsError>;
}
