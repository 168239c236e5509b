//! In-memory blob store and registry.
//!
//! Backs the fs5 test suites and serves as the smallest possible reference
//! for what the engine expects from its remote services: content-addressed
//! blob storage and a registry that verifies signatures and enforces strict
//! revision monotonicity.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use fs5_core::registry::Entry;
use fs5_core::{BlobApi, BlobId, DefaultCrypto, FsError, Hash, PublicKeyEd25519, RegistryApi};

/// Content-addressed blob storage in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: DashMap<Hash, Bytes>,
}

impl MemoryBlobs {
    /// Creates a new, empty `MemoryBlobs`.
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }

    /// Number of distinct blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobApi for MemoryBlobs {
    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobId, FsError> {
        let hash = Hash::new(&bytes);
        let size = bytes.len() as u64;
        self.blobs.insert(hash, bytes);
        Ok(BlobId::new(hash, size))
    }

    async fn download_blob(&self, hash: &Hash) -> Result<Bytes, FsError> {
        self.blobs
            .get(hash)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FsError::NotFound(format!("blob {}", hash.fmt_short())))
    }
}

/// Signed-record registry in a concurrent map.
///
/// Entries must carry a valid signature and a revision strictly greater
/// than the stored one, mirroring the behavior of a real registry node.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: DashMap<PublicKeyEd25519, Entry>,
}

impl MemoryRegistry {
    /// Creates a new, empty `MemoryRegistry`.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl RegistryApi for MemoryRegistry {
    async fn registry_get(&self, pk: &PublicKeyEd25519) -> Result<Option<Entry>, FsError> {
        Ok(self.entries.get(pk).map(|entry| entry.value().clone()))
    }

    async fn registry_set(&self, entry: Entry) -> Result<(), FsError> {
        if !entry.verify(&DefaultCrypto) {
            return Err(FsError::SignatureInvalid);
        }
        let pk = entry.bare_public_key();
        // The entry-wise closure keeps check-and-set atomic per key.
        let mut conflict = false;
        self.entries
            .entry(pk)
            .and_modify(|existing| {
                if entry.revision > existing.revision {
                    *existing = entry.clone();
                } else {
                    conflict = true;
                }
            })
            .or_insert_with(|| entry.clone());
        if conflict {
            return Err(FsError::RevisionConflict);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs5_core::CryptoProvider;

    #[tokio::test]
    async fn blob_round_trip() {
        let blobs = MemoryBlobs::new();
        let id = blobs.upload_blob(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(id.size, 5);
        let bytes = blobs.download_blob(&id.hash).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let missing = blobs.download_blob(&Hash::new(b"absent")).await;
        assert!(matches!(missing, Err(FsError::NotFound(_))));
    }

    #[tokio::test]
    async fn registry_enforces_revisions() {
        let crypto = DefaultCrypto;
        let registry = MemoryRegistry::new();
        let (pk, sk) = crypto.new_keypair_ed25519(&[5u8; 32]);

        let first = Entry::signed(&crypto, &sk, &pk, 0, Bytes::from_static(b"a")).unwrap();
        registry.registry_set(first.clone()).await.unwrap();

        // Same revision is a conflict.
        let stale = Entry::signed(&crypto, &sk, &pk, 0, Bytes::from_static(b"b")).unwrap();
        assert!(matches!(
            registry.registry_set(stale).await,
            Err(FsError::RevisionConflict)
        ));

        let second = Entry::signed(&crypto, &sk, &pk, 1, Bytes::from_static(b"b")).unwrap();
        registry.registry_set(second.clone()).await.unwrap();
        let current = registry.registry_get(&pk).await.unwrap().unwrap();
        assert_eq!(current, second);
    }

    #[tokio::test]
    async fn registry_rejects_bad_signatures() {
        let crypto = DefaultCrypto;
        let registry = MemoryRegistry::new();
        let (pk, sk) = crypto.new_keypair_ed25519(&[5u8; 32]);
        let mut entry = Entry::signed(&crypto, &sk, &pk, 0, Bytes::from_static(b"a")).unwrap();
        entry.data = Bytes::from_static(b"tampered");
        assert!(matches!(
            registry.registry_set(entry).await,
            Err(FsError::SignatureInvalid)
        ));
    }
}
