//! Client-side registry adapter: verify-on-read, sign-on-write, and
//! serialization of concurrent writes per public key.

use bytes::Bytes;
use dashmap::DashMap;
use fs5_core::registry::Entry;
use fs5_core::{CryptoProvider, DirLink, FsError, FsResult, PublicKeyEd25519, RegistryApi};
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) struct RegistryAdapter {
    service: Arc<dyn RegistryApi>,
    crypto: Arc<dyn CryptoProvider>,
    /// One lock per public key: the client keeps at most one signed write
    /// in flight per key at a time.
    write_locks: DashMap<PublicKeyEd25519, Arc<Mutex<()>>>,
}

impl RegistryAdapter {
    pub fn new(service: Arc<dyn RegistryApi>, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            service,
            crypto,
            write_locks: DashMap::new(),
        }
    }

    /// Fetches the latest entry for a key and verifies its signature.
    pub async fn get_verified(&self, pk: &PublicKeyEd25519) -> FsResult<Option<Entry>> {
        let Some(entry) = self.service.registry_get(pk).await? else {
            return Ok(None);
        };
        if entry.bare_public_key() != *pk || !entry.verify(self.crypto.as_ref()) {
            return Err(FsError::SignatureInvalid);
        }
        Ok(Some(entry))
    }

    /// Resolves the directory link a key currently points at, along with
    /// the entry's revision.
    pub async fn get_link(&self, pk: &PublicKeyEd25519) -> FsResult<Option<(DirLink, u64)>> {
        let Some(entry) = self.get_verified(pk).await? else {
            return Ok(None);
        };
        let link = DirLink::from_bytes(&entry.data)
            .map_err(|e| FsError::InvalidDirectory(format!("registry entry payload: {e}")))?;
        Ok(Some((link, entry.revision)))
    }

    /// Signs `(revision ‖ data)` and submits the record. The service
    /// rejects revisions not strictly greater than the stored one with
    /// [`FsError::RevisionConflict`], which the caller's CAS loop absorbs.
    pub async fn set_signed(
        &self,
        public_key: &PublicKeyEd25519,
        secret_key: &[u8; 64],
        revision: u64,
        data: Bytes,
    ) -> FsResult<()> {
        let lock = Arc::clone(
            self.write_locks
                .entry(*public_key)
                .or_default()
                .value(),
        );
        let _guard = lock.lock().await;
        let entry = Entry::signed(self.crypto.as_ref(), secret_key, public_key, revision, data)
            .map_err(|e| FsError::InvalidDirectory(format!("registry entry: {e}")))?;
        self.service.registry_set(entry).await
    }
}
