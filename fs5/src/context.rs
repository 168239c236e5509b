//! Wiring between the filesystem engine and the services it consumes.

use crate::hamt::HashFunction;
use crate::{DEMOTION_THRESHOLD, INLINE_MAX, PROMOTION_THRESHOLD};
use fs5_core::{BlobApi, CryptoProvider, DefaultCrypto, RegistryApi};
use std::sync::Arc;
use std::time::Duration;

/// The remote services and crypto capability a filesystem instance runs
/// against.
#[derive(Clone)]
pub struct FsContext {
    pub blobs: Arc<dyn BlobApi>,
    pub registry: Arc<dyn RegistryApi>,
    pub crypto: Arc<dyn CryptoProvider>,
}

impl FsContext {
    /// Creates a context over the given services with the in-process
    /// crypto implementation.
    pub fn new(blobs: Arc<dyn BlobApi>, registry: Arc<dyn RegistryApi>) -> Self {
        Self {
            blobs,
            registry,
            crypto: Arc::new(DefaultCrypto),
        }
    }

    /// Replaces the crypto capability, e.g. to delegate to a host runtime.
    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }
}

/// Tunables for one filesystem instance.
#[derive(Clone, Debug)]
pub struct FsConfig {
    /// Maximum registry writes attempted per mutation before giving up
    /// with `Conflict`.
    pub max_cas_attempts: u32,
    /// First retry delay after a revision conflict; doubles per attempt.
    pub cas_backoff_initial: Duration,
    /// Upper bound on the retry delay.
    pub cas_backoff_cap: Duration,
    /// Default deadline for read operations.
    pub read_timeout: Duration,
    /// Default deadline for write operations.
    pub write_timeout: Duration,
    /// Content at or below this size is stored inline in file metadata.
    pub inline_max: usize,
    /// Inline entry count above which a directory promotes to the HAMT
    /// layout.
    pub promotion_threshold: usize,
    /// Indexed entry count below which a directory demotes back inline.
    pub demotion_threshold: usize,
    /// Hash function recorded in newly created HAMT roots.
    pub hash_function: HashFunction,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 8,
            cas_backoff_initial: Duration::from_millis(50),
            cas_backoff_cap: Duration::from_secs(2),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(60),
            inline_max: INLINE_MAX,
            promotion_threshold: PROMOTION_THRESHOLD,
            demotion_threshold: DEMOTION_THRESHOLD,
            hash_function: HashFunction::Xxh64,
        }
    }
}
