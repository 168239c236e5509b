//! CAS behavior under registry contention.

use async_trait::async_trait;
use bytes::Bytes;
use fs5::{FS5, FsContext, FsError, ListOptions, PutOptions};
use fs5_core::registry::Entry;
use fs5_core::{FsError as CoreError, PublicKeyEd25519, RegistryApi};
use fs5_store_memory::{MemoryBlobs, MemoryRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Registry wrapper that fails a configured number of writes with
/// `RevisionConflict` before letting them through, counting every attempt.
struct FlakyRegistry {
    inner: MemoryRegistry,
    conflicts_left: AtomicU32,
    set_calls: AtomicU32,
}

impl FlakyRegistry {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: MemoryRegistry::new(),
            conflicts_left: AtomicU32::new(conflicts),
            set_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl RegistryApi for FlakyRegistry {
    async fn registry_get(&self, pk: &PublicKeyEd25519) -> Result<Option<Entry>, CoreError> {
        self.inner.registry_get(pk).await
    }

    async fn registry_set(&self, entry: Entry) -> Result<(), CoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let inject = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if inject {
            return Err(CoreError::RevisionConflict);
        }
        self.inner.registry_set(entry).await
    }
}

fn flaky_fs(conflicts: u32) -> (FS5, Arc<FlakyRegistry>) {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(FlakyRegistry::new(conflicts));
    let ctx = FsContext::new(blobs, registry.clone());
    (FS5::new(ctx, [9u8; 32]), registry)
}

#[tokio::test(start_paused = true)]
async fn converges_when_conflicts_stop_before_the_budget() {
    // Seven conflicts, then success on the eighth and final attempt.
    let (fs, registry) = flaky_fs(7);
    fs.put("x.txt", Bytes::from_static(b"x"), PutOptions::default())
        .await
        .unwrap();
    assert_eq!(registry.set_calls.load(Ordering::SeqCst), 8);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_the_attempt_budget() {
    let (fs, registry) = flaky_fs(u32::MAX);
    let err = fs
        .put("x.txt", Bytes::from_static(b"x"), PutOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Conflict { attempts: 8 }));
    // The engine never calls the registry more often than its budget.
    assert_eq!(registry.set_calls.load(Ordering::SeqCst), 8);
}

#[tokio::test]
async fn concurrent_writers_to_one_directory_both_win() {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let root_key = [11u8; 32];

    // Two independent clients sharing the same remote services.
    let fs1 = FS5::new(FsContext::new(blobs.clone(), registry.clone()), root_key);
    let fs2 = FS5::new(FsContext::new(blobs.clone(), registry.clone()), root_key);

    fs1.mkdir("a", Default::default()).await.unwrap();

    let (r1, r2) = tokio::join!(
        fs1.put("a/x", Bytes::from_static(b"x"), PutOptions::default()),
        fs2.put("a/y", Bytes::from_static(b"y"), PutOptions::default()),
    );
    r1.unwrap();
    r2.unwrap();

    let listing = fs1.list("a", ListOptions::default()).await.unwrap();
    let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);
}
