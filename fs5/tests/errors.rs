//! Failure-path behavior: corrupt remotes, cancellation, deadlines, and
//! delete/rename edge cases.

use async_trait::async_trait;
use bytes::Bytes;
use fs5::{
    DeleteOptions, FS5, FsContext, FsError, GetOptions, GetResult, ListOptions, MoveOptions,
    PutOptions,
};
use fs5_core::registry::Entry;
use fs5_core::{BlobApi, BlobId, Hash, PublicKeyEd25519, RegistryApi};
use fs5_store_memory::{MemoryBlobs, MemoryRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ROOT_KEY: [u8; 32] = [1u8; 32];

/// Blob store wrapper that can start returning tampered bytes.
struct CorruptingBlobs {
    inner: MemoryBlobs,
    corrupt: AtomicBool,
}

impl CorruptingBlobs {
    fn new() -> Self {
        Self {
            inner: MemoryBlobs::new(),
            corrupt: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl BlobApi for CorruptingBlobs {
    async fn upload_blob(&self, bytes: Bytes) -> Result<BlobId, FsError> {
        self.inner.upload_blob(bytes).await
    }

    async fn download_blob(&self, hash: &Hash) -> Result<Bytes, FsError> {
        let bytes = self.inner.download_blob(hash).await?;
        if self.corrupt.load(Ordering::SeqCst) {
            let mut tampered = bytes.to_vec();
            if let Some(first) = tampered.first_mut() {
                *first ^= 0xff;
            }
            return Ok(tampered.into());
        }
        Ok(bytes)
    }
}

/// Registry whose reads hang long enough for deadlines and cancellation to
/// win.
struct StallingRegistry;

#[async_trait]
impl RegistryApi for StallingRegistry {
    async fn registry_get(&self, _pk: &PublicKeyEd25519) -> Result<Option<Entry>, FsError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(None)
    }

    async fn registry_set(&self, _entry: Entry) -> Result<(), FsError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn corrupted_blob_fails_with_hash_mismatch() {
    let blobs = Arc::new(CorruptingBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs.clone(), registry), ROOT_KEY);

    // Big enough to bypass inline storage, so reads hit the blob store.
    fs.put("data.bin", Bytes::from(vec![7u8; 4096]), PutOptions::default())
        .await
        .unwrap();

    blobs.corrupt.store(true, Ordering::SeqCst);
    let err = fs.get("data.bin", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::HashMismatch { .. }), "{err}");
}

#[tokio::test]
async fn corrupted_directory_blob_is_fatal_too() {
    let blobs = Arc::new(CorruptingBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs.clone(), registry), ROOT_KEY);

    fs.put("f.txt", Bytes::from_static(b"x"), PutOptions::default())
        .await
        .unwrap();

    blobs.corrupt.store(true, Ordering::SeqCst);
    let err = fs.get("f.txt", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::HashMismatch { .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn deadline_expiry_surfaces_timed_out() {
    let fs = FS5::new(
        FsContext::new(Arc::new(MemoryBlobs::new()), Arc::new(StallingRegistry)),
        ROOT_KEY,
    );
    let err = fs
        .get(
            "anything",
            GetOptions {
                timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::TimedOut));
}

#[tokio::test(start_paused = true)]
async fn cancellation_surfaces_cancelled() {
    let fs = FS5::new(
        FsContext::new(Arc::new(MemoryBlobs::new()), Arc::new(StallingRegistry)),
        ROOT_KEY,
    );
    let token = CancellationToken::new();
    token.cancel();
    let err = fs
        .put(
            "f.txt",
            Bytes::from_static(b"x"),
            PutOptions {
                cancel: Some(token),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::Cancelled));
}

#[tokio::test]
async fn recursive_delete_removes_a_subtree() {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs, registry), ROOT_KEY);

    for path in ["a/b.txt", "a/c/d.txt", "a/c/e.txt"] {
        fs.put(
            path,
            Bytes::from_static(b"data"),
            PutOptions {
                create_parents: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    // Without `recursive` the delete is refused.
    let err = fs.delete("a", DeleteOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::InvalidPath(_)));

    fs.delete(
        "a",
        DeleteOptions {
            recursive: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(matches!(
        fs.get("a/b.txt", GetOptions::default()).await,
        Err(FsError::NotFound(_))
    ));
    let root = fs.list("", ListOptions::default()).await.unwrap();
    assert!(root.entries.is_empty());
}

#[tokio::test]
async fn rename_within_and_across_directories() {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs, registry), ROOT_KEY);

    fs.put(
        "inbox/draft.txt",
        Bytes::from_static(b"text"),
        PutOptions {
            create_parents: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // Same-parent rename is a single pointer swap.
    fs.rename("inbox/draft.txt", "inbox/final.txt", MoveOptions::default())
        .await
        .unwrap();
    assert!(!fs.exists("inbox/draft.txt").await.unwrap());
    assert_eq!(
        fs.get("inbox/final.txt", GetOptions::default()).await.unwrap(),
        GetResult::File(Bytes::from_static(b"text"))
    );

    // Cross-parent move.
    fs.mkdir("archive", Default::default()).await.unwrap();
    fs.rename("inbox/final.txt", "archive/final.txt", MoveOptions::default())
        .await
        .unwrap();
    assert!(!fs.exists("inbox/final.txt").await.unwrap());
    assert_eq!(
        fs.get("archive/final.txt", GetOptions::default()).await.unwrap(),
        GetResult::File(Bytes::from_static(b"text"))
    );
}

#[tokio::test]
async fn renamed_directory_stays_readable_and_writable() {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs, registry), ROOT_KEY);

    fs.put(
        "old/f.txt",
        Bytes::from_static(b"1"),
        PutOptions {
            create_parents: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    fs.rename("old", "new", MoveOptions::default()).await.unwrap();

    assert_eq!(
        fs.get("new/f.txt", GetOptions::default()).await.unwrap(),
        GetResult::File(Bytes::from_static(b"1"))
    );
    // The directory was re-published under the key derived for its new
    // path, so it accepts writes again.
    fs.put("new/g.txt", Bytes::from_static(b"2"), PutOptions::default())
        .await
        .unwrap();
    assert!(fs.exists("new/g.txt").await.unwrap());
}

#[tokio::test]
async fn rename_refuses_existing_destination() {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let fs = FS5::new(FsContext::new(blobs, registry), ROOT_KEY);

    fs.put("a.txt", Bytes::from_static(b"a"), PutOptions::default())
        .await
        .unwrap();
    fs.put("b.txt", Bytes::from_static(b"b"), PutOptions::default())
        .await
        .unwrap();

    let err = fs
        .rename("a.txt", "b.txt", MoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::AlreadyExists(_)));
}
