//! Promotion of large directories to the HAMT layout, and demotion back.

use bytes::Bytes;
use fs5::{DeleteOptions, DirKey, DirV1, FS5, FsContext, GetOptions, GetResult, ListOptions, PutOptions};
use fs5_core::{BlobApi, DefaultCrypto, DirLink, RegistryApi};
use fs5_store_memory::{MemoryBlobs, MemoryRegistry};
use std::collections::BTreeSet;
use std::sync::Arc;

const ROOT_KEY: [u8; 32] = [3u8; 32];

fn new_fs() -> (FS5, Arc<MemoryBlobs>, Arc<MemoryRegistry>) {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    let ctx = FsContext::new(blobs.clone(), registry.clone());
    (FS5::new(ctx, ROOT_KEY), blobs, registry)
}

/// Fetches the raw snapshot of a directory straight from the services,
/// bypassing the engine, to inspect its layout.
async fn fetch_dir(
    blobs: &MemoryBlobs,
    registry: &MemoryRegistry,
    segments: &[&str],
) -> DirV1 {
    let crypto = DefaultCrypto;
    let mut key = DirKey::new(ROOT_KEY);
    for segment in segments {
        key = key.child(&crypto, segment);
    }
    let (pk, _) = key.keypair(&crypto);
    let entry = registry
        .registry_get(&pk)
        .await
        .unwrap()
        .expect("registry entry for directory");
    let DirLink::FixedHashBlake3(hash) = DirLink::from_bytes(&entry.data).unwrap() else {
        panic!("registry should hold a fixed-hash link");
    };
    let bytes = blobs.download_blob(&hash).await.unwrap();
    DirV1::from_bytes(&bytes).unwrap()
}

#[tokio::test]
async fn big_directory_promotes_and_stays_addressable() {
    let (fs, blobs, registry) = new_fs();

    for i in 0..1500u32 {
        let opts = PutOptions {
            create_parents: i == 0,
            ..Default::default()
        };
        fs.put(
            &format!("big/f{i:04}"),
            Bytes::from(format!("content-{i:04}")),
            opts,
        )
        .await
        .unwrap();
    }

    let snapshot = fetch_dir(&blobs, &registry, &["big"]).await;
    assert!(snapshot.is_indexed(), "directory blob carries an index root");
    assert_eq!(snapshot.total_entry_count(), 1500);
    assert!(snapshot.files.is_empty() && snapshot.dirs.is_empty());

    let got = fs.get("big/f0731", GetOptions::default()).await.unwrap();
    assert_eq!(got, GetResult::File(Bytes::from_static(b"content-0731")));

    // Paging over the indexed directory yields every entry exactly once.
    let mut seen = BTreeSet::new();
    let mut cursor = None;
    loop {
        let page = fs
            .list(
                "big",
                ListOptions {
                    limit: 200,
                    cursor,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        for entry in &page.entries {
            assert!(seen.insert(entry.name.clone()), "duplicate {}", entry.name);
        }
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen.len(), 1500);
}

#[tokio::test]
async fn promotion_hysteresis() {
    let (fs, blobs, registry) = new_fs();

    // 1000 entries stay inline; the 1001st promotes.
    for i in 0..1001u32 {
        let opts = PutOptions {
            create_parents: i == 0,
            ..Default::default()
        };
        fs.put(&format!("h/e{i:04}"), Bytes::from_static(b"x"), opts)
            .await
            .unwrap();
        if i == 999 {
            let snapshot = fetch_dir(&blobs, &registry, &["h"]).await;
            assert!(!snapshot.is_indexed(), "1000 entries stay inline");
        }
    }
    let snapshot = fetch_dir(&blobs, &registry, &["h"]).await;
    assert!(snapshot.is_indexed(), "1001 entries promote");

    // Dropping to 700 keeps the index: well under the promotion point but
    // above the demotion threshold.
    for i in 0..301u32 {
        fs.delete(&format!("h/e{i:04}"), DeleteOptions::default())
            .await
            .unwrap();
    }
    let snapshot = fetch_dir(&blobs, &registry, &["h"]).await;
    assert!(snapshot.is_indexed(), "700 entries stay indexed");
    assert_eq!(snapshot.total_entry_count(), 700);

    // Falling below 600 demotes back to the inline layout.
    for i in 301..402u32 {
        fs.delete(&format!("h/e{i:04}"), DeleteOptions::default())
            .await
            .unwrap();
    }
    let snapshot = fetch_dir(&blobs, &registry, &["h"]).await;
    assert!(!snapshot.is_indexed(), "599 entries demote");
    assert_eq!(snapshot.total_entry_count(), 599);
    assert_eq!(snapshot.files.len(), 599);

    // Entries survive the layout change.
    let got = fs.get("h/e0500", GetOptions::default()).await.unwrap();
    assert_eq!(got, GetResult::File(Bytes::from_static(b"x")));
}
