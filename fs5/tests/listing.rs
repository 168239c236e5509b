//! Listing order, paging and filters over inline directories.

use bytes::Bytes;
use fs5::hamt::EntryRef;
use fs5::{FS5, FsContext, FsError, ListInclude, ListOptions, MkdirOptions, PutOptions};
use fs5_store_memory::{MemoryBlobs, MemoryRegistry};
use std::sync::Arc;

fn new_fs() -> FS5 {
    let blobs = Arc::new(MemoryBlobs::new());
    let registry = Arc::new(MemoryRegistry::new());
    FS5::new(FsContext::new(blobs, registry), [5u8; 32])
}

async fn seed(fs: &FS5) -> Vec<String> {
    // Mixed files and directories with names that exercise byte-lex order
    // (uppercase sorts before lowercase, digits before letters).
    let dirs = ["Build", "docs", "src", "zz"];
    let files = ["01-intro.md", "Makefile", "a.txt", "b.txt", "main.rs", "zebra"];
    for name in dirs {
        fs.mkdir(name, MkdirOptions::default()).await.unwrap();
    }
    for name in files {
        fs.put(name, Bytes::from_static(b"x"), PutOptions::default())
            .await
            .unwrap();
    }
    let mut all: Vec<String> = dirs
        .iter()
        .chain(files.iter())
        .map(|s| s.to_string())
        .collect();
    all.sort();
    all
}

#[tokio::test]
async fn listing_is_byte_lexicographic() {
    let fs = new_fs();
    let expected = seed(&fs).await;

    let listing = fs.list("", ListOptions::default()).await.unwrap();
    let names: Vec<String> = listing.entries.iter().map(|e| e.name.clone()).collect();
    assert_eq!(names, expected);
    assert!(listing.cursor.is_none());
}

#[tokio::test]
async fn paging_yields_every_entry_exactly_once_in_order() {
    let fs = new_fs();
    let expected = seed(&fs).await;

    let mut names = Vec::new();
    let mut cursor = None;
    loop {
        let page = fs
            .list(
                "",
                ListOptions {
                    limit: 3,
                    cursor,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.entries.len() <= 3);
        names.extend(page.entries.iter().map(|e| e.name.clone()));
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(names, expected);
}

#[tokio::test]
async fn include_filters_restrict_entry_kinds() {
    let fs = new_fs();
    seed(&fs).await;

    let files = fs
        .list(
            "",
            ListOptions {
                include: ListInclude::Files,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(files.entries.len(), 6);
    assert!(
        files
            .entries
            .iter()
            .all(|e| matches!(e.entry, EntryRef::File(_)))
    );

    let dirs = fs
        .list(
            "",
            ListOptions {
                include: ListInclude::Dirs,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(dirs.entries.len(), 4);
    assert!(
        dirs.entries
            .iter()
            .all(|e| matches!(e.entry, EntryRef::Dir(_)))
    );
}

#[tokio::test]
async fn garbage_cursors_are_rejected() {
    let fs = new_fs();
    seed(&fs).await;

    let err = fs
        .list(
            "",
            ListOptions {
                cursor: Some("not a cursor!".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FsError::InvalidPath(_)));
}

#[tokio::test]
async fn listing_a_missing_directory_fails() {
    let fs = new_fs();
    let err = fs.list("nope", ListOptions::default()).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)));
}
