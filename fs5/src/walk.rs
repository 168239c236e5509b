//! Path resolution: walking registry pointers from the root key down to a
//! directory snapshot.

use crate::api::Fs5Inner;
use crate::dir::{DirRef, DirV1, FileRef};
use crate::hamt::{EntryRef, Hamt};
use fs5_core::{DirLink, FsError, FsResult, Hash, PublicKeyEd25519};

/// How many mutable-registry indirections a single link may chase. Registry
/// payloads normally hold the fixed-hash form directly.
const MAX_LINK_HOPS: u32 = 4;

/// Splits a path into its segments, rejecting empty and relative segments.
/// The empty path (or `/`) resolves to the root directory.
pub(crate) fn split_path(path: &str) -> FsResult<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(FsError::InvalidPath(format!(
                "invalid segment in '{path}'"
            )));
        }
        segments.push(segment);
    }
    Ok(segments)
}

/// A directory loaded into memory together with the key material and
/// registry state needed to write it back.
pub(crate) struct ResolvedDir {
    pub public_key: PublicKeyEd25519,
    pub secret_key: [u8; 64],
    /// Revision of the registry entry the snapshot came from; `None` when
    /// the key has never been written.
    pub revision: Option<u64>,
    pub dir: DirV1,
    /// Key for this directory's blobs when the subtree is encrypted.
    pub enc_key: Option<[u8; 32]>,
    /// False for snapshots reached through a fixed-hash link or through a
    /// registry key whose derived keypair we do not hold.
    pub writable: bool,
}

impl Fs5Inner {
    /// Resolves a directory path, walking one registry pointer per segment
    /// and failing with `NotFound` as soon as a segment is missing.
    pub(crate) async fn resolve_dir(&self, segments: &[&str]) -> FsResult<ResolvedDir> {
        let crypto = self.ctx.crypto.as_ref();
        let root_key = self.root_key.clone();
        let (root_pk, root_sk) = root_key.keypair(crypto);

        let (dir, revision) = match self.adapter.get_link(&root_pk).await? {
            Some((link, revision)) => {
                let dir = self.load_link(&link, None, MAX_LINK_HOPS).await?;
                (dir, Some(revision))
            }
            None => (DirV1::new(), None),
        };

        let mut current = ResolvedDir {
            public_key: root_pk,
            secret_key: root_sk,
            revision,
            dir,
            enc_key: None,
            writable: true,
        };

        for (i, segment) in segments.iter().enumerate() {
            let dir_ref = match self.lookup_entry(&current.dir, segment).await? {
                Some(EntryRef::Dir(dir_ref)) => dir_ref,
                Some(EntryRef::File(_)) | None => {
                    return Err(FsError::NotFound(segments[..=i].join("/")));
                }
            };

            let child_key = self
                .keys
                .derive(crypto, &self.root_key, &segments[..=i]);
            let (child_pk, child_sk) = child_key.keypair(crypto);

            let (dir, revision, writable) = match dir_ref.link {
                DirLink::MutableRegistryEd25519(link_pk) => {
                    let (dir, revision) = match self.adapter.get_link(&link_pk).await? {
                        Some((link, revision)) => {
                            let dir = self
                                .load_link(&link, dir_ref.enc_key.as_ref(), MAX_LINK_HOPS)
                                .await?;
                            (dir, Some(revision))
                        }
                        // A referenced directory that has never been
                        // written reads as empty; its first save publishes
                        // the registry entry.
                        None => (DirV1::new(), None),
                    };
                    // Writes need the secret key for the link's public key,
                    // which we only hold when the link matches the derived
                    // chain.
                    (dir, revision, link_pk == child_pk)
                }
                DirLink::FixedHashBlake3(hash) => {
                    let dir = self
                        .fetch_dir_blob(&hash, dir_ref.enc_key.as_ref())
                        .await?;
                    (dir, None, false)
                }
            };

            current = ResolvedDir {
                public_key: child_pk,
                secret_key: child_sk,
                revision,
                dir,
                enc_key: dir_ref.enc_key,
                writable: current.writable && writable,
            };
        }

        Ok(current)
    }

    /// Follows a link to a directory snapshot, chasing at most `hops`
    /// mutable indirections.
    pub(crate) async fn load_link(
        &self,
        link: &DirLink,
        enc_key: Option<&[u8; 32]>,
        hops: u32,
    ) -> FsResult<DirV1> {
        match link {
            DirLink::FixedHashBlake3(hash) => self.fetch_dir_blob(hash, enc_key).await,
            DirLink::MutableRegistryEd25519(pk) => {
                if hops == 0 {
                    return Err(FsError::InvalidDirectory(
                        "too many registry indirections".into(),
                    ));
                }
                match self.adapter.get_link(pk).await? {
                    Some((next, _)) => {
                        Box::pin(self.load_link(&next, enc_key, hops - 1)).await
                    }
                    None => Ok(DirV1::new()),
                }
            }
        }
    }

    /// Downloads and decodes a directory blob, verifying its content hash
    /// before anything else. A mismatch means the remote is corrupt or
    /// malicious and always fails the operation.
    pub(crate) async fn fetch_dir_blob(
        &self,
        hash: &Hash,
        enc_key: Option<&[u8; 32]>,
    ) -> FsResult<DirV1> {
        let bytes = self.ctx.blobs.download_blob(hash).await?;
        let actual = Hash::new(&bytes);
        if actual != *hash {
            return Err(FsError::HashMismatch {
                expected: *hash,
                actual,
            });
        }
        let bytes = match enc_key {
            Some(key) => self.ctx.crypto.decrypt_xchacha20poly1305(key, &bytes)?,
            None => bytes,
        };
        DirV1::from_bytes(&bytes)
    }

    /// Looks up a single entry in a directory, transparently descending
    /// the HAMT for indexed layouts.
    pub(crate) async fn lookup_entry(
        &self,
        dir: &DirV1,
        name: &str,
    ) -> FsResult<Option<EntryRef>> {
        if let Some(index) = &dir.header.index {
            let mut hamt = Hamt::open(self.ctx.blobs.as_ref(), index).await?;
            return hamt.get(self.ctx.blobs.as_ref(), name).await;
        }
        if let Some(dir_ref) = dir.dirs.get(name) {
            return Ok(Some(EntryRef::Dir(dir_ref.clone())));
        }
        if let Some(file_ref) = dir.files.get(name) {
            return Ok(Some(EntryRef::File(file_ref.clone())));
        }
        Ok(None)
    }

    /// Fetches a file's content, preferring inline identity locations and
    /// verifying the Blake3 hash either way.
    pub(crate) async fn read_file_content(&self, file: &FileRef) -> FsResult<bytes::Bytes> {
        if let Some(locations) = &file.locations {
            for location in locations {
                if let fs5_core::BlobLocation::IdentityRawBinary(data) = location {
                    let actual = Hash::new(data);
                    if actual != file.hash {
                        return Err(FsError::HashMismatch {
                            expected: file.hash,
                            actual,
                        });
                    }
                    return Ok(data.clone());
                }
            }
        }
        let bytes = self.ctx.blobs.download_blob(&file.hash).await?;
        let actual = Hash::new(&bytes);
        if actual != file.hash {
            return Err(FsError::HashMismatch {
                expected: file.hash,
                actual,
            });
        }
        Ok(bytes)
    }

    /// Returns the fixed-hash snapshot a mutable child link currently
    /// points at, if the child has ever been written.
    pub(crate) async fn current_snapshot_hash(
        &self,
        dir_ref: &DirRef,
    ) -> FsResult<Option<Hash>> {
        match dir_ref.link {
            DirLink::FixedHashBlake3(hash) => Ok(Some(hash)),
            DirLink::MutableRegistryEd25519(pk) => match self.adapter.get_link(&pk).await? {
                Some((DirLink::FixedHashBlake3(hash), _)) => Ok(Some(hash)),
                Some((DirLink::MutableRegistryEd25519(_), _)) => Err(FsError::InvalidDirectory(
                    "nested mutable link in registry entry".into(),
                )),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_accepts_normal_paths() {
        assert_eq!(split_path("").unwrap(), Vec::<&str>::new());
        assert_eq!(split_path("/").unwrap(), Vec::<&str>::new());
        assert_eq!(split_path("a/b/c").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split_path("/a/b/").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn split_path_rejects_bad_segments() {
        for path in ["a//b", "a/./b", "a/../b"] {
            assert!(matches!(split_path(path), Err(FsError::InvalidPath(_))));
        }
    }
}
