//! Provides the main high-level API for interacting with the fs5 file system.

use crate::context::{FsConfig, FsContext};
use crate::dir::{DirRef, FileRef};
use crate::hamt::EntryRef;
use crate::keys::{DirKey, KeyCache};
use crate::listing::{ListEntry, ListInclude, ListResult};
use crate::registry::RegistryAdapter;
use crate::walk::split_path;
use crate::write::DirOp;
use bytes::Bytes;
use chrono::Utc;
use fs5_core::{FsError, FsResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Name of the root-level directory that receives trashed entries.
pub const TRASH_DIR: &str = ".trash";

/// Default page size for `list` when the caller does not set one.
const DEFAULT_LIST_LIMIT: u32 = 256;

/// Shared engine state behind the [`FS5`] façade. The walk, write and
/// listing modules implement their halves on this type.
pub(crate) struct Fs5Inner {
    pub(crate) ctx: FsContext,
    pub(crate) cfg: FsConfig,
    pub(crate) root_key: DirKey,
    pub(crate) keys: KeyCache,
    pub(crate) adapter: RegistryAdapter,
}

/// The main API for interacting with the fs5 file system.
#[derive(Clone)]
pub struct FS5 {
    inner: Arc<Fs5Inner>,
}

/// Result of a [`FS5::get`]: file content or a full directory listing.
#[derive(Clone, Debug, PartialEq)]
pub enum GetResult {
    File(Bytes),
    Directory(Vec<ListEntry>),
}

#[derive(Clone, Debug, Default)]
pub struct GetOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone, Debug, Default)]
pub struct PutOptions {
    /// Create missing parent directories along the way.
    pub create_parents: bool,
    pub media_type: Option<String>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    /// Required to delete a non-empty directory.
    pub recursive: bool,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone, Debug)]
pub struct ListOptions {
    pub limit: u32,
    pub cursor: Option<String>,
    pub include: ListInclude,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIST_LIMIT,
            cursor: None,
            include: ListInclude::Both,
            timeout: None,
            cancel: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct MkdirOptions {
    pub create_parents: bool,
    /// Encrypt the new directory's snapshots with a key held in the
    /// parent's reference.
    pub encrypted: bool,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

#[derive(Clone, Debug, Default)]
pub struct MoveOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

/// Bounds an operation by a deadline and an optional cancellation token.
/// Cancellation aborts pending I/O; a mutation cancelled before its
/// registry submission never submits it.
async fn guard<T>(
    timeout: Duration,
    cancel: Option<CancellationToken>,
    fut: impl Future<Output = FsResult<T>>,
) -> FsResult<T> {
    let bounded = tokio::time::timeout(timeout, fut);
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(FsError::Cancelled),
                result = bounded => result.map_err(|_| FsError::TimedOut).and_then(|r| r),
            }
        }
        None => bounded.await.map_err(|_| FsError::TimedOut).and_then(|r| r),
    }
}

impl FS5 {
    /// Opens a filesystem rooted at `root_key` over the given services.
    pub fn new(ctx: FsContext, root_key: [u8; 32]) -> Self {
        Self::with_config(ctx, root_key, FsConfig::default())
    }

    pub fn with_config(ctx: FsContext, root_key: [u8; 32], cfg: FsConfig) -> Self {
        let adapter = RegistryAdapter::new(Arc::clone(&ctx.registry), Arc::clone(&ctx.crypto));
        Self {
            inner: Arc::new(Fs5Inner {
                ctx,
                cfg,
                root_key: DirKey::new(root_key),
                keys: KeyCache::new(),
                adapter,
            }),
        }
    }

    /// Returns file content or a full directory listing.
    pub async fn get(&self, path: &str, opts: GetOptions) -> FsResult<GetResult> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.read_timeout);
        guard(timeout, opts.cancel, self.inner.get_impl(path)).await
    }

    /// Writes file content at `path`, replacing (and version-threading) any
    /// existing file.
    pub async fn put(&self, path: &str, content: Bytes, opts: PutOptions) -> FsResult<()> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.write_timeout);
        guard(
            timeout,
            opts.cancel.clone(),
            self.inner.put_impl(path, content, &opts),
        )
        .await
    }

    /// Removes the entry at `path`.
    pub async fn delete(&self, path: &str, opts: DeleteOptions) -> FsResult<()> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.write_timeout);
        guard(
            timeout,
            opts.cancel.clone(),
            self.inner.delete_impl(path, opts.recursive),
        )
        .await
    }

    /// Lists one page of the directory at `path`.
    pub async fn list(&self, path: &str, opts: ListOptions) -> FsResult<ListResult> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.read_timeout);
        guard(
            timeout,
            opts.cancel.clone(),
            self.inner
                .list_impl(path, opts.cursor.as_deref(), opts.limit, opts.include),
        )
        .await
    }

    /// Creates the directory at `path`. Creating an existing directory is
    /// a no-op.
    pub async fn mkdir(&self, path: &str, opts: MkdirOptions) -> FsResult<()> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.write_timeout);
        guard(
            timeout,
            opts.cancel.clone(),
            self.inner.mkdir_impl(path, &opts),
        )
        .await
    }

    /// Moves `from` to `to`. Within one parent directory this is a single
    /// atomic pointer swap; across parents the entry appears at the
    /// destination before it disappears from the source.
    pub async fn rename(&self, from: &str, to: &str, opts: MoveOptions) -> FsResult<()> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.write_timeout);
        guard(
            timeout,
            opts.cancel.clone(),
            self.inner.rename_impl(from, to),
        )
        .await
    }

    /// Moves the entry at `path` into the root `.trash` directory under a
    /// timestamped name.
    pub async fn trash(&self, path: &str, opts: DeleteOptions) -> FsResult<()> {
        let timeout = opts.timeout.unwrap_or(self.inner.cfg.write_timeout);
        guard(timeout, opts.cancel.clone(), self.inner.trash_impl(path)).await
    }

    /// Returns whether an entry exists at `path`.
    pub async fn exists(&self, path: &str) -> FsResult<bool> {
        guard(
            self.inner.cfg.read_timeout,
            None,
            self.inner.exists_impl(path),
        )
        .await
    }
}

impl Fs5Inner {
    async fn get_impl(&self, path: &str) -> FsResult<GetResult> {
        let segments = split_path(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Ok(GetResult::Directory(self.list_all(&segments).await?));
        };

        let parent_dir = self.resolve_dir(parent).await?;
        match self.lookup_entry(&parent_dir.dir, name).await? {
            None => Err(FsError::NotFound(path.to_owned())),
            Some(EntryRef::File(file)) => Ok(GetResult::File(self.read_file_content(&file).await?)),
            Some(EntryRef::Dir(_)) => Ok(GetResult::Directory(self.list_all(&segments).await?)),
        }
    }

    /// Collects every entry of a directory by paging through it.
    async fn list_all(&self, segments: &[&str]) -> FsResult<Vec<ListEntry>> {
        let mut resolved = self.resolve_dir(segments).await?;
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .list_dir(&mut resolved, cursor.as_deref(), 1024, ListInclude::Both)
                .await?;
            entries.extend(page.entries);
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(entries),
            }
        }
    }

    async fn put_impl(&self, path: &str, content: Bytes, opts: &PutOptions) -> FsResult<()> {
        let segments = split_path(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Err(FsError::InvalidPath(
                "cannot write file content to the root directory".into(),
            ));
        };

        if opts.create_parents {
            self.ensure_dirs(parent).await?;
        }

        let mut file = if content.len() <= self.cfg.inline_max {
            FileRef::new_inline_blob(content)
        } else {
            let blob = self.ctx.blobs.upload_blob(content).await?;
            FileRef::new(blob.hash, blob.size)
        };
        let now = Utc::now();
        file.timestamp = Some(now.timestamp_millis() as u64);
        file.timestamp_subsec_nanos = Some(now.timestamp_subsec_nanos());
        file.media_type = opts.media_type.clone();

        self.update_dir(
            parent,
            &[DirOp::PutFile {
                name: (*name).to_owned(),
                file,
                overwrite: true,
            }],
        )
        .await
    }

    async fn delete_impl(&self, path: &str, recursive: bool) -> FsResult<()> {
        let segments = split_path(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Err(FsError::InvalidPath("cannot delete the root directory".into()));
        };

        let parent_dir = self.resolve_dir(parent).await?;
        match self.lookup_entry(&parent_dir.dir, name).await? {
            None => Err(FsError::NotFound(path.to_owned())),
            Some(EntryRef::File(_)) => {
                self.update_dir(parent, &[DirOp::RemoveFile { name: (*name).to_owned() }])
                    .await
            }
            Some(EntryRef::Dir(_)) => {
                if !recursive {
                    let child = self.resolve_dir(&segments).await?;
                    if child.dir.total_entry_count() > 0 {
                        return Err(FsError::InvalidPath(format!(
                            "directory not empty: {path}"
                        )));
                    }
                }
                // Unlinking the reference logically destroys the subtree;
                // its blobs and registry entries become unreferenced
                // history for the remote store to reclaim.
                self.update_dir(parent, &[DirOp::RemoveDir { name: (*name).to_owned() }])
                    .await
            }
        }
    }

    async fn list_impl(
        &self,
        path: &str,
        cursor: Option<&str>,
        limit: u32,
        include: ListInclude,
    ) -> FsResult<ListResult> {
        let segments = split_path(path)?;
        let mut resolved = self.resolve_dir(&segments).await?;
        self.list_dir(&mut resolved, cursor, limit.max(1) as usize, include)
            .await
    }

    async fn mkdir_impl(&self, path: &str, opts: &MkdirOptions) -> FsResult<()> {
        let segments = split_path(path)?;
        if segments.is_empty() {
            return Ok(());
        }
        if opts.create_parents {
            self.ensure_dirs(&segments[..segments.len() - 1]).await?;
        }
        self.mkdir_at(&segments, opts.encrypted, true).await
    }

    /// Creates each missing ancestor in turn, shallowest first.
    async fn ensure_dirs(&self, segments: &[&str]) -> FsResult<()> {
        for i in 0..segments.len() {
            self.mkdir_at(&segments[..=i], false, true).await?;
        }
        Ok(())
    }

    async fn mkdir_at(&self, segments: &[&str], encrypted: bool, exists_ok: bool) -> FsResult<()> {
        let Some((name, parent)) = segments.split_last() else {
            return Ok(());
        };
        let crypto = self.ctx.crypto.as_ref();
        let child_key = self.keys.derive(crypto, &self.root_key, segments);
        let (public_key, _) = child_key.keypair(crypto);

        let now = Utc::now();
        let mut dir_ref = DirRef::from_registry_key(public_key);
        dir_ref.ts_seconds = Some(now.timestamp());
        dir_ref.ts_nanos = Some(now.timestamp_subsec_nanos());
        if encrypted {
            // The subtree read key is derived from the write key, so
            // holding the parent chain grants both.
            dir_ref.enc_key =
                Some(crypto.hash_blake3_keyed(child_key.secret(), b"fs5/dir/encryption"));
        }

        self.update_dir(
            parent,
            &[DirOp::PutDir {
                name: (*name).to_owned(),
                dir_ref,
                exists_ok,
            }],
        )
        .await
    }

    async fn rename_impl(&self, from: &str, to: &str) -> FsResult<()> {
        let from_segments = split_path(from)?;
        let to_segments = split_path(to)?;
        let Some((from_name, from_parent)) = from_segments.split_last() else {
            return Err(FsError::InvalidPath("cannot move the root directory".into()));
        };
        let Some((to_name, to_parent)) = to_segments.split_last() else {
            return Err(FsError::InvalidPath("cannot move onto the root directory".into()));
        };
        if to_segments.len() > from_segments.len()
            && to_segments[..from_segments.len()] == from_segments[..]
        {
            return Err(FsError::InvalidPath(format!(
                "cannot move '{from}' into itself"
            )));
        }

        let parent_dir = self.resolve_dir(from_parent).await?;
        let entry = self
            .lookup_entry(&parent_dir.dir, from_name)
            .await?
            .ok_or_else(|| FsError::NotFound(from.to_owned()))?;

        if from_parent == to_parent {
            match entry {
                EntryRef::File(_) => {
                    return self
                        .update_dir(
                            from_parent,
                            &[DirOp::Rename {
                                from: (*from_name).to_owned(),
                                to: (*to_name).to_owned(),
                            }],
                        )
                        .await;
                }
                EntryRef::Dir(dir_ref) => {
                    // A directory's registry key is tied to its path, so a
                    // rename re-publishes the snapshot under the key
                    // derived for the new path.
                    let new_ref = self.rehome_dir_entry(&to_segments, &dir_ref).await?;
                    return self
                        .update_dir(
                            from_parent,
                            &[
                                DirOp::RemoveDir { name: (*from_name).to_owned() },
                                DirOp::PutDir {
                                    name: (*to_name).to_owned(),
                                    dir_ref: new_ref,
                                    exists_ok: false,
                                },
                            ],
                        )
                        .await;
                }
            }
        }

        let is_dir = matches!(entry, EntryRef::Dir(_));
        match entry {
            EntryRef::File(file) => {
                self.update_dir(
                    to_parent,
                    &[DirOp::PutFile {
                        name: (*to_name).to_owned(),
                        file,
                        overwrite: false,
                    }],
                )
                .await?;
            }
            EntryRef::Dir(dir_ref) => {
                let new_ref = self.rehome_dir_entry(&to_segments, &dir_ref).await?;
                self.update_dir(
                    to_parent,
                    &[DirOp::PutDir {
                        name: (*to_name).to_owned(),
                        dir_ref: new_ref,
                        exists_ok: false,
                    }],
                )
                .await?;
            }
        }
        let remove = if is_dir {
            DirOp::RemoveDir { name: (*from_name).to_owned() }
        } else {
            DirOp::RemoveFile { name: (*from_name).to_owned() }
        };
        self.update_dir(from_parent, &[remove]).await
    }

    /// Re-publishes a moved directory's current snapshot under the key
    /// derived for its new path and returns the replacement reference.
    ///
    /// TODO: re-home nested subdirectory keys as well; until then a moved
    /// directory's children remain readable but not writable.
    async fn rehome_dir_entry(
        &self,
        to_segments: &[&str],
        dir_ref: &DirRef,
    ) -> FsResult<DirRef> {
        let crypto = self.ctx.crypto.as_ref();
        let new_key = self.keys.derive(crypto, &self.root_key, to_segments);
        let (public_key, secret_key) = new_key.keypair(crypto);

        if let Some(hash) = self.current_snapshot_hash(dir_ref).await? {
            let revision = self
                .adapter
                .get_link(&public_key)
                .await?
                .map_or(0, |(_, r)| r + 1);
            let data = Bytes::copy_from_slice(
                &fs5_core::DirLink::FixedHashBlake3(hash).to_bytes(),
            );
            self.adapter
                .set_signed(&public_key, &secret_key, revision, data)
                .await?;
        }

        let now = Utc::now();
        let mut new_ref = DirRef::from_registry_key(public_key);
        new_ref.ts_seconds = Some(now.timestamp());
        new_ref.ts_nanos = Some(now.timestamp_subsec_nanos());
        new_ref.enc_key = dir_ref.enc_key;
        new_ref.extra = dir_ref.extra.clone();
        Ok(new_ref)
    }

    async fn trash_impl(&self, path: &str) -> FsResult<()> {
        let segments = split_path(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Err(FsError::InvalidPath("cannot trash the root directory".into()));
        };
        if parent.is_empty() && *name == TRASH_DIR {
            return Err(FsError::InvalidPath("cannot trash the trash directory".into()));
        }

        let parent_dir = self.resolve_dir(parent).await?;
        let entry = self
            .lookup_entry(&parent_dir.dir, name)
            .await?
            .ok_or_else(|| FsError::NotFound(path.to_owned()))?;

        self.mkdir_at(&[TRASH_DIR], false, true).await?;
        let trash_name = format!("{name}.{}", Utc::now().timestamp_millis());
        let is_dir = matches!(entry, EntryRef::Dir(_));
        let op = match entry {
            EntryRef::File(file) => DirOp::PutFile {
                name: trash_name,
                file,
                overwrite: false,
            },
            EntryRef::Dir(dir_ref) => DirOp::PutDir {
                name: trash_name,
                dir_ref,
                exists_ok: false,
            },
        };
        self.update_dir(&[TRASH_DIR], &[op]).await?;

        let remove = if is_dir {
            DirOp::RemoveDir { name: (*name).to_owned() }
        } else {
            DirOp::RemoveFile { name: (*name).to_owned() }
        };
        self.update_dir(parent, &[remove]).await
    }

    async fn exists_impl(&self, path: &str) -> FsResult<bool> {
        let segments = split_path(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Ok(true);
        };
        let parent_dir = match self.resolve_dir(parent).await {
            Ok(dir) => dir,
            Err(FsError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(self.lookup_entry(&parent_dir.dir, name).await?.is_some())
    }
}
