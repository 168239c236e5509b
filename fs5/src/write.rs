//! The compare-and-swap mutation loop and directory-level operations.
//!
//! Every mutation loads a fresh snapshot of the target directory, applies
//! its operations in memory, uploads the new snapshot blob and advances the
//! registry pointer with `revision + 1`. A revision conflict means another
//! writer got there first: the loop reloads and retries with exponential
//! backoff until the attempt budget runs out.

use crate::api::Fs5Inner;
use crate::dir::{DirRef, DirV1, FileRef};
use crate::hamt::{EntryRef, Hamt};
use crate::walk::ResolvedDir;
use bytes::Bytes;
use fs5_core::{DirLink, FsError, FsResult};
use std::time::Duration;

/// A single mutation applied to one directory within a CAS window.
/// Operations are re-applied verbatim on every retry, against the freshly
/// reloaded snapshot.
#[derive(Clone, Debug)]
pub(crate) enum DirOp {
    PutFile {
        name: String,
        file: FileRef,
        /// When false, an existing entry under the name fails with
        /// `AlreadyExists`; when true, the old version threads into `prev`.
        overwrite: bool,
    },
    PutDir {
        name: String,
        dir_ref: DirRef,
        /// Idempotent creation: an existing directory of the same name is
        /// a no-op instead of a conflict.
        exists_ok: bool,
    },
    RemoveFile {
        name: String,
    },
    RemoveDir {
        name: String,
    },
    Rename {
        from: String,
        to: String,
    },
}

impl Fs5Inner {
    /// Runs the CAS loop for a mutation of the directory at `segments`.
    pub(crate) async fn update_dir(&self, segments: &[&str], ops: &[DirOp]) -> FsResult<()> {
        let mut attempt = 0u32;
        loop {
            let mut resolved = self.resolve_dir(segments).await?;
            if !resolved.writable {
                return Err(FsError::Unauthorized(format!(
                    "directory '{}' is not writable with the held keys",
                    segments.join("/")
                )));
            }

            let changed = self.apply_ops(&mut resolved, ops).await?;
            if !changed {
                return Ok(());
            }
            self.rebalance(&mut resolved).await?;

            let mut bytes = resolved.dir.to_bytes();
            if let Some(key) = &resolved.enc_key {
                bytes = self.ctx.crypto.encrypt_xchacha20poly1305(key, &bytes)?;
            }
            let blob = self.ctx.blobs.upload_blob(bytes).await?;

            let revision = resolved.revision.map_or(0, |r| r + 1);
            let data = Bytes::copy_from_slice(&DirLink::FixedHashBlake3(blob.hash).to_bytes());
            match self
                .adapter
                .set_signed(&resolved.public_key, &resolved.secret_key, revision, data)
                .await
            {
                Ok(()) => return Ok(()),
                Err(FsError::RevisionConflict) => {
                    attempt += 1;
                    if attempt >= self.cfg.max_cas_attempts {
                        return Err(FsError::Conflict { attempts: attempt });
                    }
                    let delay = backoff_delay(&self.cfg, attempt);
                    tracing::warn!(
                        path = %segments.join("/"),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "registry revision conflict absorbed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies the operations to the snapshot, returning whether anything
    /// changed.
    async fn apply_ops(&self, resolved: &mut ResolvedDir, ops: &[DirOp]) -> FsResult<bool> {
        if resolved.dir.header.index.is_some() {
            self.apply_ops_indexed(resolved, ops).await
        } else {
            apply_ops_inline(&mut resolved.dir, ops)
        }
    }

    async fn apply_ops_indexed(
        &self,
        resolved: &mut ResolvedDir,
        ops: &[DirOp],
    ) -> FsResult<bool> {
        let blobs = self.ctx.blobs.as_ref();
        let index = resolved
            .dir
            .header
            .index
            .ok_or_else(|| FsError::InvalidDirectory("missing index reference".into()))?;
        let mut hamt = Hamt::open(blobs, &index).await?;
        let mut changed = false;

        for op in ops {
            match op {
                DirOp::PutFile {
                    name,
                    file,
                    overwrite,
                } => {
                    let mut file = file.clone();
                    match hamt.get(blobs, name).await? {
                        Some(EntryRef::Dir(_)) => {
                            return Err(FsError::AlreadyExists(format!(
                                "'{name}' is a directory"
                            )));
                        }
                        Some(EntryRef::File(old)) => {
                            if !overwrite {
                                return Err(FsError::AlreadyExists(name.clone()));
                            }
                            if file.prev.is_none() {
                                file.prev = Some(Box::new(old));
                            }
                        }
                        None => {}
                    }
                    hamt.insert(blobs, name, EntryRef::File(file)).await?;
                    changed = true;
                }
                DirOp::PutDir {
                    name,
                    dir_ref,
                    exists_ok,
                } => match hamt.get(blobs, name).await? {
                    Some(EntryRef::Dir(_)) if *exists_ok => {}
                    Some(_) => return Err(FsError::AlreadyExists(name.clone())),
                    None => {
                        hamt.insert(blobs, name, EntryRef::Dir(dir_ref.clone()))
                            .await?;
                        changed = true;
                    }
                },
                DirOp::RemoveFile { name } => match hamt.get(blobs, name).await? {
                    Some(EntryRef::File(_)) => {
                        hamt.remove(blobs, name).await?;
                        changed = true;
                    }
                    _ => return Err(FsError::NotFound(name.clone())),
                },
                DirOp::RemoveDir { name } => match hamt.get(blobs, name).await? {
                    Some(EntryRef::Dir(_)) => {
                        hamt.remove(blobs, name).await?;
                        changed = true;
                    }
                    _ => return Err(FsError::NotFound(name.clone())),
                },
                DirOp::Rename { from, to } => {
                    if hamt.get(blobs, to).await?.is_some() {
                        return Err(FsError::AlreadyExists(to.clone()));
                    }
                    let entry = hamt
                        .remove(blobs, from)
                        .await?
                        .ok_or_else(|| FsError::NotFound(from.clone()))?;
                    hamt.insert(blobs, to, entry).await?;
                    changed = true;
                }
            }
        }

        if changed {
            resolved.dir.header.index = Some(hamt.save(blobs).await?);
        }
        Ok(changed)
    }

    /// Promotes an oversized inline directory to the HAMT layout, or
    /// demotes an indexed one that has shrunk below the hysteresis
    /// threshold.
    async fn rebalance(&self, resolved: &mut ResolvedDir) -> FsResult<()> {
        let blobs = self.ctx.blobs.as_ref();
        let dir = &mut resolved.dir;
        match dir.header.index {
            None => {
                if dir.inline_entry_count() > self.cfg.promotion_threshold {
                    tracing::debug!(
                        entries = dir.inline_entry_count(),
                        "promoting directory to indexed layout"
                    );
                    let dirs = std::mem::take(&mut dir.dirs);
                    let files = std::mem::take(&mut dir.files);
                    let entries = dirs
                        .into_iter()
                        .map(|(name, d)| (name, EntryRef::Dir(d)))
                        .chain(
                            files
                                .into_iter()
                                .map(|(name, f)| (name, EntryRef::File(f))),
                        );
                    let mut hamt = Hamt::build(self.cfg.hash_function, entries);
                    dir.header.index = Some(hamt.save(blobs).await?);
                }
            }
            Some(index) => {
                if index.entry_count < self.cfg.demotion_threshold as u64 {
                    tracing::debug!(
                        entries = index.entry_count,
                        "demoting directory to inline layout"
                    );
                    let mut hamt = Hamt::open(blobs, &index).await?;
                    for (name, entry) in hamt.collect_all(blobs).await? {
                        match entry {
                            EntryRef::File(f) => {
                                dir.files.insert(name, f);
                            }
                            EntryRef::Dir(d) => {
                                dir.dirs.insert(name, d);
                            }
                        }
                    }
                    dir.header.index = None;
                }
            }
        }
        Ok(())
    }
}

fn apply_ops_inline(dir: &mut DirV1, ops: &[DirOp]) -> FsResult<bool> {
    let mut changed = false;
    for op in ops {
        match op {
            DirOp::PutFile {
                name,
                file,
                overwrite,
            } => {
                if dir.dirs.contains_key(name) {
                    return Err(FsError::AlreadyExists(format!("'{name}' is a directory")));
                }
                let mut file = file.clone();
                if let Some(old) = dir.files.remove(name) {
                    if !overwrite {
                        dir.files.insert(name.clone(), old);
                        return Err(FsError::AlreadyExists(name.clone()));
                    }
                    if file.prev.is_none() {
                        file.prev = Some(Box::new(old));
                    }
                }
                dir.files.insert(name.clone(), file);
                changed = true;
            }
            DirOp::PutDir {
                name,
                dir_ref,
                exists_ok,
            } => {
                if dir.files.contains_key(name) {
                    return Err(FsError::AlreadyExists(name.clone()));
                }
                if dir.dirs.contains_key(name) {
                    if *exists_ok {
                        continue;
                    }
                    return Err(FsError::AlreadyExists(name.clone()));
                }
                dir.dirs.insert(name.clone(), dir_ref.clone());
                changed = true;
            }
            DirOp::RemoveFile { name } => {
                if dir.files.remove(name).is_none() {
                    return Err(FsError::NotFound(name.clone()));
                }
                changed = true;
            }
            DirOp::RemoveDir { name } => {
                if dir.dirs.remove(name).is_none() {
                    return Err(FsError::NotFound(name.clone()));
                }
                changed = true;
            }
            DirOp::Rename { from, to } => {
                if dir.dirs.contains_key(to) || dir.files.contains_key(to) {
                    return Err(FsError::AlreadyExists(to.clone()));
                }
                if let Some(file) = dir.files.remove(from) {
                    dir.files.insert(to.clone(), file);
                } else if let Some(sub) = dir.dirs.remove(from) {
                    dir.dirs.insert(to.clone(), sub);
                } else {
                    return Err(FsError::NotFound(from.clone()));
                }
                changed = true;
            }
        }
    }
    Ok(changed)
}

/// Exponential backoff: `initial * 2^(attempt-1)`, capped.
fn backoff_delay(cfg: &crate::FsConfig, attempt: u32) -> Duration {
    let factor = 1u32 << (attempt - 1).min(16);
    cfg.cas_backoff_initial
        .saturating_mul(factor)
        .min(cfg.cas_backoff_cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs5_core::Hash;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = crate::FsConfig::default();
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(50));
        assert_eq!(backoff_delay(&cfg, 2), Duration::from_millis(100));
        assert_eq!(backoff_delay(&cfg, 3), Duration::from_millis(200));
        assert_eq!(backoff_delay(&cfg, 7), Duration::from_secs(2));
        assert_eq!(backoff_delay(&cfg, 30), Duration::from_secs(2));
    }

    #[test]
    fn inline_put_threads_prev_on_overwrite() {
        let mut dir = DirV1::new();
        let first = FileRef::new(Hash::new(b"v1"), 2);
        apply_ops_inline(
            &mut dir,
            &[DirOp::PutFile {
                name: "f".into(),
                file: first.clone(),
                overwrite: true,
            }],
        )
        .unwrap();
        apply_ops_inline(
            &mut dir,
            &[DirOp::PutFile {
                name: "f".into(),
                file: FileRef::new(Hash::new(b"v2"), 2),
                overwrite: true,
            }],
        )
        .unwrap();
        let current = &dir.files["f"];
        assert_eq!(current.prev.as_deref(), Some(&first));
    }

    #[test]
    fn inline_rename_rejects_existing_target() {
        let mut dir = DirV1::new();
        dir.files.insert("a".into(), FileRef::new(Hash::new(b"a"), 1));
        dir.files.insert("b".into(), FileRef::new(Hash::new(b"b"), 1));
        let err = apply_ops_inline(
            &mut dir,
            &[DirOp::Rename {
                from: "a".into(),
                to: "b".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, FsError::AlreadyExists(_)));
    }
}
