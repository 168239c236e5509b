//! Directory listing with resumable, opaque cursors.
//!
//! Inline directories list in byte-lexicographic name order by merging the
//! `dirs` and `files` maps. Indexed directories page in deterministic trie
//! order with a structural cursor (slot-index path plus leaf offset).
//! Cursors are MessagePack wrapped in URL-safe base64.

use crate::api::Fs5Inner;
use crate::hamt::{EntryRef, Hamt, HamtCursor};
use crate::walk::ResolvedDir;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fs5_core::msgpack::{Decoder, Encoder, Value};
use fs5_core::{FsError, FsResult};
use std::ops::Bound::{Excluded, Unbounded};

/// What kind of entry a cursor position refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorKind {
    Directory,
    File,
}

/// Which entry kinds a listing returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ListInclude {
    Files,
    Dirs,
    #[default]
    Both,
}

/// One listed entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ListEntry {
    pub name: String,
    pub entry: EntryRef,
}

/// A page of entries plus the cursor to fetch the next page, if any.
#[derive(Clone, Debug, PartialEq)]
pub struct ListResult {
    pub entries: Vec<ListEntry>,
    pub cursor: Option<String>,
}

enum CursorData {
    Inline { position: String, kind: CursorKind },
    Indexed(HamtCursor),
}

const CURSOR_INLINE: u64 = 0;
const CURSOR_INDEXED: u64 = 1;

fn encode_cursor(data: &CursorData) -> String {
    let value = match data {
        CursorData::Inline { position, kind } => Value::Array(vec![
            Value::Uint(CURSOR_INLINE),
            Value::Str(position.clone()),
            Value::Uint(match kind {
                CursorKind::Directory => 0,
                CursorKind::File => 1,
            }),
        ]),
        CursorData::Indexed(cursor) => Value::Array(vec![
            Value::Uint(CURSOR_INDEXED),
            Value::Bin(bytes::Bytes::copy_from_slice(&cursor.path)),
            Value::Uint(cursor.offset),
        ]),
    };
    let mut enc = Encoder::new();
    enc.value(&value);
    URL_SAFE_NO_PAD.encode(enc.into_bytes())
}

fn decode_cursor(cursor: &str) -> FsResult<CursorData> {
    let invalid = || FsError::InvalidPath("invalid list cursor".into());
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| invalid())?;
    let mut dec = Decoder::new(&bytes);
    let value = dec.value().map_err(|_| invalid())?;
    let parts = value.as_array().ok_or_else(invalid)?;
    let [tag, a, b] = parts else {
        return Err(invalid());
    };
    match tag.as_uint() {
        Some(CURSOR_INLINE) => {
            let position = a.as_str().ok_or_else(invalid)?.to_owned();
            let kind = match b.as_uint() {
                Some(0) => CursorKind::Directory,
                Some(1) => CursorKind::File,
                _ => return Err(invalid()),
            };
            Ok(CursorData::Inline { position, kind })
        }
        Some(CURSOR_INDEXED) => Ok(CursorData::Indexed(HamtCursor {
            path: a.as_bin().ok_or_else(invalid)?.to_vec(),
            offset: b.as_uint().ok_or_else(invalid)?,
        })),
        _ => Err(invalid()),
    }
}

impl Fs5Inner {
    /// Lists one page of a resolved directory.
    pub(crate) async fn list_dir(
        &self,
        resolved: &mut ResolvedDir,
        cursor: Option<&str>,
        limit: usize,
        include: ListInclude,
    ) -> FsResult<ListResult> {
        let limit = limit.max(1);
        let cursor = cursor.map(decode_cursor).transpose()?;

        if let Some(index) = resolved.dir.header.index {
            let resume = match &cursor {
                None => None,
                Some(CursorData::Indexed(c)) => Some(c.clone()),
                // The directory demoted (or the cursor came from another
                // layout); positions are not transferable.
                Some(CursorData::Inline { .. }) => {
                    return Err(FsError::InvalidPath("invalid list cursor".into()));
                }
            };
            let mut hamt = Hamt::open(self.ctx.blobs.as_ref(), &index).await?;
            let (entries, next) = hamt
                .entries_page(self.ctx.blobs.as_ref(), resume.as_ref(), limit, include)
                .await?;
            return Ok(ListResult {
                entries: entries
                    .into_iter()
                    .map(|(name, entry)| ListEntry { name, entry })
                    .collect(),
                cursor: next.map(|c| encode_cursor(&CursorData::Indexed(c))),
            });
        }

        let start = match &cursor {
            None => Unbounded,
            Some(CursorData::Inline { position, .. }) => Excluded(position.as_str()),
            Some(CursorData::Indexed(_)) => {
                return Err(FsError::InvalidPath("invalid list cursor".into()));
            }
        };

        let dir = &resolved.dir;
        let mut it_dirs = dir
            .dirs
            .range::<str, _>((start, Unbounded))
            .filter(|_| matches!(include, ListInclude::Both | ListInclude::Dirs))
            .peekable();
        let mut it_files = dir
            .files
            .range::<str, _>((start, Unbounded))
            .filter(|_| matches!(include, ListInclude::Both | ListInclude::Files))
            .peekable();

        let mut entries: Vec<ListEntry> = Vec::with_capacity(limit.min(1024));
        let mut last: Option<(String, CursorKind)> = None;
        while entries.len() < limit {
            let take_dir = match (it_dirs.peek(), it_files.peek()) {
                (Some((d, _)), Some((f, _))) => d < f,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_dir {
                let (name, dir_ref) = it_dirs.next().expect("peeked");
                last = Some((name.clone(), CursorKind::Directory));
                entries.push(ListEntry {
                    name: name.clone(),
                    entry: EntryRef::Dir(dir_ref.clone()),
                });
            } else {
                let (name, file_ref) = it_files.next().expect("peeked");
                last = Some((name.clone(), CursorKind::File));
                entries.push(ListEntry {
                    name: name.clone(),
                    entry: EntryRef::File(file_ref.clone()),
                });
            }
        }

        let more = it_dirs.peek().is_some() || it_files.peek().is_some();
        let cursor = match (more, last) {
            (true, Some((position, kind))) => {
                Some(encode_cursor(&CursorData::Inline { position, kind }))
            }
            _ => None,
        };
        Ok(ListResult { entries, cursor })
    }
}
