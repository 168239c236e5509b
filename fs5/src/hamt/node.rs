//! HAMT node wire format.
//!
//! Each node is a content-addressed blob: a small map
//! `{"0": node_kind, "1": payload, "2": hash_function}`. Internal nodes
//! carry `[bitmap, [child tagged-hash …]]`; leaves carry
//! `[[name, entry_kind, record] …]` with entries sorted by name.

use super::{Child, EntryRef, HashFunction, Node};
use crate::dir::{dir_ref_from_value, dir_ref_to_value, file_ref_from_value, file_ref_to_value};
use bytes::Bytes;
use fs5_core::msgpack::{Decoder, Encoder, Value};
use fs5_core::{FsError, FsResult, Hash};

const NODE_KIND_INTERNAL: u64 = 0;
const NODE_KIND_LEAF: u64 = 1;

const ENTRY_KIND_FILE: u64 = 0;
const ENTRY_KIND_DIR: u64 = 1;

fn key(n: u64) -> Value {
    Value::Str(n.to_string())
}

impl EntryRef {
    fn kind(&self) -> u64 {
        match self {
            EntryRef::File(_) => ENTRY_KIND_FILE,
            EntryRef::Dir(_) => ENTRY_KIND_DIR,
        }
    }

    fn record_value(&self) -> Value {
        match self {
            EntryRef::File(file) => file_ref_to_value(None, file),
            EntryRef::Dir(dir) => dir_ref_to_value(None, dir),
        }
    }

    fn from_record(kind: u64, record: &Value) -> FsResult<Self> {
        match kind {
            ENTRY_KIND_FILE => Ok(EntryRef::File(file_ref_from_value(record)?)),
            ENTRY_KIND_DIR => Ok(EntryRef::Dir(dir_ref_from_value(record)?)),
            other => Err(FsError::InvalidDirectory(format!(
                "unknown index entry kind: {other}"
            ))),
        }
    }
}

impl Node {
    /// Serializes this node. Internal children must already be resolved to
    /// hashes, supplied in child-slot order.
    pub(super) fn to_bytes(&self, hash_function: HashFunction, child_hashes: &[Hash]) -> Bytes {
        let (kind, payload) = match self {
            Node::Internal { bitmap, .. } => {
                let children = child_hashes
                    .iter()
                    .map(|h| Value::Bin(Bytes::copy_from_slice(&h.to_tagged())))
                    .collect();
                (
                    NODE_KIND_INTERNAL,
                    Value::Array(vec![
                        Value::Uint(u64::from(*bitmap)),
                        Value::Array(children),
                    ]),
                )
            }
            Node::Leaf { entries } => {
                let items = entries
                    .iter()
                    .map(|(name, entry)| {
                        Value::Array(vec![
                            Value::Str(name.clone()),
                            Value::Uint(entry.kind()),
                            entry.record_value(),
                        ])
                    })
                    .collect();
                (NODE_KIND_LEAF, Value::Array(items))
            }
        };

        let mut enc = Encoder::new();
        enc.value(&Value::Map(vec![
            (key(0), Value::Uint(kind)),
            (key(1), payload),
            (key(2), Value::Uint(u64::from(hash_function.id()))),
        ]));
        enc.into_bytes()
    }

    /// Decodes a node, verifying it was built with the expected hash
    /// function. Children come back as unresolved references.
    pub(super) fn from_bytes(bytes: &[u8], expected: HashFunction) -> FsResult<Node> {
        let mut dec = Decoder::new(bytes);
        let value = dec.value()?;
        if !dec.is_empty() {
            return Err(FsError::InvalidDirectory(
                "trailing bytes after index node".into(),
            ));
        }
        let entries = value
            .as_map()
            .ok_or_else(|| FsError::InvalidDirectory("index node is not a map".into()))?;

        let mut kind = None;
        let mut payload = None;
        let mut hash_function = None;
        for (k, v) in entries {
            match k.as_str() {
                Some("0") => kind = v.as_uint(),
                Some("1") => payload = Some(v),
                Some("2") => hash_function = v.as_uint(),
                _ => {}
            }
        }
        let kind =
            kind.ok_or_else(|| FsError::InvalidDirectory("index node missing kind".into()))?;
        let payload =
            payload.ok_or_else(|| FsError::InvalidDirectory("index node missing payload".into()))?;
        let hash_function = hash_function
            .ok_or_else(|| FsError::InvalidDirectory("index node missing hash function".into()))?;

        let hash_function = u8::try_from(hash_function)
            .ok()
            .and_then(|id| HashFunction::from_id(id).ok())
            .ok_or_else(|| {
                FsError::InvalidDirectory(format!("unknown index hash function: {hash_function}"))
            })?;
        if hash_function != expected {
            return Err(FsError::InvalidDirectory(
                "index node hash function does not match root".into(),
            ));
        }

        match kind {
            NODE_KIND_INTERNAL => {
                let parts = payload.as_array().ok_or_else(|| {
                    FsError::InvalidDirectory("internal node payload is not an array".into())
                })?;
                let [bitmap, children] = parts else {
                    return Err(FsError::InvalidDirectory(
                        "internal node payload must be [bitmap, children]".into(),
                    ));
                };
                let bitmap = bitmap
                    .as_uint()
                    .and_then(|b| u32::try_from(b).ok())
                    .ok_or_else(|| {
                        FsError::InvalidDirectory("internal node bitmap is not a u32".into())
                    })?;
                let hashes = children.as_array().ok_or_else(|| {
                    FsError::InvalidDirectory("internal node children is not an array".into())
                })?;
                if hashes.len() != bitmap.count_ones() as usize {
                    return Err(FsError::InvalidDirectory(
                        "internal node child count does not match bitmap".into(),
                    ));
                }
                let mut children = Vec::with_capacity(hashes.len());
                for h in hashes {
                    let bin = h.as_bin().ok_or_else(|| {
                        FsError::InvalidDirectory("internal node child is not a byte string".into())
                    })?;
                    let hash = Hash::from_tagged(bin).map_err(|e| {
                        FsError::InvalidDirectory(format!("bad index child hash: {e}"))
                    })?;
                    children.push(Child::Ref(hash));
                }
                Ok(Node::Internal { bitmap, children })
            }
            NODE_KIND_LEAF => {
                let items = payload.as_array().ok_or_else(|| {
                    FsError::InvalidDirectory("leaf node payload is not an array".into())
                })?;
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let parts = item.as_array().ok_or_else(|| {
                        FsError::InvalidDirectory("leaf entry is not an array".into())
                    })?;
                    let [name, kind, record] = parts else {
                        return Err(FsError::InvalidDirectory(
                            "leaf entry must be [name, kind, record]".into(),
                        ));
                    };
                    let name = name.as_str().ok_or_else(|| {
                        FsError::InvalidDirectory("leaf entry name is not a string".into())
                    })?;
                    let kind = kind.as_uint().ok_or_else(|| {
                        FsError::InvalidDirectory("leaf entry kind is not an integer".into())
                    })?;
                    entries.push((name.to_owned(), EntryRef::from_record(kind, record)?));
                }
                // Entries are maintained sorted; a node violating that is
                // not one we wrote.
                if !entries.is_sorted_by(|a, b| a.0 < b.0) {
                    return Err(FsError::InvalidDirectory(
                        "leaf entries are not sorted".into(),
                    ));
                }
                Ok(Node::Leaf { entries })
            }
            other => Err(FsError::InvalidDirectory(format!(
                "unknown index node kind: {other}"
            ))),
        }
    }
}
