//! Pure data structures and the canonical wire encoding for fs5 directories.
//!
//! This module defines `DirV1` snapshots and related types. It contains no
//! I/O or async code and is shared across readers/writers.
//!
//! A serialized directory is the two magic bytes `5f 5d` followed by three
//! MessagePack values: the header map, the `dirs` map and the `files` map.
//! Record maps inside `dirs`/`files` use ASCII-decimal keys emitted in
//! ascending integer order; unknown keys survive round trips through the
//! `extra` maps. Encoding is canonical: equal logical content always
//! produces identical bytes, and therefore identical content hashes.

use crate::hamt::HamtRootRef;
use bytes::Bytes;
use fs5_core::blob::BlobLocation;
use fs5_core::hash::Hash;
use fs5_core::link::DirLink;
use fs5_core::msgpack::{Decoder, Encoder, Value};
use fs5_core::{FsError, FsResult, PublicKeyEd25519};
use std::collections::BTreeMap;

/// Format identifier and version prefixed to every serialized directory.
pub const DIR_MAGIC: [u8; 2] = [0x5f, 0x5d];

/// Keys preserved from unknown record fields: either an integer wire key or
/// an arbitrary string key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExtraKey {
    Int(u64),
    Str(String),
}

/// Unknown record fields, preserved verbatim for forward compatibility.
pub type ExtraMap = BTreeMap<ExtraKey, Value>;

mod file_key {
    pub const NAME: u64 = 1;
    pub const TIMESTAMP: u64 = 2;
    pub const HASH: u64 = 3;
    pub const LOCATIONS: u64 = 4;
    pub const SIZE: u64 = 5;
    pub const MEDIA_TYPE: u64 = 6;
    pub const HASH_TYPE: u64 = 7;
    pub const TIMESTAMP_SUBSEC_NANOS: u64 = 8;
    pub const PREV: u64 = 9;
}

mod dir_key {
    pub const NAME: u64 = 1;
    pub const TS_SECONDS: u64 = 2;
    pub const LINK: u64 = 3;
    pub const ENC_KEY: u64 = 5;
    pub const TS_NANOS: u64 = 8;
}

/// Header key carrying the HAMT root reference once a directory is
/// promoted to the indexed layout.
const HEADER_KEY_INDEX: u64 = 1;

/// A directory snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct DirV1 {
    magic: [u8; 2],
    pub header: DirHeader,
    pub dirs: BTreeMap<String, DirRef>,
    pub files: BTreeMap<String, FileRef>,
}

impl Default for DirV1 {
    fn default() -> Self {
        Self::new()
    }
}

impl DirV1 {
    /// Creates an empty directory snapshot.
    pub fn new() -> Self {
        Self {
            magic: DIR_MAGIC,
            header: DirHeader::new(),
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Number of entries held inline. Zero for a HAMT-backed directory,
    /// whose count lives in the header reference.
    pub fn inline_entry_count(&self) -> usize {
        self.dirs.len() + self.files.len()
    }

    /// Total logical entry count, regardless of layout.
    pub fn total_entry_count(&self) -> u64 {
        match &self.header.index {
            Some(index) => index.entry_count,
            None => self.inline_entry_count() as u64,
        }
    }

    /// Returns true once this directory carries a HAMT index.
    pub fn is_indexed(&self) -> bool {
        self.header.index.is_some()
    }

    /// Encodes this directory to its canonical bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut enc = Encoder::new();
        enc.raw(&self.magic);
        enc.value(&header_to_value(&self.header));
        enc.map_len(self.dirs.len());
        for (name, dir_ref) in &self.dirs {
            enc.str(name);
            enc.value(&dir_ref_to_value(Some(name), dir_ref));
        }
        enc.map_len(self.files.len());
        for (name, file_ref) in &self.files {
            enc.str(name);
            enc.value(&file_ref_to_value(Some(name), file_ref));
        }
        enc.into_bytes()
    }

    /// Decodes a directory, rejecting unknown magic, duplicate names and
    /// trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> FsResult<DirV1> {
        if bytes.len() < 2 || bytes[..2] != DIR_MAGIC {
            return Err(FsError::InvalidDirectory("unknown magic".into()));
        }
        let mut dec = Decoder::new(&bytes[2..]);
        let header = header_from_value(&dec.value()?)?;

        let mut dirs = BTreeMap::new();
        let dir_count = dec.map_header()?;
        for _ in 0..dir_count {
            let name = dec.str()?.to_owned();
            let dir_ref = dir_ref_from_value(&dec.value()?)?;
            if dirs.insert(name.clone(), dir_ref).is_some() {
                return Err(FsError::InvalidDirectory(format!(
                    "duplicate directory name: {name}"
                )));
            }
        }

        let mut files = BTreeMap::new();
        let file_count = dec.map_header()?;
        for _ in 0..file_count {
            let name = dec.str()?.to_owned();
            let file_ref = file_ref_from_value(&dec.value()?)?;
            if dirs.contains_key(&name) || files.insert(name.clone(), file_ref).is_some() {
                return Err(FsError::InvalidDirectory(format!(
                    "duplicate entry name: {name}"
                )));
            }
        }

        if !dec.is_empty() {
            return Err(FsError::InvalidDirectory(
                "trailing bytes after directory".into(),
            ));
        }

        Ok(DirV1 {
            magic: DIR_MAGIC,
            header,
            dirs,
            files,
        })
    }
}

/// Directory header. Empty except for the optional HAMT index reference;
/// unknown keys are preserved for schema evolution.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DirHeader {
    pub index: Option<HamtRootRef>,
    pub extra: Option<ExtraMap>,
}

impl DirHeader {
    pub fn new() -> Self {
        Self {
            index: None,
            extra: None,
        }
    }
}

/// Reference to a child directory.
#[derive(Clone, Debug, PartialEq)]
pub struct DirRef {
    pub link: DirLink,
    pub ts_seconds: Option<i64>,
    pub ts_nanos: Option<u32>,
    /// XChaCha20-Poly1305 key for the child's directory blobs; set when the
    /// subtree is encrypted.
    pub enc_key: Option<[u8; 32]>,
    pub extra: Option<ExtraMap>,
}

impl DirRef {
    pub fn new(link: DirLink) -> Self {
        Self {
            link,
            ts_seconds: None,
            ts_nanos: None,
            enc_key: None,
            extra: None,
        }
    }

    /// Creates a `DirRef` that points to a directory by Blake3 hash.
    pub fn from_hash(hash: Hash) -> Self {
        Self::new(DirLink::FixedHashBlake3(hash))
    }

    /// Creates a `DirRef` resolved through a registry entry.
    pub fn from_registry_key(public_key: PublicKeyEd25519) -> Self {
        Self::new(DirLink::MutableRegistryEd25519(public_key))
    }
}

/// Reference to a file, with optional history threaded through `prev`.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRef {
    pub hash: Hash,
    pub size: u64,
    pub media_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub timestamp_subsec_nanos: Option<u32>,
    pub locations: Option<Vec<BlobLocation>>,
    pub hash_type: Option<u8>,
    /// The version this one replaced.
    pub prev: Option<Box<FileRef>>,
    pub extra: Option<ExtraMap>,
}

impl FileRef {
    /// Creates a hashed `FileRef` referencing content by Blake3 `hash` and `size`.
    pub fn new(hash: Hash, size: u64) -> Self {
        Self {
            hash,
            size,
            media_type: None,
            timestamp: None,
            timestamp_subsec_nanos: None,
            locations: None,
            hash_type: None,
            prev: None,
            extra: None,
        }
    }

    /// Creates an inline-blob `FileRef` storing data directly in metadata.
    /// Suitable for very small blobs; large blobs should use the blob store.
    pub fn new_inline_blob(blob: Bytes) -> Self {
        let hash = Hash::new(&blob);
        let size = blob.len() as u64;
        let mut file_ref = Self::new(hash, size);
        file_ref.locations = Some(vec![BlobLocation::IdentityRawBinary(blob)]);
        file_ref
    }

    /// The number of versions reachable through the `prev` chain, including
    /// this one.
    pub fn version_count(&self) -> usize {
        let mut count = 1;
        let mut cur = self;
        while let Some(prev) = cur.prev.as_deref() {
            count += 1;
            cur = prev;
        }
        count
    }
}

// --- record encoding ---

fn wire_key(n: u64) -> Value {
    Value::Str(n.to_string())
}

/// Merges typed fields with preserved extras into a canonical record map:
/// integer keys ascending, then string keys in byte-lex order. Extras whose
/// integer key collides with a typed field are dropped in favor of the
/// typed value.
fn finish_record(mut fields: Vec<(u64, Value)>, extra: &Option<ExtraMap>) -> Value {
    let mut str_fields: Vec<(String, Value)> = Vec::new();
    if let Some(extra) = extra {
        for (key, value) in extra {
            match key {
                ExtraKey::Int(n) => {
                    if !fields.iter().any(|(k, _)| k == n) {
                        fields.push((*n, value.clone()));
                    }
                }
                ExtraKey::Str(s) => str_fields.push((s.clone(), value.clone())),
            }
        }
    }
    fields.sort_by_key(|(k, _)| *k);
    let mut entries = Vec::with_capacity(fields.len() + str_fields.len());
    for (k, v) in fields {
        entries.push((wire_key(k), v));
    }
    for (k, v) in str_fields {
        entries.push((Value::Str(k), v));
    }
    Value::Map(entries)
}

/// Interprets a record map key. Canonical decimal strings fold into the
/// integer key space; anything else stays a string key.
fn record_key(key: &Value) -> FsResult<ExtraKey> {
    match key {
        Value::Uint(n) => Ok(ExtraKey::Int(*n)),
        Value::Str(s) => match s.parse::<u64>() {
            Ok(n) if n.to_string() == *s => Ok(ExtraKey::Int(n)),
            _ => Ok(ExtraKey::Str(s.clone())),
        },
        other => Err(FsError::InvalidDirectory(format!(
            "record key has invalid type: {other}"
        ))),
    }
}

fn expect_uint(value: &Value, what: &str) -> FsResult<u64> {
    value
        .as_uint()
        .ok_or_else(|| FsError::InvalidDirectory(format!("{what} is not an unsigned integer")))
}

fn expect_u32(value: &Value, what: &str) -> FsResult<u32> {
    u32::try_from(expect_uint(value, what)?)
        .map_err(|_| FsError::InvalidDirectory(format!("{what} out of range")))
}

fn expect_u8(value: &Value, what: &str) -> FsResult<u8> {
    u8::try_from(expect_uint(value, what)?)
        .map_err(|_| FsError::InvalidDirectory(format!("{what} out of range")))
}

fn expect_i64(value: &Value, what: &str) -> FsResult<i64> {
    match value {
        Value::Uint(n) => i64::try_from(*n)
            .map_err(|_| FsError::InvalidDirectory(format!("{what} out of range"))),
        Value::Int(n) => Ok(*n),
        _ => Err(FsError::InvalidDirectory(format!(
            "{what} is not an integer"
        ))),
    }
}

fn expect_bin<'v>(value: &'v Value, what: &str) -> FsResult<&'v Bytes> {
    value
        .as_bin()
        .ok_or_else(|| FsError::InvalidDirectory(format!("{what} is not a byte string")))
}

fn expect_str<'v>(value: &'v Value, what: &str) -> FsResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| FsError::InvalidDirectory(format!("{what} is not a string")))
}

fn decode_link(value: &Value) -> FsResult<DirLink> {
    let bytes = expect_bin(value, "directory link")?;
    DirLink::from_bytes(bytes).map_err(|e| FsError::InvalidDirectory(format!("bad link: {e}")))
}

fn decode_tagged_hash(value: &Value) -> FsResult<Hash> {
    let bytes = expect_bin(value, "file hash")?;
    Hash::from_tagged(bytes).map_err(|e| FsError::InvalidDirectory(format!("bad hash: {e}")))
}

/// Encodes a `FileRef` record. `prev` chains are unrolled and rebuilt from
/// the oldest version up so arbitrarily deep histories never recurse.
pub(crate) fn file_ref_to_value(name: Option<&str>, file: &FileRef) -> Value {
    let mut chain: Vec<&FileRef> = vec![file];
    let mut cur = file;
    while let Some(prev) = cur.prev.as_deref() {
        chain.push(prev);
        cur = prev;
    }

    let mut prev_value: Option<Value> = None;
    for (i, fr) in chain.iter().enumerate().rev() {
        let mut fields: Vec<(u64, Value)> = Vec::new();
        // Only the outermost record carries the entry name.
        if i == 0
            && let Some(name) = name
        {
            fields.push((file_key::NAME, Value::Str(name.to_owned())));
        }
        if let Some(ts) = fr.timestamp {
            fields.push((file_key::TIMESTAMP, Value::Uint(ts)));
        }
        fields.push((
            file_key::HASH,
            Value::Bin(Bytes::copy_from_slice(&fr.hash.to_tagged())),
        ));
        if let Some(locations) = &fr.locations {
            fields.push((
                file_key::LOCATIONS,
                Value::Array(locations.iter().map(BlobLocation::to_value).collect()),
            ));
        }
        fields.push((file_key::SIZE, Value::Uint(fr.size)));
        if let Some(media_type) = &fr.media_type {
            fields.push((file_key::MEDIA_TYPE, Value::Str(media_type.clone())));
        }
        if let Some(hash_type) = fr.hash_type {
            fields.push((file_key::HASH_TYPE, Value::Uint(u64::from(hash_type))));
        }
        if let Some(nanos) = fr.timestamp_subsec_nanos {
            fields.push((
                file_key::TIMESTAMP_SUBSEC_NANOS,
                Value::Uint(u64::from(nanos)),
            ));
        }
        if let Some(pv) = prev_value.take() {
            fields.push((file_key::PREV, pv));
        }
        prev_value = Some(finish_record(fields, &fr.extra));
    }
    prev_value.expect("chain is never empty")
}

/// Decodes a `FileRef` record. The stored name, if any, is ignored: the
/// enclosing map key is authoritative.
pub(crate) fn file_ref_from_value(value: &Value) -> FsResult<FileRef> {
    let entries = value
        .as_map()
        .ok_or_else(|| FsError::InvalidDirectory("file record is not a map".into()))?;

    let mut hash = None;
    let mut size = None;
    let mut media_type = None;
    let mut timestamp = None;
    let mut timestamp_subsec_nanos = None;
    let mut locations = None;
    let mut hash_type = None;
    let mut prev = None;
    let mut extra = ExtraMap::new();

    for (key, field) in entries {
        match record_key(key)? {
            ExtraKey::Int(file_key::NAME) => {}
            ExtraKey::Int(file_key::TIMESTAMP) => {
                timestamp = Some(expect_uint(field, "file timestamp")?);
            }
            ExtraKey::Int(file_key::HASH) => hash = Some(decode_tagged_hash(field)?),
            ExtraKey::Int(file_key::LOCATIONS) => {
                let items = field.as_array().ok_or_else(|| {
                    FsError::InvalidDirectory("file locations is not an array".into())
                })?;
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    parsed.push(BlobLocation::from_value(item).map_err(|e| {
                        FsError::InvalidDirectory(format!("bad blob location: {e}"))
                    })?);
                }
                locations = Some(parsed);
            }
            ExtraKey::Int(file_key::SIZE) => size = Some(expect_uint(field, "file size")?),
            ExtraKey::Int(file_key::MEDIA_TYPE) => {
                media_type = Some(expect_str(field, "media type")?.to_owned());
            }
            ExtraKey::Int(file_key::HASH_TYPE) => {
                hash_type = Some(expect_u8(field, "hash type")?);
            }
            ExtraKey::Int(file_key::TIMESTAMP_SUBSEC_NANOS) => {
                timestamp_subsec_nanos = Some(expect_u32(field, "subsecond nanos")?);
            }
            ExtraKey::Int(file_key::PREV) => {
                prev = Some(Box::new(file_ref_from_value(field)?));
            }
            key => {
                extra.insert(key, field.clone());
            }
        }
    }

    Ok(FileRef {
        hash: hash.ok_or_else(|| FsError::InvalidDirectory("file record missing hash".into()))?,
        size: size.ok_or_else(|| FsError::InvalidDirectory("file record missing size".into()))?,
        media_type,
        timestamp,
        timestamp_subsec_nanos,
        locations,
        hash_type,
        prev,
        extra: if extra.is_empty() { None } else { Some(extra) },
    })
}

/// Encodes a `DirRef` record.
pub(crate) fn dir_ref_to_value(name: Option<&str>, dir: &DirRef) -> Value {
    let mut fields: Vec<(u64, Value)> = Vec::new();
    if let Some(name) = name {
        fields.push((dir_key::NAME, Value::Str(name.to_owned())));
    }
    if let Some(ts) = dir.ts_seconds {
        fields.push((dir_key::TS_SECONDS, Value::Int(ts)));
    }
    fields.push((
        dir_key::LINK,
        Value::Bin(Bytes::copy_from_slice(&dir.link.to_bytes())),
    ));
    if let Some(key) = &dir.enc_key {
        fields.push((dir_key::ENC_KEY, Value::Bin(Bytes::copy_from_slice(key))));
    }
    if let Some(nanos) = dir.ts_nanos {
        fields.push((dir_key::TS_NANOS, Value::Uint(u64::from(nanos))));
    }
    finish_record(fields, &dir.extra)
}

/// Decodes a `DirRef` record.
pub(crate) fn dir_ref_from_value(value: &Value) -> FsResult<DirRef> {
    let entries = value
        .as_map()
        .ok_or_else(|| FsError::InvalidDirectory("directory record is not a map".into()))?;

    let mut link = None;
    let mut ts_seconds = None;
    let mut ts_nanos = None;
    let mut enc_key = None;
    let mut extra = ExtraMap::new();

    for (key, field) in entries {
        match record_key(key)? {
            ExtraKey::Int(dir_key::NAME) => {}
            ExtraKey::Int(dir_key::TS_SECONDS) => {
                ts_seconds = Some(expect_i64(field, "directory timestamp")?);
            }
            ExtraKey::Int(dir_key::LINK) => link = Some(decode_link(field)?),
            ExtraKey::Int(dir_key::ENC_KEY) => {
                let bytes = expect_bin(field, "directory encryption key")?;
                let key: [u8; 32] = bytes.as_ref().try_into().map_err(|_| {
                    FsError::InvalidDirectory("directory encryption key must be 32 bytes".into())
                })?;
                enc_key = Some(key);
            }
            ExtraKey::Int(dir_key::TS_NANOS) => {
                ts_nanos = Some(expect_u32(field, "directory timestamp nanos")?);
            }
            key => {
                extra.insert(key, field.clone());
            }
        }
    }

    Ok(DirRef {
        link: link
            .ok_or_else(|| FsError::InvalidDirectory("directory record missing link".into()))?,
        ts_seconds,
        ts_nanos,
        enc_key,
        extra: if extra.is_empty() { None } else { Some(extra) },
    })
}

fn header_to_value(header: &DirHeader) -> Value {
    let mut fields: Vec<(u64, Value)> = Vec::new();
    if let Some(index) = &header.index {
        fields.push((HEADER_KEY_INDEX, index.to_value()));
    }
    finish_record(fields, &header.extra)
}

fn header_from_value(value: &Value) -> FsResult<DirHeader> {
    let entries = value
        .as_map()
        .ok_or_else(|| FsError::InvalidDirectory("directory header is not a map".into()))?;

    let mut index = None;
    let mut extra = ExtraMap::new();
    for (key, field) in entries {
        match record_key(key)? {
            ExtraKey::Int(HEADER_KEY_INDEX) => index = Some(HamtRootRef::from_value(field)?),
            key => {
                extra.insert(key, field.clone());
            }
        }
    }

    Ok(DirHeader {
        index,
        extra: if extra.is_empty() { None } else { Some(extra) },
    })
}
