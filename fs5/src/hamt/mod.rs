//! Hash-array-mapped-trie index for large directories.
//!
//! A directory that grows past the promotion threshold moves its entries
//! out of the inline `dirs`/`files` maps into this structure. Entries are
//! addressed by a 64-bit hash of their name, consumed five bits per level;
//! internal nodes keep a 32-bit occupancy bitmap over a compact child
//! array, leaves hold up to [`LEAF_CAPACITY`] name-sorted entries and split
//! when they overflow. Every node is a content-addressed blob, loaded
//! lazily and re-uploaded along the mutated spine on save.

mod node;

use crate::dir::{DirRef, FileRef};
use crate::listing::ListInclude;
use fs5_core::msgpack::Value;
use fs5_core::{BlobApi, FsError, FsResult, Hash};
use xxhash_rust::xxh64::xxh64;

/// Bits of the name hash consumed per trie level.
pub const BITS_PER_LEVEL: u8 = 5;

/// Maximum entries in a leaf before it splits.
pub const LEAF_CAPACITY: usize = 16;

/// The hash function addressing entries within one tree. Recorded in the
/// root reference and fixed for the lifetime of that tree; records produced
/// by different functions must never be mixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashFunction {
    /// XXH64 with seed 0. The default, chosen for speed.
    Xxh64,
    /// Blake3-256 truncated to its first 8 digest bytes (big-endian).
    /// Fallback for hosts without an XXH64 implementation.
    Blake3Truncated,
}

impl HashFunction {
    pub fn id(self) -> u8 {
        match self {
            HashFunction::Xxh64 => 0,
            HashFunction::Blake3Truncated => 1,
        }
    }

    pub fn from_id(id: u8) -> FsResult<Self> {
        match id {
            0 => Ok(HashFunction::Xxh64),
            1 => Ok(HashFunction::Blake3Truncated),
            other => Err(FsError::InvalidDirectory(format!(
                "unknown index hash function id: {other}"
            ))),
        }
    }

    /// 64-bit bucket hash of an entry name.
    pub fn hash_name(&self, name: &str) -> u64 {
        match self {
            HashFunction::Xxh64 => xxh64(name.as_bytes(), 0),
            HashFunction::Blake3Truncated => {
                let digest = blake3::hash(name.as_bytes());
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest.as_bytes()[..8]);
                u64::from_be_bytes(prefix)
            }
        }
    }
}

/// Reference to a HAMT root, carried in the directory header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HamtRootRef {
    pub root: Hash,
    pub hash_function: HashFunction,
    pub bits_per_level: u8,
    pub entry_count: u64,
}

impl HamtRootRef {
    pub(crate) fn to_value(&self) -> Value {
        Value::Map(vec![
            (
                Value::Str("0".into()),
                Value::Bin(bytes::Bytes::copy_from_slice(&self.root.to_tagged())),
            ),
            (
                Value::Str("1".into()),
                Value::Uint(u64::from(self.hash_function.id())),
            ),
            (
                Value::Str("2".into()),
                Value::Uint(u64::from(self.bits_per_level)),
            ),
            (Value::Str("3".into()), Value::Uint(self.entry_count)),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> FsResult<Self> {
        let entries = value
            .as_map()
            .ok_or_else(|| FsError::InvalidDirectory("index reference is not a map".into()))?;
        let mut root = None;
        let mut hash_function = None;
        let mut bits_per_level = None;
        let mut entry_count = None;
        for (k, v) in entries {
            match k.as_str() {
                Some("0") => {
                    let bin = v.as_bin().ok_or_else(|| {
                        FsError::InvalidDirectory("index root is not a byte string".into())
                    })?;
                    root = Some(Hash::from_tagged(bin).map_err(|e| {
                        FsError::InvalidDirectory(format!("bad index root hash: {e}"))
                    })?);
                }
                Some("1") => hash_function = v.as_uint(),
                Some("2") => bits_per_level = v.as_uint(),
                Some("3") => entry_count = v.as_uint(),
                _ => {}
            }
        }
        let root =
            root.ok_or_else(|| FsError::InvalidDirectory("index reference missing root".into()))?;
        let hash_function = hash_function
            .and_then(|id| u8::try_from(id).ok())
            .ok_or_else(|| {
                FsError::InvalidDirectory("index reference missing hash function".into())
            })?;
        let bits_per_level = bits_per_level
            .and_then(|b| u8::try_from(b).ok())
            .ok_or_else(|| {
                FsError::InvalidDirectory("index reference missing bits per level".into())
            })?;
        if bits_per_level != BITS_PER_LEVEL {
            return Err(FsError::InvalidDirectory(format!(
                "unsupported index bits per level: {bits_per_level}"
            )));
        }
        Ok(HamtRootRef {
            root,
            hash_function: HashFunction::from_id(hash_function)?,
            bits_per_level,
            entry_count: entry_count.ok_or_else(|| {
                FsError::InvalidDirectory("index reference missing entry count".into())
            })?,
        })
    }
}

/// A directory entry stored in the index: either a file or a subdirectory
/// reference. Name uniqueness across both kinds falls out of keying the
/// trie by name.
#[derive(Clone, Debug, PartialEq)]
pub enum EntryRef {
    File(FileRef),
    Dir(DirRef),
}

#[derive(Clone, Debug)]
enum Child {
    Loaded(Box<Node>),
    Ref(Hash),
}

#[derive(Clone, Debug)]
enum Node {
    Internal { bitmap: u32, children: Vec<Child> },
    /// Entries sorted by name.
    Leaf { entries: Vec<(String, EntryRef)> },
}

/// The 5-bit slot index for `hash` at `depth`. Depths past the end of the
/// 64-bit hash all index slot 0, which keeps fully colliding entries in a
/// single (oversized) leaf instead of recursing forever.
fn slot_index(hash: u64, depth: u32) -> u32 {
    let shift = depth * u32::from(BITS_PER_LEVEL);
    if shift >= 64 {
        0
    } else {
        ((hash >> shift) & 0x1f) as u32
    }
}

/// Position of slot `index` in the compact child array: the number of
/// occupied slots below it. All arithmetic is unsigned 32-bit; the bitmap
/// must never be treated as a signed quantity.
fn child_position(bitmap: u32, index: u32) -> usize {
    (bitmap & ((1u32 << index) - 1)).count_ones() as usize
}

fn can_split(depth: u32) -> bool {
    depth * u32::from(BITS_PER_LEVEL) < 64
}

/// Resumable position within a tree: the slot-index path from the root to
/// a leaf plus the offset of the next entry within that leaf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HamtCursor {
    pub path: Vec<u8>,
    pub offset: u64,
}

/// An in-memory view over one indexed directory.
#[derive(Debug)]
pub struct Hamt {
    root: Node,
    hash_function: HashFunction,
    entry_count: u64,
}

impl Hamt {
    /// Creates an empty tree using the given hash function.
    pub fn new(hash_function: HashFunction) -> Self {
        Self {
            root: Node::Internal {
                bitmap: 0,
                children: Vec::new(),
            },
            hash_function,
            entry_count: 0,
        }
    }

    /// Opens a tree from its root reference, fetching the root node.
    pub async fn open(blobs: &dyn BlobApi, root_ref: &HamtRootRef) -> FsResult<Self> {
        if root_ref.bits_per_level != BITS_PER_LEVEL {
            return Err(FsError::InvalidDirectory(format!(
                "unsupported index bits per level: {}",
                root_ref.bits_per_level
            )));
        }
        let root = load_node(blobs, root_ref.hash_function, &root_ref.root).await?;
        Ok(Self {
            root,
            hash_function: root_ref.hash_function,
            entry_count: root_ref.entry_count,
        })
    }

    /// Builds a tree from scratch out of in-memory entries (promotion).
    pub fn build(
        hash_function: HashFunction,
        entries: impl IntoIterator<Item = (String, EntryRef)>,
    ) -> Self {
        let mut hamt = Self::new(hash_function);
        for (name, entry) in entries {
            let hash = hash_function.hash_name(&name);
            if insert_in_memory(&mut hamt.root, hash_function, 0, hash, &name, entry).is_none() {
                hamt.entry_count += 1;
            }
        }
        hamt
    }

    pub fn len(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Inserts or replaces an entry, returning the replaced value.
    pub async fn insert(
        &mut self,
        blobs: &dyn BlobApi,
        name: &str,
        entry: EntryRef,
    ) -> FsResult<Option<EntryRef>> {
        let hash = self.hash_function.hash_name(name);
        ensure_path_loaded(&mut self.root, blobs, self.hash_function, hash, 0).await?;
        let replaced = insert_in_memory(&mut self.root, self.hash_function, 0, hash, name, entry);
        if replaced.is_none() {
            self.entry_count += 1;
        }
        Ok(replaced)
    }

    /// Looks up an entry by name.
    pub async fn get(&mut self, blobs: &dyn BlobApi, name: &str) -> FsResult<Option<EntryRef>> {
        let hash = self.hash_function.hash_name(name);
        ensure_path_loaded(&mut self.root, blobs, self.hash_function, hash, 0).await?;
        Ok(get_in_memory(&self.root, 0, hash, name).cloned())
    }

    /// Removes an entry by name, returning it. Empty leaves are unlinked
    /// from their parents and single-leaf internal nodes are compacted.
    pub async fn remove(&mut self, blobs: &dyn BlobApi, name: &str) -> FsResult<Option<EntryRef>> {
        let hash = self.hash_function.hash_name(name);
        ensure_path_loaded(&mut self.root, blobs, self.hash_function, hash, 0).await?;
        let removed = remove_in_memory(&mut self.root, 0, hash, name);
        if removed.is_some() {
            self.entry_count -= 1;
        }
        Ok(removed)
    }

    /// Uploads every loaded node and returns the new root reference.
    pub async fn save(&mut self, blobs: &dyn BlobApi) -> FsResult<HamtRootRef> {
        let root = save_node(&mut self.root, blobs, self.hash_function).await?;
        Ok(HamtRootRef {
            root,
            hash_function: self.hash_function,
            bits_per_level: BITS_PER_LEVEL,
            entry_count: self.entry_count,
        })
    }

    /// Collects every entry in trie order (demotion and recursive scans).
    pub async fn collect_all(
        &mut self,
        blobs: &dyn BlobApi,
    ) -> FsResult<Vec<(String, EntryRef)>> {
        let mut out = Vec::with_capacity(self.entry_count as usize);
        collect_rec(&mut self.root, blobs, self.hash_function, &mut out).await?;
        Ok(out)
    }

    /// Returns up to `limit` entries matching `include`, resuming from
    /// `cursor`. A returned cursor means more entries may follow.
    pub async fn entries_page(
        &mut self,
        blobs: &dyn BlobApi,
        cursor: Option<&HamtCursor>,
        limit: usize,
        include: ListInclude,
    ) -> FsResult<(Vec<(String, EntryRef)>, Option<HamtCursor>)> {
        let limit = limit.max(1);
        let mut out = Vec::new();
        let mut path = Vec::new();
        let empty: &[u8] = &[];
        let (skip_path, skip_offset) = match cursor {
            Some(c) => (c.path.as_slice(), c.offset),
            None => (empty, 0),
        };
        let next = page_rec(
            &mut self.root,
            blobs,
            self.hash_function,
            skip_path,
            skip_offset,
            &mut path,
            &mut out,
            limit,
            include,
        )
        .await?;
        Ok((out, next))
    }
}

async fn load_node(
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
    hash: &Hash,
) -> FsResult<Node> {
    let bytes = blobs.download_blob(hash).await?;
    let actual = Hash::new(&bytes);
    if actual != *hash {
        return Err(FsError::HashMismatch {
            expected: *hash,
            actual,
        });
    }
    Node::from_bytes(&bytes, hash_function)
}

async fn ensure_child_loaded(
    child: &mut Child,
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
) -> FsResult<()> {
    if let Child::Ref(hash) = child {
        let hash = *hash;
        let node = load_node(blobs, hash_function, &hash).await?;
        *child = Child::Loaded(Box::new(node));
    }
    Ok(())
}

/// Loads every node along the descent path of `hash`, so the sync
/// mutation helpers below never encounter an unresolved reference.
async fn ensure_path_loaded(
    node: &mut Node,
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
    hash: u64,
    depth: u32,
) -> FsResult<()> {
    if let Node::Internal { bitmap, children } = node {
        let index = slot_index(hash, depth);
        if *bitmap & (1u32 << index) != 0 {
            let pos = child_position(*bitmap, index);
            ensure_child_loaded(&mut children[pos], blobs, hash_function).await?;
            if let Child::Loaded(child) = &mut children[pos] {
                Box::pin(ensure_path_loaded(child, blobs, hash_function, hash, depth + 1)).await?;
            }
        }
    }
    Ok(())
}

fn insert_in_memory(
    node: &mut Node,
    hash_function: HashFunction,
    depth: u32,
    hash: u64,
    name: &str,
    entry: EntryRef,
) -> Option<EntryRef> {
    match node {
        Node::Internal { bitmap, children } => {
            let index = slot_index(hash, depth);
            let pos = child_position(*bitmap, index);
            if *bitmap & (1u32 << index) == 0 {
                children.insert(
                    pos,
                    Child::Loaded(Box::new(Node::Leaf {
                        entries: vec![(name.to_owned(), entry)],
                    })),
                );
                *bitmap |= 1u32 << index;
                return None;
            }
            match &mut children[pos] {
                Child::Loaded(child) => {
                    insert_in_memory(child, hash_function, depth + 1, hash, name, entry)
                }
                // The path is loaded before mutation; an unresolved child
                // here is a logic error, not corrupt data.
                Child::Ref(_) => unreachable!("index path not loaded before insert"),
            }
        }
        Node::Leaf { entries } => {
            match entries.binary_search_by(|(k, _)| k.as_str().cmp(name)) {
                Ok(i) => Some(std::mem::replace(&mut entries[i].1, entry)),
                Err(i) => {
                    entries.insert(i, (name.to_owned(), entry));
                    if entries.len() > LEAF_CAPACITY && can_split(depth) {
                        let drained = std::mem::take(entries);
                        *node = split_leaf(drained, hash_function, depth);
                    }
                    None
                }
            }
        }
    }
}

/// Converts an overflowing leaf into an internal node, redistributing its
/// entries by their next 5-bit index. Redistribution may overflow a new
/// leaf in turn, in which case the recursion splits again one level down.
fn split_leaf(
    entries: Vec<(String, EntryRef)>,
    hash_function: HashFunction,
    depth: u32,
) -> Node {
    let mut node = Node::Internal {
        bitmap: 0,
        children: Vec::new(),
    };
    for (name, entry) in entries {
        let hash = hash_function.hash_name(&name);
        insert_in_memory(&mut node, hash_function, depth, hash, &name, entry);
    }
    node
}

fn get_in_memory<'n>(node: &'n Node, depth: u32, hash: u64, name: &str) -> Option<&'n EntryRef> {
    match node {
        Node::Internal { bitmap, children } => {
            let index = slot_index(hash, depth);
            if *bitmap & (1u32 << index) == 0 {
                return None;
            }
            let pos = child_position(*bitmap, index);
            match &children[pos] {
                Child::Loaded(child) => get_in_memory(child, depth + 1, hash, name),
                Child::Ref(_) => None,
            }
        }
        Node::Leaf { entries } => entries
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|i| &entries[i].1),
    }
}

fn remove_in_memory(node: &mut Node, depth: u32, hash: u64, name: &str) -> Option<EntryRef> {
    match node {
        Node::Leaf { entries } => entries
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|i| entries.remove(i).1),
        Node::Internal { bitmap, children } => {
            let index = slot_index(hash, depth);
            if *bitmap & (1u32 << index) == 0 {
                return None;
            }
            let pos = child_position(*bitmap, index);
            let removed = match &mut children[pos] {
                Child::Loaded(child) => remove_in_memory(child, depth + 1, hash, name)?,
                Child::Ref(_) => return None,
            };
            collapse_child(bitmap, children, pos, index);
            Some(removed)
        }
    }
}

/// Drops empty children and hoists an internal node's lone leaf child up
/// into its slot (tail compaction).
fn collapse_child(bitmap: &mut u32, children: &mut Vec<Child>, pos: usize, index: u32) {
    enum Action {
        Remove,
        Hoist,
        Keep,
    }
    let action = match &children[pos] {
        Child::Loaded(node) => match node.as_ref() {
            Node::Leaf { entries } if entries.is_empty() => Action::Remove,
            Node::Internal { children, .. } if children.is_empty() => Action::Remove,
            Node::Internal { children, .. }
                if children.len() == 1
                    && matches!(
                        &children[0],
                        Child::Loaded(only) if matches!(only.as_ref(), Node::Leaf { .. })
                    ) =>
            {
                Action::Hoist
            }
            _ => Action::Keep,
        },
        Child::Ref(_) => Action::Keep,
    };
    match action {
        Action::Remove => {
            children.remove(pos);
            *bitmap &= !(1u32 << index);
        }
        Action::Hoist => {
            if let Child::Loaded(boxed) = &mut children[pos] {
                let lone = match boxed.as_mut() {
                    Node::Internal { children: inner, .. } => inner.pop(),
                    Node::Leaf { .. } => None,
                };
                if let Some(Child::Loaded(leaf)) = lone {
                    *boxed = leaf;
                }
            }
        }
        Action::Keep => {}
    }
}

async fn save_node(
    node: &mut Node,
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
) -> FsResult<Hash> {
    let child_hashes = match node {
        Node::Leaf { .. } => Vec::new(),
        Node::Internal { children, .. } => {
            let mut hashes = Vec::with_capacity(children.len());
            for child in children.iter_mut() {
                let hash = match child {
                    Child::Ref(hash) => *hash,
                    Child::Loaded(n) => Box::pin(save_node(n, blobs, hash_function)).await?,
                };
                hashes.push(hash);
            }
            hashes
        }
    };
    let bytes = node.to_bytes(hash_function, &child_hashes);
    let id = blobs.upload_blob(bytes).await?;
    Ok(id.hash)
}

async fn collect_rec(
    node: &mut Node,
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
    out: &mut Vec<(String, EntryRef)>,
) -> FsResult<()> {
    match node {
        Node::Leaf { entries } => out.extend(entries.iter().cloned()),
        Node::Internal { children, .. } => {
            for child in children.iter_mut() {
                ensure_child_loaded(child, blobs, hash_function).await?;
                if let Child::Loaded(n) = child {
                    Box::pin(collect_rec(n, blobs, hash_function, out)).await?;
                }
            }
        }
    }
    Ok(())
}

fn include_matches(include: ListInclude, entry: &EntryRef) -> bool {
    match include {
        ListInclude::Both => true,
        ListInclude::Files => matches!(entry, EntryRef::File(_)),
        ListInclude::Dirs => matches!(entry, EntryRef::Dir(_)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn page_rec(
    node: &mut Node,
    blobs: &dyn BlobApi,
    hash_function: HashFunction,
    skip_path: &[u8],
    skip_offset: u64,
    path: &mut Vec<u8>,
    out: &mut Vec<(String, EntryRef)>,
    limit: usize,
    include: ListInclude,
) -> FsResult<Option<HamtCursor>> {
    match node {
        Node::Leaf { entries } => {
            let start = if skip_path.is_empty() {
                skip_offset as usize
            } else {
                // Cursor path points below an existing leaf; the structure
                // changed since the cursor was minted. Start over at the
                // leaf head rather than skipping entries blindly.
                0
            };
            for (i, (name, entry)) in entries.iter().enumerate().skip(start) {
                if !include_matches(include, entry) {
                    continue;
                }
                if out.len() == limit {
                    return Ok(Some(HamtCursor {
                        path: path.clone(),
                        offset: i as u64,
                    }));
                }
                out.push((name.clone(), entry.clone()));
            }
            Ok(None)
        }
        Node::Internal { bitmap, children } => {
            let resume_slot = skip_path.first().copied();
            for index in 0..32u32 {
                if *bitmap & (1u32 << index) == 0 {
                    continue;
                }
                let (deeper_path, deeper_offset) = match resume_slot {
                    Some(slot) if u32::from(slot) > index => continue,
                    Some(slot) if u32::from(slot) == index => (&skip_path[1..], skip_offset),
                    _ => (&[][..], 0),
                };
                let pos = child_position(*bitmap, index);
                ensure_child_loaded(&mut children[pos], blobs, hash_function).await?;
                if let Child::Loaded(child) = &mut children[pos] {
                    path.push(index as u8);
                    let cursor = Box::pin(page_rec(
                        child,
                        blobs,
                        hash_function,
                        deeper_path,
                        deeper_offset,
                        path,
                        out,
                        limit,
                        include,
                    ))
                    .await?;
                    if cursor.is_some() {
                        return Ok(cursor);
                    }
                    path.pop();
                }
            }
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_contract() {
        let hash = 0b00011_00001u64;
        assert_eq!(slot_index(hash, 0), 1);
        assert_eq!(slot_index(hash, 1), 3);
        // Past the hash width everything collapses to slot 0.
        assert_eq!(slot_index(u64::MAX, 13), 0);
        // Depth 12 uses the top 4 bits.
        assert_eq!(slot_index(u64::MAX, 12), 0x0f);
    }

    #[test]
    fn child_position_contract() {
        assert_eq!(child_position(0b0000, 0), 0);
        assert_eq!(child_position(0b0101, 2), 1);
        assert_eq!(child_position(0b0111, 2), 2);
        assert_eq!(child_position(u32::MAX, 31), 31);
    }

    #[test]
    fn hash_functions_are_deterministic() {
        for hf in [HashFunction::Xxh64, HashFunction::Blake3Truncated] {
            assert_eq!(hf.hash_name("f0001"), hf.hash_name("f0001"));
            assert_ne!(hf.hash_name("f0001"), hf.hash_name("f0002"));
        }
    }

    #[test]
    fn root_ref_value_round_trip() {
        let root_ref = HamtRootRef {
            root: Hash::new(b"root"),
            hash_function: HashFunction::Xxh64,
            bits_per_level: BITS_PER_LEVEL,
            entry_count: 1234,
        };
        assert_eq!(HamtRootRef::from_value(&root_ref.to_value()).unwrap(), root_ref);
    }
}
