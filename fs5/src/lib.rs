//! # fs5
//!
//! High-level, *content addressed*, optionally *encrypted* directory tree
//! over two remote services: an immutable blob store keyed by Blake3 hash
//! and a mutable registry of signed records keyed by Ed25519 public key.
//! Every directory is an immutable [`dir::DirV1`] snapshot; mutability is
//! simulated by writing a new snapshot and advancing the directory's
//! registry pointer with a compare-and-swap on its revision number.
//!
//! ## Layers
//! 1. `dir`     – pure data structures and the canonical wire encoding.
//! 2. `hamt`    – hashed-trie index a directory promotes to once it grows
//!    past [`PROMOTION_THRESHOLD`] entries.
//! 3. `keys`    – per-path Ed25519 keypairs derived by keyed-hash descent
//!    from a root filesystem key.
//! 4. `walk` / `write` – path resolution and the CAS mutation loop.
//! 5. `api`     – ergonomic façade ([`FS5`]) that applications use.

mod api;
mod context;
pub mod dir;
pub mod hamt;
mod keys;
mod listing;
mod registry;
mod walk;
mod write;

pub use api::{
    DeleteOptions, FS5, GetOptions, GetResult, ListOptions, MkdirOptions, MoveOptions, PutOptions,
};
pub use context::{FsConfig, FsContext};
pub use dir::{DirRef, DirV1, FileRef};
pub use fs5_core::{FsError, FsResult};
pub use keys::DirKey;
pub use listing::{CursorKind, ListEntry, ListInclude, ListResult};

/// Number of entries (dirs ∪ files) above which a directory is promoted to
/// a HAMT-backed layout.
pub const PROMOTION_THRESHOLD: usize = 1000;

/// Once HAMT-backed, a directory demotes back to the inline layout when its
/// entry count drops below this. Kept well under [`PROMOTION_THRESHOLD`] so
/// directories hovering around the boundary do not flap between layouts.
pub const DEMOTION_THRESHOLD: usize = 600;

/// Content equal to or below this many bytes is stored inline in the file's
/// metadata instead of the blob store.
pub const INLINE_MAX: usize = 1024;
