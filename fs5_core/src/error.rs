//! The shared error kind enumeration for fs5 operations.

use crate::hash::Hash;

/// Crate-wide result alias.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Errors surfaced by filesystem operations and the services they consume.
///
/// `RevisionConflict` is produced by the registry service and absorbed by the
/// compare-and-swap retry loop; callers observe `Conflict` only once the
/// retry budget is exhausted.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A fetched directory blob could not be decoded.
    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    /// A fetched blob hashed to something other than its link. This
    /// indicates a corrupt or malicious remote and is always fatal.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("registry revision conflict")]
    RevisionConflict,

    #[error("conflict: retries exhausted after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    TimedOut,

    #[error("network error: {0}")]
    Network(String),

    #[error("storage quota exceeded")]
    Quota,

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl From<crate::msgpack::DecodeError> for FsError {
    fn from(err: crate::msgpack::DecodeError) -> Self {
        FsError::InvalidDirectory(err.to_string())
    }
}
