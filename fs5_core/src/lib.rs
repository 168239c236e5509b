//! Core fs5 protocol types and traits.
//!
//! This crate defines the shared types and traits used by all fs5 crates.
//!
//! ## Protocol types (wire-stable)
//!
//! The following modules define on-the-wire formats that are intended to be
//! stable for the 1.0 protocol:
//!
//! - Content hashes (`hash::Hash`) and their 33-byte tagged form
//! - Directory links (`link::DirLink`)
//! - Blob identifiers and locations (`blob::BlobId`, `blob::BlobLocation`)
//! - Signed registry records (`registry::Entry`)
//!
//! These types are used directly in network protocols and persistent
//! metadata; changes to them are considered protocol changes.
//!
//! ## Convenience APIs (non-wire)
//!
//! In addition, this crate exposes the pieces the filesystem engine consumes
//! without caring about concrete backends:
//!
//! - The MessagePack codec (`msgpack`) the directory format is built on
//! - Service traits for remote storage (`BlobApi`, `RegistryApi`)
//! - The narrow cryptographic capability (`CryptoProvider`) and its default
//!   implementation (`DefaultCrypto`)
//! - The shared error kind enumeration (`FsError`)

pub mod blob;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod link;
pub mod msgpack;
pub mod registry;

// --- Core Public Surface ---

pub use blob::{BlobApi, BlobId, BlobLocation};
pub use crypto::{CryptoProvider, DefaultCrypto};
pub use error::{FsError, FsResult};
pub use hash::Hash;
pub use link::DirLink;
pub use registry::{Entry, RegistryApi};

/// A type alias for a 32-byte Ed25519 public key.
pub type PublicKeyEd25519 = [u8; 32];
