//! The narrow cryptographic capability consumed by the filesystem engine.
//!
//! The engine never calls hash or signature primitives directly; everything
//! goes through [`CryptoProvider`] so that embedders can delegate to a
//! co-processor or WASM host implementation. [`DefaultCrypto`] is the
//! in-process implementation backed by `blake3`, `ed25519-dalek` and
//! `chacha20poly1305`.

use crate::PublicKeyEd25519;
use crate::error::FsError;
use bytes::{BufMut, Bytes, BytesMut};
use chacha20poly1305::aead::{Aead, AeadCore, OsRng};
use chacha20poly1305::{KeyInit, XChaCha20Poly1305};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};

/// Size of the XChaCha20-Poly1305 nonce prefixed to encrypted blobs.
pub const XCHACHA20_NONCE_SIZE: usize = 24;

/// Hashing, signing and symmetric-encryption primitives.
///
/// Implementations are expected to be pure and thread-safe; the engine may
/// call them from any task without synchronization.
pub trait CryptoProvider: Send + Sync {
    /// Blake3-256 of `data`.
    fn hash_blake3(&self, data: &[u8]) -> [u8; 32];

    /// Blake3-256 keyed hash of `data`, used for key-chain derivation.
    fn hash_blake3_keyed(&self, key: &[u8; 32], data: &[u8]) -> [u8; 32];

    /// Derives an Ed25519 keypair from a 32-byte seed. Returns the public
    /// key and the 64-byte secret keypair form (`seed ‖ public_key`).
    fn new_keypair_ed25519(&self, seed: &[u8; 32]) -> (PublicKeyEd25519, [u8; 64]);

    /// Signs `message` with a 64-byte secret keypair.
    fn sign_ed25519(&self, secret_key: &[u8; 64], message: &[u8]) -> [u8; 64];

    /// Verifies an Ed25519 signature. Malformed keys or signatures verify
    /// as `false`.
    fn verify_ed25519(
        &self,
        public_key: &PublicKeyEd25519,
        message: &[u8],
        signature: &[u8; 64],
    ) -> bool;

    /// Encrypts with XChaCha20-Poly1305; output is `nonce(24) ‖ ciphertext`.
    fn encrypt_xchacha20poly1305(&self, key: &[u8; 32], plaintext: &[u8])
    -> Result<Bytes, FsError>;

    /// Decrypts the `nonce(24) ‖ ciphertext` form.
    fn decrypt_xchacha20poly1305(&self, key: &[u8; 32], bytes: &[u8]) -> Result<Bytes, FsError>;
}

/// In-process [`CryptoProvider`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCrypto;

impl CryptoProvider for DefaultCrypto {
    fn hash_blake3(&self, data: &[u8]) -> [u8; 32] {
        *blake3::hash(data).as_bytes()
    }

    fn hash_blake3_keyed(&self, key: &[u8; 32], data: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(key, data).as_bytes()
    }

    fn new_keypair_ed25519(&self, seed: &[u8; 32]) -> (PublicKeyEd25519, [u8; 64]) {
        let signing_key = SigningKey::from_bytes(seed);
        let public_key = signing_key.verifying_key().to_bytes();
        (public_key, signing_key.to_keypair_bytes())
    }

    fn sign_ed25519(&self, secret_key: &[u8; 64], message: &[u8]) -> [u8; 64] {
        // The keypair form is seed ‖ public_key; the seed alone rebuilds the
        // signing key without a fallible parse.
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&secret_key[..32]);
        let signing_key = SigningKey::from_bytes(&seed);
        signing_key.sign(message).to_bytes()
    }

    fn verify_ed25519(
        &self,
        public_key: &PublicKeyEd25519,
        message: &[u8],
        signature: &[u8; 64],
    ) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        verifying_key.verify_strict(message, &signature).is_ok()
    }

    fn encrypt_xchacha20poly1305(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
    ) -> Result<Bytes, FsError> {
        let cipher = XChaCha20Poly1305::new(key.into());
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| FsError::InvalidDirectory(format!("failed to encrypt: {e}")))?;
        let mut buf = BytesMut::with_capacity(XCHACHA20_NONCE_SIZE + ciphertext.len());
        buf.put_slice(&nonce);
        buf.put_slice(&ciphertext);
        Ok(buf.freeze())
    }

    fn decrypt_xchacha20poly1305(&self, key: &[u8; 32], bytes: &[u8]) -> Result<Bytes, FsError> {
        if bytes.len() < XCHACHA20_NONCE_SIZE {
            return Err(FsError::InvalidDirectory(format!(
                "encrypted blob too short for nonce: {} bytes",
                bytes.len()
            )));
        }
        let cipher = XChaCha20Poly1305::new(key.into());
        let nonce = &bytes[..XCHACHA20_NONCE_SIZE];
        let plaintext = cipher
            .decrypt(nonce.into(), &bytes[XCHACHA20_NONCE_SIZE..])
            .map_err(|_| FsError::Unauthorized("failed to decrypt directory".into()))?;
        Ok(plaintext.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_is_deterministic() {
        let crypto = DefaultCrypto;
        let seed = [42u8; 32];
        assert_eq!(
            crypto.new_keypair_ed25519(&seed),
            crypto.new_keypair_ed25519(&seed)
        );
    }

    #[test]
    fn sign_verify_round_trip() {
        let crypto = DefaultCrypto;
        let (pk, sk) = crypto.new_keypair_ed25519(&[1u8; 32]);
        let sig = crypto.sign_ed25519(&sk, b"message");
        assert!(crypto.verify_ed25519(&pk, b"message", &sig));
        assert!(!crypto.verify_ed25519(&pk, b"other", &sig));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = DefaultCrypto;
        let key = [3u8; 32];
        let encrypted = crypto.encrypt_xchacha20poly1305(&key, b"secret dir").unwrap();
        assert_ne!(&encrypted[..], b"secret dir");
        let decrypted = crypto.decrypt_xchacha20poly1305(&key, &encrypted).unwrap();
        assert_eq!(&decrypted[..], b"secret dir");

        let wrong = crypto.decrypt_xchacha20poly1305(&[4u8; 32], &encrypted);
        assert!(wrong.is_err());
    }

    #[test]
    fn keyed_hash_differs_from_plain() {
        let crypto = DefaultCrypto;
        let key = [7u8; 32];
        assert_ne!(
            crypto.hash_blake3(b"name"),
            crypto.hash_blake3_keyed(&key, b"name")
        );
    }
}
