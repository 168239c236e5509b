//! Per-path key derivation.
//!
//! Every directory is controlled by an Ed25519 keypair derived from the
//! filesystem root key by keyed-hash descent: the key for child `n` of a
//! directory keyed by `K` is `blake3_keyed(K, utf8(n))`. Knowing a
//! directory's key therefore grants control of its whole subtree but not of
//! any ancestor.

use dashmap::DashMap;
use fs5_core::{CryptoProvider, PublicKeyEd25519};
use zeroize::Zeroize;

/// The 32-byte secret controlling one directory, and the seed of all its
/// descendants' secrets.
#[derive(Clone)]
pub struct DirKey {
    secret: [u8; 32],
}

impl std::fmt::Debug for DirKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DirKey([REDACTED])")
    }
}

impl DirKey {
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// Derives the key for the child directory named `name`.
    pub fn child(&self, crypto: &dyn CryptoProvider, name: &str) -> DirKey {
        DirKey::new(crypto.hash_blake3_keyed(&self.secret, name.as_bytes()))
    }

    /// The Ed25519 keypair controlling this directory's registry entry.
    pub fn keypair(&self, crypto: &dyn CryptoProvider) -> (PublicKeyEd25519, [u8; 64]) {
        crypto.new_keypair_ed25519(&self.secret)
    }
}

impl Drop for DirKey {
    fn drop(&mut self) {
        // Best-effort key scrubbing on drop.
        self.secret.zeroize();
    }
}

/// Process-local memo of derived directory secrets, keyed by normalized
/// path. Never written to disk.
pub(crate) struct KeyCache {
    map: DashMap<String, [u8; 32]>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Derives the key for the directory at `segments`, memoizing every
    /// prefix along the way.
    pub fn derive(
        &self,
        crypto: &dyn CryptoProvider,
        root: &DirKey,
        segments: &[&str],
    ) -> DirKey {
        let mut path = String::new();
        let mut key = root.clone();
        for segment in segments {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
            key = match self.map.get(&path) {
                Some(secret) => DirKey::new(*secret),
                None => {
                    let child = key.child(crypto, segment);
                    self.map.insert(path.clone(), *child.secret());
                    child
                }
            };
        }
        key
    }
}

impl Drop for KeyCache {
    fn drop(&mut self) {
        for mut entry in self.map.iter_mut() {
            entry.value_mut().zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs5_core::DefaultCrypto;

    #[test]
    fn derivation_is_deterministic() {
        let crypto = DefaultCrypto;
        let root = DirKey::new([1u8; 32]);
        let a = root.child(&crypto, "a").child(&crypto, "b").child(&crypto, "c");
        let b = root.child(&crypto, "a").child(&crypto, "b").child(&crypto, "c");
        assert_eq!(a.secret(), b.secret());
        assert_eq!(a.keypair(&crypto), b.keypair(&crypto));
    }

    #[test]
    fn sibling_keys_differ() {
        let crypto = DefaultCrypto;
        let root = DirKey::new([1u8; 32]);
        assert_ne!(
            root.child(&crypto, "a").secret(),
            root.child(&crypto, "b").secret()
        );
    }

    #[test]
    fn cache_matches_direct_derivation() {
        let crypto = DefaultCrypto;
        let root = DirKey::new([2u8; 32]);
        let cache = KeyCache::new();
        let cached = cache.derive(&crypto, &root, &["a", "b"]);
        let direct = root.child(&crypto, "a").child(&crypto, "b");
        assert_eq!(cached.secret(), direct.secret());
        // Second derivation hits the memo and still agrees.
        let again = cache.derive(&crypto, &root, &["a", "b"]);
        assert_eq!(again.secret(), direct.secret());
    }
}
