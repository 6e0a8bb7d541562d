//! Cryptographic layer: key derivation, authenticated encryption, the
//! optional per-connection keystream, record padding, and replay protection.
//!
//! All keys are one-way derivations of a single pre-shared secret; no key
//! material ever crosses the wire.

pub mod engine;
pub mod padding;
pub mod replay;
pub mod stream;

pub use engine::CryptoEngine;
pub use padding::RecordPadder;
pub use replay::ReplayGuard;
pub use stream::KeystreamCipher;

use sha2::{Digest, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// The pre-shared secret and its derived sub-keys.
///
/// Two sub-keys are derived by one-way hashing: `enc = SHA-512(secret)`
/// keys the authenticated cipher (truncated to 32 bytes), and
/// `auth = SHA-512(enc)` seeds the per-connection keystream. The
/// hash-of-hash construction makes the two independent: nothing derived
/// from the auth seed reveals the encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    enc: [u8; 64],
    auth: [u8; 64],
}

impl SharedSecret {
    /// Derive the sub-keys from a secret string.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let enc: [u8; 64] = Sha512::digest(secret.as_ref()).into();
        let auth: [u8; 64] = Sha512::digest(enc).into();
        Self { enc, auth }
    }

    /// 32-byte key for the authenticated cipher.
    pub(crate) fn encryption_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.enc[..32]);
        key
    }

    /// 64-byte seed for per-connection keystream derivation.
    pub(crate) fn auth_seed(&self) -> &[u8; 64] {
        &self.auth
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}
