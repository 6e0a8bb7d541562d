//! Authenticated encryption of padded records.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use super::SharedSecret;
use crate::core::constants::AEAD_NONCE_SIZE;
use crate::core::error::CryptoError;

/// XChaCha20-Poly1305 cipher keyed from the shared secret.
///
/// Every record carries its own random 24-byte nonce followed by the
/// ciphertext and tag. Tampering with any bit, or decrypting with a
/// different secret, yields [`CryptoError::AuthenticationFailed`] rather
/// than corrupted plaintext.
pub struct CryptoEngine {
    cipher: XChaCha20Poly1305,
}

impl CryptoEngine {
    /// Build an engine from the derived encryption key.
    pub fn new(secret: &SharedSecret) -> Self {
        let key = Key::from(secret.encryption_key());
        Self {
            cipher: XChaCha20Poly1305::new(&key),
        }
    }

    /// Encrypt a padded record. Output layout: `nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut record = Vec::with_capacity(AEAD_NONCE_SIZE + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    /// Decrypt and authenticate a record produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if record.len() < AEAD_NONCE_SIZE {
            return Err(CryptoError::AuthenticationFailed);
        }
        let (nonce, ciphertext) = record.split_at(AEAD_NONCE_SIZE);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::ENCRYPTION_OVERHEAD;

    #[test]
    fn roundtrip() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        let record = engine.encrypt(b"plaintext").unwrap();
        assert_eq!(engine.decrypt(&record).unwrap(), b"plaintext");
    }

    #[test]
    fn roundtrip_empty_and_large() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        for payload in [vec![], vec![0xa5u8; 65536]] {
            let record = engine.encrypt(&payload).unwrap();
            assert_eq!(record.len(), payload.len() + ENCRYPTION_OVERHEAD);
            assert_eq!(engine.decrypt(&record).unwrap(), payload);
        }
    }

    #[test]
    fn tampering_is_detected() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        let record = engine.encrypt(b"plaintext").unwrap();

        for bit in 0..8 {
            let mut tampered = record.clone();
            let idx = tampered.len() - 1 - bit;
            tampered[idx] ^= 1 << bit;
            assert!(matches!(
                engine.decrypt(&tampered),
                Err(CryptoError::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn wrong_key_is_detected() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        let other = CryptoEngine::new(&SharedSecret::new("other"));
        let record = engine.encrypt(b"plaintext").unwrap();
        assert!(other.decrypt(&record).is_err());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        assert!(engine.decrypt(&[0u8; 5]).is_err());
        assert!(engine.decrypt(&[]).is_err());
    }

    #[test]
    fn nonces_are_unique() {
        let engine = CryptoEngine::new(&SharedSecret::new("test"));
        let a = engine.encrypt(b"x").unwrap();
        let b = engine.encrypt(b"x").unwrap();
        assert_ne!(a[..24], b[..24]);
    }
}
