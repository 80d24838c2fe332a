//! AES-256-GCM encryption with PBKDF2-derived per-secret keys.
//!
//! Every secret is encrypted under its own key, derived from the master key
//! and a fresh 16-byte salt via PBKDF2-SHA256 (100 000 iterations), with a
//! fresh 12-byte GCM nonce. The master key lives only in process memory and
//! is zeroized on drop and on rotation.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Master key length in bytes (AES-256).
pub const MASTER_KEY_LEN: usize = 32;
/// Per-secret salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM standard nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// PBKDF2-SHA256 iteration count for per-secret key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

// ── Errors ─────────────────────────────────────────────────────────────

/// Errors from encryption and decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The supplied master key had the wrong length.
    #[error("master key must be {MASTER_KEY_LEN} bytes, got {got}")]
    BadKeyLength {
        /// Length of the rejected key material.
        got: usize,
    },

    /// AEAD encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// AEAD decryption failed — wrong key, corrupted ciphertext, or a
    /// tampered nonce/salt.
    #[error("decryption failed")]
    Decrypt,

    /// Stored salt or nonce had an unexpected length.
    #[error("malformed {what}: expected {expected} bytes, got {got}")]
    MalformedInput {
        /// Which input was malformed ("salt" or "nonce").
        what: &'static str,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        got: usize,
    },
}

// ── EncryptedPayload ───────────────────────────────────────────────────

/// Output of one encryption: ciphertext plus the material needed to derive
/// the per-secret key again. None of these fields are sensitive on their
/// own; the master key is required to reverse them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// AES-256-GCM ciphertext (includes the GCM tag).
    pub ciphertext: Vec<u8>,
    /// Salt fed to PBKDF2 for key derivation.
    pub salt: Vec<u8>,
    /// GCM nonce.
    pub nonce: Vec<u8>,
}

// ── SecretCipher ───────────────────────────────────────────────────────

/// Holds the master key and performs per-secret encryption/decryption.
///
/// The key version string advances on every rotation so stored records can
/// name the key generation that encrypted them.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretCipher {
    master_key: [u8; MASTER_KEY_LEN],
    #[zeroize(skip)]
    key_generation: u32,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("SecretCipher")
            .field("key_generation", &self.key_generation)
            .finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Create a cipher with a freshly generated random master key.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = [0u8; MASTER_KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self {
            master_key: key,
            key_generation: 1,
        }
    }

    /// Create a cipher from existing key material.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadKeyLength`] if `key` is not exactly
    /// [`MASTER_KEY_LEN`] bytes.
    pub fn from_key(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != MASTER_KEY_LEN {
            return Err(CryptoError::BadKeyLength { got: key.len() });
        }
        let mut master_key = [0u8; MASTER_KEY_LEN];
        master_key.copy_from_slice(key);
        Ok(Self {
            master_key,
            key_generation: 1,
        })
    }

    /// The key-version reference recorded on rows encrypted by this cipher.
    #[must_use]
    pub fn key_version(&self) -> String {
        format!("master-key-v{}", self.key_generation)
    }

    /// Derive the per-secret key for `salt`.
    fn derive_key(&self, salt: &[u8]) -> [u8; MASTER_KEY_LEN] {
        let mut derived = [0u8; MASTER_KEY_LEN];
        pbkdf2_hmac::<Sha256>(&self.master_key, salt, PBKDF2_ITERATIONS, &mut derived);
        derived
    }

    /// Encrypt `plaintext` under a fresh salt and nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encrypt`] if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedPayload, CryptoError> {
        let mut salt = vec![0u8; SALT_LEN];
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut salt);
        rand::rng().fill_bytes(&mut nonce);

        let mut derived = self.derive_key(&salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        derived.zeroize();

        Ok(EncryptedPayload {
            ciphertext,
            salt,
            nonce,
        })
    }

    /// Decrypt a payload previously produced by [`encrypt`](Self::encrypt)
    /// under the same master key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedInput`] for wrong-length salt/nonce
    /// and [`CryptoError::Decrypt`] if authentication fails.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        salt: &[u8],
        nonce: &[u8],
    ) -> Result<String, CryptoError> {
        if salt.len() != SALT_LEN {
            return Err(CryptoError::MalformedInput {
                what: "salt",
                expected: SALT_LEN,
                got: salt.len(),
            });
        }
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::MalformedInput {
                what: "nonce",
                expected: NONCE_LEN,
                got: nonce.len(),
            });
        }

        let mut derived = self.derive_key(salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&derived));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        derived.zeroize();

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }

    /// Replace the master key, zeroizing the previous one. The key
    /// generation advances so [`key_version`](Self::key_version) changes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadKeyLength`] if `new_key` is not exactly
    /// [`MASTER_KEY_LEN`] bytes; the current key is left in place.
    pub fn rotate(&mut self, new_key: &[u8]) -> Result<(), CryptoError> {
        if new_key.len() != MASTER_KEY_LEN {
            return Err(CryptoError::BadKeyLength { got: new_key.len() });
        }
        self.master_key.zeroize();
        self.master_key.copy_from_slice(new_key);
        self.key_generation += 1;
        Ok(())
    }

    /// Build the successor cipher for a rotation without touching `self`.
    ///
    /// Used by the store's all-or-nothing re-encryption: the new cipher only
    /// replaces the old one after every row has committed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::BadKeyLength`] if `new_key` has the wrong length.
    pub fn successor(&self, new_key: &[u8]) -> Result<Self, CryptoError> {
        let mut next = Self::from_key(new_key)?;
        next.key_generation = self.key_generation + 1;
        Ok(next)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = SecretCipher::generate();
        let payload = cipher.encrypt("hunter2-but-longer").unwrap();
        let plain = cipher
            .decrypt(&payload.ciphertext, &payload.salt, &payload.nonce)
            .unwrap();
        assert_eq!(plain, "hunter2-but-longer");
    }

    #[test]
    fn fresh_salt_and_nonce_per_encryption() {
        let cipher = SecretCipher::generate();
        let a = cipher.encrypt("same value").unwrap();
        let b = cipher.encrypt("same value").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let cipher = SecretCipher::generate();
        let payload = cipher.encrypt("payload").unwrap();
        let other = SecretCipher::generate();
        let err = other
            .decrypt(&payload.ciphertext, &payload.salt, &payload.nonce)
            .unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt));
    }

    #[test]
    fn rotation_advances_key_version() {
        let mut cipher = SecretCipher::generate();
        assert_eq!(cipher.key_version(), "master-key-v1");
        let new_key = [7u8; MASTER_KEY_LEN];
        cipher.rotate(&new_key).unwrap();
        assert_eq!(cipher.key_version(), "master-key-v2");
    }

    #[test]
    fn bad_key_length_rejected() {
        assert!(matches!(
            SecretCipher::from_key(&[0u8; 16]),
            Err(CryptoError::BadKeyLength { got: 16 })
        ));
    }

    #[test]
    fn successor_decrypts_under_new_key_only() {
        let cipher = SecretCipher::generate();
        let next = cipher.successor(&[9u8; MASTER_KEY_LEN]).unwrap();
        assert_eq!(next.key_version(), "master-key-v2");

        let payload = next.encrypt("rotated").unwrap();
        assert!(
            cipher
                .decrypt(&payload.ciphertext, &payload.salt, &payload.nonce)
                .is_err()
        );
        assert_eq!(
            next.decrypt(&payload.ciphertext, &payload.salt, &payload.nonce)
                .unwrap(),
            "rotated"
        );
    }
}
