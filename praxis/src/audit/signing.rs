//! Ed25519 signing for audit entries.
//!
//! Entries are signed over their 32-byte SHA-256 entry hash. Keys rotate;
//! revoked keys stay in the key table so historic entries keep verifying.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;
use uuid::Uuid;

use super::AuditError;

/// A signing key with its stable identifier.
pub struct SigningKeyHandle {
    key_id: String,
    key: SigningKey,
}

impl std::fmt::Debug for SigningKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyHandle")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SigningKeyHandle {
    /// Generate a fresh key with a random identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self {
            key_id: format!("audit-key-{}", Uuid::new_v4()),
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// The key identifier recorded on signed entries.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Base64 of the public half, for the key table.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.key.verifying_key().as_bytes())
    }

    /// Sign a 32-byte entry hash; returns base64.
    #[must_use]
    pub fn sign(&self, entry_hash: &[u8; 32]) -> String {
        BASE64.encode(self.key.sign(entry_hash).to_bytes())
    }
}

/// One row of the key table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    /// Key identifier.
    pub key_id: String,
    /// Base64 public key.
    pub public_key: String,
    /// When the key became active.
    pub created_at: DateTime<Utc>,
    /// When the key was revoked, if it has been.
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Verify a base64 signature over a 32-byte entry hash with a base64
/// public key.
///
/// # Errors
///
/// Returns [`AuditError::Signing`] for malformed key or signature
/// material; an authentic-but-wrong signature returns `Ok(false)`.
pub fn verify_signature(
    public_key_b64: &str,
    entry_hash: &[u8; 32],
    signature_b64: &str,
) -> Result<bool, AuditError> {
    let key_bytes = BASE64
        .decode(public_key_b64)
        .map_err(|_| AuditError::Signing {
            detail: "public key is not valid base64".into(),
        })?;
    let key_array: [u8; 32] = key_bytes.try_into().map_err(|_| AuditError::Signing {
        detail: "public key has wrong length".into(),
    })?;
    let verifying = VerifyingKey::from_bytes(&key_array).map_err(|_| AuditError::Signing {
        detail: "public key is not a valid Ed25519 point".into(),
    })?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| AuditError::Signing {
            detail: "signature is not valid base64".into(),
        })?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| AuditError::Signing {
        detail: "signature has wrong length".into(),
    })?;
    let signature = Signature::from_bytes(&sig_array);

    Ok(verifying.verify(entry_hash, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let handle = SigningKeyHandle::generate();
        let hash = [7u8; 32];
        let signature = handle.sign(&hash);
        assert!(verify_signature(&handle.public_key_b64(), &hash, &signature).unwrap());
    }

    #[test]
    fn tampered_hash_fails_verification() {
        let handle = SigningKeyHandle::generate();
        let signature = handle.sign(&[7u8; 32]);
        assert!(!verify_signature(&handle.public_key_b64(), &[8u8; 32], &signature).unwrap());
    }

    #[test]
    fn malformed_key_is_an_error_not_a_mismatch() {
        let err = verify_signature("not-base64!!!", &[0u8; 32], "AAAA");
        assert!(err.is_err());
    }
}
