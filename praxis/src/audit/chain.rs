//! Hash-chain construction and verification.
//!
//! Each entry's hash covers its sequence number, timestamp, type,
//! originator, payload, and the previous entry's hash:
//!
//! ```text
//! entry_hash = SHA-256(sequence || timestamp || type || originator || payload || previous_hash)
//! ```
//!
//! A single hash mismatch or sequence gap renders the chain invalid; no
//! repair is attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::signing::{KeyRecord, verify_signature};
use super::{AuditEntry, AuditError};

/// `previous_hash` of the first entry in a chain.
pub const GENESIS_PREVIOUS_HASH: &str = "genesis";

/// Canonical bytes fed to the entry hash. Field order is fixed; the
/// payload is compact JSON.
#[must_use]
pub fn canonical_bytes(
    sequence: u64,
    timestamp: DateTime<Utc>,
    event_type: &str,
    originator: &str,
    payload: &Value,
    previous_hash: &str,
) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(sequence.to_string().as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(timestamp.to_rfc3339().as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(event_type.as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(originator.as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(payload.to_string().as_bytes());
    bytes.push(b'|');
    bytes.extend_from_slice(previous_hash.as_bytes());
    bytes
}

/// SHA-256 of the canonical bytes, as raw digest.
#[must_use]
pub fn entry_hash_bytes(
    sequence: u64,
    timestamp: DateTime<Utc>,
    event_type: &str,
    originator: &str,
    payload: &Value,
    previous_hash: &str,
) -> [u8; 32] {
    let digest = Sha256::digest(canonical_bytes(
        sequence,
        timestamp,
        event_type,
        originator,
        payload,
        previous_hash,
    ));
    digest.into()
}

/// Hex encoding of a 32-byte digest.
#[must_use]
pub fn to_hex(digest: &[u8; 32]) -> String {
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Decode a 64-character hex digest.
///
/// # Errors
///
/// Returns [`AuditError::Corrupt`] for non-hex or wrong-length input.
pub fn from_hex(hex: &str) -> Result<[u8; 32], AuditError> {
    if hex.len() != 64 {
        return Err(AuditError::Corrupt {
            detail: format!("entry hash has length {}", hex.len()),
        });
    }
    let mut out = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let text = std::str::from_utf8(chunk).map_err(|_| AuditError::Corrupt {
            detail: "entry hash is not ascii hex".into(),
        })?;
        out[i] = u8::from_str_radix(text, 16).map_err(|_| AuditError::Corrupt {
            detail: "entry hash is not hex".into(),
        })?;
    }
    Ok(out)
}

// ============================================================================
// Verification
// ============================================================================

/// Why verification failed, anchored at a sequence number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationFailure {
    /// Sequence number of the offending entry.
    pub sequence: u64,
    /// What was wrong.
    pub reason: String,
}

/// Outcome of a verification pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Whether the chain held.
    pub valid: bool,
    /// Entries inspected.
    pub entries_checked: u64,
    /// Null-signature rows encountered (integrity warnings, not failures).
    pub warnings: u64,
    /// First failure, when invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerificationFailure>,
}

impl VerificationReport {
    fn ok(entries_checked: u64, warnings: u64) -> Self {
        Self {
            valid: true,
            entries_checked,
            warnings,
            failure: None,
        }
    }

    fn broken(entries_checked: u64, warnings: u64, sequence: u64, reason: String) -> Self {
        Self {
            valid: false,
            entries_checked,
            warnings,
            failure: Some(VerificationFailure { sequence, reason }),
        }
    }
}

/// Verify a contiguous run of entries.
///
/// `anchor_previous_hash` is what the first entry's `previous_hash` must
/// equal: [`GENESIS_PREVIOUS_HASH`] for a full pass, or the stored value
/// of the first sampled entry for a tail pass (`None` accepts whatever the
/// first entry carries, which is how the sampled pass anchors itself).
///
/// Signature verification uses the key table; a missing key or failed
/// verification is a failure, a null signature only a warning.
#[must_use]
pub fn verify_run(
    entries: &[AuditEntry],
    anchor_previous_hash: Option<&str>,
    keys: &[KeyRecord],
) -> VerificationReport {
    let mut warnings = 0u64;
    let mut previous_hash: Option<String> = anchor_previous_hash.map(str::to_string);
    let mut previous_sequence: Option<u64> = None;
    let mut checked = 0u64;

    for entry in entries {
        checked += 1;

        if let Some(previous) = previous_sequence
            && entry.sequence_number != previous + 1
        {
            return VerificationReport::broken(
                checked,
                warnings,
                entry.sequence_number,
                format!(
                    "sequence gap: expected {}, found {}",
                    previous + 1,
                    entry.sequence_number
                ),
            );
        }

        if let Some(expected_previous) = &previous_hash
            && entry.previous_hash != *expected_previous
        {
            return VerificationReport::broken(
                checked,
                warnings,
                entry.sequence_number,
                "previous-hash link does not match prior entry".into(),
            );
        }

        let recomputed = to_hex(&entry_hash_bytes(
            entry.sequence_number,
            entry.event_timestamp,
            &entry.event_type,
            &entry.originator_id,
            &entry.payload,
            &entry.previous_hash,
        ));
        if recomputed != entry.entry_hash {
            return VerificationReport::broken(
                checked,
                warnings,
                entry.sequence_number,
                "entry hash does not match canonical content".into(),
            );
        }

        match (&entry.signature, &entry.signing_key_id) {
            (Some(signature), Some(key_id)) => {
                let Some(key) = keys.iter().find(|k| k.key_id == *key_id) else {
                    return VerificationReport::broken(
                        checked,
                        warnings,
                        entry.sequence_number,
                        format!("signing key {key_id} not in key table"),
                    );
                };
                let hash = match from_hex(&entry.entry_hash) {
                    Ok(hash) => hash,
                    Err(_) => {
                        return VerificationReport::broken(
                            checked,
                            warnings,
                            entry.sequence_number,
                            "entry hash is not valid hex".into(),
                        );
                    }
                };
                match verify_signature(&key.public_key, &hash, signature) {
                    Ok(true) => {}
                    Ok(false) => {
                        return VerificationReport::broken(
                            checked,
                            warnings,
                            entry.sequence_number,
                            "signature does not verify under its key".into(),
                        );
                    }
                    Err(err) => {
                        return VerificationReport::broken(
                            checked,
                            warnings,
                            entry.sequence_number,
                            format!("signature material malformed: {err}"),
                        );
                    }
                }
            }
            // Null signature: integrity warning, not failure.
            _ => warnings += 1,
        }

        previous_hash = Some(entry.entry_hash.clone());
        previous_sequence = Some(entry.sequence_number);
    }

    VerificationReport::ok(checked, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let digest = [0xABu8; 32];
        let hex = to_hex(&digest);
        assert_eq!(hex.len(), 64);
        assert_eq!(from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn canonical_bytes_are_order_sensitive() {
        let now = Utc::now();
        let payload = serde_json::json!({"a": 1});
        let first = canonical_bytes(1, now, "task_created", "engine", &payload, "genesis");
        let second = canonical_bytes(2, now, "task_created", "engine", &payload, "genesis");
        assert_ne!(first, second);
    }
}
