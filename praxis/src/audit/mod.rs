//! The audit chain: append-only, hash-linked, signed.
//!
//! Every significant transition — task creation, thought status change,
//! accepted DMA results, action selection, guardrail decisions, handler
//! outcomes, secret access, configuration changes, runtime control — lands
//! here as one row:
//!
//! 1. `sequence_number` strictly monotonic and gap-free, assigned under the
//!    sequence lock;
//! 2. `entry_hash = SHA-256(canonical(sequence‖timestamp‖type‖originator‖payload‖previous_hash))`;
//! 3. `signature = Ed25519(entry_hash)` under the current signing key.
//!
//! Verification is a full pass over the whole chain or a sampled pass over
//! the last N rows. A hash mismatch or sequence gap renders the chain
//! invalid; nothing attempts repair.

pub mod chain;
pub mod signing;
pub mod store;

use std::path::Path;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::types::ErrorClass;
use chain::{GENESIS_PREVIOUS_HASH, VerificationReport, entry_hash_bytes, to_hex, verify_run};
use signing::{KeyRecord, SigningKeyHandle};
use store::AuditStore;

// ============================================================================
// Entry model
// ============================================================================

/// The type of a recorded transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A task was created.
    TaskCreated,
    /// A task changed status.
    TaskStatusChanged,
    /// A thought changed status.
    ThoughtStatusChanged,
    /// A DMA triple was accepted for a thought.
    DmaResultAccepted,
    /// The selector chose an action.
    ActionSelected,
    /// The guardrail stack ruled on an action.
    GuardrailDecision,
    /// A handler finished executing an action.
    HandlerOutcome,
    /// A secret was accessed.
    SecretAccess,
    /// A configuration change was proposed, applied, or rolled back.
    ConfigChange,
    /// A runtime-control verb was invoked.
    RuntimeControl,
}

impl AuditEventType {
    /// Stable text form used in rows.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskStatusChanged => "task_status_changed",
            Self::ThoughtStatusChanged => "thought_status_changed",
            Self::DmaResultAccepted => "dma_result_accepted",
            Self::ActionSelected => "action_selected",
            Self::GuardrailDecision => "guardrail_decision",
            Self::HandlerOutcome => "handler_outcome",
            Self::SecretAccess => "secret_access",
            Self::ConfigChange => "config_change",
            Self::RuntimeControl => "runtime_control",
        }
    }
}

/// One appended audit row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Gap-free, strictly monotonic sequence number.
    pub sequence_number: u64,
    /// Opaque event identifier.
    pub event_id: String,
    /// Event timestamp.
    pub event_timestamp: DateTime<Utc>,
    /// Event type text.
    pub event_type: String,
    /// Identity that caused the transition.
    pub originator_id: String,
    /// Structured payload; never contains secret plaintext.
    pub payload: Value,
    /// The prior entry's hash, or the genesis marker.
    pub previous_hash: String,
    /// SHA-256 over the canonical entry content, hex.
    pub entry_hash: String,
    /// Base64 Ed25519 signature over the entry hash; a null signature is
    /// an integrity warning, not a failure.
    pub signature: Option<String>,
    /// Key that produced the signature.
    pub signing_key_id: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the audit subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum AuditError {
    /// Underlying database error.
    #[error("audit database error: {0}")]
    #[diagnostic(code(praxis::audit::sqlx))]
    Sqlx(#[from] sqlx::Error),

    /// A stored row could not be mapped back.
    #[error("corrupt audit row: {detail}")]
    #[diagnostic(code(praxis::audit::corrupt))]
    Corrupt {
        /// Description of the malformed column.
        detail: String,
    },

    /// Key or signature material was malformed.
    #[error("signing failure: {detail}")]
    #[diagnostic(code(praxis::audit::signing))]
    Signing {
        /// Description of the problem.
        detail: String,
    },

    /// Verification found the chain broken. Fatal.
    #[error("audit chain invalid at sequence {sequence}: {reason}")]
    #[diagnostic(
        code(praxis::audit::chain_broken),
        help("Halt processing and surface via the emergency channel; the chain is not repaired automatically.")
    )]
    ChainBroken {
        /// Sequence number of the first failure.
        sequence: u64,
        /// What was wrong.
        reason: String,
    },
}

impl AuditError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlx(_) => ErrorClass::TransientExternal,
            Self::Corrupt { .. } | Self::Signing { .. } | Self::ChainBroken { .. } => {
                ErrorClass::Integrity
            }
        }
    }
}

// ============================================================================
// Service
// ============================================================================

/// The audit service: appends signed entries and verifies the chain.
pub struct AuditService {
    store: AuditStore,
    /// Sequence assignment and append are serialized under this lock, so
    /// audit order is a total order consistent with wall-clock order.
    sequence_lock: Mutex<SigningKeyHandle>,
}

impl std::fmt::Debug for AuditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditService").finish_non_exhaustive()
    }
}

impl AuditService {
    /// Open the audit database and register a fresh signing key.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the database cannot be opened or the key
    /// cannot be registered.
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        let store = AuditStore::open(path).await?;
        let handle = SigningKeyHandle::generate();
        store
            .insert_key(&KeyRecord {
                key_id: handle.key_id().to_string(),
                public_key: handle.public_key_b64(),
                created_at: Utc::now(),
                revoked_at: None,
            })
            .await?;
        Ok(Self {
            store,
            sequence_lock: Mutex::new(handle),
        })
    }

    /// Append one signed entry and return it.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure; the sequence number is
    /// not consumed in that case.
    #[instrument(skip(self, payload), fields(event_type = event_type.as_str()))]
    pub async fn record(
        &self,
        event_type: AuditEventType,
        originator_id: &str,
        payload: Value,
    ) -> Result<AuditEntry, AuditError> {
        let handle = self.sequence_lock.lock().await;

        let head = self.store.chain_head().await?;
        let (sequence_number, previous_hash) = match head {
            Some((sequence, hash)) => (sequence + 1, hash),
            None => (1, GENESIS_PREVIOUS_HASH.to_string()),
        };

        let event_timestamp = Utc::now();
        let hash = entry_hash_bytes(
            sequence_number,
            event_timestamp,
            event_type.as_str(),
            originator_id,
            &payload,
            &previous_hash,
        );
        let entry = AuditEntry {
            sequence_number,
            event_id: Uuid::new_v4().to_string(),
            event_timestamp,
            event_type: event_type.as_str().to_string(),
            originator_id: originator_id.to_string(),
            payload,
            previous_hash,
            entry_hash: to_hex(&hash),
            signature: Some(handle.sign(&hash)),
            signing_key_id: Some(handle.key_id().to_string()),
        };

        self.store.append(&entry).await?;
        Ok(entry)
    }

    /// Full verification: recompute every hash and walk the whole chain.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure; a broken chain is
    /// reported in the [`VerificationReport`], not as an error.
    pub async fn verify_full(&self) -> Result<VerificationReport, AuditError> {
        let entries = self.store.all_entries().await?;
        let keys = self.store.all_keys().await?;
        Ok(verify_run(&entries, Some(GENESIS_PREVIOUS_HASH), &keys))
    }

    /// Sampled verification over the last `n` rows, anchored at the first
    /// sampled row's stored previous hash.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    pub async fn verify_tail(&self, n: u64) -> Result<VerificationReport, AuditError> {
        let entries = self.store.tail_entries(n).await?;
        let keys = self.store.all_keys().await?;
        Ok(verify_run(&entries, None, &keys))
    }

    /// Rotate the signing key: revoke the current one (it stays in the key
    /// table) and register a fresh key for subsequent entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    #[instrument(skip(self))]
    pub async fn rotate_signing_key(&self) -> Result<String, AuditError> {
        let mut handle = self.sequence_lock.lock().await;
        self.store.revoke_key(handle.key_id()).await?;

        let next = SigningKeyHandle::generate();
        self.store
            .insert_key(&KeyRecord {
                key_id: next.key_id().to_string(),
                public_key: next.public_key_b64(),
                created_at: Utc::now(),
                revoked_at: None,
            })
            .await?;
        let key_id = next.key_id().to_string();
        *handle = next;
        Ok(key_id)
    }

    /// The last `n` entries, oldest first (adaptation observer input).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on storage failure.
    pub async fn tail(&self, n: u64) -> Result<Vec<AuditEntry>, AuditError> {
        self.store.tail_entries(n).await
    }

    /// Direct store access for diagnostics and tests.
    #[must_use]
    pub fn store(&self) -> &AuditStore {
        &self.store
    }
}
