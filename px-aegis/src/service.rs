//! The facade the engine talks to.
//!
//! [`SecretsService`] owns the filter and the encrypted store, and exposes
//! the three pipeline entry points: filtering on ingress, decapsulation on
//! egress, and the agent tool surface (`recall_secret`, `update_filter`,
//! `list_secrets`).

use std::path::Path;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::decapsulate::{DecapsulationReport, decapsulate_value};
use crate::encryption::SecretCipher;
use crate::filter::{FilterConfig, FilterError, FilterStats, SecretsFilter, UpdateFilterOp};
use crate::patterns::Sensitivity;
use crate::store::{SecretReference, SecretsStore, StoreError};

// ── Errors ─────────────────────────────────────────────────────────────

/// Errors surfaced by the service facade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Store-level failure (database, crypto, rate limit).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filter configuration failure.
    #[error(transparent)]
    Filter(#[from] FilterError),
}

// ── Results ────────────────────────────────────────────────────────────

/// Result of a `recall_secret` tool call.
#[derive(Debug, Clone)]
pub struct SecretRecallResult {
    /// Reference metadata for the secret.
    pub reference: SecretReference,
    /// Plaintext, present only when decryption was requested and allowed.
    pub value: Option<String>,
}

// ── SecretsService ─────────────────────────────────────────────────────

/// Filter + store under one roof, with interior mutability on the filter
/// so `update_filter` can run while the pipeline holds the service.
pub struct SecretsService {
    filter: RwLock<SecretsFilter>,
    store: SecretsStore,
}

impl std::fmt::Debug for SecretsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsService").finish_non_exhaustive()
    }
}

impl SecretsService {
    /// Open the service over the secrets database at `path` with the
    /// default filter configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the database cannot be opened or a
    /// builtin pattern fails to compile.
    pub async fn open(path: &Path, cipher: SecretCipher) -> Result<Self, ServiceError> {
        let filter = SecretsFilter::with_defaults()?;
        let store = SecretsStore::open(path, cipher).await?;
        Ok(Self {
            filter: RwLock::new(filter),
            store,
        })
    }

    /// Open with an explicit filter configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the database cannot be opened or a
    /// configured pattern fails to compile.
    pub async fn open_with_config(
        path: &Path,
        cipher: SecretCipher,
        config: FilterConfig,
    ) -> Result<Self, ServiceError> {
        let filter = SecretsFilter::new(config)?;
        let store = SecretsStore::open(path, cipher).await?;
        Ok(Self {
            filter: RwLock::new(filter),
            store,
        })
    }

    /// Direct access to the underlying store (decapsulation, diagnostics).
    #[must_use]
    pub fn store(&self) -> &SecretsStore {
        &self.store
    }

    /// Filter inbound text: detect secrets, encrypt and persist each, and
    /// return the text with reference tokens substituted plus the safe
    /// references for context.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if a detected secret cannot be
    /// persisted; the original text is not returned in that case.
    #[instrument(skip(self, text), fields(context = context_hint))]
    pub async fn filter_incoming(
        &self,
        text: &str,
        context_hint: &str,
        source_message_id: Option<&str>,
    ) -> Result<(String, Vec<SecretReference>), ServiceError> {
        let (filtered, detected) = {
            let filter = self.filter.read().await;
            filter.filter_text(text, context_hint)
        };

        let mut references = Vec::with_capacity(detected.len());
        for secret in &detected {
            let record = self.store.store_secret(secret, source_message_id).await?;
            references.push(SecretReference {
                uuid: record.secret_uuid,
                description: record.description,
                context_hint: record.context_hint,
                sensitivity: record.sensitivity,
                detected_pattern: record.detected_pattern,
                auto_decapsulate_actions: record.auto_decapsulate_for_actions,
                created_at: record.created_at,
                last_accessed: record.last_accessed,
            });
        }

        Ok((filtered, references))
    }

    /// Decapsulate permitted references inside outbound action parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on rate limiting or database
    /// failures; callers must discard the (possibly partially substituted)
    /// parameters on error.
    pub async fn decapsulate_parameters(
        &self,
        params: &mut Value,
        action: &str,
        accessor: &str,
    ) -> Result<DecapsulationReport, ServiceError> {
        Ok(decapsulate_value(params, action, accessor, &self.store).await?)
    }

    /// The agent's `recall_secret` tool: fetch metadata and, when asked,
    /// the plaintext. Every call is rate limited and access logged.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on rate limiting, a missing secret
    /// is reported as `Ok(None)`.
    #[instrument(skip(self), fields(secret_uuid = %secret_uuid))]
    pub async fn recall_secret(
        &self,
        secret_uuid: Uuid,
        purpose: &str,
        accessor: &str,
        decrypt: bool,
    ) -> Result<Option<SecretRecallResult>, ServiceError> {
        let Some(record) = self
            .store
            .retrieve(secret_uuid, accessor, purpose, decrypt)
            .await?
        else {
            return Ok(None);
        };

        let value = if decrypt {
            Some(self.store.decrypt_value(&record).await?)
        } else {
            None
        };

        Ok(Some(SecretRecallResult {
            reference: SecretReference {
                uuid: record.secret_uuid,
                description: record.description,
                context_hint: record.context_hint,
                sensitivity: record.sensitivity,
                detected_pattern: record.detected_pattern,
                auto_decapsulate_actions: record.auto_decapsulate_for_actions,
                created_at: record.created_at,
                last_accessed: record.last_accessed,
            },
            value,
        }))
    }

    /// The agent's `update_filter` tool.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Filter`] on invalid patterns or unknown
    /// names; the previous configuration stays active.
    pub async fn update_filter(&self, op: UpdateFilterOp) -> Result<FilterStats, ServiceError> {
        let mut filter = self.filter.write().await;
        filter.apply(op)?;
        Ok(filter.stats())
    }

    /// The agent's `list_secrets` tool: metadata-only references.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] on a database failure.
    pub async fn list_secrets(
        &self,
        sensitivity: Option<Sensitivity>,
    ) -> Result<Vec<SecretReference>, ServiceError> {
        Ok(self.store.list(sensitivity, None).await?)
    }

    /// Rotate the master key, re-encrypting every stored secret.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if any row fails; no row is mutated
    /// and the current key stays active.
    pub async fn rotate_master_key(&self, new_key: &[u8]) -> Result<usize, ServiceError> {
        Ok(self.store.reencrypt_all(new_key).await?)
    }

    /// Current filter statistics.
    pub async fn filter_stats(&self) -> FilterStats {
        self.filter.read().await.stats()
    }
}
