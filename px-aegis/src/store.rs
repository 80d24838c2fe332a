//! Encrypted SQLite store for detected secrets.
//!
//! The store lives in its own database file, separate from the engine
//! store. Every row holds AES-256-GCM ciphertext plus the salt/nonce needed
//! to re-derive its key from the master key, and every access — store,
//! view, decrypt, update, delete — appends a row to the access log.
//! Access is rate limited per accessor identity.
//!
//! ## Behavior
//!
//! - Plaintext is only ever reconstructed transiently in memory during
//!   [`SecretsStore::decrypt_value`] or an allowed decapsulation.
//! - [`SecretsStore::reencrypt_all`] is all-or-nothing: a failure on any
//!   row rolls the whole rotation back and keeps the current master key.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;
use uuid::Uuid;

use crate::decapsulate::auto_decapsulate_actions;
use crate::encryption::{CryptoError, SecretCipher};
use crate::filter::DetectedSecret;
use crate::patterns::Sensitivity;

// ── Errors ─────────────────────────────────────────────────────────────

/// Errors from the secrets store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("secrets database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Encryption or decryption failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The accessor exceeded the per-minute or per-hour access budget.
    #[error("rate limit exceeded for accessor '{accessor}'")]
    RateLimited {
        /// The throttled accessor identity.
        accessor: String,
    },

    /// A stored row could not be mapped back into a record.
    #[error("corrupt secrets row: {what}")]
    Corrupt {
        /// Description of the malformed column.
        what: String,
    },
}

// ── Records ────────────────────────────────────────────────────────────

/// Persistent, encrypted secret row.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    /// Secret identifier.
    pub secret_uuid: Uuid,
    /// AES-256-GCM ciphertext.
    pub encrypted_value: Vec<u8>,
    /// Key-version reference that encrypted this row.
    pub key_version: String,
    /// PBKDF2 salt.
    pub salt: Vec<u8>,
    /// GCM nonce.
    pub nonce: Vec<u8>,
    /// Human-readable description.
    pub description: String,
    /// Sensitivity classification.
    pub sensitivity: Sensitivity,
    /// Pattern that detected the secret.
    pub detected_pattern: String,
    /// Safe context description.
    pub context_hint: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last access timestamp, if any.
    pub last_accessed: Option<DateTime<Utc>>,
    /// Number of accesses so far.
    pub access_count: i64,
    /// Optional source message identifier.
    pub source_message_id: Option<String>,
    /// Action names permitted to auto-decapsulate this secret.
    pub auto_decapsulate_for_actions: Vec<String>,
    /// When set, only a manual recall may decrypt this secret.
    pub manual_access_only: bool,
}

/// Non-sensitive reference to a stored secret, safe to surface in context.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SecretReference {
    /// Secret identifier.
    pub uuid: Uuid,
    /// Human-readable description.
    pub description: String,
    /// Safe context description.
    pub context_hint: String,
    /// Sensitivity classification.
    pub sensitivity: Sensitivity,
    /// Pattern that detected the secret.
    pub detected_pattern: String,
    /// Action names permitted to auto-decapsulate.
    pub auto_decapsulate_actions: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last access timestamp, if any.
    pub last_accessed: Option<DateTime<Utc>>,
}

/// The kind of access being logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretAccessKind {
    /// Initial storage of a new secret.
    Store,
    /// Metadata retrieval without decryption.
    View,
    /// Plaintext reconstruction.
    Decrypt,
    /// Row mutation (re-encryption).
    Update,
    /// Row removal.
    Delete,
}

impl std::fmt::Display for SecretAccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store => write!(f, "STORE"),
            Self::View => write!(f, "VIEW"),
            Self::Decrypt => write!(f, "DECRYPT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One access-log row.
#[derive(Debug, Clone)]
pub struct AccessLogEntry {
    /// Unique access identifier.
    pub access_id: String,
    /// The secret that was accessed.
    pub secret_uuid: Uuid,
    /// Kind of access.
    pub access_type: String,
    /// Accessor identity.
    pub accessor: String,
    /// Stated purpose.
    pub purpose: String,
    /// When the access happened.
    pub timestamp: DateTime<Utc>,
    /// Whether the access succeeded.
    pub success: bool,
    /// Failure reason when `success` is false.
    pub failure_reason: Option<String>,
}

// ── Rate limiting ──────────────────────────────────────────────────────

/// Sliding-window access budget per accessor identity.
#[derive(Debug)]
struct RateLimiter {
    per_minute: usize,
    per_hour: usize,
    accesses: HashMap<String, Vec<DateTime<Utc>>>,
}

impl RateLimiter {
    fn new(per_minute: usize, per_hour: usize) -> Self {
        Self {
            per_minute,
            per_hour,
            accesses: HashMap::new(),
        }
    }

    /// Returns false (and does not record) when the accessor is over budget.
    fn check_and_record(&mut self, accessor: &str, now: DateTime<Utc>) -> bool {
        let window = self.accesses.entry(accessor.to_string()).or_default();
        let hour_ago = now - Duration::hours(1);
        let minute_ago = now - Duration::minutes(1);

        window.retain(|t| *t > hour_ago);
        let last_minute = window.iter().filter(|t| **t > minute_ago).count();

        if last_minute >= self.per_minute || window.len() >= self.per_hour {
            return false;
        }
        window.push(now);
        true
    }
}

// ── Schema ─────────────────────────────────────────────────────────────

const SECRETS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS secrets (
    secret_uuid TEXT PRIMARY KEY,
    encrypted_value BLOB NOT NULL,
    key_version TEXT NOT NULL,
    salt BLOB NOT NULL,
    nonce BLOB NOT NULL,
    description TEXT NOT NULL,
    sensitivity TEXT NOT NULL,
    detected_pattern TEXT NOT NULL,
    context_hint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    source_message_id TEXT,
    auto_decapsulate_for_actions TEXT NOT NULL DEFAULT '',
    manual_access_only INTEGER NOT NULL DEFAULT 0
)";

// No foreign key on secret_uuid: the log records attempts against unknown
// or already-deleted secrets too.
const ACCESS_LOG_TABLE: &str = "
CREATE TABLE IF NOT EXISTS secret_access_log (
    access_id TEXT PRIMARY KEY,
    secret_uuid TEXT NOT NULL,
    access_type TEXT NOT NULL,
    accessor TEXT NOT NULL,
    purpose TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    success INTEGER NOT NULL DEFAULT 1,
    failure_reason TEXT
)";

const INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS idx_secrets_pattern ON secrets(detected_pattern)",
    "CREATE INDEX IF NOT EXISTS idx_secrets_sensitivity ON secrets(sensitivity)",
    "CREATE INDEX IF NOT EXISTS idx_access_log_timestamp ON secret_access_log(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_access_log_secret ON secret_access_log(secret_uuid)",
];

// ── SecretsStore ───────────────────────────────────────────────────────

/// Default per-minute access budget.
pub const DEFAULT_ACCESSES_PER_MINUTE: usize = 10;
/// Default per-hour access budget.
pub const DEFAULT_ACCESSES_PER_HOUR: usize = 100;

/// Encrypted storage with access auditing and rate limits.
pub struct SecretsStore {
    pool: SqlitePool,
    cipher: RwLock<SecretCipher>,
    limiter: Mutex<RateLimiter>,
}

impl std::fmt::Debug for SecretsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsStore").finish_non_exhaustive()
    }
}

impl SecretsStore {
    /// Open (creating if necessary) the secrets database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: &Path, cipher: SecretCipher) -> Result<Self, StoreError> {
        Self::open_with_limits(
            path,
            cipher,
            DEFAULT_ACCESSES_PER_MINUTE,
            DEFAULT_ACCESSES_PER_HOUR,
        )
        .await
    }

    /// Open with explicit rate-limit budgets.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] if the database cannot be opened or the
    /// schema cannot be created.
    pub async fn open_with_limits(
        path: &Path,
        cipher: SecretCipher,
        per_minute: usize,
        per_hour: usize,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SECRETS_TABLE).execute(&pool).await?;
        sqlx::query(ACCESS_LOG_TABLE).execute(&pool).await?;
        for index in INDEXES {
            sqlx::query(index).execute(&pool).await?;
        }

        Ok(Self {
            pool,
            cipher: RwLock::new(cipher),
            limiter: Mutex::new(RateLimiter::new(per_minute, per_hour)),
        })
    }

    /// The key-version reference new rows will carry.
    pub async fn key_version(&self) -> String {
        self.cipher.read().await.key_version()
    }

    /// Encrypt and persist a detected secret.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Crypto`] if encryption fails or
    /// [`StoreError::Sqlx`] on a write failure; either way a failed access
    /// row is logged.
    #[instrument(skip(self, secret), fields(secret_uuid = %secret.secret_uuid))]
    pub async fn store_secret(
        &self,
        secret: &DetectedSecret,
        source_message_id: Option<&str>,
    ) -> Result<SecretRecord, StoreError> {
        let cipher = self.cipher.read().await;
        let payload = match cipher.encrypt(&secret.original_value) {
            Ok(payload) => payload,
            Err(err) => {
                drop(cipher);
                self.log_access(
                    secret.secret_uuid,
                    SecretAccessKind::Store,
                    "system",
                    "initial secret storage",
                    false,
                    Some("encryption failed"),
                )
                .await?;
                return Err(err.into());
            }
        };
        let key_version = cipher.key_version();
        drop(cipher);

        let auto_actions: Vec<String> = auto_decapsulate_actions(secret.sensitivity)
            .iter()
            .map(|a| (*a).to_string())
            .collect();
        let record = SecretRecord {
            secret_uuid: secret.secret_uuid,
            encrypted_value: payload.ciphertext,
            key_version,
            salt: payload.salt,
            nonce: payload.nonce,
            description: secret.description.clone(),
            sensitivity: secret.sensitivity,
            detected_pattern: secret.pattern_name.clone(),
            context_hint: secret.context_hint.clone(),
            created_at: Utc::now(),
            last_accessed: None,
            access_count: 0,
            source_message_id: source_message_id.map(str::to_string),
            auto_decapsulate_for_actions: auto_actions,
            manual_access_only: false,
        };

        sqlx::query(
            "INSERT OR REPLACE INTO secrets (
                secret_uuid, encrypted_value, key_version, salt, nonce,
                description, sensitivity, detected_pattern, context_hint,
                created_at, last_accessed, access_count, source_message_id,
                auto_decapsulate_for_actions, manual_access_only
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.secret_uuid.to_string())
        .bind(&record.encrypted_value)
        .bind(&record.key_version)
        .bind(&record.salt)
        .bind(&record.nonce)
        .bind(&record.description)
        .bind(record.sensitivity.to_string())
        .bind(&record.detected_pattern)
        .bind(&record.context_hint)
        .bind(record.created_at.to_rfc3339())
        .bind(Option::<String>::None)
        .bind(record.access_count)
        .bind(record.source_message_id.as_deref())
        .bind(record.auto_decapsulate_for_actions.join(","))
        .bind(i64::from(record.manual_access_only))
        .execute(&self.pool)
        .await?;

        self.log_access(
            record.secret_uuid,
            SecretAccessKind::Store,
            "system",
            "initial secret storage",
            true,
            None,
        )
        .await?;

        Ok(record)
    }

    /// Retrieve a secret row, updating access tracking.
    ///
    /// `decrypt` only affects which access kind is logged; plaintext
    /// reconstruction is a separate call to [`decrypt_value`](Self::decrypt_value).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RateLimited`] when the accessor is over budget
    /// (a failed access row is still logged), or [`StoreError::Sqlx`] on a
    /// database failure.
    #[instrument(skip(self), fields(secret_uuid = %secret_uuid))]
    pub async fn retrieve(
        &self,
        secret_uuid: Uuid,
        accessor: &str,
        purpose: &str,
        decrypt: bool,
    ) -> Result<Option<SecretRecord>, StoreError> {
        let kind = if decrypt {
            SecretAccessKind::Decrypt
        } else {
            SecretAccessKind::View
        };

        let allowed = {
            let mut limiter = self.limiter.lock().await;
            limiter.check_and_record(accessor, Utc::now())
        };
        if !allowed {
            self.log_access(
                secret_uuid,
                kind,
                accessor,
                purpose,
                false,
                Some("rate limit exceeded"),
            )
            .await?;
            return Err(StoreError::RateLimited {
                accessor: accessor.to_string(),
            });
        }

        let row = sqlx::query("SELECT * FROM secrets WHERE secret_uuid = ?")
            .bind(secret_uuid.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            self.log_access(
                secret_uuid,
                kind,
                accessor,
                purpose,
                false,
                Some("secret not found"),
            )
            .await?;
            return Ok(None);
        };

        let mut record = map_secret_row(&row)?;
        record.last_accessed = Some(Utc::now());
        record.access_count += 1;

        sqlx::query("UPDATE secrets SET last_accessed = ?, access_count = ? WHERE secret_uuid = ?")
            .bind(record.last_accessed.map(|t| t.to_rfc3339()))
            .bind(record.access_count)
            .bind(secret_uuid.to_string())
            .execute(&self.pool)
            .await?;

        self.log_access(secret_uuid, kind, accessor, purpose, true, None)
            .await?;

        Ok(Some(record))
    }

    /// Reconstruct the plaintext of a record, transiently in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Crypto`] if the ciphertext fails
    /// authentication under the current master key.
    pub async fn decrypt_value(&self, record: &SecretRecord) -> Result<String, StoreError> {
        let cipher = self.cipher.read().await;
        Ok(cipher.decrypt(&record.encrypted_value, &record.salt, &record.nonce)?)
    }

    /// Delete a secret row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a database failure.
    #[instrument(skip(self), fields(secret_uuid = %secret_uuid))]
    pub async fn delete(&self, secret_uuid: Uuid, accessor: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM secrets WHERE secret_uuid = ?")
            .bind(secret_uuid.to_string())
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;

        self.log_access(
            secret_uuid,
            SecretAccessKind::Delete,
            accessor,
            "secret deletion",
            deleted,
            (!deleted).then_some("secret not found"),
        )
        .await?;

        Ok(deleted)
    }

    /// List stored secrets (metadata only — never ciphertext or plaintext).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a database failure.
    pub async fn list(
        &self,
        sensitivity: Option<Sensitivity>,
        pattern: Option<&str>,
    ) -> Result<Vec<SecretReference>, StoreError> {
        let mut sql = String::from(
            "SELECT secret_uuid, description, context_hint, sensitivity, detected_pattern,
                    auto_decapsulate_for_actions, created_at, last_accessed
             FROM secrets WHERE 1=1",
        );
        if sensitivity.is_some() {
            sql.push_str(" AND sensitivity = ?");
        }
        if pattern.is_some() {
            sql.push_str(" AND detected_pattern = ?");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(level) = sensitivity {
            query = query.bind(level.to_string());
        }
        if let Some(name) = pattern {
            query = query.bind(name.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(map_reference_row).collect()
    }

    /// Recent access-log rows, optionally filtered to one secret.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a database failure.
    pub async fn access_logs(
        &self,
        secret_uuid: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<AccessLogEntry>, StoreError> {
        let rows = if let Some(uuid) = secret_uuid {
            sqlx::query(
                "SELECT * FROM secret_access_log WHERE secret_uuid = ?
                 ORDER BY timestamp DESC LIMIT ?",
            )
            .bind(uuid.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM secret_access_log ORDER BY timestamp DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        };

        rows.iter().map(map_access_row).collect()
    }

    /// Re-encrypt every stored secret under `new_key`.
    ///
    /// All rows are rewritten in a single transaction; a failure on any row
    /// aborts the whole rotation with no changes committed and the current
    /// master key stays in place. On success the previous key is zeroized.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Crypto`] if any row fails to decrypt or
    /// re-encrypt, or [`StoreError::Sqlx`] on a database failure.
    #[instrument(skip_all)]
    pub async fn reencrypt_all(&self, new_key: &[u8]) -> Result<usize, StoreError> {
        let mut cipher = self.cipher.write().await;
        let next = cipher.successor(new_key)?;
        let next_version = next.key_version();

        let rows = sqlx::query("SELECT secret_uuid, encrypted_value, salt, nonce FROM secrets")
            .fetch_all(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        let mut rotated = 0usize;
        for row in &rows {
            let uuid: String = row.get("secret_uuid");
            let ciphertext: Vec<u8> = row.get("encrypted_value");
            let salt: Vec<u8> = row.get("salt");
            let nonce: Vec<u8> = row.get("nonce");

            // Any failure here drops the transaction unchanged.
            let plaintext = cipher.decrypt(&ciphertext, &salt, &nonce)?;
            let payload = next.encrypt(&plaintext)?;

            sqlx::query(
                "UPDATE secrets
                 SET encrypted_value = ?, salt = ?, nonce = ?, key_version = ?
                 WHERE secret_uuid = ?",
            )
            .bind(&payload.ciphertext)
            .bind(&payload.salt)
            .bind(&payload.nonce)
            .bind(&next_version)
            .bind(&uuid)
            .execute(&mut *tx)
            .await?;
            rotated += 1;
        }
        tx.commit().await?;

        // Old key zeroizes when the previous cipher drops.
        *cipher = next;
        tracing::info!(rotated, key_version = %next_version, "re-encrypted secrets under new master key");
        Ok(rotated)
    }

    async fn log_access(
        &self,
        secret_uuid: Uuid,
        kind: SecretAccessKind,
        accessor: &str,
        purpose: &str,
        success: bool,
        failure_reason: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO secret_access_log (
                access_id, secret_uuid, access_type, accessor, purpose,
                timestamp, success, failure_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(secret_uuid.to_string())
        .bind(kind.to_string())
        .bind(accessor)
        .bind(purpose)
        .bind(Utc::now().to_rfc3339())
        .bind(i64::from(success))
        .bind(failure_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Row mapping ────────────────────────────────────────────────────────

fn parse_uuid(text: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(text).map_err(|_| StoreError::Corrupt {
        what: format!("uuid '{text}'"),
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            what: format!("timestamp '{text}'"),
        })
}

fn parse_sensitivity(text: &str) -> Result<Sensitivity, StoreError> {
    text.parse().map_err(|_| StoreError::Corrupt {
        what: format!("sensitivity '{text}'"),
    })
}

fn split_actions(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn map_secret_row(row: &SqliteRow) -> Result<SecretRecord, StoreError> {
    let uuid_text: String = row.get("secret_uuid");
    let sensitivity_text: String = row.get("sensitivity");
    let created_text: String = row.get("created_at");
    let last_accessed_text: Option<String> = row.get("last_accessed");
    let actions_text: String = row.get("auto_decapsulate_for_actions");
    let manual: i64 = row.get("manual_access_only");

    Ok(SecretRecord {
        secret_uuid: parse_uuid(&uuid_text)?,
        encrypted_value: row.get("encrypted_value"),
        key_version: row.get("key_version"),
        salt: row.get("salt"),
        nonce: row.get("nonce"),
        description: row.get("description"),
        sensitivity: parse_sensitivity(&sensitivity_text)?,
        detected_pattern: row.get("detected_pattern"),
        context_hint: row.get("context_hint"),
        created_at: parse_timestamp(&created_text)?,
        last_accessed: last_accessed_text
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        access_count: row.get("access_count"),
        source_message_id: row.get("source_message_id"),
        auto_decapsulate_for_actions: split_actions(&actions_text),
        manual_access_only: manual != 0,
    })
}

fn map_reference_row(row: &SqliteRow) -> Result<SecretReference, StoreError> {
    let uuid_text: String = row.get("secret_uuid");
    let sensitivity_text: String = row.get("sensitivity");
    let created_text: String = row.get("created_at");
    let last_accessed_text: Option<String> = row.get("last_accessed");
    let actions_text: String = row.get("auto_decapsulate_for_actions");

    Ok(SecretReference {
        uuid: parse_uuid(&uuid_text)?,
        description: row.get("description"),
        context_hint: row.get("context_hint"),
        sensitivity: parse_sensitivity(&sensitivity_text)?,
        detected_pattern: row.get("detected_pattern"),
        auto_decapsulate_actions: split_actions(&actions_text),
        created_at: parse_timestamp(&created_text)?,
        last_accessed: last_accessed_text
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
    })
}

fn map_access_row(row: &SqliteRow) -> Result<AccessLogEntry, StoreError> {
    let uuid_text: String = row.get("secret_uuid");
    let timestamp_text: String = row.get("timestamp");
    let success: i64 = row.get("success");

    Ok(AccessLogEntry {
        access_id: row.get("access_id"),
        secret_uuid: parse_uuid(&uuid_text)?,
        access_type: row.get("access_type"),
        accessor: row.get("accessor"),
        purpose: row.get("purpose"),
        timestamp: parse_timestamp(&timestamp_text)?,
        success: success != 0,
        failure_reason: row.get("failure_reason"),
    })
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_minute_budget() {
        let mut limiter = RateLimiter::new(2, 100);
        let now = Utc::now();
        assert!(limiter.check_and_record("a", now));
        assert!(limiter.check_and_record("a", now));
        assert!(!limiter.check_and_record("a", now));
        // Different accessor has its own budget.
        assert!(limiter.check_and_record("b", now));
    }

    #[test]
    fn rate_limiter_hour_budget() {
        let mut limiter = RateLimiter::new(100, 3);
        let start = Utc::now() - Duration::minutes(30);
        for i in 0..3 {
            assert!(limiter.check_and_record("a", start + Duration::minutes(i)));
        }
        assert!(!limiter.check_and_record("a", Utc::now()));
    }

    #[test]
    fn rate_limiter_window_expiry() {
        let mut limiter = RateLimiter::new(1, 2);
        let past = Utc::now() - Duration::minutes(5);
        assert!(limiter.check_and_record("a", past));
        // The minute window has rolled over; the hour window has room.
        assert!(limiter.check_and_record("a", Utc::now()));
    }

    #[test]
    fn actions_split_round_trip() {
        assert_eq!(split_actions(""), Vec::<String>::new());
        assert_eq!(split_actions("tool,speak"), vec!["tool", "speak"]);
    }
}
