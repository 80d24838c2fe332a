//! Append-only SQLite storage for the audit chain.
//!
//! The audit database is its own file. `audit_log` rows are only ever
//! inserted; `signing_keys` tracks rotation so revoked keys keep verifying
//! historic entries.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::signing::KeyRecord;
use super::{AuditEntry, AuditError};

const AUDIT_TABLE: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    sequence_number INTEGER PRIMARY KEY,
    event_id TEXT NOT NULL UNIQUE,
    event_timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    originator_id TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL,
    signature TEXT,
    signing_key_id TEXT
)";

const KEYS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS signing_keys (
    key_id TEXT PRIMARY KEY,
    public_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    revoked_at TEXT
)";

/// Raw row access for the audit chain.
pub struct AuditStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore").finish_non_exhaustive()
    }
}

impl AuditStore {
    /// Open (creating if necessary) the audit database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sqlx`] if the file cannot be opened or the
    /// schema created.
    pub async fn open(path: &Path) -> Result<Self, AuditError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(AUDIT_TABLE).execute(&pool).await?;
        sqlx::query(KEYS_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// The last entry's `(sequence_number, entry_hash)`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sqlx`] on a read failure.
    pub async fn chain_head(&self) -> Result<Option<(u64, String)>, AuditError> {
        let row = sqlx::query(
            "SELECT sequence_number, entry_hash FROM audit_log
             ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| {
            let sequence: i64 = row.get("sequence_number");
            (sequence.max(0) as u64, row.get("entry_hash"))
        }))
    }

    /// Append one entry. The caller holds the sequence lock and has
    /// already assigned `sequence_number`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sqlx`] on a write failure (including a
    /// sequence collision, which the unique key rejects).
    pub async fn append(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO audit_log (
                sequence_number, event_id, event_timestamp, event_type,
                originator_id, payload_json, previous_hash, entry_hash,
                signature, signing_key_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.sequence_number as i64)
        .bind(&entry.event_id)
        .bind(entry.event_timestamp.to_rfc3339())
        .bind(&entry.event_type)
        .bind(&entry.originator_id)
        .bind(entry.payload.to_string())
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .bind(entry.signature.as_deref())
        .bind(entry.signing_key_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All entries in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on read or mapping failures.
    pub async fn all_entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY sequence_number ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_entry_row).collect()
    }

    /// The last `n` entries in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on read or mapping failures.
    pub async fn tail_entries(&self, n: u64) -> Result<Vec<AuditEntry>, AuditError> {
        let rows = sqlx::query(
            "SELECT * FROM (
                 SELECT * FROM audit_log ORDER BY sequence_number DESC LIMIT ?
             ) ORDER BY sequence_number ASC",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_entry_row).collect()
    }

    /// Insert a signing key.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sqlx`] on a write failure.
    pub async fn insert_key(&self, record: &KeyRecord) -> Result<(), AuditError> {
        sqlx::query(
            "INSERT INTO signing_keys (key_id, public_key, created_at, revoked_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&record.key_id)
        .bind(&record.public_key)
        .bind(record.created_at.to_rfc3339())
        .bind(record.revoked_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a key revoked. The row stays so historic entries verify.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Sqlx`] on a write failure.
    pub async fn revoke_key(&self, key_id: &str) -> Result<(), AuditError> {
        sqlx::query("UPDATE signing_keys SET revoked_at = ? WHERE key_id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All signing keys, including revoked ones.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] on read or mapping failures.
    pub async fn all_keys(&self) -> Result<Vec<KeyRecord>, AuditError> {
        let rows = sqlx::query("SELECT * FROM signing_keys ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let created_at: String = row.get("created_at");
                let revoked_at: Option<String> = row.get("revoked_at");
                Ok(KeyRecord {
                    key_id: row.get("key_id"),
                    public_key: row.get("public_key"),
                    created_at: parse_timestamp(&created_at)?,
                    revoked_at: revoked_at.as_deref().map(parse_timestamp).transpose()?,
                })
            })
            .collect()
    }

    /// Overwrite one entry's hash. Test-support for tamper scenarios; the
    /// engine never calls this.
    #[doc(hidden)]
    pub async fn tamper_entry_hash(
        &self,
        sequence_number: u64,
        new_hash: &str,
    ) -> Result<(), AuditError> {
        sqlx::query("UPDATE audit_log SET entry_hash = ? WHERE sequence_number = ?")
            .bind(new_hash)
            .bind(sequence_number as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, AuditError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AuditError::Corrupt {
            detail: format!("timestamp '{text}'"),
        })
}

fn map_entry_row(row: &SqliteRow) -> Result<AuditEntry, AuditError> {
    let sequence: i64 = row.get("sequence_number");
    let timestamp: String = row.get("event_timestamp");
    let payload: String = row.get("payload_json");

    Ok(AuditEntry {
        sequence_number: sequence.max(0) as u64,
        event_id: row.get("event_id"),
        event_timestamp: parse_timestamp(&timestamp)?,
        event_type: row.get("event_type"),
        originator_id: row.get("originator_id"),
        payload: serde_json::from_str(&payload).map_err(|err| AuditError::Corrupt {
            detail: format!("payload: {err}"),
        })?,
        previous_hash: row.get("previous_hash"),
        entry_hash: row.get("entry_hash"),
        signature: row.get("signature"),
        signing_key_id: row.get("signing_key_id"),
    })
}
