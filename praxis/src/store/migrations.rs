//! Sequential migration runner for the engine database.
//!
//! Applies `.sql` files from a directory in lexical order, tracking applied
//! files in a `schema_migrations` table. A migration that fails leaves no
//! bookkeeping row behind, so a fixed file re-applies cleanly.

use std::path::Path;

use sqlx::SqlitePool;
use tracing::instrument;

use super::StoreError;

/// Ensure the bookkeeping table exists.
async fn ensure_tracking_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            filename TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply pending migrations located in `dir`.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] when the directory is unreadable or a
/// migration fails to execute; already-applied files are skipped.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool, dir: &Path) -> Result<(), StoreError> {
    ensure_tracking_table(pool)
        .await
        .map_err(|source| StoreError::Migration {
            filename: "schema_migrations".into(),
            detail: source.to_string(),
        })?;

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| StoreError::Migration {
            filename: dir.display().to_string(),
            detail: source.to_string(),
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "sql"))
        .collect();
    files.sort();

    for file in files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let already: Option<(String,)> =
            sqlx::query_as("SELECT filename FROM schema_migrations WHERE filename = ?")
                .bind(&name)
                .fetch_optional(pool)
                .await
                .map_err(|source| StoreError::Migration {
                    filename: name.clone(),
                    detail: source.to_string(),
                })?;
        if already.is_some() {
            continue;
        }

        tracing::info!(migration = %name, "applying migration");
        let sql = std::fs::read_to_string(&file).map_err(|source| StoreError::Migration {
            filename: name.clone(),
            detail: source.to_string(),
        })?;

        sqlx::raw_sql(&sql)
            .execute(pool)
            .await
            .map_err(|source| StoreError::Migration {
                filename: name.clone(),
                detail: source.to_string(),
            })?;

        sqlx::query("INSERT INTO schema_migrations (filename) VALUES (?)")
            .bind(&name)
            .execute(pool)
            .await
            .map_err(|source| StoreError::Migration {
                filename: name.clone(),
                detail: source.to_string(),
            })?;
    }

    Ok(())
}
