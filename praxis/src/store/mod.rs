//! Durable task/thought queue backed by SQLite.
//!
//! The store is the engine's single source of truth for work: tasks arrive
//! from transports, seed thoughts are enqueued, and the scheduler drains
//! pending thoughts in priority order. Status transitions are enforced here
//! against the machines in [`crate::types`]; an attempt to leave a terminal
//! state or exceed the ponder cap is an error, never a silent update.
//!
//! ## Concurrency
//!
//! Reads run concurrently on the pool; writes serialize through an internal
//! async lock so status transitions are check-then-write atomic with
//! respect to one another.

pub mod migrations;
pub mod model;

use std::path::Path;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::types::{ErrorClass, TaskStatus, ThoughtStatus};
use model::{QueueStatus, Task, TaskContext, TaskSignature, Thought, ThoughtContext};

// ============================================================================
// Errors
// ============================================================================

/// Errors from the task/thought store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Underlying database error.
    #[error("engine database error: {0}")]
    #[diagnostic(code(praxis::store::sqlx))]
    Sqlx(#[from] sqlx::Error),

    /// A migration failed to apply.
    #[error("migration {filename} failed: {detail}")]
    #[diagnostic(
        code(praxis::store::migration),
        help("Fix the migration file; the bookkeeping row is only written on success.")
    )]
    Migration {
        /// Migration filename (or directory when listing failed).
        filename: String,
        /// Failure detail.
        detail: String,
    },

    /// Attempted a transition the status machine does not admit.
    #[error("illegal {entity} transition {from} -> {to} for {id}")]
    #[diagnostic(
        code(praxis::store::illegal_transition),
        help("Terminal states admit no further transitions.")
    )]
    IllegalTransition {
        /// "task" or "thought".
        entity: &'static str,
        /// Entity id.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Ponder re-queue attempted at or above the ponder cap.
    #[error("thought {thought_id} has reached the ponder cap ({cap})")]
    #[diagnostic(code(praxis::store::ponder_cap))]
    PonderCapExceeded {
        /// Thought id.
        thought_id: String,
        /// Configured cap.
        cap: u32,
    },

    /// A new thought would exceed the depth bound.
    #[error("thought depth {depth} exceeds the maximum of {max}")]
    #[diagnostic(code(praxis::store::depth_exceeded))]
    DepthExceeded {
        /// Requested depth.
        depth: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Entity not found.
    #[error("{entity} {id} not found")]
    #[diagnostic(code(praxis::store::not_found))]
    NotFound {
        /// "task" or "thought".
        entity: &'static str,
        /// Entity id.
        id: String,
    },

    /// A stored row could not be mapped back into a model.
    #[error("corrupt row: {detail}")]
    #[diagnostic(code(praxis::store::corrupt))]
    Corrupt {
        /// Description of the malformed column.
        detail: String,
    },
}

impl StoreError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlx(_) | Self::Migration { .. } => ErrorClass::TransientExternal,
            Self::IllegalTransition { .. } => ErrorClass::Invariant,
            Self::PonderCapExceeded { .. } | Self::DepthExceeded { .. } => ErrorClass::Validation,
            Self::NotFound { .. } => ErrorClass::Validation,
            Self::Corrupt { .. } => ErrorClass::Integrity,
        }
    }
}

// ============================================================================
// ThoughtStore
// ============================================================================

/// Durable queue of tasks and thoughts.
pub struct ThoughtStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    ponder_cap: u32,
    max_depth: u32,
}

impl std::fmt::Debug for ThoughtStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThoughtStore")
            .field("ponder_cap", &self.ponder_cap)
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}

impl ThoughtStore {
    /// Open the engine database at `path`, applying migrations from
    /// `migrations_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or a
    /// migration fails.
    pub async fn open(
        path: &Path,
        migrations_dir: &Path,
        ponder_cap: u32,
        max_depth: u32,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool, migrations_dir).await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            ponder_cap,
            max_depth,
        })
    }

    /// The underlying pool, shared with the graph memory store.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The configured ponder cap.
    #[must_use]
    pub fn ponder_cap(&self) -> u32 {
        self.ponder_cap
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a new task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a write failure.
    #[instrument(skip(self, task), fields(task_id = %task.task_id))]
    pub async fn add_task(&self, task: &Task) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO tasks (
                task_id, channel_id, description, status, priority,
                created_at, updated_at, parent_task_id, context_json,
                outcome_json, signed_by, signature, signed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(&task.channel_id)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.parent_task_id.as_deref())
        .bind(to_json(&task.context)?)
        .bind(task.outcome.as_ref().map(Value::to_string))
        .bind(task.signature.as_ref().map(|s| s.signed_by.clone()))
        .bind(task.signature.as_ref().map(|s| s.signature.clone()))
        .bind(task.signature.as_ref().map(|s| s.signed_at.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_task_row).transpose()
    }

    /// Current status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            });
        };
        let status: String = row.get("status");
        parse_task_status(&status)
    }

    /// Transition a task's status, enforcing the machine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] for inadmissible edges and
    /// [`StoreError::NotFound`] for unknown ids.
    #[instrument(skip(self, outcome))]
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        outcome: Option<Value>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.task_status_unlocked(task_id).await?;
        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                entity: "task",
                id: task_id.to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ?,
                 outcome_json = COALESCE(?, outcome_json)
             WHERE task_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(outcome.as_ref().map(Value::to_string))
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn task_status_unlocked(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            });
        };
        let status: String = row.get("status");
        parse_task_status(&status)
    }

    /// Count tasks, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn count_tasks(&self, status: Option<TaskStatus>) -> Result<u64, StoreError> {
        let count: (i64,) = if let Some(status) = status {
            sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM tasks")
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count.0.max(0) as u64)
    }

    /// Delete tasks and, with `cascade`, their thoughts and feedback
    /// mappings, in one transaction. Partial failure rolls the whole
    /// delete back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on any failure; nothing is deleted in
    /// that case.
    #[instrument(skip(self, task_ids), fields(count = task_ids.len()))]
    pub async fn delete_tasks(&self, task_ids: &[String], cascade: bool) -> Result<u64, StoreError> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock.lock().await;
        let placeholders = placeholder_list(task_ids.len());
        let mut tx = self.pool.begin().await?;

        if cascade {
            let feedback_sql = format!(
                "DELETE FROM feedback_mappings WHERE target_thought_id IN (
                     SELECT thought_id FROM thoughts WHERE source_task_id IN ({placeholders})
                 )"
            );
            let mut query = sqlx::query(&feedback_sql);
            for id in task_ids {
                query = query.bind(id);
            }
            query.execute(&mut *tx).await?;

            let thoughts_sql =
                format!("DELETE FROM thoughts WHERE source_task_id IN ({placeholders})");
            let mut query = sqlx::query(&thoughts_sql);
            for id in task_ids {
                query = query.bind(id);
            }
            query.execute(&mut *tx).await?;
        }

        let tasks_sql = format!("DELETE FROM tasks WHERE task_id IN ({placeholders})");
        let mut query = sqlx::query(&tasks_sql);
        for id in task_ids {
            query = query.bind(id);
        }
        let deleted = query.execute(&mut *tx).await?.rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Thoughts
    // ------------------------------------------------------------------

    /// Enqueue a thought, validating the depth bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DepthExceeded`] when the thought is deeper
    /// than the configured maximum.
    #[instrument(skip(self, thought), fields(thought_id = %thought.thought_id))]
    pub async fn add_thought(&self, thought: &Thought) -> Result<(), StoreError> {
        if thought.depth > self.max_depth {
            return Err(StoreError::DepthExceeded {
                depth: thought.depth,
                max: self.max_depth,
            });
        }
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO thoughts (
                thought_id, source_task_id, parent_thought_id, kind, status,
                created_at, updated_at, round_number, depth, content,
                context_json, ponder_count, ponder_notes_json, final_action_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&thought.thought_id)
        .bind(&thought.source_task_id)
        .bind(thought.parent_thought_id.as_deref())
        .bind(thought.kind.as_str())
        .bind(thought.status.as_str())
        .bind(thought.created_at.to_rfc3339())
        .bind(thought.updated_at.to_rfc3339())
        .bind(i64::from(thought.round_number))
        .bind(i64::from(thought.depth))
        .bind(&thought.content)
        .bind(to_json(&thought.context)?)
        .bind(i64::from(thought.ponder_count))
        .bind(
            thought
                .ponder_notes
                .as_ref()
                .map(|notes| to_json(notes))
                .transpose()?,
        )
        .bind(thought.final_action.as_ref().map(Value::to_string))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a thought by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn get_thought(&self, thought_id: &str) -> Result<Option<Thought>, StoreError> {
        let row = sqlx::query("SELECT * FROM thoughts WHERE thought_id = ?")
            .bind(thought_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_thought_row).transpose()
    }

    /// Current status of a thought.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown ids.
    pub async fn thought_status(&self, thought_id: &str) -> Result<ThoughtStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM thoughts WHERE thought_id = ?")
            .bind(thought_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "thought",
                id: thought_id.to_string(),
            });
        };
        let status: String = row.get("status");
        parse_thought_status(&status)
    }

    /// All thoughts for a task, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn thoughts_by_task(&self, task_id: &str) -> Result<Vec<Thought>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM thoughts WHERE source_task_id = ? ORDER BY created_at ASC")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(map_thought_row).collect()
    }

    /// All thoughts in a given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn thoughts_by_status(
        &self,
        status: ThoughtStatus,
    ) -> Result<Vec<Thought>, StoreError> {
        let rows = sqlx::query("SELECT * FROM thoughts WHERE status = ? ORDER BY created_at ASC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_thought_row).collect()
    }

    /// Mark a pending thought as processing on the given round.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] unless the thought is
    /// currently pending.
    #[instrument(skip(self))]
    pub async fn mark_processing(&self, thought_id: &str, round: u32) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.thought_status_unlocked(thought_id).await?;
        if !current.can_transition_to(ThoughtStatus::Processing) {
            return Err(StoreError::IllegalTransition {
                entity: "thought",
                id: thought_id.to_string(),
                from: current.to_string(),
                to: ThoughtStatus::Processing.to_string(),
            });
        }
        sqlx::query(
            "UPDATE thoughts SET status = ?, round_number = ?, updated_at = ? WHERE thought_id = ?",
        )
        .bind(ThoughtStatus::Processing.as_str())
        .bind(i64::from(round))
        .bind(Utc::now().to_rfc3339())
        .bind(thought_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition a thought to a terminal status, recording the final
    /// action.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::IllegalTransition`] for inadmissible edges.
    #[instrument(skip(self, final_action))]
    pub async fn update_thought_status(
        &self,
        thought_id: &str,
        status: ThoughtStatus,
        final_action: Option<Value>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let current = self.thought_status_unlocked(thought_id).await?;
        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                entity: "thought",
                id: thought_id.to_string(),
                from: current.to_string(),
                to: status.to_string(),
            });
        }
        sqlx::query(
            "UPDATE thoughts SET status = ?, updated_at = ?,
                 final_action_json = COALESCE(?, final_action_json)
             WHERE thought_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(final_action.as_ref().map(Value::to_string))
        .bind(thought_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-queue a processing thought for another round after a Ponder
    /// action, incrementing the ponder counter and recording the questions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PonderCapExceeded`] at the cap and
    /// [`StoreError::IllegalTransition`] unless the thought is processing.
    #[instrument(skip(self, notes))]
    pub async fn requeue_ponder(
        &self,
        thought_id: &str,
        notes: &[String],
    ) -> Result<u32, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(thought) = self.get_thought_unlocked(thought_id).await? else {
            return Err(StoreError::NotFound {
                entity: "thought",
                id: thought_id.to_string(),
            });
        };
        if !thought.status.can_transition_to(ThoughtStatus::Pending) {
            return Err(StoreError::IllegalTransition {
                entity: "thought",
                id: thought_id.to_string(),
                from: thought.status.to_string(),
                to: ThoughtStatus::Pending.to_string(),
            });
        }
        if thought.ponder_count >= self.ponder_cap {
            return Err(StoreError::PonderCapExceeded {
                thought_id: thought_id.to_string(),
                cap: self.ponder_cap,
            });
        }

        let mut merged = thought.ponder_notes.unwrap_or_default();
        merged.extend(notes.iter().cloned());
        let new_count = thought.ponder_count + 1;

        sqlx::query(
            "UPDATE thoughts SET status = ?, ponder_count = ?, ponder_notes_json = ?,
                 updated_at = ? WHERE thought_id = ?",
        )
        .bind(ThoughtStatus::Pending.as_str())
        .bind(i64::from(new_count))
        .bind(to_json(&merged)?)
        .bind(Utc::now().to_rfc3339())
        .bind(thought_id)
        .execute(&self.pool)
        .await?;

        Ok(new_count)
    }

    async fn thought_status_unlocked(&self, thought_id: &str) -> Result<ThoughtStatus, StoreError> {
        let row = sqlx::query("SELECT status FROM thoughts WHERE thought_id = ?")
            .bind(thought_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                entity: "thought",
                id: thought_id.to_string(),
            });
        };
        let status: String = row.get("status");
        parse_thought_status(&status)
    }

    async fn get_thought_unlocked(&self, thought_id: &str) -> Result<Option<Thought>, StoreError> {
        let row = sqlx::query("SELECT * FROM thoughts WHERE thought_id = ?")
            .bind(thought_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_thought_row).transpose()
    }

    // ------------------------------------------------------------------
    // Queue views
    // ------------------------------------------------------------------

    /// Count of thoughts still in flight (pending or processing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn count_pending_thoughts(&self) -> Result<u64, StoreError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM thoughts WHERE status = ? OR status = ?")
                .bind(ThoughtStatus::Pending.as_str())
                .bind(ThoughtStatus::Processing.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0.max(0) as u64)
    }

    /// Snapshot of queue counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn queue_status(&self) -> Result<QueueStatus, StoreError> {
        let pending_tasks = self.count_tasks(Some(TaskStatus::Pending)).await?;
        let total_tasks = self.count_tasks(None).await?;

        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM thoughts GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut pending_thoughts = 0u64;
        let mut processing_thoughts = 0u64;
        let mut total_thoughts = 0u64;
        for (status, count) in counts {
            let count = count.max(0) as u64;
            total_thoughts += count;
            match status.as_str() {
                "pending" => pending_thoughts = count,
                "processing" => processing_thoughts = count,
                _ => {}
            }
        }

        Ok(QueueStatus {
            pending_tasks,
            pending_thoughts,
            processing_thoughts,
            total_tasks,
            total_thoughts,
        })
    }

    /// Pending thoughts for the next processing round, ordered by task
    /// priority (desc) then task creation time (asc).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn round_queue(&self, limit: i64) -> Result<Vec<Thought>, StoreError> {
        let rows = sqlx::query(
            "SELECT th.* FROM thoughts th
             JOIN tasks t ON th.source_task_id = t.task_id
             WHERE th.status = 'pending'
             ORDER BY t.priority DESC, t.created_at ASC, th.created_at ASC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_thought_row).collect()
    }

    /// Thoughts created before the given instant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Sqlx`] on a read failure.
    pub async fn thoughts_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Thought>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM thoughts WHERE created_at < ? ORDER BY created_at ASC")
                .bind(cutoff.to_rfc3339())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(map_thought_row).collect()
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn placeholder_list(count: usize) -> String {
    // Placeholders only; values are always bound.
    std::iter::repeat_n("?", count).collect::<Vec<_>>().join(",")
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Corrupt {
        detail: format!("serialize: {err}"),
    })
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            detail: format!("timestamp '{text}'"),
        })
}

fn parse_task_status(text: &str) -> Result<TaskStatus, StoreError> {
    text.parse().map_err(|_| StoreError::Corrupt {
        detail: format!("task status '{text}'"),
    })
}

fn parse_thought_status(text: &str) -> Result<ThoughtStatus, StoreError> {
    text.parse().map_err(|_| StoreError::Corrupt {
        detail: format!("thought status '{text}'"),
    })
}

fn map_task_row(row: &SqliteRow) -> Result<Task, StoreError> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let context_json: Option<String> = row.get("context_json");
    let outcome_json: Option<String> = row.get("outcome_json");
    let signed_by: Option<String> = row.get("signed_by");
    let signature: Option<String> = row.get("signature");
    let signed_at: Option<String> = row.get("signed_at");

    let context: TaskContext = match context_json {
        Some(raw) => serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
            detail: format!("task context: {err}"),
        })?,
        None => TaskContext::default(),
    };
    let outcome = outcome_json
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                detail: format!("task outcome: {err}"),
            })
        })
        .transpose()?;
    let signature = match (signed_by, signature, signed_at) {
        (Some(signed_by), Some(signature), Some(signed_at)) => Some(TaskSignature {
            signed_by,
            signature,
            signed_at: parse_timestamp(&signed_at)?,
        }),
        _ => None,
    };

    Ok(Task {
        task_id: row.get("task_id"),
        channel_id: row.get("channel_id"),
        description: row.get("description"),
        status: parse_task_status(&status)?,
        priority: row.get("priority"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        parent_task_id: row.get("parent_task_id"),
        context,
        outcome,
        signature,
    })
}

fn map_thought_row(row: &SqliteRow) -> Result<Thought, StoreError> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let context_json: Option<String> = row.get("context_json");
    let ponder_notes_json: Option<String> = row.get("ponder_notes_json");
    let final_action_json: Option<String> = row.get("final_action_json");
    let round_number: i64 = row.get("round_number");
    let depth: i64 = row.get("depth");
    let ponder_count: i64 = row.get("ponder_count");

    let context: ThoughtContext = match context_json {
        Some(raw) => serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
            detail: format!("thought context: {err}"),
        })?,
        None => ThoughtContext::default(),
    };
    let ponder_notes = ponder_notes_json
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                detail: format!("ponder notes: {err}"),
            })
        })
        .transpose()?;
    let final_action = final_action_json
        .map(|raw| {
            serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                detail: format!("final action: {err}"),
            })
        })
        .transpose()?;

    Ok(Thought {
        thought_id: row.get("thought_id"),
        source_task_id: row.get("source_task_id"),
        parent_thought_id: row.get("parent_thought_id"),
        kind: kind.parse().map_err(|_| StoreError::Corrupt {
            detail: format!("thought kind '{kind}'"),
        })?,
        status: parse_thought_status(&status)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        round_number: round_number.max(0) as u32,
        depth: depth.max(0) as u32,
        content: row.get("content"),
        context,
        ponder_count: ponder_count.max(0) as u32,
        ponder_notes,
        final_action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_list_shapes() {
        assert_eq!(placeholder_list(1), "?");
        assert_eq!(placeholder_list(3), "?,?,?");
    }
}
