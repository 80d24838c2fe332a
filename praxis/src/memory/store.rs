//! SQLite-backed graph memory.
//!
//! Two tables — `graph_nodes` keyed by `(node_id, scope)` and
//! `graph_edges` with both endpoints in one scope — shared with the engine
//! database. The three memory verbs are:
//!
//! - **Memorize**: insert or update a node; the version increments.
//! - **Recall**: query by id, type, or free-text over attributes.
//! - **Forget**: remove a node. Cascades never happen implicitly; the
//!   caller names the edges to remove alongside, and a node that is still
//!   referenced by other edges refuses to go.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::instrument;

use crate::types::{ErrorClass, GraphScope};

use super::graph::{GraphEdge, GraphNode, GraphNodeSpec, RecallQuery, SUMMARIZES};

// ============================================================================
// Errors
// ============================================================================

/// Errors from graph memory.
#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    /// Underlying database error.
    #[error("graph memory database error: {0}")]
    #[diagnostic(code(praxis::memory::sqlx))]
    Sqlx(#[from] sqlx::Error),

    /// An edge referenced a missing endpoint or crossed scopes.
    #[error("edge endpoints must exist in scope {scope}: {source_node} -> {target}")]
    #[diagnostic(code(praxis::memory::bad_edge))]
    BadEdge {
        /// Edge source id.
        source_node: String,
        /// Edge target id.
        target: String,
        /// Required shared scope.
        scope: GraphScope,
    },

    /// Forget refused because edges still reference the node.
    #[error("node {node_id} in {scope} still has {remaining} referencing edge(s)")]
    #[diagnostic(
        code(praxis::memory::still_referenced),
        help("Forget requires explicit edge removals; cascades are never implicit.")
    )]
    StillReferenced {
        /// Node id.
        node_id: String,
        /// Node scope.
        scope: GraphScope,
        /// Edges still referencing the node.
        remaining: u64,
    },

    /// A stored row could not be mapped back.
    #[error("corrupt graph row: {detail}")]
    #[diagnostic(code(praxis::memory::corrupt))]
    Corrupt {
        /// Description of the malformed column.
        detail: String,
    },
}

impl MemoryError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlx(_) => ErrorClass::TransientExternal,
            Self::BadEdge { .. } | Self::StillReferenced { .. } => ErrorClass::Validation,
            Self::Corrupt { .. } => ErrorClass::Integrity,
        }
    }
}

// ============================================================================
// GraphStore
// ============================================================================

/// Graph memory over the shared engine pool.
pub struct GraphStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore").finish_non_exhaustive()
    }
}

impl GraphStore {
    /// Wrap the engine pool (tables come from the engine migrations).
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Memorize: insert or update a node; version increments on update.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a write failure.
    #[instrument(skip(self, spec), fields(node_id = %spec.node_id, scope = %spec.scope))]
    pub async fn memorize(
        &self,
        spec: &GraphNodeSpec,
        updated_by: &str,
    ) -> Result<GraphNode, MemoryError> {
        let now = Utc::now();
        let existing = self.get_node(&spec.node_id, spec.scope).await?;

        let node = match existing {
            Some(previous) => {
                let version = previous.version + 1;
                sqlx::query(
                    "UPDATE graph_nodes
                     SET node_type = ?, attributes_json = ?, version = ?,
                         updated_by = ?, updated_at = ?
                     WHERE node_id = ? AND scope = ?",
                )
                .bind(&spec.node_type)
                .bind(spec.attributes.to_string())
                .bind(i64::from(version))
                .bind(updated_by)
                .bind(now.to_rfc3339())
                .bind(&spec.node_id)
                .bind(spec.scope.as_str())
                .execute(&self.pool)
                .await?;
                GraphNode {
                    node_id: spec.node_id.clone(),
                    scope: spec.scope,
                    node_type: spec.node_type.clone(),
                    attributes: spec.attributes.clone(),
                    version,
                    updated_by: Some(updated_by.to_string()),
                    updated_at: Some(now),
                    created_at: previous.created_at,
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO graph_nodes (
                        node_id, scope, node_type, attributes_json, version,
                        updated_by, updated_at, created_at
                    ) VALUES (?, ?, ?, ?, 1, ?, ?, ?)",
                )
                .bind(&spec.node_id)
                .bind(spec.scope.as_str())
                .bind(&spec.node_type)
                .bind(spec.attributes.to_string())
                .bind(updated_by)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .execute(&self.pool)
                .await?;
                GraphNode {
                    node_id: spec.node_id.clone(),
                    scope: spec.scope,
                    node_type: spec.node_type.clone(),
                    attributes: spec.attributes.clone(),
                    version: 1,
                    updated_by: Some(updated_by.to_string()),
                    updated_at: Some(now),
                    created_at: now,
                }
            }
        };
        Ok(node)
    }

    /// Fetch one node.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a read failure.
    pub async fn get_node(
        &self,
        node_id: &str,
        scope: GraphScope,
    ) -> Result<Option<GraphNode>, MemoryError> {
        let row = sqlx::query("SELECT * FROM graph_nodes WHERE node_id = ? AND scope = ?")
            .bind(node_id)
            .bind(scope.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_node_row).transpose()
    }

    /// Recall: run a query against graph memory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a read failure.
    #[instrument(skip(self, query))]
    pub async fn recall(&self, query: &RecallQuery) -> Result<Vec<GraphNode>, MemoryError> {
        let rows = match query {
            RecallQuery::ById { node_id, scope } => {
                return Ok(self.get_node(node_id, *scope).await?.into_iter().collect());
            }
            RecallQuery::ByType {
                node_type,
                scope,
                limit,
            } => {
                sqlx::query(
                    "SELECT * FROM graph_nodes WHERE node_type = ? AND scope = ?
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(node_type)
                .bind(scope.as_str())
                .bind(i64::from(*limit))
                .fetch_all(&self.pool)
                .await?
            }
            RecallQuery::Search { text, scope, limit } => {
                let pattern = format!("%{text}%");
                sqlx::query(
                    "SELECT * FROM graph_nodes WHERE scope = ? AND attributes_json LIKE ?
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(scope.as_str())
                .bind(pattern)
                .bind(i64::from(*limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(map_node_row).collect()
    }

    /// Forget: remove the named edges, then the node. Refuses if other
    /// edges still reference the node.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StillReferenced`] when un-named edges remain.
    #[instrument(skip(self, edge_removals))]
    pub async fn forget(
        &self,
        node_id: &str,
        scope: GraphScope,
        edge_removals: &[String],
    ) -> Result<bool, MemoryError> {
        let mut tx = self.pool.begin().await?;

        for edge_id in edge_removals {
            sqlx::query("DELETE FROM graph_edges WHERE edge_id = ? AND scope = ?")
                .bind(edge_id)
                .bind(scope.as_str())
                .execute(&mut *tx)
                .await?;
        }

        let remaining: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM graph_edges
             WHERE scope = ? AND (source_node_id = ? OR target_node_id = ?)",
        )
        .bind(scope.as_str())
        .bind(node_id)
        .bind(node_id)
        .fetch_one(&mut *tx)
        .await?;
        if remaining.0 > 0 {
            return Err(MemoryError::StillReferenced {
                node_id: node_id.to_string(),
                scope,
                remaining: remaining.0.max(0) as u64,
            });
        }

        let result = sqlx::query("DELETE FROM graph_nodes WHERE node_id = ? AND scope = ?")
            .bind(node_id)
            .bind(scope.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert an edge after checking both endpoints exist in its scope.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BadEdge`] for missing endpoints.
    pub async fn add_edge(&self, edge: &GraphEdge) -> Result<(), MemoryError> {
        let endpoints: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM graph_nodes WHERE scope = ? AND node_id IN (?, ?)",
        )
        .bind(edge.scope.as_str())
        .bind(&edge.source_node_id)
        .bind(&edge.target_node_id)
        .fetch_one(&self.pool)
        .await?;
        let expected = if edge.source_node_id == edge.target_node_id {
            1
        } else {
            2
        };
        if endpoints.0 < expected {
            return Err(MemoryError::BadEdge {
                source_node: edge.source_node_id.clone(),
                target: edge.target_node_id.clone(),
                scope: edge.scope,
            });
        }

        insert_edge(&self.pool, edge).await?;
        Ok(())
    }

    /// Write a consolidation summary and its `SUMMARIZES` edges in one
    /// transaction, so no source can be observed "covered" before every
    /// edge is durable.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on any failure; nothing is written in
    /// that case.
    #[instrument(skip(self, summary, source_ids), fields(summary_id = %summary.node_id, sources = source_ids.len()))]
    pub async fn write_summary(
        &self,
        summary: &GraphNodeSpec,
        updated_by: &str,
        source_ids: &[String],
    ) -> Result<GraphNode, MemoryError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO graph_nodes (
                node_id, scope, node_type, attributes_json, version,
                updated_by, updated_at, created_at
            ) VALUES (?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(&summary.node_id)
        .bind(summary.scope.as_str())
        .bind(&summary.node_type)
        .bind(summary.attributes.to_string())
        .bind(updated_by)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for source_id in source_ids {
            let edge = GraphEdge::link(&summary.node_id, source_id, summary.scope, SUMMARIZES);
            sqlx::query(
                "INSERT INTO graph_edges (
                    edge_id, source_node_id, target_node_id, scope,
                    relationship, weight, attributes_json, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&edge.edge_id)
            .bind(&edge.source_node_id)
            .bind(&edge.target_node_id)
            .bind(edge.scope.as_str())
            .bind(&edge.relationship)
            .bind(edge.weight)
            .bind(edge.attributes.to_string())
            .bind(edge.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(GraphNode {
            node_id: summary.node_id.clone(),
            scope: summary.scope,
            node_type: summary.node_type.clone(),
            attributes: summary.attributes.clone(),
            version: 1,
            updated_by: Some(updated_by.to_string()),
            updated_at: Some(now),
            created_at: now,
        })
    }

    /// Nodes of the given types in a scope created inside `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a read failure.
    pub async fn nodes_in_window(
        &self,
        scope: GraphScope,
        node_types: &[&str],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>, MemoryError> {
        if node_types.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat_n("?", node_types.len())
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT * FROM graph_nodes
             WHERE scope = ? AND node_type IN ({placeholders})
               AND created_at >= ? AND created_at < ?
             ORDER BY created_at ASC"
        );
        let mut query = sqlx::query(&sql).bind(scope.as_str());
        for node_type in node_types {
            query = query.bind(*node_type);
        }
        let rows = query
            .bind(start.to_rfc3339())
            .bind(end.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_node_row).collect()
    }

    /// Edges in a scope with the given relationship pointing at `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a read failure.
    pub async fn edges_to(
        &self,
        target_node_id: &str,
        scope: GraphScope,
        relationship: &str,
    ) -> Result<Vec<GraphEdge>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM graph_edges
             WHERE target_node_id = ? AND scope = ? AND relationship = ?",
        )
        .bind(target_node_id)
        .bind(scope.as_str())
        .bind(relationship)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_edge_row).collect()
    }

    /// All summary nodes in a scope.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Sqlx`] on a read failure.
    pub async fn summary_nodes(&self, scope: GraphScope) -> Result<Vec<GraphNode>, MemoryError> {
        let rows = sqlx::query(
            "SELECT * FROM graph_nodes
             WHERE scope = ? AND node_type LIKE '%_summary'
             ORDER BY created_at ASC",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_node_row).collect()
    }
}

async fn insert_edge(pool: &SqlitePool, edge: &GraphEdge) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO graph_edges (
            edge_id, source_node_id, target_node_id, scope,
            relationship, weight, attributes_json, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&edge.edge_id)
    .bind(&edge.source_node_id)
    .bind(&edge.target_node_id)
    .bind(edge.scope.as_str())
    .bind(&edge.relationship)
    .bind(edge.weight)
    .bind(edge.attributes.to_string())
    .bind(edge.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| MemoryError::Corrupt {
            detail: format!("timestamp '{text}'"),
        })
}

fn parse_scope(text: &str) -> Result<GraphScope, MemoryError> {
    text.parse().map_err(|_| MemoryError::Corrupt {
        detail: format!("scope '{text}'"),
    })
}

fn parse_attributes(raw: Option<String>) -> Result<Value, MemoryError> {
    match raw {
        Some(text) => serde_json::from_str(&text).map_err(|err| MemoryError::Corrupt {
            detail: format!("attributes: {err}"),
        }),
        None => Ok(Value::Null),
    }
}

fn map_node_row(row: &SqliteRow) -> Result<GraphNode, MemoryError> {
    let scope: String = row.get("scope");
    let created_at: String = row.get("created_at");
    let updated_at: Option<String> = row.get("updated_at");
    let attributes: Option<String> = row.get("attributes_json");
    let version: i64 = row.get("version");

    Ok(GraphNode {
        node_id: row.get("node_id"),
        scope: parse_scope(&scope)?,
        node_type: row.get("node_type"),
        attributes: parse_attributes(attributes)?,
        version: version.max(0) as u32,
        updated_by: row.get("updated_by"),
        updated_at: updated_at.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn map_edge_row(row: &SqliteRow) -> Result<GraphEdge, MemoryError> {
    let scope: String = row.get("scope");
    let created_at: String = row.get("created_at");
    let attributes: Option<String> = row.get("attributes_json");

    Ok(GraphEdge {
        edge_id: row.get("edge_id"),
        source_node_id: row.get("source_node_id"),
        target_node_id: row.get("target_node_id"),
        scope: parse_scope(&scope)?,
        relationship: row.get("relationship"),
        weight: row.get("weight"),
        attributes: parse_attributes(attributes)?,
        created_at: parse_timestamp(&created_at)?,
    })
}
