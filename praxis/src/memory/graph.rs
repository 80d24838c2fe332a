//! Graph memory model: scoped nodes and edges.
//!
//! Nodes are content-addressed by `(node_id, scope)`; edges connect two
//! nodes in the same scope. The in-memory representation is deliberately
//! flat — two tables, never a linked object graph — so ownership stays
//! acyclic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::GraphScope;

/// Relationship label used by consolidation summaries.
pub const SUMMARIZES: &str = "SUMMARIZES";

/// Suffix that marks a node type as a consolidation summary.
pub const SUMMARY_TYPE_SUFFIX: &str = "_summary";

// ============================================================================
// Nodes
// ============================================================================

/// A stored graph node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identifier, unique within its scope.
    pub node_id: String,
    /// Namespace the node lives in.
    pub scope: GraphScope,
    /// Node type tag (e.g. `observation`, `telemetry`, `tsdb_summary`).
    pub node_type: String,
    /// JSON attributes.
    pub attributes: Value,
    /// Version, incremented on every memorize of the same `(id, scope)`.
    pub version: u32,
    /// Identity that last wrote the node.
    pub updated_by: Option<String>,
    /// Last update timestamp.
    pub updated_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl GraphNode {
    /// Whether this node is a consolidation summary.
    #[must_use]
    pub fn is_summary(&self) -> bool {
        self.node_type.ends_with(SUMMARY_TYPE_SUFFIX)
    }
}

/// The caller-facing shape of a node for `Memorize`: everything except the
/// bookkeeping the store owns (version, timestamps).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNodeSpec {
    /// Node identifier, unique within its scope.
    pub node_id: String,
    /// Namespace the node lives in.
    pub scope: GraphScope,
    /// Node type tag.
    pub node_type: String,
    /// JSON attributes.
    #[serde(default)]
    pub attributes: Value,
}

// ============================================================================
// Edges
// ============================================================================

/// A stored graph edge. Both endpoints live in `scope`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Edge identifier.
    pub edge_id: String,
    /// Source node id.
    pub source_node_id: String,
    /// Target node id.
    pub target_node_id: String,
    /// Shared scope of both endpoints.
    pub scope: GraphScope,
    /// Relationship label (e.g. [`SUMMARIZES`]).
    pub relationship: String,
    /// Edge weight.
    pub weight: f64,
    /// JSON attributes.
    pub attributes: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl GraphEdge {
    /// Build an edge between two nodes in `scope`.
    #[must_use]
    pub fn link(
        source_node_id: &str,
        target_node_id: &str,
        scope: GraphScope,
        relationship: &str,
    ) -> Self {
        Self {
            edge_id: Uuid::new_v4().to_string(),
            source_node_id: source_node_id.to_string(),
            target_node_id: target_node_id.to_string(),
            scope,
            relationship: relationship.to_string(),
            weight: 1.0,
            attributes: Value::Null,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Recall queries
// ============================================================================

/// Query shape for the `Recall` memory verb.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallQuery {
    /// Fetch one node by id and scope.
    ById {
        /// Node identifier.
        node_id: String,
        /// Scope to look in.
        scope: GraphScope,
    },
    /// Fetch nodes of a type within a scope.
    ByType {
        /// Node type tag.
        node_type: String,
        /// Scope to look in.
        scope: GraphScope,
        /// Maximum results.
        limit: u32,
    },
    /// Free-text search over node attributes within a scope.
    Search {
        /// Substring to search for.
        text: String,
        /// Scope to look in.
        scope: GraphScope,
        /// Maximum results.
        limit: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_detection_by_type_suffix() {
        let mut node = GraphNode {
            node_id: "n1".into(),
            scope: GraphScope::Local,
            node_type: "telemetry".into(),
            attributes: Value::Null,
            version: 1,
            updated_by: None,
            updated_at: None,
            created_at: Utc::now(),
        };
        assert!(!node.is_summary());
        node.node_type = "tsdb_summary".into();
        assert!(node.is_summary());
    }

    #[test]
    fn recall_query_serde_round_trip() {
        let query = RecallQuery::ByType {
            node_type: "telemetry".into(),
            scope: GraphScope::Local,
            limit: 10,
        };
        let json = serde_json::to_string(&query).unwrap();
        let parsed: RecallQuery = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, query);
    }
}
