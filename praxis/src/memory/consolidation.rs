//! Tiered time-series consolidation.
//!
//! Raw telemetry nodes are rolled into summaries on three cadences:
//!
//! | Level     | Cadence   | Window                    |
//! |-----------|-----------|---------------------------|
//! | basic     | 6 hours   | trailing 6 h of raw nodes |
//! | extensive | daily     | trailing 24 h of basic    |
//! | profound  | monthly   | trailing extensive        |
//!
//! Every summary is written with its `SUMMARIZES` edges in one
//! transaction, so a source can never be deleted before it is reachable
//! from its summary. Cleanup refuses to delete any source without an
//! incoming `SUMMARIZES` edge; such nodes are a consolidator defect that
//! [`Consolidator::orphan_scan`] reports.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::types::GraphScope;

use super::graph::{GraphNode, GraphNodeSpec, SUMMARIZES};
use super::store::{GraphStore, MemoryError};

/// Node types treated as raw time-series data.
pub const TIMESERIES_TYPES: &[&str] = &["telemetry", "trace", "incident"];

/// Node type of all consolidation summaries; the level lives in the
/// attributes.
pub const SUMMARY_NODE_TYPE: &str = "tsdb_summary";

const ALL_SCOPES: [GraphScope; 4] = [
    GraphScope::Local,
    GraphScope::Environment,
    GraphScope::Identity,
    GraphScope::Community,
];

// ============================================================================
// Levels
// ============================================================================

/// Consolidation tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationLevel {
    /// Six-hourly roll-up of raw nodes.
    Basic,
    /// Daily roll-up of basic summaries.
    Extensive,
    /// Monthly roll-up of extensive summaries.
    Profound,
}

impl ConsolidationLevel {
    /// Stable text form stored in summary attributes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Extensive => "extensive",
            Self::Profound => "profound",
        }
    }

    /// Trailing window the level consolidates.
    #[must_use]
    pub fn window(self) -> ChronoDuration {
        match self {
            Self::Basic => ChronoDuration::hours(6),
            Self::Extensive => ChronoDuration::hours(24),
            Self::Profound => ChronoDuration::days(30),
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// One summary written by a consolidation pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutcome {
    /// Tier that ran.
    pub level: ConsolidationLevel,
    /// Scope the summary covers.
    pub scope: GraphScope,
    /// Summary node id.
    pub summary_id: String,
    /// Sources linked via `SUMMARIZES`.
    pub source_count: usize,
}

/// Result of a cleanup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Covered raw nodes deleted.
    pub deleted_raw: usize,
    /// Covered basic summaries deleted.
    pub deleted_basic: usize,
    /// Eligible nodes left in place for lack of a covering edge.
    pub skipped_uncovered: usize,
}

/// A source node missing its `SUMMARIZES` edge inside a consolidated
/// window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orphan {
    /// The uncovered node.
    pub node_id: String,
    /// Its scope.
    pub scope: GraphScope,
    /// The summary whose window contains it.
    pub summary_id: String,
}

/// Diagnostic report of uncovered sources. A healthy store reports none.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Every orphan found.
    pub orphans: Vec<Orphan>,
}

impl OrphanReport {
    /// True when no orphans were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty()
    }
}

// ============================================================================
// Consolidator
// ============================================================================

/// Cadences for the periodic loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsolidationSchedule {
    /// Basic cadence. Default 6 hours.
    pub basic: Duration,
    /// Extensive cadence. Default 24 hours.
    pub extensive: Duration,
    /// Profound cadence. Default 30 days.
    pub profound: Duration,
    /// Cleanup cadence. Default 6 hours.
    pub cleanup: Duration,
}

impl Default for ConsolidationSchedule {
    fn default() -> Self {
        Self {
            basic: Duration::from_secs(6 * 3600),
            extensive: Duration::from_secs(24 * 3600),
            profound: Duration::from_secs(30 * 24 * 3600),
            cleanup: Duration::from_secs(6 * 3600),
        }
    }
}

/// Runs the consolidation tiers over a [`GraphStore`].
#[derive(Debug)]
pub struct Consolidator {
    store: Arc<GraphStore>,
}

impl Consolidator {
    /// Build over the shared store.
    #[must_use]
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    /// Run one tier for every scope at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError`] on storage failure; a scope with no sources
    /// in the window simply produces no summary.
    #[instrument(skip(self), fields(level = level.as_str()))]
    pub async fn run_level(
        &self,
        level: ConsolidationLevel,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConsolidationOutcome>, MemoryError> {
        let start = now - level.window();
        let mut outcomes = Vec::new();

        for scope in ALL_SCOPES {
            let sources = self.sources_for(level, scope, start, now).await?;
            if sources.is_empty() {
                continue;
            }

            let metric_total: f64 = sources
                .iter()
                .filter_map(|node| node.attributes.get("value").and_then(serde_json::Value::as_f64))
                .sum();
            let summary_id = format!(
                "summary_{}_{}_{}",
                level.as_str(),
                scope.as_str().to_lowercase(),
                start.timestamp()
            );
            let spec = GraphNodeSpec {
                node_id: summary_id.clone(),
                scope,
                node_type: SUMMARY_NODE_TYPE.to_string(),
                attributes: json!({
                    "consolidation_level": level.as_str(),
                    "period_start": start.to_rfc3339(),
                    "period_end": now.to_rfc3339(),
                    "source_node_count": sources.len(),
                    "metric_total": metric_total,
                }),
            };
            let source_ids: Vec<String> =
                sources.iter().map(|node| node.node_id.clone()).collect();

            self.store
                .write_summary(&spec, "consolidator", &source_ids)
                .await?;

            outcomes.push(ConsolidationOutcome {
                level,
                scope,
                summary_id,
                source_count: source_ids.len(),
            });
        }

        Ok(outcomes)
    }

    async fn sources_for(
        &self,
        level: ConsolidationLevel,
        scope: GraphScope,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>, MemoryError> {
        match level {
            ConsolidationLevel::Basic => {
                self.store
                    .nodes_in_window(scope, TIMESERIES_TYPES, start, end)
                    .await
            }
            ConsolidationLevel::Extensive => Ok(self
                .summaries_in_window(scope, ConsolidationLevel::Basic, start, end)
                .await?),
            ConsolidationLevel::Profound => Ok(self
                .summaries_in_window(scope, ConsolidationLevel::Extensive, start, end)
                .await?),
        }
    }

    async fn summaries_in_window(
        &self,
        scope: GraphScope,
        level: ConsolidationLevel,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>, MemoryError> {
        let nodes = self
            .store
            .nodes_in_window(scope, &[SUMMARY_NODE_TYPE], start, end)
            .await?;
        Ok(nodes
            .into_iter()
            .filter(|node| {
                node.attributes
                    .get("consolidation_level")
                    .and_then(serde_json::Value::as_str)
                    == Some(level.as_str())
            })
            .collect())
    }

    /// Delete covered sources past their retention: raw nodes older than
    /// 24 hours and basic summaries older than 7 days. A node without an
    /// incoming `SUMMARIZES` edge is never deleted here.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError`] on storage failure.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<CleanupReport, MemoryError> {
        let mut report = CleanupReport::default();

        for scope in ALL_SCOPES {
            // Raw nodes older than 24 h with a basic summary covering them.
            let raw_cutoff = now - ChronoDuration::hours(24);
            let raw = self
                .store
                .nodes_in_window(
                    scope,
                    TIMESERIES_TYPES,
                    DateTime::<Utc>::MIN_UTC,
                    raw_cutoff,
                )
                .await?;
            for node in raw {
                match self.delete_if_covered(&node).await? {
                    true => report.deleted_raw += 1,
                    false => report.skipped_uncovered += 1,
                }
            }

            // Basic summaries older than 7 days covered by an extensive one.
            let basic_cutoff = now - ChronoDuration::days(7);
            let basic = self
                .summaries_in_window(
                    scope,
                    ConsolidationLevel::Basic,
                    DateTime::<Utc>::MIN_UTC,
                    basic_cutoff,
                )
                .await?;
            for node in basic {
                match self.delete_if_covered(&node).await? {
                    true => report.deleted_basic += 1,
                    false => report.skipped_uncovered += 1,
                }
            }
        }

        Ok(report)
    }

    /// Delete a node only when it has incoming `SUMMARIZES` coverage,
    /// removing those edges alongside. Nodes still referenced by other
    /// edges (e.g. their own outgoing summary edges) wait for a later
    /// cycle.
    async fn delete_if_covered(&self, node: &GraphNode) -> Result<bool, MemoryError> {
        let covering = self
            .store
            .edges_to(&node.node_id, node.scope, SUMMARIZES)
            .await?;
        if covering.is_empty() {
            tracing::warn!(
                node_id = %node.node_id,
                scope = %node.scope,
                "retention-eligible node has no covering summary edge; leaving in place"
            );
            return Ok(false);
        }
        let edge_ids: Vec<String> = covering.into_iter().map(|edge| edge.edge_id).collect();
        match self.store.forget(&node.node_id, node.scope, &edge_ids).await {
            Ok(_) => Ok(true),
            Err(MemoryError::StillReferenced { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Diagnostic: find sources inside consolidated windows that are not
    /// reachable from any summary via `SUMMARIZES`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError`] on storage failure.
    #[instrument(skip(self))]
    pub async fn orphan_scan(&self) -> Result<OrphanReport, MemoryError> {
        let mut report = OrphanReport::default();

        for scope in ALL_SCOPES {
            for summary in self.store.summary_nodes(scope).await? {
                let Some(level) = summary
                    .attributes
                    .get("consolidation_level")
                    .and_then(serde_json::Value::as_str)
                else {
                    continue;
                };
                let (Some(start), Some(end)) = (
                    parse_attr_time(&summary, "period_start"),
                    parse_attr_time(&summary, "period_end"),
                ) else {
                    continue;
                };

                let candidates = match level {
                    "basic" => {
                        self.store
                            .nodes_in_window(scope, TIMESERIES_TYPES, start, end)
                            .await?
                    }
                    "extensive" => {
                        self.summaries_in_window(scope, ConsolidationLevel::Basic, start, end)
                            .await?
                    }
                    "profound" => {
                        self.summaries_in_window(scope, ConsolidationLevel::Extensive, start, end)
                            .await?
                    }
                    _ => continue,
                };

                for node in candidates {
                    let covering = self
                        .store
                        .edges_to(&node.node_id, scope, SUMMARIZES)
                        .await?;
                    if covering.is_empty() {
                        report.orphans.push(Orphan {
                            node_id: node.node_id,
                            scope,
                            summary_id: summary.node_id.clone(),
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    /// Spawn the periodic loops. The task exits when `shutdown` flips to
    /// true.
    #[must_use]
    pub fn spawn_loops(
        self: Arc<Self>,
        schedule: ConsolidationSchedule,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut basic = tokio::time::interval(schedule.basic);
            let mut extensive = tokio::time::interval(schedule.extensive);
            let mut profound = tokio::time::interval(schedule.profound);
            let mut cleanup = tokio::time::interval(schedule.cleanup);
            // The first tick of every interval fires immediately; consume
            // them so the loops start one full period out.
            basic.tick().await;
            extensive.tick().await;
            profound.tick().await;
            cleanup.tick().await;

            loop {
                tokio::select! {
                    _ = basic.tick() => {
                        if let Err(err) = self.run_level(ConsolidationLevel::Basic, Utc::now()).await {
                            tracing::error!(error = %err, "basic consolidation failed");
                        }
                    }
                    _ = extensive.tick() => {
                        if let Err(err) = self.run_level(ConsolidationLevel::Extensive, Utc::now()).await {
                            tracing::error!(error = %err, "extensive consolidation failed");
                        }
                    }
                    _ = profound.tick() => {
                        if let Err(err) = self.run_level(ConsolidationLevel::Profound, Utc::now()).await {
                            tracing::error!(error = %err, "profound consolidation failed");
                        }
                    }
                    _ = cleanup.tick() => {
                        if let Err(err) = self.cleanup(Utc::now()).await {
                            tracing::error!(error = %err, "consolidation cleanup failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn parse_attr_time(node: &GraphNode, key: &str) -> Option<DateTime<Utc>> {
    node.attributes
        .get(key)
        .and_then(serde_json::Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_windows() {
        assert_eq!(
            ConsolidationLevel::Basic.window(),
            ChronoDuration::hours(6)
        );
        assert_eq!(
            ConsolidationLevel::Extensive.window(),
            ChronoDuration::hours(24)
        );
        assert_eq!(
            ConsolidationLevel::Profound.window(),
            ChronoDuration::days(30)
        );
    }

    #[test]
    fn orphan_report_clean_by_default() {
        assert!(OrphanReport::default().is_clean());
    }
}
