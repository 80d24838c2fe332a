//! Configuration change records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::GraphScope;

/// Lifecycle of a configuration change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    /// Emitted by the proposer, not yet gated.
    Proposed,
    /// Passed the variance gate (or external review).
    Approved,
    /// Written to the live configuration.
    Applied,
    /// Reverted after measurement found it ineffective.
    RolledBack,
}

/// One proposed or applied modification to the tunable configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationChange {
    /// Change identifier.
    pub change_id: String,
    /// Scope of the change.
    pub scope: GraphScope,
    /// Dotted path of the tunable field (e.g. `"guardrails.coherence_threshold"`).
    pub target_path: String,
    /// Value before the change.
    pub old_value: Value,
    /// Value after the change.
    pub new_value: Value,
    /// Estimated variance contribution, in percent.
    pub estimated_variance: f64,
    /// Proposer confidence in `[0, 1]`.
    pub confidence: f64,
    /// Lifecycle status.
    pub status: ChangeStatus,
    /// When the change was proposed.
    pub proposed_at: DateTime<Utc>,
    /// When the change was applied, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Measurement verdict after the settle period.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective: Option<bool>,
}

impl ConfigurationChange {
    /// Build a freshly proposed change.
    #[must_use]
    pub fn propose(
        scope: GraphScope,
        target_path: &str,
        old_value: Value,
        new_value: Value,
        estimated_variance: f64,
        confidence: f64,
    ) -> Self {
        Self {
            change_id: Uuid::new_v4().to_string(),
            scope,
            target_path: target_path.to_string(),
            old_value,
            new_value,
            estimated_variance,
            confidence,
            status: ChangeStatus::Proposed,
            proposed_at: Utc::now(),
            applied_at: None,
            effective: None,
        }
    }
}

/// Outcome of an external review when the variance gate overflowed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    /// Reviewing WA.
    pub reviewer_id: String,
    /// Change ids approved to apply.
    #[serde(default)]
    pub approved_changes: Vec<String>,
    /// Change ids rejected outright.
    #[serde(default)]
    pub rejected_changes: Vec<String>,
    /// Whether adaptation resumes after the review.
    pub resume_adaptation: bool,
    /// Replacement variance ceiling, when the reviewer adjusts it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_variance_ceiling: Option<f64>,
}
