//! The handler action union and the action-selection result.
//!
//! The second-stage selector produces exactly one [`HandlerAction`]; the
//! guardrail stack may rewrite it to [`HandlerAction::Defer`]. Parameters
//! are a discriminated union keyed by the action variant — free-form maps
//! only appear inside tool arguments and graph attributes, where they are
//! the domain.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::graph::{GraphNodeSpec, RecallQuery};
use crate::types::GraphScope;

// ============================================================================
// Parameters
// ============================================================================

/// Parameters for `Speak`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeakParams {
    /// Target channel; defaults to the task's channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Outgoing message content. May carry secret reference tokens; the
    /// dispatcher decapsulates permitted ones on egress.
    pub content: String,
}

/// Parameters for `Observe`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObserveParams {
    /// Channel to observe; defaults to the task's channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Maximum messages to fetch.
    pub limit: u32,
    /// Only messages before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
}

/// Parameters for `Tool`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolParams {
    /// Registered tool name.
    pub name: String,
    /// Tool arguments. May carry secret reference tokens.
    #[serde(default)]
    pub args: Value,
}

/// Parameters for `Memorize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemorizeParams {
    /// The node to insert or update.
    pub node: GraphNodeSpec,
}

/// Parameters for `Recall`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecallParams {
    /// The query to run against graph memory.
    pub query: RecallQuery,
}

/// Parameters for `Forget`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForgetParams {
    /// Node to remove.
    pub node_id: String,
    /// Scope of the node.
    pub scope: GraphScope,
    /// Edge ids the caller wants removed alongside; cascades never happen
    /// implicitly.
    #[serde(default)]
    pub edge_removals: Vec<String>,
}

/// Parameters for `Ponder`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PonderParams {
    /// Key questions to carry into the next round.
    pub questions: Vec<String>,
}

/// Parameters for `Defer`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferParams {
    /// Why the decision is being escalated.
    pub reason: String,
    /// Structured context for the Wise Authority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Parameters for `Reject`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectParams {
    /// Why the thought is being closed without action.
    pub reason: String,
}

// ============================================================================
// HandlerAction
// ============================================================================

/// The action selected for one thought.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum HandlerAction {
    /// Send a message to a channel.
    Speak(SpeakParams),
    /// Fetch recent messages from a channel.
    Observe(ObserveParams),
    /// Execute a registered tool.
    Tool(ToolParams),
    /// Insert or update a graph memory node.
    Memorize(MemorizeParams),
    /// Query graph memory.
    Recall(RecallParams),
    /// Remove a graph memory node.
    Forget(ForgetParams),
    /// Re-queue the thought with accumulated questions.
    Ponder(PonderParams),
    /// Escalate the decision to a Wise Authority.
    Defer(DeferParams),
    /// Close the thought with a rationale and no outbound side effect.
    Reject(RejectParams),
    /// Close the thought silently.
    NoAction,
}

impl HandlerAction {
    /// Lower-case variant name; also the key of the secrets
    /// auto-decapsulation matrix.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Speak(_) => "speak",
            Self::Observe(_) => "observe",
            Self::Tool(_) => "tool",
            Self::Memorize(_) => "memorize",
            Self::Recall(_) => "recall",
            Self::Forget(_) => "forget",
            Self::Ponder(_) => "ponder",
            Self::Defer(_) => "defer",
            Self::Reject(_) => "reject",
            Self::NoAction => "no_action",
        }
    }

    /// Whether the action carries outgoing content subject to the full
    /// epistemic guardrail (entropy/coherence).
    #[must_use]
    pub fn is_communicative(&self) -> bool {
        matches!(self, Self::Speak(_))
    }

    /// Whether the action ends the thought (no re-queue).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ponder(_))
    }

    /// Convenience constructor for a deferral.
    #[must_use]
    pub fn defer(reason: impl Into<String>) -> Self {
        Self::Defer(DeferParams {
            reason: reason.into(),
            context: None,
        })
    }
}

// ============================================================================
// Selection result
// ============================================================================

/// Alignment structure produced alongside the selected action.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionAlignment {
    /// One-line alignment summary.
    pub summary: String,
    /// Per-principle alignment scores in `[0, 1]`.
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub principle_scores: FxHashMap<String, f64>,
}

/// What to watch after the action executes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPlan {
    /// What to observe.
    pub focus: String,
    /// Signal indicating the action worked.
    pub success_signal: String,
    /// Signal indicating it did not.
    pub failure_signal: String,
}

/// The full output of the action selector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSelectionResult {
    /// The selected action with typed parameters.
    #[serde(flatten)]
    pub action: HandlerAction,
    /// Why this action was chosen.
    pub rationale: String,
    /// Alignment structure for the audit trail.
    #[serde(default)]
    pub alignment: ActionAlignment,
    /// Post-action monitoring plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringPlan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names_match_decapsulation_matrix() {
        assert_eq!(
            HandlerAction::Speak(SpeakParams::default()).variant_name(),
            "speak"
        );
        assert_eq!(
            HandlerAction::Tool(ToolParams::default()).variant_name(),
            "tool"
        );
        assert_eq!(
            HandlerAction::Memorize(MemorizeParams {
                node: GraphNodeSpec {
                    node_id: "n".into(),
                    scope: GraphScope::Local,
                    node_type: "observation".into(),
                    attributes: Value::Null,
                },
            })
            .variant_name(),
            "memorize"
        );
    }

    #[test]
    fn action_serde_is_tagged_by_variant() {
        let action = HandlerAction::Speak(SpeakParams {
            channel_id: None,
            content: "Hello!".into(),
        });
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "speak");
        assert_eq!(json["params"]["content"], "Hello!");
        let parsed: HandlerAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn no_action_round_trips_without_params() {
        let json = serde_json::to_value(HandlerAction::NoAction).unwrap();
        let parsed: HandlerAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, HandlerAction::NoAction);
    }

    #[test]
    fn selection_result_flattens_action() {
        let result = ActionSelectionResult {
            action: HandlerAction::defer("ponder cap"),
            rationale: "cap reached".into(),
            alignment: ActionAlignment::default(),
            monitoring: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["action"], "defer");
        assert_eq!(json["params"]["reason"], "ponder cap");
        assert_eq!(json["rationale"], "cap reached");
    }
}
