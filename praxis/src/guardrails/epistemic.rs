//! Epistemic faculties: the structured LLM calls behind the guardrail
//! stack.
//!
//! Three faculties, each one call:
//! - **epistemic values** — bounded scalars `(entropy, coherence)` over a
//!   piece of outgoing content;
//! - **optimization veto** — a decision token guarding against actions
//!   that collapse diversity of values for marginal gains;
//! - **epistemic humility** — a reflective certainty check that can
//!   recommend deferral.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::action::ActionSelectionResult;
use crate::config::RetryConfig;
use crate::llm::{LlmClient, LlmError, ResourceUsage, ResponseSchema, call_typed, with_retry};
use crate::message::ChatMessage;

// ============================================================================
// Result shapes
// ============================================================================

/// Bounded scalars over outgoing content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpistemicValues {
    /// Disorder/surprise of the content in `[0, 1]`; lower is calmer.
    pub entropy: f64,
    /// Alignment with the agent's voice and values in `[0, 1]`; higher is
    /// better.
    pub coherence: f64,
}

/// Decision token of the optimization veto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoDecision {
    /// Proceed with the action.
    Proceed,
    /// Abort entirely.
    Abort,
    /// Defer to a Wise Authority.
    Defer,
}

/// Result of the optimization veto faculty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationVetoResult {
    /// The faculty's decision.
    pub decision: VetoDecision,
    /// How much entropy the action removes relative to the value it
    /// preserves; at or above the configured ratio the veto fires.
    pub entropy_reduction_ratio: f64,
    /// Values the action would affect.
    #[serde(default)]
    pub affected_values: Vec<String>,
    /// Free-text justification.
    pub justification: String,
    /// Faculty confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Recommendation token of the humility faculty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumilityRecommendation {
    /// Proceed with the action.
    Proceed,
    /// Defer to a Wise Authority.
    Defer,
    /// Abort entirely.
    Abort,
}

/// Result of the epistemic humility faculty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpistemicHumilityResult {
    /// Certainty that the action is correct, in `[0, 1]`.
    pub certainty: f64,
    /// Identified uncertainties.
    #[serde(default)]
    pub uncertainties: Vec<String>,
    /// Free-text reflective justification.
    pub reflective_justification: String,
    /// The faculty's recommendation.
    pub recommended_action: HumilityRecommendation,
}

// ============================================================================
// Faculty calls
// ============================================================================

fn action_summary(result: &ActionSelectionResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| result.action.variant_name().to_string())
}

/// Compute `(entropy, coherence)` for a piece of outgoing content.
///
/// # Errors
///
/// Returns the final [`LlmError`] once retries are exhausted.
pub async fn calculate_epistemic_values(
    content: &str,
    llm: &dyn LlmClient,
    retry: &RetryConfig,
    max_tokens: u32,
) -> Result<(EpistemicValues, ResourceUsage), LlmError> {
    let schema = ResponseSchema::new(
        "epistemic_values",
        json!({
            "type": "object",
            "properties": {
                "entropy": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "coherence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["entropy", "coherence"]
        }),
    );
    let messages = vec![
        ChatMessage::system(
            "You are an epistemic measurement faculty. Score the given \
             outgoing message on two bounded scalars: entropy (disorder, \
             surprise; 0 is calm and predictable) and coherence (alignment \
             with a careful, honest assistant voice; 1 is fully aligned).",
        ),
        ChatMessage::user(content),
    ];
    with_retry(retry, || {
        call_typed(llm, messages.clone(), schema.clone(), max_tokens, 0.0)
    })
    .await
}

/// Run the optimization veto over a selected action.
///
/// # Errors
///
/// Returns the final [`LlmError`] once retries are exhausted.
pub async fn evaluate_optimization_veto(
    result: &ActionSelectionResult,
    llm: &dyn LlmClient,
    retry: &RetryConfig,
    max_tokens: u32,
) -> Result<(OptimizationVetoResult, ResourceUsage), LlmError> {
    let schema = ResponseSchema::new(
        "optimization_veto",
        json!({
            "type": "object",
            "properties": {
                "decision": {"enum": ["proceed", "abort", "defer"]},
                "entropy_reduction_ratio": {"type": "number", "minimum": 0.0},
                "affected_values": {"type": "array", "items": {"type": "string"}},
                "justification": {"type": "string"},
                "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
            },
            "required": ["decision", "entropy_reduction_ratio", "justification", "confidence"]
        }),
    );
    let messages = vec![
        ChatMessage::system(
            "You are the optimization veto faculty. Decide whether the \
             proposed action sacrifices diversity of values for narrow \
             optimization. Estimate the entropy-reduction ratio (how much \
             possibility space the action removes relative to the value it \
             creates) and decide proceed, abort, or defer.",
        ),
        ChatMessage::user(&format!("Proposed action: {}", action_summary(result))),
    ];
    with_retry(retry, || {
        call_typed(llm, messages.clone(), schema.clone(), max_tokens, 0.0)
    })
    .await
}

/// Run the epistemic humility check over a selected action.
///
/// # Errors
///
/// Returns the final [`LlmError`] once retries are exhausted.
pub async fn evaluate_epistemic_humility(
    result: &ActionSelectionResult,
    llm: &dyn LlmClient,
    retry: &RetryConfig,
    max_tokens: u32,
) -> Result<(EpistemicHumilityResult, ResourceUsage), LlmError> {
    let schema = ResponseSchema::new(
        "epistemic_humility",
        json!({
            "type": "object",
            "properties": {
                "certainty": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                "uncertainties": {"type": "array", "items": {"type": "string"}},
                "reflective_justification": {"type": "string"},
                "recommended_action": {"enum": ["proceed", "defer", "abort"]}
            },
            "required": ["certainty", "reflective_justification", "recommended_action"]
        }),
    );
    let messages = vec![
        ChatMessage::system(
            "You are the epistemic humility faculty. Reflect on how certain \
             the agent can really be that this action is correct and safe. \
             Name concrete uncertainties. Recommend proceed, defer, or \
             abort; recommend defer whenever certainty is low and the \
             action is hard to reverse.",
        ),
        ChatMessage::user(&format!("Proposed action: {}", action_summary(result))),
    ];
    with_retry(retry, || {
        call_typed(llm, messages.clone(), schema.clone(), max_tokens, 0.0)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn veto_decision_parses_snake_case() {
        let parsed: VetoDecision = serde_json::from_str("\"proceed\"").unwrap();
        assert_eq!(parsed, VetoDecision::Proceed);
        let parsed: VetoDecision = serde_json::from_str("\"abort\"").unwrap();
        assert_eq!(parsed, VetoDecision::Abort);
    }

    #[test]
    fn humility_result_parses_from_provider_json() {
        let value = json!({
            "certainty": 0.85,
            "uncertainties": ["tone"],
            "reflective_justification": "simple greeting",
            "recommended_action": "proceed"
        });
        let parsed: EpistemicHumilityResult = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.recommended_action, HumilityRecommendation::Proceed);
    }
}
