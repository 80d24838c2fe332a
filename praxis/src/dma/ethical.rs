//! The Ethical DMA: principle alignment and conflict detection.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RetryConfig;
use crate::llm::{LlmClient, LlmError, ResourceUsage, ResponseSchema, call_typed, with_retry};
use crate::message::ChatMessage;

use super::DmaInput;

/// Severity of an unresolved ethical conflict. Ordered so the selector can
/// compare against its escalation floor.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    /// Worth noting; does not constrain selection.
    Low,
    /// Should influence the rationale.
    Medium,
    /// Forces the selector to Defer or Reject.
    High,
    /// Forces the selector to Defer or Reject.
    Critical,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One unresolved conflict between principles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EthicalConflict {
    /// What is in tension.
    pub description: String,
    /// How severe the tension is.
    pub severity: ConflictSeverity,
}

/// Result of the ethical evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EthicalAssessment {
    /// Per-principle alignment in `[0, 1]`, keyed by principle name.
    pub alignment: rustc_hash::FxHashMap<String, f64>,
    /// Unresolved conflicts, if any.
    #[serde(default)]
    pub conflicts: Vec<EthicalConflict>,
    /// Free-text rationale.
    pub rationale: String,
}

impl EthicalAssessment {
    /// The most severe unresolved conflict, if any.
    #[must_use]
    pub fn max_conflict_severity(&self) -> Option<ConflictSeverity> {
        self.conflicts.iter().map(|c| c.severity).max()
    }
}

/// The ethical evaluation faculty.
#[derive(Clone, Debug, Default)]
pub struct EthicalDma;

impl EthicalDma {
    /// Name used for prompt overrides and failure attribution.
    pub const NAME: &'static str = "ethical";

    fn response_schema() -> ResponseSchema {
        ResponseSchema::new(
            "ethical_assessment",
            json!({
                "type": "object",
                "properties": {
                    "alignment": {
                        "type": "object",
                        "additionalProperties": {"type": "number", "minimum": 0.0, "maximum": 1.0}
                    },
                    "conflicts": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "description": {"type": "string"},
                                "severity": {"enum": ["low", "medium", "high", "critical"]}
                            },
                            "required": ["description", "severity"]
                        }
                    },
                    "rationale": {"type": "string"}
                },
                "required": ["alignment", "rationale"]
            }),
        )
    }

    fn messages(&self, input: &DmaInput) -> Vec<ChatMessage> {
        let system = input.prompt_override(Self::NAME).map_or_else(
            || {
                format!(
                    "You are the ethical evaluation faculty of the agent '{}'. \
                     Assess the proposed line of thought against beneficence, \
                     non-maleficence, integrity, autonomy and justice. Report \
                     per-principle alignment scores, any unresolved conflicts \
                     with their severity, and a short rationale.",
                    input.agent_name
                )
            },
            str::to_string,
        );
        vec![
            ChatMessage::system(&system),
            ChatMessage::user(&format!(
                "Task: {}\nThought: {}",
                input.task.description, input.thought.content
            )),
        ]
    }

    /// Run the evaluation with bounded retries.
    ///
    /// # Errors
    ///
    /// Returns the final [`LlmError`] once retries are exhausted.
    pub async fn evaluate(
        &self,
        input: &DmaInput,
        llm: &dyn LlmClient,
        retry: &RetryConfig,
        max_tokens: u32,
    ) -> Result<(EthicalAssessment, ResourceUsage), LlmError> {
        let messages = self.messages(input);
        with_retry(retry, || {
            call_typed(
                llm,
                messages.clone(),
                Self::response_schema(),
                max_tokens,
                0.0,
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_supports_escalation_floor() {
        assert!(ConflictSeverity::High > ConflictSeverity::Medium);
        assert!(ConflictSeverity::Critical > ConflictSeverity::High);
    }

    #[test]
    fn max_conflict_severity_picks_worst() {
        let assessment = EthicalAssessment {
            alignment: rustc_hash::FxHashMap::default(),
            conflicts: vec![
                EthicalConflict {
                    description: "minor tension".into(),
                    severity: ConflictSeverity::Low,
                },
                EthicalConflict {
                    description: "harm potential".into(),
                    severity: ConflictSeverity::High,
                },
            ],
            rationale: "".into(),
        };
        assert_eq!(
            assessment.max_conflict_severity(),
            Some(ConflictSeverity::High)
        );
    }

    #[test]
    fn assessment_parses_from_provider_json() {
        let value = serde_json::json!({
            "alignment": {"beneficence": 0.9, "justice": 0.8},
            "conflicts": [],
            "rationale": "benign request"
        });
        let parsed: EthicalAssessment = serde_json::from_value(value).unwrap();
        assert!(parsed.conflicts.is_empty());
        assert!((parsed.alignment["beneficence"] - 0.9).abs() < f64::EPSILON);
    }
}
