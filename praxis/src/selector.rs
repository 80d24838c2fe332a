//! The second-stage action selector.
//!
//! Consumes the [`DmaTriple`] plus the thought and its context, and
//! produces one [`ActionSelectionResult`]. The selection itself is a
//! structured LLM call; the tie-break rules below are applied *after* the
//! call and are not negotiable by the model:
//!
//! 1. An unresolved ethical conflict of severity high or critical forces
//!    `Defer` or `Reject`.
//! 2. `Ponder` is permitted only while the thought's ponder counter is
//!    strictly below the cap; at the cap the selection is rewritten to
//!    `Defer` with reason "ponder cap".

use serde_json::json;
use tracing::instrument;

use crate::action::{ActionSelectionResult, DeferParams, HandlerAction};
use crate::config::RetryConfig;
use crate::dma::{ConflictSeverity, DmaInput, DmaTriple};
use crate::llm::{LlmClient, LlmError, ResourceUsage, ResponseSchema, call_typed, with_retry};
use crate::message::ChatMessage;

/// Name used for prompt overrides.
pub const SELECTOR_NAME: &str = "action_selection";

/// The second-stage decision maker.
#[derive(Clone, Debug)]
pub struct ActionSelector {
    retry: RetryConfig,
    max_tokens: u32,
    ponder_cap: u32,
}

impl ActionSelector {
    /// Build a selector with the engine's retry policy and ponder cap.
    #[must_use]
    pub fn new(retry: RetryConfig, max_tokens: u32, ponder_cap: u32) -> Self {
        Self {
            retry,
            max_tokens,
            ponder_cap,
        }
    }

    fn response_schema() -> ResponseSchema {
        ResponseSchema::new(
            "action_selection",
            json!({
                "type": "object",
                "properties": {
                    "action": {"enum": [
                        "speak", "observe", "tool", "memorize", "recall",
                        "forget", "ponder", "defer", "reject", "no_action"
                    ]},
                    "params": {"type": "object"},
                    "rationale": {"type": "string"},
                    "alignment": {
                        "type": "object",
                        "properties": {
                            "summary": {"type": "string"},
                            "principle_scores": {
                                "type": "object",
                                "additionalProperties": {"type": "number"}
                            }
                        },
                        "required": ["summary"]
                    },
                    "monitoring": {
                        "type": ["object", "null"],
                        "properties": {
                            "focus": {"type": "string"},
                            "success_signal": {"type": "string"},
                            "failure_signal": {"type": "string"}
                        }
                    }
                },
                "required": ["action", "rationale", "alignment"]
            }),
        )
    }

    fn messages(&self, input: &DmaInput, triple: &DmaTriple) -> Vec<ChatMessage> {
        let system = input.prompt_override(SELECTOR_NAME).map_or_else(
            || {
                format!(
                    "You are the action selection faculty of the agent '{}'. \
                     Given the three first-stage assessments, select exactly \
                     one handler action with typed parameters, a rationale, \
                     an alignment summary, and a monitoring plan. Prefer \
                     Defer over guessing when assessments disagree.",
                    input.agent_name
                )
            },
            str::to_string,
        );
        let assessments = serde_json::to_string_pretty(triple)
            .unwrap_or_else(|_| "<assessments unavailable>".to_string());
        vec![
            ChatMessage::system(&system),
            ChatMessage::user(&format!(
                "Task: {}\nThought (round {}, ponder {}/{}): {}\n\nAssessments:\n{}",
                input.task.description,
                input.thought.round_number,
                input.thought.ponder_count,
                self.ponder_cap,
                input.thought.content,
                assessments
            )),
        ]
    }

    /// Select an action for one thought.
    ///
    /// # Errors
    ///
    /// Returns the final [`LlmError`] once retries are exhausted.
    #[instrument(skip_all, fields(thought_id = %input.thought.thought_id))]
    pub async fn select(
        &self,
        input: &DmaInput,
        triple: &DmaTriple,
        llm: &dyn LlmClient,
    ) -> Result<(ActionSelectionResult, ResourceUsage), LlmError> {
        let messages = self.messages(input, triple);
        let (mut result, usage): (ActionSelectionResult, ResourceUsage) =
            with_retry(&self.retry, || {
                call_typed(
                    llm,
                    messages.clone(),
                    Self::response_schema(),
                    self.max_tokens,
                    0.0,
                )
            })
            .await?;

        self.apply_tie_breaks(input, triple, &mut result);
        Ok((result, usage))
    }

    /// Enforce the non-negotiable selection rules in place.
    fn apply_tie_breaks(
        &self,
        input: &DmaInput,
        triple: &DmaTriple,
        result: &mut ActionSelectionResult,
    ) {
        // Rule 1: severe unresolved ethical conflict forces Defer/Reject.
        if let Some(severity) = triple.ethical.max_conflict_severity()
            && severity >= ConflictSeverity::High
            && !matches!(
                result.action,
                HandlerAction::Defer(_) | HandlerAction::Reject(_)
            )
        {
            let conflict = triple
                .ethical
                .conflicts
                .iter()
                .max_by_key(|c| c.severity)
                .map_or_else(String::new, |c| c.description.clone());
            tracing::warn!(
                thought_id = %input.thought.thought_id,
                %severity,
                "rewriting selection to Defer for unresolved ethical conflict"
            );
            result.action = HandlerAction::Defer(DeferParams {
                reason: format!("unresolved ethical conflict ({severity:?}): {conflict}"),
                context: None,
            });
            return;
        }

        // Rule 2: Ponder at the cap materializes as Defer.
        if matches!(result.action, HandlerAction::Ponder(_))
            && input.thought.ponder_count >= self.ponder_cap
        {
            tracing::info!(
                thought_id = %input.thought.thought_id,
                cap = self.ponder_cap,
                "ponder cap reached; rewriting selection to Defer"
            );
            result.action = HandlerAction::Defer(DeferParams {
                reason: "ponder cap".to_string(),
                context: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionAlignment, PonderParams, SpeakParams};
    use crate::dma::{CommonSenseAssessment, DomainAssessment, EthicalAssessment};
    use crate::dma::{ConflictSeverity, EthicalConflict};
    use crate::store::model::{Task, TaskContext, Thought};
    use rustc_hash::FxHashMap;

    fn input_with_ponder_count(count: u32) -> DmaInput {
        let task = Task::new("c1", "test", 0, TaskContext::default());
        let mut thought = Thought::seed(&task, "content");
        thought.ponder_count = count;
        DmaInput {
            thought,
            task,
            agent_name: "praxis".into(),
            prompt_overrides: FxHashMap::default(),
        }
    }

    fn benign_triple() -> DmaTriple {
        DmaTriple {
            ethical: EthicalAssessment {
                alignment: FxHashMap::default(),
                conflicts: vec![],
                rationale: "fine".into(),
            },
            common_sense: CommonSenseAssessment {
                plausibility_score: 0.9,
                flags: vec![],
                reasoning: "fine".into(),
            },
            domain: DomainAssessment {
                domain: "community".into(),
                domain_alignment_score: 0.9,
                flags: vec![],
                recommended_action: None,
                reasoning: "fine".into(),
            },
        }
    }

    fn selection(action: HandlerAction) -> ActionSelectionResult {
        ActionSelectionResult {
            action,
            rationale: "because".into(),
            alignment: ActionAlignment::default(),
            monitoring: None,
        }
    }

    #[test]
    fn severe_conflict_rewrites_to_defer() {
        let selector = ActionSelector::new(RetryConfig::default(), 512, 7);
        let input = input_with_ponder_count(0);
        let mut triple = benign_triple();
        triple.ethical.conflicts.push(EthicalConflict {
            description: "possible harm".into(),
            severity: ConflictSeverity::High,
        });

        let mut result = selection(HandlerAction::Speak(SpeakParams {
            channel_id: None,
            content: "hi".into(),
        }));
        selector.apply_tie_breaks(&input, &triple, &mut result);
        assert!(matches!(result.action, HandlerAction::Defer(_)));
    }

    #[test]
    fn severe_conflict_leaves_reject_alone() {
        let selector = ActionSelector::new(RetryConfig::default(), 512, 7);
        let input = input_with_ponder_count(0);
        let mut triple = benign_triple();
        triple.ethical.conflicts.push(EthicalConflict {
            description: "possible harm".into(),
            severity: ConflictSeverity::Critical,
        });

        let mut result = selection(HandlerAction::Reject(crate::action::RejectParams {
            reason: "unsafe".into(),
        }));
        selector.apply_tie_breaks(&input, &triple, &mut result);
        assert!(matches!(result.action, HandlerAction::Reject(_)));
    }

    #[test]
    fn ponder_below_cap_is_allowed() {
        let selector = ActionSelector::new(RetryConfig::default(), 512, 7);
        let input = input_with_ponder_count(6);
        let triple = benign_triple();
        let mut result = selection(HandlerAction::Ponder(PonderParams {
            questions: vec!["what next?".into()],
        }));
        selector.apply_tie_breaks(&input, &triple, &mut result);
        assert!(matches!(result.action, HandlerAction::Ponder(_)));
    }

    #[test]
    fn ponder_at_cap_becomes_defer_with_reason() {
        let selector = ActionSelector::new(RetryConfig::default(), 512, 7);
        let input = input_with_ponder_count(7);
        let triple = benign_triple();
        let mut result = selection(HandlerAction::Ponder(PonderParams {
            questions: vec!["again?".into()],
        }));
        selector.apply_tie_breaks(&input, &triple, &mut result);
        match result.action {
            HandlerAction::Defer(params) => assert_eq!(params.reason, "ponder cap"),
            other => panic!("expected Defer, got {other:?}"),
        }
    }
}
