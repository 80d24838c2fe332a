//! The Common-Sense DMA: plausibility vetting.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RetryConfig;
use crate::llm::{LlmClient, LlmError, ResourceUsage, ResponseSchema, call_typed, with_retry};
use crate::message::ChatMessage;

use super::DmaInput;

/// Result of the common-sense evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommonSenseAssessment {
    /// Plausibility in `[0, 1]`: how well the thought squares with everyday
    /// physical and social reality.
    pub plausibility_score: f64,
    /// Short tags for anything implausible (e.g. `"physics_violation"`).
    #[serde(default)]
    pub flags: Vec<String>,
    /// Free-text reasoning.
    pub reasoning: String,
}

impl CommonSenseAssessment {
    /// Whether the assessment raised no flags.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }
}

/// The common-sense evaluation faculty.
#[derive(Clone, Debug, Default)]
pub struct CommonSenseDma;

impl CommonSenseDma {
    /// Name used for prompt overrides and failure attribution.
    pub const NAME: &'static str = "common_sense";

    fn response_schema() -> ResponseSchema {
        ResponseSchema::new(
            "common_sense_assessment",
            json!({
                "type": "object",
                "properties": {
                    "plausibility_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "flags": {"type": "array", "items": {"type": "string"}},
                    "reasoning": {"type": "string"}
                },
                "required": ["plausibility_score", "reasoning"]
            }),
        )
    }

    fn messages(&self, input: &DmaInput) -> Vec<ChatMessage> {
        let system = input.prompt_override(Self::NAME).map_or_else(
            || {
                format!(
                    "You are the common-sense evaluation faculty of the agent \
                     '{}'. Judge whether the thought is plausible given \
                     everyday physical and social reality. Flag anything \
                     implausible with short tags.",
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
    ) -> Result<(CommonSenseAssessment, ResourceUsage), LlmError> {
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
    fn assessment_parses_from_provider_json() {
        let value = serde_json::json!({
            "plausibility_score": 0.95,
            "flags": [],
            "reasoning": "an ordinary greeting"
        });
        let parsed: CommonSenseAssessment = serde_json::from_value(value).unwrap();
        assert!(parsed.is_clean());
        assert!(parsed.plausibility_score > 0.9);
    }
}
