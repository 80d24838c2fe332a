//! Domain-specific DMAs: a closed union of known kinds.
//!
//! The agent profile names one kind; [`build_domain_dma`] resolves it
//! through a registration table of constructor closures. Adding a kind
//! means adding a variant and one table row — runtime class loading is
//! deliberately absent.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{DomainDmaSpec, RetryConfig};
use crate::llm::{LlmClient, LlmError, ResourceUsage, ResponseSchema, call_typed, with_retry};
use crate::message::ChatMessage;

use super::{DmaError, DmaInput};

/// Result of the domain-specific evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainAssessment {
    /// Domain the assessment was made in.
    pub domain: String,
    /// Domain fitness in `[0, 1]`.
    pub domain_alignment_score: f64,
    /// Short tags for domain concerns.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Action the domain evaluator would favor, if it has an opinion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
    /// Free-text reasoning.
    pub reasoning: String,
}

// ============================================================================
// Kinds
// ============================================================================

/// Community-moderation domain evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommunityDma {
    /// Norms the community holds the agent to.
    #[serde(default)]
    pub norms: Vec<String>,
}

/// Product-support domain evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportDma {
    /// Product the agent supports.
    #[serde(default)]
    pub product: String,
}

/// Research-assistant domain evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchDma {
    /// Field of study the agent works in.
    #[serde(default)]
    pub field: String,
}

/// The closed union of domain-specific DMAs.
#[derive(Clone, Debug, PartialEq)]
pub enum DomainDma {
    /// Community moderation.
    Community(CommunityDma),
    /// Product support.
    Support(SupportDma),
    /// Research assistance.
    Research(ResearchDma),
}

impl DomainDma {
    /// Name used for prompt overrides and failure attribution.
    pub const NAME: &'static str = "domain";

    /// The domain label reported in assessments.
    #[must_use]
    pub fn domain(&self) -> &'static str {
        match self {
            Self::Community(_) => "community",
            Self::Support(_) => "support",
            Self::Research(_) => "research",
        }
    }

    fn response_schema() -> ResponseSchema {
        ResponseSchema::new(
            "domain_assessment",
            json!({
                "type": "object",
                "properties": {
                    "domain": {"type": "string"},
                    "domain_alignment_score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
                    "flags": {"type": "array", "items": {"type": "string"}},
                    "recommended_action": {"type": ["string", "null"]},
                    "reasoning": {"type": "string"}
                },
                "required": ["domain", "domain_alignment_score", "reasoning"]
            }),
        )
    }

    fn domain_guidance(&self) -> String {
        match self {
            Self::Community(dma) => {
                if dma.norms.is_empty() {
                    "Judge fitness for a community space: tone, relevance, \
                     and whether the thought respects community norms."
                        .to_string()
                } else {
                    format!(
                        "Judge fitness for a community that holds these norms: {}.",
                        dma.norms.join("; ")
                    )
                }
            }
            Self::Support(dma) => format!(
                "Judge fitness as a support response for the product '{}': \
                 accuracy, scope, and whether escalation is warranted.",
                dma.product
            ),
            Self::Research(dma) => format!(
                "Judge fitness as research assistance in the field '{}': \
                 rigor, sourcing, and epistemic caution.",
                dma.field
            ),
        }
    }

    fn messages(&self, input: &DmaInput) -> Vec<ChatMessage> {
        let system = input.prompt_override(Self::NAME).map_or_else(
            || {
                format!(
                    "You are the domain evaluation faculty of the agent '{}'. {}",
                    input.agent_name,
                    self.domain_guidance()
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
    ) -> Result<(DomainAssessment, ResourceUsage), LlmError> {
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

// ============================================================================
// Registry
// ============================================================================

type Constructor = fn(&Value) -> DomainDma;

/// Registration table: profile kind name to constructor closure.
const REGISTRY: &[(&str, Constructor)] = &[
    ("community", |args| {
        DomainDma::Community(serde_json::from_value(args.clone()).unwrap_or(CommunityDma {
            norms: Vec::new(),
        }))
    }),
    ("support", |args| {
        DomainDma::Support(serde_json::from_value(args.clone()).unwrap_or(SupportDma {
            product: String::new(),
        }))
    }),
    ("research", |args| {
        DomainDma::Research(serde_json::from_value(args.clone()).unwrap_or(ResearchDma {
            field: String::new(),
        }))
    }),
];

/// Names of all registered domain DMA kinds.
#[must_use]
pub fn registered_domain_kinds() -> Vec<&'static str> {
    REGISTRY.iter().map(|(name, _)| *name).collect()
}

/// Resolve the profile's domain DMA selection.
///
/// # Errors
///
/// Returns [`DmaError::UnknownKind`] when the profile names an
/// unregistered kind.
pub fn build_domain_dma(spec: &DomainDmaSpec) -> Result<DomainDma, DmaError> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == spec.kind)
        .map(|(_, build)| build(&spec.args))
        .ok_or_else(|| DmaError::UnknownKind {
            kind: spec.kind.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_kinds() {
        for kind in registered_domain_kinds() {
            let spec = DomainDmaSpec {
                kind: kind.to_string(),
                args: Value::Null,
            };
            assert!(build_domain_dma(&spec).is_ok(), "kind {kind}");
        }
    }

    #[test]
    fn registry_rejects_unknown_kind() {
        let spec = DomainDmaSpec {
            kind: "astrology".into(),
            args: Value::Null,
        };
        assert!(matches!(
            build_domain_dma(&spec),
            Err(DmaError::UnknownKind { .. })
        ));
    }

    #[test]
    fn constructor_honors_args() {
        let spec = DomainDmaSpec {
            kind: "support".into(),
            args: json!({"product": "widgets"}),
        };
        match build_domain_dma(&spec).unwrap() {
            DomainDma::Support(dma) => assert_eq!(dma.product, "widgets"),
            other => panic!("unexpected DMA: {other:?}"),
        }
    }
}
