//! The guardrail stack: epistemic checks between selection and dispatch.
//!
//! Applied to *every* selected action after the action selector and before
//! handler dispatch. The three faculties are dispatched concurrently and
//! awaited as a group:
//!
//! 1. **Epistemic values** `(entropy, coherence)` — communicative actions
//!    only; fails above the entropy threshold or below the coherence
//!    threshold.
//! 2. **Optimization veto** — all actions; fails on an abort/defer decision
//!    or an entropy-reduction ratio at or above the configured ratio.
//! 3. **Epistemic humility** — all actions; fails on a defer/abort
//!    recommendation.
//!
//! A guardrail failure is *not* an error: it is a first-class outcome that
//! converts the action into a deferral, with the failing check named in
//! the reason. Every faculty result is attached to the audit payload.

pub mod epistemic;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::action::{ActionSelectionResult, HandlerAction};
use crate::config::{GuardrailConfig, RetryConfig};
use crate::llm::{LlmClient, LlmError, ResourceUsage};

pub use epistemic::{
    EpistemicHumilityResult, EpistemicValues, HumilityRecommendation, OptimizationVetoResult,
    VetoDecision, calculate_epistemic_values, evaluate_epistemic_humility,
    evaluate_optimization_veto,
};

// ============================================================================
// Report
// ============================================================================

/// Whether the stack passed the action through.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardrailOutcome {
    /// All applicable checks passed.
    Pass,
    /// A check failed; the action is converted to a deferral.
    Fail {
        /// Name of the failing check.
        check: String,
        /// Human-readable reason, quoted in the deferral.
        reason: String,
    },
}

impl GuardrailOutcome {
    /// True when the action may proceed to dispatch.
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Everything the stack learned about one action; attached to the audit
/// entry verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardrailReport {
    /// Pass/fail outcome.
    pub outcome: GuardrailOutcome,
    /// Epistemic values, when the action was communicative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epistemic_values: Option<EpistemicValues>,
    /// Optimization veto result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_veto: Option<OptimizationVetoResult>,
    /// Epistemic humility result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epistemic_humility: Option<EpistemicHumilityResult>,
}

// ============================================================================
// Stack
// ============================================================================

/// Check names used in failure reasons and audit payloads.
pub const CHECK_EPISTEMIC_VALUES: &str = "epistemic_values";
/// Check name of the optimization veto.
pub const CHECK_OPTIMIZATION_VETO: &str = "optimization_veto";
/// Check name of the humility faculty.
pub const CHECK_EPISTEMIC_HUMILITY: &str = "epistemic_humility";

/// The configured guardrail stack.
#[derive(Clone, Debug)]
pub struct GuardrailStack {
    config: GuardrailConfig,
    retry: RetryConfig,
    max_tokens: u32,
}

impl GuardrailStack {
    /// Build a stack with the engine's thresholds and retry policy.
    #[must_use]
    pub fn new(config: GuardrailConfig, retry: RetryConfig, max_tokens: u32) -> Self {
        Self {
            config,
            retry,
            max_tokens,
        }
    }

    /// Evaluate one selected action.
    ///
    /// The faculty calls run concurrently; failures are then assessed in
    /// stack order (values, veto, humility) and the first failure wins.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError`] when a faculty call fails after bounded
    /// retries; the pipeline converts that into a deferral of its own.
    #[instrument(skip_all, fields(action = result.action.variant_name()))]
    pub async fn evaluate(
        &self,
        result: &ActionSelectionResult,
        llm: &dyn LlmClient,
    ) -> Result<(GuardrailReport, ResourceUsage), LlmError> {
        let speak_content = match &result.action {
            HandlerAction::Speak(params) if !params.content.is_empty() => {
                Some(params.content.as_str())
            }
            _ => None,
        };

        let values_call = async {
            match speak_content {
                Some(content) => {
                    calculate_epistemic_values(content, llm, &self.retry, self.max_tokens)
                        .await
                        .map(Some)
                }
                None => Ok(None),
            }
        };
        let veto_call = evaluate_optimization_veto(result, llm, &self.retry, self.max_tokens);
        let humility_call = evaluate_epistemic_humility(result, llm, &self.retry, self.max_tokens);

        let (values, veto, humility) = tokio::join!(values_call, veto_call, humility_call);
        let values = values?;
        let (veto, veto_usage) = veto?;
        let (humility, humility_usage) = humility?;

        let mut usage = ResourceUsage::default();
        usage.absorb(veto_usage);
        usage.absorb(humility_usage);
        let values = values.map(|(v, value_usage)| {
            usage.absorb(value_usage);
            v
        });

        let outcome = self.assess(values.as_ref(), &veto, &humility);
        Ok((
            GuardrailReport {
                outcome,
                epistemic_values: values,
                optimization_veto: Some(veto),
                epistemic_humility: Some(humility),
            },
            usage,
        ))
    }

    /// Stack-order assessment of the faculty results.
    fn assess(
        &self,
        values: Option<&EpistemicValues>,
        veto: &OptimizationVetoResult,
        humility: &EpistemicHumilityResult,
    ) -> GuardrailOutcome {
        if let Some(values) = values {
            if values.entropy > self.config.entropy_threshold {
                return GuardrailOutcome::Fail {
                    check: CHECK_EPISTEMIC_VALUES.to_string(),
                    reason: format!(
                        "entropy {:.2} > {:.2}",
                        values.entropy, self.config.entropy_threshold
                    ),
                };
            }
            if values.coherence < self.config.coherence_threshold {
                return GuardrailOutcome::Fail {
                    check: CHECK_EPISTEMIC_VALUES.to_string(),
                    reason: format!(
                        "coherence {:.2} < {:.2}",
                        values.coherence, self.config.coherence_threshold
                    ),
                };
            }
        }

        if matches!(veto.decision, VetoDecision::Abort | VetoDecision::Defer)
            || veto.entropy_reduction_ratio >= self.config.optimization_veto_ratio
        {
            return GuardrailOutcome::Fail {
                check: CHECK_OPTIMIZATION_VETO.to_string(),
                reason: format!("optimization veto: {}", veto.justification),
            };
        }

        if matches!(
            humility.recommended_action,
            HumilityRecommendation::Defer | HumilityRecommendation::Abort
        ) {
            return GuardrailOutcome::Fail {
                check: CHECK_EPISTEMIC_HUMILITY.to_string(),
                reason: format!(
                    "epistemic humility recommended {:?}: {}",
                    humility.recommended_action, humility.reflective_justification
                ),
            };
        }

        GuardrailOutcome::Pass
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> GuardrailStack {
        GuardrailStack::new(GuardrailConfig::default(), RetryConfig::default(), 256)
    }

    fn proceed_veto() -> OptimizationVetoResult {
        OptimizationVetoResult {
            decision: VetoDecision::Proceed,
            entropy_reduction_ratio: 0.5,
            affected_values: vec![],
            justification: "benign".into(),
            confidence: 0.9,
        }
    }

    fn proceed_humility() -> EpistemicHumilityResult {
        EpistemicHumilityResult {
            certainty: 0.9,
            uncertainties: vec![],
            reflective_justification: "simple".into(),
            recommended_action: HumilityRecommendation::Proceed,
        }
    }

    #[test]
    fn benign_values_pass() {
        let outcome = stack().assess(
            Some(&EpistemicValues {
                entropy: 0.15,
                coherence: 0.92,
            }),
            &proceed_veto(),
            &proceed_humility(),
        );
        assert!(outcome.passed());
    }

    #[test]
    fn low_coherence_fails_with_spec_reason_shape() {
        let outcome = stack().assess(
            Some(&EpistemicValues {
                entropy: 0.10,
                coherence: 0.30,
            }),
            &proceed_veto(),
            &proceed_humility(),
        );
        match outcome {
            GuardrailOutcome::Fail { check, reason } => {
                assert_eq!(check, CHECK_EPISTEMIC_VALUES);
                assert_eq!(reason, "coherence 0.30 < 0.80");
            }
            GuardrailOutcome::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn high_entropy_fails() {
        let outcome = stack().assess(
            Some(&EpistemicValues {
                entropy: 0.75,
                coherence: 0.95,
            }),
            &proceed_veto(),
            &proceed_humility(),
        );
        match outcome {
            GuardrailOutcome::Fail { check, reason } => {
                assert_eq!(check, CHECK_EPISTEMIC_VALUES);
                assert_eq!(reason, "entropy 0.75 > 0.40");
            }
            GuardrailOutcome::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn veto_ratio_at_threshold_fails() {
        let mut veto = proceed_veto();
        veto.entropy_reduction_ratio = 10.0;
        let outcome = stack().assess(None, &veto, &proceed_humility());
        assert!(!outcome.passed());
    }

    #[test]
    fn veto_defer_decision_fails_even_without_content() {
        let mut veto = proceed_veto();
        veto.decision = VetoDecision::Defer;
        let outcome = stack().assess(None, &veto, &proceed_humility());
        match outcome {
            GuardrailOutcome::Fail { check, .. } => assert_eq!(check, CHECK_OPTIMIZATION_VETO),
            GuardrailOutcome::Pass => panic!("expected failure"),
        }
    }

    #[test]
    fn humility_abort_fails() {
        let mut humility = proceed_humility();
        humility.recommended_action = HumilityRecommendation::Abort;
        let outcome = stack().assess(None, &proceed_veto(), &humility);
        match outcome {
            GuardrailOutcome::Fail { check, .. } => assert_eq!(check, CHECK_EPISTEMIC_HUMILITY),
            GuardrailOutcome::Pass => panic!("expected failure"),
        }
    }
}
