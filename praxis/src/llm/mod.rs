//! The structured LLM provider contract.
//!
//! Every model interaction in the engine — the three DMAs, the action
//! selector, and the guardrail faculties — goes through a single method:
//! [`LlmClient::call_structured`]. The provider guarantees the returned
//! JSON conforms to the supplied response schema or surfaces a typed parse
//! error; [`call_typed`] layers serde deserialization on top so callers
//! work with concrete result types.
//!
//! Transient provider failures are retried with bounded exponential
//! backoff and jitter via [`with_retry`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rand::RngExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::config::RetryConfig;
use crate::message::ChatMessage;
use crate::types::ErrorClass;

// ============================================================================
// Resource usage
// ============================================================================

/// Token and cost accounting for one provider call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Prompt tokens consumed.
    pub tokens_in: u64,
    /// Completion tokens produced.
    pub tokens_out: u64,
    /// Provider cost estimate in USD.
    pub cost_estimate_usd: f64,
}

impl ResourceUsage {
    /// Accumulate another call's usage into this one.
    pub fn absorb(&mut self, other: ResourceUsage) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.cost_estimate_usd += other.cost_estimate_usd;
    }
}

// ============================================================================
// Request / response
// ============================================================================

/// A named JSON schema the provider must conform to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    /// Short schema name used in prompts and telemetry.
    pub name: String,
    /// JSON Schema document.
    pub schema: Value,
}

impl ResponseSchema {
    /// Build a schema with the given name and document.
    #[must_use]
    pub fn new(name: &str, schema: Value) -> Self {
        Self {
            name: name.to_string(),
            schema,
        }
    }
}

/// One structured call: chat messages plus the schema the reply must obey.
#[derive(Clone, Debug)]
pub struct StructuredRequest {
    /// Conversation context, in provider order.
    pub messages: Vec<ChatMessage>,
    /// Schema the parsed object must conform to.
    pub response_schema: ResponseSchema,
    /// Token budget for the completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
}

/// The provider's reply: a schema-conforming object plus usage.
#[derive(Clone, Debug)]
pub struct StructuredResponse {
    /// Parsed object, guaranteed to conform to the request schema.
    pub value: Value,
    /// Resource accounting for this call.
    pub usage: ResourceUsage,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the LLM provider seam.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    /// The call did not finish within its deadline.
    #[error("LLM call timed out after {0:?}")]
    #[diagnostic(code(praxis::llm::timeout))]
    Timeout(Duration),

    /// The provider reported a failure (rate limit, 5xx, connection loss).
    #[error("LLM provider error: {message}")]
    #[diagnostic(code(praxis::llm::provider))]
    Provider {
        /// Provider-reported detail.
        message: String,
        /// Whether the failure is worth retrying.
        retryable: bool,
    },

    /// The returned object did not conform to the response schema.
    #[error("LLM response failed schema '{schema}': {detail}")]
    #[diagnostic(
        code(praxis::llm::schema_mismatch),
        help("The provider must return an object conforming to the request schema.")
    )]
    SchemaMismatch {
        /// Name of the violated schema.
        schema: String,
        /// Parse failure detail.
        detail: String,
    },

    /// The call was cancelled by the pipeline.
    #[error("LLM call cancelled")]
    #[diagnostic(code(praxis::llm::cancelled))]
    Cancelled,
}

impl LlmError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::SchemaMismatch { .. } | Self::Cancelled => false,
        }
    }

    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Provider { .. } => ErrorClass::TransientExternal,
            Self::SchemaMismatch { .. } => ErrorClass::Validation,
            Self::Cancelled => ErrorClass::TransientExternal,
        }
    }
}

// ============================================================================
// Provider contract
// ============================================================================

/// The single method every LLM provider implements.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Issue one structured call.
    ///
    /// Implementations must either return an object conforming to
    /// `request.response_schema` or a typed error; they never return
    /// free-form text.
    async fn call_structured(
        &self,
        request: StructuredRequest,
    ) -> Result<StructuredResponse, LlmError>;
}

/// Issue a structured call and deserialize the reply into `T`.
///
/// # Errors
///
/// Propagates provider errors; a reply that parses as JSON but not as `T`
/// becomes [`LlmError::SchemaMismatch`].
#[instrument(skip(client, messages, schema), fields(schema = %schema.name))]
pub async fn call_typed<T: DeserializeOwned>(
    client: &dyn LlmClient,
    messages: Vec<ChatMessage>,
    schema: ResponseSchema,
    max_tokens: u32,
    temperature: f32,
) -> Result<(T, ResourceUsage), LlmError> {
    let schema_name = schema.name.clone();
    let response = client
        .call_structured(StructuredRequest {
            messages,
            response_schema: schema,
            max_tokens,
            temperature,
        })
        .await?;

    let parsed =
        serde_json::from_value(response.value).map_err(|err| LlmError::SchemaMismatch {
            schema: schema_name,
            detail: err.to_string(),
        })?;
    Ok((parsed, response.usage))
}

// ============================================================================
// Retry
// ============================================================================

/// Run `op` with bounded exponential backoff and jitter.
///
/// Only errors for which [`LlmError::is_retryable`] holds are retried; the
/// final error is returned after `policy.max_attempts` total attempts.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or immediately for
/// non-retryable failures.
pub async fn with_retry<T, F, Fut>(policy: &RetryConfig, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = backoff_delay(policy, attempt);
                tracing::debug!(attempt, ?delay, error = %err, "retrying LLM call");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Exponential backoff with up to 25% additive jitter, capped at the
/// policy's max delay.
fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let base = policy
        .base_delay()
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = base.min(policy.max_delay());
    let jitter_budget = capped.as_millis() as u64 / 4;
    let jitter = if jitter_budget == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_budget)
    };
    capped + Duration::from_millis(jitter)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn call_structured(
            &self,
            _request: StructuredRequest,
        ) -> Result<StructuredResponse, LlmError> {
            if self.failures_before_success.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(LlmError::Provider {
                    message: "503".into(),
                    retryable: true,
                });
            }
            Ok(StructuredResponse {
                value: serde_json::json!({"ok": true}),
                usage: ResourceUsage::default(),
            })
        }
    }

    #[derive(Deserialize)]
    struct Ok1 {
        ok: bool,
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let client = FlakyClient {
            failures_before_success: AtomicU32::new(2),
        };
        let policy = RetryConfig::default();
        let result: Result<(Ok1, ResourceUsage), LlmError> = with_retry(&policy, || {
            call_typed(
                &client,
                vec![ChatMessage::user("hi")],
                ResponseSchema::new("ok", serde_json::json!({"type": "object"})),
                64,
                0.0,
            )
        })
        .await;
        assert!(result.unwrap().0.ok);
    }

    #[tokio::test]
    async fn schema_mismatch_is_not_retried() {
        struct WrongShape;
        #[async_trait]
        impl LlmClient for WrongShape {
            async fn call_structured(
                &self,
                _request: StructuredRequest,
            ) -> Result<StructuredResponse, LlmError> {
                Ok(StructuredResponse {
                    value: serde_json::json!({"unexpected": 1}),
                    usage: ResourceUsage::default(),
                })
            }
        }

        #[derive(Deserialize)]
        struct Expected {
            #[serde(rename = "ok")]
            _ok: bool,
        }

        let policy = RetryConfig::default();
        let result: Result<(Expected, ResourceUsage), LlmError> = with_retry(&policy, || {
            call_typed(
                &WrongShape,
                vec![],
                ResponseSchema::new("expected", serde_json::json!({"type": "object"})),
                64,
                0.0,
            )
        })
        .await;
        assert!(matches!(result, Err(LlmError::SchemaMismatch { .. })));
    }

    #[test]
    fn usage_absorbs() {
        let mut total = ResourceUsage::default();
        total.absorb(ResourceUsage {
            tokens_in: 10,
            tokens_out: 5,
            cost_estimate_usd: 0.01,
        });
        total.absorb(ResourceUsage {
            tokens_in: 1,
            tokens_out: 2,
            cost_estimate_usd: 0.02,
        });
        assert_eq!(total.tokens_in, 11);
        assert_eq!(total.tokens_out, 7);
        assert!((total.cost_estimate_usd - 0.03).abs() < 1e-9);
    }
}
