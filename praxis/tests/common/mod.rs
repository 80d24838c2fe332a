//! Shared fixtures: a scripted LLM provider, a recording transport, and a
//! fully wired engine context over temporary databases.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;

use praxis::auth::{AuthorizationContext, WaRole};
use praxis::config::{AgentProfile, EngineConfig};
use praxis::handlers::{ToolError, ToolService};
use praxis::llm::{LlmClient, LlmError, ResourceUsage, StructuredRequest, StructuredResponse};
use praxis::message::InboundMessage;
use praxis::runtime::EngineContext;
use praxis::transport::{TransportAdapter, TransportError};

// ============================================================================
// Scripted LLM
// ============================================================================

/// Deterministic provider: queued responses per schema name, with benign
/// defaults for every faculty the pipeline calls.
pub struct ScriptedLlm {
    queued: Mutex<HashMap<String, Vec<Value>>>,
    default_action: Mutex<Value>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queued: Mutex::new(HashMap::new()),
            default_action: Mutex::new(json!({
                "action": "speak",
                "params": {"content": "Hello!"},
                "rationale": "friendly default",
                "alignment": {"summary": "benign"},
            })),
        })
    }

    /// Queue `value` as the next response for `schema`.
    pub fn push(&self, schema: &str, value: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default()
            .push(value);
    }

    /// Replace the default action-selection reply.
    pub fn set_default_action(&self, value: Value) {
        *self.default_action.lock().unwrap() = value;
    }

    fn default_for(&self, schema: &str) -> Option<Value> {
        match schema {
            "ethical_assessment" => Some(json!({
                "alignment": {"beneficence": 0.9, "non_maleficence": 0.9},
                "conflicts": [],
                "rationale": "benign",
            })),
            "common_sense_assessment" => Some(json!({
                "plausibility_score": 0.95,
                "flags": [],
                "reasoning": "plausible",
            })),
            "domain_assessment" => Some(json!({
                "domain": "community",
                "domain_alignment_score": 0.9,
                "flags": [],
                "recommended_action": null,
                "reasoning": "fits",
            })),
            "action_selection" => Some(self.default_action.lock().unwrap().clone()),
            "epistemic_values" => Some(json!({"entropy": 0.15, "coherence": 0.92})),
            "optimization_veto" => Some(json!({
                "decision": "proceed",
                "entropy_reduction_ratio": 0.5,
                "affected_values": [],
                "justification": "benign",
                "confidence": 0.9,
            })),
            "epistemic_humility" => Some(json!({
                "certainty": 0.9,
                "uncertainties": [],
                "reflective_justification": "simple",
                "recommended_action": "proceed",
            })),
            _ => None,
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn call_structured(
        &self,
        request: StructuredRequest,
    ) -> Result<StructuredResponse, LlmError> {
        let schema = request.response_schema.name.clone();
        let queued = {
            let mut queued = self.queued.lock().unwrap();
            queued.get_mut(&schema).and_then(|values| {
                if values.is_empty() {
                    None
                } else {
                    Some(values.remove(0))
                }
            })
        };
        let value = queued.or_else(|| self.default_for(&schema)).ok_or_else(|| {
            LlmError::Provider {
                message: format!("no scripted response for schema '{schema}'"),
                retryable: false,
            }
        })?;
        Ok(StructuredResponse {
            value,
            usage: ResourceUsage {
                tokens_in: 50,
                tokens_out: 20,
                cost_estimate_usd: 0.0005,
            },
        })
    }
}

// ============================================================================
// Recording transport
// ============================================================================

/// Transport that records every send and returns no history.
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(String, String)>>,
    home: Option<String>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            home: Some("home".to_string()),
        })
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransportAdapter for RecordingTransport {
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<bool, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(true)
    }

    async fn fetch_messages(
        &self,
        _channel_id: &str,
        _limit: usize,
        _before: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        Ok(Vec::new())
    }

    fn home_channel_id(&self) -> Option<String> {
        self.home.clone()
    }
}

// ============================================================================
// Null tool service
// ============================================================================

/// Tool service that echoes its arguments.
pub struct EchoTools;

#[async_trait]
impl ToolService for EchoTools {
    async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        Ok(json!({"tool": name, "echo": args}))
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A wired engine over temp databases, plus the test doubles.
pub struct TestHarness {
    pub ctx: Arc<EngineContext>,
    pub llm: Arc<ScriptedLlm>,
    pub transport: Arc<RecordingTransport>,
    pub dir: TempDir,
}

/// Build a full engine context in a temp directory with the WA channel
/// set to `wa-room`.
pub async fn harness() -> TestHarness {
    let dir = TempDir::new().expect("temp dir");
    let mut config = EngineConfig::default();
    config.engine_db = dir.path().join("engine.db");
    config.secrets_db = dir.path().join("secrets.db");
    config.audit_db = dir.path().join("audit.db");
    config.wa_channel_id = Some("wa-room".to_string());
    // Keep retries snappy under test.
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;

    let llm = ScriptedLlm::new();
    let transport = RecordingTransport::new();
    let ctx = EngineContext::initialize(
        config,
        AgentProfile::fallback(),
        llm.clone(),
        transport.clone(),
        Arc::new(EchoTools),
        None,
    )
    .await
    .expect("engine context");

    TestHarness {
        ctx,
        llm,
        transport,
        dir,
    }
}

/// A root authorization context (wildcard scope).
pub fn root_authorization() -> AuthorizationContext {
    AuthorizationContext {
        wa_id: "wa-2025-01-01-ROOT00".to_string(),
        role: WaRole::Root,
        scopes: vec!["*".to_string()],
    }
}
