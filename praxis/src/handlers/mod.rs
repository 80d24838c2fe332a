//! Handler dispatch: executing the selected action.
//!
//! Maps each [`HandlerAction`] variant onto the collaborator that performs
//! it, decapsulating permitted secret references on egress and recording a
//! correlation id for every side-effectful call. The dispatcher produces a
//! [`PipelineOutcome`]: either a terminal [`ActionResult`] or a Ponder
//! re-queue.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use px_aegis::{SecretsService, ServiceError};

use crate::action::{ActionSelectionResult, HandlerAction};
use crate::config::RetryConfig;
use crate::memory::{GraphStore, MemoryError};
use crate::store::model::{Task, Thought};
use crate::store::{StoreError, ThoughtStore};
use crate::transport::{TransportAdapter, TransportError};
use crate::types::{ErrorClass, TaskStatus, ThoughtStatus};

// ============================================================================
// Tool service contract
// ============================================================================

/// Contract for the external tool executor.
#[async_trait]
pub trait ToolService: Send + Sync {
    /// Execute `name` with `args`, returning the tool's JSON result.
    async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

/// Errors from the tool service.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    /// The tool backend is temporarily unreachable.
    #[error("tool unavailable: {message}")]
    #[diagnostic(code(praxis::handlers::tool_unavailable))]
    Unavailable {
        /// Backend-reported detail.
        message: String,
    },

    /// The tool rejected the call (unknown tool, bad arguments).
    #[error("tool rejected call: {message}")]
    #[diagnostic(code(praxis::handlers::tool_rejected))]
    Rejected {
        /// Backend-reported detail.
        message: String,
    },
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal result of dispatching one action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionResult {
    /// The action that ran (variant name).
    pub action: String,
    /// Terminal status for the thought.
    pub thought_status: ThoughtStatus,
    /// Terminal status for the task, when the action decides one.
    pub task_status: Option<TaskStatus>,
    /// Structured outcome payload for the audit chain and task record.
    pub payload: Value,
    /// Correlation id recorded for replay disambiguation.
    pub correlation_id: String,
}

/// What the pipeline does next with the thought.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineOutcome {
    /// The thought is done; commit the statuses in the result.
    Terminal(ActionResult),
    /// The thought was re-queued by Ponder with these notes.
    RequeuePonder {
        /// Questions carried into the next round.
        notes: Vec<String>,
        /// The ponder count after the re-queue.
        ponder_count: u32,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from handler dispatch.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// Transport failure after bounded retries.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Tool failure.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Graph memory failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Secrets pipeline failure during egress decapsulation.
    #[error("secrets pipeline error: {0}")]
    #[diagnostic(code(praxis::handlers::secrets))]
    Secrets(#[from] ServiceError),

    /// Thought store failure (ponder re-queue).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HandlerError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(err) => err.class(),
            Self::Tool(ToolError::Unavailable { .. }) => ErrorClass::TransientExternal,
            Self::Tool(ToolError::Rejected { .. }) => ErrorClass::Validation,
            Self::Memory(err) => err.class(),
            Self::Secrets(_) => ErrorClass::TransientExternal,
            Self::Store(err) => err.class(),
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Executes selected actions against the engine's collaborators.
pub struct HandlerDispatcher {
    transport: Arc<dyn TransportAdapter>,
    tools: Arc<dyn ToolService>,
    memory: Arc<GraphStore>,
    secrets: Arc<SecretsService>,
    store: Arc<ThoughtStore>,
    retry: RetryConfig,
    agent_name: String,
    /// Channel deferrals escalate to; falls back to the transport's home
    /// channel.
    wa_channel_id: Option<String>,
}

impl std::fmt::Debug for HandlerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDispatcher")
            .field("agent_name", &self.agent_name)
            .finish_non_exhaustive()
    }
}

impl HandlerDispatcher {
    /// Wire up the dispatcher.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        transport: Arc<dyn TransportAdapter>,
        tools: Arc<dyn ToolService>,
        memory: Arc<GraphStore>,
        secrets: Arc<SecretsService>,
        store: Arc<ThoughtStore>,
        retry: RetryConfig,
        agent_name: String,
        wa_channel_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            tools,
            memory,
            secrets,
            store,
            retry,
            agent_name,
            wa_channel_id,
        }
    }

    /// Execute the selected action for one thought.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when a collaborator fails after bounded
    /// retries; the pipeline converts transient failures into deferrals.
    #[instrument(skip_all, fields(thought_id = %thought.thought_id, action = selection.action.variant_name()))]
    pub async fn dispatch(
        &self,
        thought: &Thought,
        task: &Task,
        selection: &ActionSelectionResult,
    ) -> Result<PipelineOutcome, HandlerError> {
        let correlation_id = Uuid::new_v4().to_string();

        let result = match &selection.action {
            HandlerAction::Speak(params) => {
                let channel = params
                    .channel_id
                    .clone()
                    .unwrap_or_else(|| task.channel_id.clone());
                let content = self
                    .decapsulated_text(&params.content, "speak")
                    .await?;
                let accepted = self.send_with_retry(&channel, &content).await?;
                ActionResult {
                    action: "speak".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({"channel_id": channel, "accepted": accepted}),
                    correlation_id,
                }
            }

            HandlerAction::Observe(params) => {
                let channel = params
                    .channel_id
                    .clone()
                    .unwrap_or_else(|| task.channel_id.clone());
                let messages = self
                    .transport
                    .fetch_messages(&channel, params.limit as usize, params.before)
                    .await?;
                ActionResult {
                    action: "observe".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({
                        "channel_id": channel,
                        "fetched": messages.len(),
                        "messages": messages,
                    }),
                    correlation_id,
                }
            }

            HandlerAction::Tool(params) => {
                let mut args = params.args.clone();
                self.secrets
                    .decapsulate_parameters(&mut args, "tool", &self.agent_name)
                    .await?;
                let output = self.tools.execute(&params.name, args).await?;
                ActionResult {
                    action: "tool".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({"tool": params.name, "output": output}),
                    correlation_id,
                }
            }

            HandlerAction::Memorize(params) => {
                let mut spec = params.node.clone();
                self.secrets
                    .decapsulate_parameters(&mut spec.attributes, "memorize", &self.agent_name)
                    .await?;
                let node = self.memory.memorize(&spec, &self.agent_name).await?;
                ActionResult {
                    action: "memorize".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({
                        "node_id": node.node_id,
                        "scope": node.scope,
                        "version": node.version,
                    }),
                    correlation_id,
                }
            }

            HandlerAction::Recall(params) => {
                let nodes = self.memory.recall(&params.query).await?;
                ActionResult {
                    action: "recall".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({"matched": nodes.len(), "nodes": nodes}),
                    correlation_id,
                }
            }

            HandlerAction::Forget(params) => {
                let removed = self
                    .memory
                    .forget(&params.node_id, params.scope, &params.edge_removals)
                    .await?;
                ActionResult {
                    action: "forget".into(),
                    thought_status: ThoughtStatus::Completed,
                    task_status: Some(TaskStatus::Completed),
                    payload: json!({
                        "node_id": params.node_id,
                        "scope": params.scope,
                        "removed": removed,
                    }),
                    correlation_id,
                }
            }

            HandlerAction::Ponder(params) => {
                let ponder_count = self
                    .store
                    .requeue_ponder(&thought.thought_id, &params.questions)
                    .await?;
                return Ok(PipelineOutcome::RequeuePonder {
                    notes: params.questions.clone(),
                    ponder_count,
                });
            }

            HandlerAction::Defer(params) => {
                let channel = self
                    .wa_channel_id
                    .clone()
                    .or_else(|| self.transport.home_channel_id());
                let payload = json!({
                    "deferral": {
                        "task_id": task.task_id,
                        "thought_id": thought.thought_id,
                        "reason": params.reason,
                        "context": params.context,
                    }
                });
                if let Some(channel) = &channel {
                    let rendered = payload.to_string();
                    self.send_with_retry(channel, &rendered).await?;
                } else {
                    tracing::warn!(
                        thought_id = %thought.thought_id,
                        "no WA channel configured; deferral recorded in audit only"
                    );
                }
                ActionResult {
                    action: "defer".into(),
                    thought_status: ThoughtStatus::Deferred,
                    task_status: Some(TaskStatus::Deferred),
                    payload,
                    correlation_id,
                }
            }

            HandlerAction::Reject(params) => ActionResult {
                action: "reject".into(),
                thought_status: ThoughtStatus::Completed,
                task_status: Some(TaskStatus::Failed),
                payload: json!({"reason": params.reason}),
                correlation_id,
            },

            HandlerAction::NoAction => ActionResult {
                action: "no_action".into(),
                thought_status: ThoughtStatus::Completed,
                task_status: Some(TaskStatus::Completed),
                payload: Value::Null,
                correlation_id,
            },
        };

        Ok(PipelineOutcome::Terminal(result))
    }

    /// Decapsulate permitted references in a text field for `action`.
    async fn decapsulated_text(&self, text: &str, action: &str) -> Result<String, HandlerError> {
        let mut value = Value::String(text.to_string());
        self.secrets
            .decapsulate_parameters(&mut value, action, &self.agent_name)
            .await?;
        match value {
            Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }

    /// Bounded retry for transport sends; only transient failures retry.
    async fn send_with_retry(&self, channel: &str, content: &str) -> Result<bool, HandlerError> {
        let mut attempt = 1u32;
        loop {
            match self.transport.send_message(channel, content).await {
                Ok(accepted) => return Ok(accepted),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.base_delay() * 2u32.saturating_pow(attempt - 1);
                    let delay = delay.min(self.retry.max_delay());
                    tracing::debug!(attempt, ?delay, error = %err, "retrying transport send");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
