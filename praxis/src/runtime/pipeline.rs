//! The per-thought pipeline.
//!
//! One thought flows through: mark processing → DMA fan-out → action
//! selection → guardrail stack → handler dispatch → status commit, with an
//! audit entry at every transition. Guardrail failures are outcomes, not
//! errors: they rewrite the action to a deferral and the pipeline carries
//! on. Cancellation discards partial DMA results but never skips the
//! terminal-status audit write.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;
use tracing::instrument;

use crate::action::{ActionSelectionResult, DeferParams, HandlerAction};
use crate::audit::AuditEventType;
use crate::dma::{DmaInput, DmaRunner};
use crate::guardrails::{GuardrailOutcome, GuardrailStack};
use crate::handlers::PipelineOutcome;
use crate::llm::ResourceUsage;
use crate::selector::ActionSelector;
use crate::signals::{Signal, SignalBody};
use crate::store::model::Thought;
use crate::types::{ErrorClass, TaskStatus, ThoughtStatus};

use super::{EngineContext, EngineError};

/// What one pipeline run did with its thought.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineReport {
    /// The processed thought.
    pub thought_id: String,
    /// Status the thought ended the round in.
    pub disposition: ThoughtStatus,
    /// Variant name of the executed action, when one ran.
    pub action: Option<String>,
    /// LLM resource usage across the round.
    pub usage: ResourceUsage,
}

/// Run one thought through the full pipeline.
///
/// # Errors
///
/// Returns [`EngineError`] only for infrastructure failures (store/audit
/// unavailable, invariant violations). Evaluation failures, guardrail
/// rewrites, and transient collaborator errors are committed as thought
/// dispositions, not bubbled.
#[instrument(skip(ctx, thought, cancel), fields(thought_id = %thought.thought_id))]
pub async fn process_thought(
    ctx: &EngineContext,
    thought: Thought,
    round: u32,
    cancel: watch::Receiver<bool>,
) -> Result<PipelineReport, EngineError> {
    let mut usage = ResourceUsage::default();

    let task = ctx
        .store
        .get_task(&thought.source_task_id)
        .await?
        .ok_or_else(|| EngineError::Missing {
            what: "task",
            id: thought.source_task_id.clone(),
        })?;

    // Activate the task on its first thought.
    if task.status == TaskStatus::Pending {
        ctx.store
            .update_task_status(&task.task_id, TaskStatus::Active, None)
            .await?;
        ctx.audit
            .record(
                AuditEventType::TaskStatusChanged,
                "engine",
                json!({"task_id": task.task_id, "status": "active"}),
            )
            .await?;
    }

    ctx.store
        .mark_processing(&thought.thought_id, round)
        .await?;
    ctx.audit
        .record(
            AuditEventType::ThoughtStatusChanged,
            "engine",
            json!({
                "thought_id": thought.thought_id,
                "status": "processing",
                "round": round,
            }),
        )
        .await?;

    let input = Arc::new(DmaInput {
        thought: thought.clone(),
        task: task.clone(),
        agent_name: ctx.profile.name.clone(),
        prompt_overrides: ctx
            .profile
            .prompt_overrides
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    });

    // First stage: the three DMAs, concurrently.
    let runner = DmaRunner::new(
        ctx.config.retry.clone(),
        ctx.config.external_call_timeout(),
        ctx.config.llm_max_tokens,
    );
    let triple = match runner
        .run_triple(
            Arc::clone(&input),
            Arc::clone(&ctx.domain_dma),
            Arc::clone(&ctx.llm),
            cancel.clone(),
        )
        .await
    {
        Ok((triple, dma_usage)) => {
            usage.absorb(dma_usage);
            triple
        }
        Err(err) => {
            return fail_thought(ctx, &thought, &task, &err.to_string(), usage).await;
        }
    };

    ctx.audit
        .record(
            AuditEventType::DmaResultAccepted,
            "engine",
            json!({
                "thought_id": thought.thought_id,
                "ethical_conflicts": triple.ethical.conflicts.len(),
                "plausibility": triple.common_sense.plausibility_score,
                "domain": triple.domain.domain,
                "domain_score": triple.domain.domain_alignment_score,
            }),
        )
        .await?;

    // Second stage: action selection with tie-breaks.
    let selector = ActionSelector::new(
        ctx.config.retry.clone(),
        ctx.config.llm_max_tokens,
        ctx.store.ponder_cap(),
    );
    let mut selection = match selector.select(&input, &triple, ctx.llm.as_ref()).await {
        Ok((selection, selection_usage)) => {
            usage.absorb(selection_usage);
            selection
        }
        Err(err) => {
            return fail_thought(ctx, &thought, &task, &err.to_string(), usage).await;
        }
    };

    ctx.audit
        .record(
            AuditEventType::ActionSelected,
            "engine",
            json!({
                "thought_id": thought.thought_id,
                "selection": selection,
            }),
        )
        .await?;

    // Guardrails, with live thresholds from the adaptation controller.
    let stack = GuardrailStack::new(
        ctx.adaptation.guardrail_config().await,
        ctx.config.retry.clone(),
        ctx.config.llm_max_tokens,
    );
    match stack.evaluate(&selection, ctx.llm.as_ref()).await {
        Ok((report, guardrail_usage)) => {
            usage.absorb(guardrail_usage);
            ctx.audit
                .record(
                    AuditEventType::GuardrailDecision,
                    "engine",
                    json!({
                        "thought_id": thought.thought_id,
                        "action": selection.action.variant_name(),
                        "report": report,
                    }),
                )
                .await?;
            if let GuardrailOutcome::Fail { check, reason } = report.outcome {
                emit_signal(
                    ctx,
                    SignalBody::GuardrailFailure {
                        check: check.clone(),
                        reason: reason.clone(),
                    },
                );
                selection = rewrite_to_defer(selection, reason);
            }
        }
        Err(err) => {
            // The faculties themselves were unavailable after retries;
            // treat as a failed check and defer.
            let reason = format!("guardrail check unavailable: {err}");
            ctx.audit
                .record(
                    AuditEventType::GuardrailDecision,
                    "engine",
                    json!({
                        "thought_id": thought.thought_id,
                        "action": selection.action.variant_name(),
                        "error": reason,
                    }),
                )
                .await?;
            selection = rewrite_to_defer(selection, reason);
        }
    }

    // Dispatch.
    let outcome = match ctx.dispatcher.dispatch(&thought, &task, &selection).await {
        Ok(outcome) => outcome,
        Err(err) => {
            return match err.class() {
                ErrorClass::TransientExternal | ErrorClass::Capacity => {
                    defer_thought(ctx, &thought, &task, &selection, &err.to_string(), usage).await
                }
                ErrorClass::Invariant | ErrorClass::Integrity => Err(err.into()),
                _ => fail_thought(ctx, &thought, &task, &err.to_string(), usage).await,
            };
        }
    };

    emit_signal(
        ctx,
        SignalBody::ResourceUsage {
            tokens_in: usage.tokens_in,
            tokens_out: usage.tokens_out,
            cost_estimate_usd: usage.cost_estimate_usd,
        },
    );

    match outcome {
        PipelineOutcome::Terminal(result) => {
            let final_action = serde_json::to_value(&selection).ok();
            ctx.store
                .update_thought_status(&thought.thought_id, result.thought_status, final_action)
                .await?;
            if let Some(task_status) = result.task_status {
                let current = ctx.store.task_status(&task.task_id).await?;
                if current.can_transition_to(task_status) {
                    ctx.store
                        .update_task_status(
                            &task.task_id,
                            task_status,
                            Some(result.payload.clone()),
                        )
                        .await?;
                }
            }

            ctx.audit
                .record(
                    AuditEventType::HandlerOutcome,
                    "engine",
                    json!({
                        "thought_id": thought.thought_id,
                        "task_id": task.task_id,
                        "action": result.action,
                        "thought_status": result.thought_status,
                        "correlation_id": result.correlation_id,
                        "payload": result.payload,
                    }),
                )
                .await?;

            if let HandlerAction::Defer(params) = &selection.action {
                emit_signal(
                    ctx,
                    SignalBody::Deferral {
                        reason: params.reason.clone(),
                    },
                );
            }

            Ok(PipelineReport {
                thought_id: thought.thought_id.clone(),
                disposition: result.thought_status,
                action: Some(result.action),
                usage,
            })
        }
        PipelineOutcome::RequeuePonder {
            notes,
            ponder_count,
        } => {
            ctx.audit
                .record(
                    AuditEventType::ThoughtStatusChanged,
                    "engine",
                    json!({
                        "thought_id": thought.thought_id,
                        "status": "pending",
                        "ponder_count": ponder_count,
                        "questions": notes,
                    }),
                )
                .await?;
            Ok(PipelineReport {
                thought_id: thought.thought_id.clone(),
                disposition: ThoughtStatus::Pending,
                action: Some("ponder".to_string()),
                usage,
            })
        }
    }
}

fn rewrite_to_defer(mut selection: ActionSelectionResult, reason: String) -> ActionSelectionResult {
    selection.action = HandlerAction::Defer(DeferParams {
        reason,
        context: None,
    });
    selection
}

fn emit_signal(ctx: &EngineContext, body: SignalBody) {
    if ctx.signals.emit(Signal::now("pipeline", body)).is_err() {
        tracing::debug!("signal bus closed; dropping signal");
    }
}

/// Commit a failed disposition with its audit entry.
async fn fail_thought(
    ctx: &EngineContext,
    thought: &Thought,
    task: &crate::store::model::Task,
    reason: &str,
    usage: ResourceUsage,
) -> Result<PipelineReport, EngineError> {
    ctx.store
        .update_thought_status(&thought.thought_id, ThoughtStatus::Failed, None)
        .await?;
    let current = ctx.store.task_status(&task.task_id).await?;
    if current.can_transition_to(TaskStatus::Failed) {
        ctx.store
            .update_task_status(&task.task_id, TaskStatus::Failed, Some(json!({"error": reason})))
            .await?;
    }
    ctx.audit
        .record(
            AuditEventType::ThoughtStatusChanged,
            "engine",
            json!({
                "thought_id": thought.thought_id,
                "status": "failed",
                "reason": reason,
            }),
        )
        .await?;
    emit_signal(
        ctx,
        SignalBody::Incident {
            description: format!("thought {} failed: {reason}", thought.thought_id),
        },
    );
    Ok(PipelineReport {
        thought_id: thought.thought_id.clone(),
        disposition: ThoughtStatus::Failed,
        action: None,
        usage,
    })
}

/// Commit a deferred disposition when dispatch itself failed transiently.
async fn defer_thought(
    ctx: &EngineContext,
    thought: &Thought,
    task: &crate::store::model::Task,
    selection: &ActionSelectionResult,
    reason: &str,
    usage: ResourceUsage,
) -> Result<PipelineReport, EngineError> {
    ctx.store
        .update_thought_status(
            &thought.thought_id,
            ThoughtStatus::Deferred,
            serde_json::to_value(selection).ok(),
        )
        .await?;
    let current = ctx.store.task_status(&task.task_id).await?;
    if current.can_transition_to(TaskStatus::Deferred) {
        ctx.store
            .update_task_status(
                &task.task_id,
                TaskStatus::Deferred,
                Some(json!({"deferral_reason": reason})),
            )
            .await?;
    }
    ctx.audit
        .record(
            AuditEventType::HandlerOutcome,
            "engine",
            json!({
                "thought_id": thought.thought_id,
                "task_id": task.task_id,
                "action": selection.action.variant_name(),
                "thought_status": "deferred",
                "error": reason,
            }),
        )
        .await?;
    emit_signal(
        ctx,
        SignalBody::Deferral {
            reason: reason.to_string(),
        },
    );
    Ok(PipelineReport {
        thought_id: thought.thought_id.clone(),
        disposition: ThoughtStatus::Deferred,
        action: Some(selection.action.variant_name().to_string()),
        usage,
    })
}
