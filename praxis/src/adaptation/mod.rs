//! The adaptation controller: bounded self-configuration.
//!
//! Every cycle the controller **observes** recent signals and audit
//! activity, **proposes** zero or more configuration changes with
//! estimated variance contributions, **gates** them against the identity
//! variance ceiling, **applies** the approved set, and later **measures**
//! their effect. Changes that overflow the ceiling park the controller in
//! `REVIEWING` until an external [`ReviewOutcome`] arrives; an emergency
//! stop forces terminal `HALTED` until manually cleared.
//!
//! The identity baseline is snapshotted into graph memory (IDENTITY scope)
//! at first start and reloaded on every subsequent start, so variance is
//! always measured against the agent's original identity, not its last
//! restart.

pub mod change;
pub mod variance;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditError, AuditEventType, AuditService};
use crate::config::GuardrailConfig;
use crate::memory::{GraphNodeSpec, GraphStore, MemoryError};
use crate::signals::{SignalBody, WindowBuffer};
use crate::types::{ErrorClass, GraphScope};

pub use change::{ChangeStatus, ConfigurationChange, ReviewOutcome};
pub use variance::TunableConfig;

/// Graph node id of the persisted identity baseline.
pub const BASELINE_NODE_ID: &str = "identity_baseline";

// ============================================================================
// State machine
// ============================================================================

/// Current state of the adaptation system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationState {
    /// Gathering data; no changes yet.
    Learning,
    /// Actively generating proposals.
    Proposing,
    /// Applying approved changes.
    Adapting,
    /// Waiting for applied changes to settle before measurement.
    Stabilizing,
    /// Parked pending external review of an over-ceiling proposal set.
    Reviewing,
    /// Emergency-stopped; rejects proposals until manually cleared.
    Halted,
}

// ============================================================================
// Observation & cycle results
// ============================================================================

/// Aggregated view of one observation window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
    /// Signals observed in total.
    pub signals: usize,
    /// Guardrail failures of any check.
    pub guardrail_failures: usize,
    /// Guardrail failures naming coherence.
    pub coherence_failures: usize,
    /// Deferrals of any reason.
    pub deferrals: usize,
    /// Deferrals with reason "ponder cap".
    pub ponder_cap_deferrals: usize,
    /// Incidents (transient external failures and worse).
    pub incidents: usize,
    /// Total LLM cost observed, USD.
    pub cost_usd: f64,
}

/// Result of one adaptation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptationCycleResult {
    /// Cycle identifier.
    pub cycle_id: String,
    /// State the controller ended the cycle in.
    pub state: AdaptationState,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle completed.
    pub completed_at: DateTime<Utc>,
    /// Proposals generated.
    pub proposals_generated: usize,
    /// Changes applied.
    pub changes_applied: usize,
    /// Variance before the cycle, percent.
    pub variance_before: f64,
    /// Variance after the cycle, percent.
    pub variance_after: f64,
    /// Whether external review is required before anything applies.
    pub requires_review: bool,
    /// Error, when the cycle failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the adaptation controller.
#[derive(Debug, Error, Diagnostic)]
pub enum AdaptationError {
    /// The controller is halted and rejects proposals.
    #[error("adaptation is halted: {reason}")]
    #[diagnostic(code(praxis::adaptation::halted))]
    Halted {
        /// Why the emergency stop fired.
        reason: String,
    },

    /// Applying a change to the tunable vector failed.
    #[error("cannot apply change to {path}: {detail}")]
    #[diagnostic(code(praxis::adaptation::bad_change))]
    BadChange {
        /// Target path.
        path: String,
        /// What was wrong.
        detail: String,
    },

    /// Baseline persistence failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Audit write failed.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl AdaptationError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Halted { .. } => ErrorClass::Capacity,
            Self::BadChange { .. } => ErrorClass::Validation,
            Self::Memory(err) => err.class(),
            Self::Audit(err) => err.class(),
        }
    }
}

// ============================================================================
// Controller
// ============================================================================

/// The self-configuration loop, bounded by the identity variance ceiling.
pub struct AdaptationController {
    baseline: RwLock<TunableConfig>,
    current: RwLock<TunableConfig>,
    state: RwLock<AdaptationState>,
    ceiling_percent: RwLock<f64>,
    halt_reason: RwLock<Option<String>>,
    history: Mutex<Vec<ConfigurationChange>>,
    pending_review: Mutex<Vec<ConfigurationChange>>,
    window: Arc<WindowBuffer>,
    graph: Arc<GraphStore>,
    audit: Arc<AuditService>,
}

impl std::fmt::Debug for AdaptationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptationController").finish_non_exhaustive()
    }
}

impl AdaptationController {
    /// Build the controller around the engine's initial tunables.
    #[must_use]
    pub fn new(
        initial: TunableConfig,
        ceiling_percent: f64,
        window: Arc<WindowBuffer>,
        graph: Arc<GraphStore>,
        audit: Arc<AuditService>,
    ) -> Self {
        Self {
            baseline: RwLock::new(initial.clone()),
            current: RwLock::new(initial),
            state: RwLock::new(AdaptationState::Learning),
            ceiling_percent: RwLock::new(ceiling_percent),
            halt_reason: RwLock::new(None),
            history: Mutex::new(Vec::new()),
            pending_review: Mutex::new(Vec::new()),
            window,
            graph,
            audit,
        }
    }

    /// Load the persisted identity baseline, or snapshot the current
    /// configuration as the baseline on first start.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptationError::Memory`] on storage failure.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<(), AdaptationError> {
        let stored = self
            .graph
            .get_node(BASELINE_NODE_ID, GraphScope::Identity)
            .await?;

        match stored {
            Some(node) => {
                if let Ok(baseline) =
                    serde_json::from_value::<TunableConfig>(node.attributes.clone())
                {
                    *self.baseline.write().await = baseline;
                    tracing::info!("loaded identity baseline from graph memory");
                } else {
                    tracing::warn!("identity baseline node is unreadable; keeping in-process baseline");
                }
            }
            None => {
                let baseline = self.baseline.read().await.clone();
                let attributes =
                    serde_json::to_value(&baseline).unwrap_or(serde_json::Value::Null);
                self.graph
                    .memorize(
                        &GraphNodeSpec {
                            node_id: BASELINE_NODE_ID.to_string(),
                            scope: GraphScope::Identity,
                            node_type: "config".to_string(),
                            attributes,
                        },
                        "adaptation",
                    )
                    .await?;
                tracing::info!("snapshotted identity baseline into graph memory");
            }
        }
        Ok(())
    }

    /// Current adaptation state.
    pub async fn state(&self) -> AdaptationState {
        *self.state.read().await
    }

    /// Live guardrail thresholds derived from the current tunables.
    pub async fn guardrail_config(&self) -> GuardrailConfig {
        let current = self.current.read().await;
        GuardrailConfig {
            entropy_threshold: current.entropy_threshold,
            coherence_threshold: current.coherence_threshold,
            optimization_veto_ratio: current.optimization_veto_ratio,
        }
    }

    /// Current cumulative variance from the identity baseline, percent.
    pub async fn current_variance(&self) -> f64 {
        let baseline = self.baseline.read().await;
        self.current.read().await.variance_from(&baseline)
    }

    /// Aggregate the signal window into an observation.
    pub fn observe(&self) -> ObservationWindow {
        let signals = self.window.drain();
        let mut observation = ObservationWindow {
            signals: signals.len(),
            ..ObservationWindow::default()
        };
        for signal in &signals {
            match &signal.body {
                SignalBody::GuardrailFailure { reason, .. } => {
                    observation.guardrail_failures += 1;
                    if reason.contains("coherence") {
                        observation.coherence_failures += 1;
                    }
                }
                SignalBody::Deferral { reason } => {
                    observation.deferrals += 1;
                    if reason == "ponder cap" {
                        observation.ponder_cap_deferrals += 1;
                    }
                }
                SignalBody::Incident { .. } => observation.incidents += 1,
                SignalBody::ResourceUsage {
                    cost_estimate_usd, ..
                } => observation.cost_usd += cost_estimate_usd,
                SignalBody::Telemetry { .. } | SignalBody::Trace { .. } => {}
            }
        }
        observation
    }

    /// Deterministic proposal heuristics over one observation window.
    async fn propose(&self, observation: &ObservationWindow) -> Vec<ConfigurationChange> {
        let baseline = self.baseline.read().await.clone();
        let current = self.current.read().await.clone();
        let current_variance = current.variance_from(&baseline);
        let mut proposals = Vec::new();

        let mut maybe = |path: &str, new_value: serde_json::Value, confidence: f64| {
            let Some(old_value) = current.get(path) else {
                return;
            };
            let mut hypothetical = current.clone();
            if hypothetical.set(path, &new_value).is_err() {
                return;
            }
            let estimated = (hypothetical.variance_from(&baseline) - current_variance).max(0.0);
            proposals.push(ConfigurationChange::propose(
                GraphScope::Local,
                path,
                old_value,
                new_value,
                estimated,
                confidence,
            ));
        };

        // Repeated coherence failures: the voice model and the threshold
        // are fighting; relax the threshold slightly, never below 0.70.
        if observation.coherence_failures >= 3 && current.coherence_threshold > 0.70 {
            maybe(
                "guardrails.coherence_threshold",
                serde_json::Value::from((current.coherence_threshold - 0.02).max(0.70)),
                0.6,
            );
        }

        // Repeated transient incidents: widen the retry budget, capped at 5.
        if observation.incidents >= 5 && current.retry_max_attempts < 5 {
            maybe(
                "retry.max_attempts",
                serde_json::Value::from(current.retry_max_attempts + 1),
                0.7,
            );
        }

        // Thoughts regularly hitting the ponder cap: one more round of
        // reflection, capped at 10.
        if observation.ponder_cap_deferrals >= 3 && current.ponder_cap < 10 {
            maybe(
                "scheduler.ponder_cap",
                serde_json::Value::from(current.ponder_cap + 1),
                0.5,
            );
        }

        proposals
    }

    /// Run one full cycle: observe, propose, gate, apply.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptationError`] on storage or audit failure; a halted
    /// controller reports through the result, not an error.
    pub async fn run_cycle(&self) -> Result<AdaptationCycleResult, AdaptationError> {
        let observation = self.observe();
        self.run_cycle_with(observation).await
    }

    /// Run one cycle over an observation the caller already drained.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptationError`] on storage or audit failure.
    #[instrument(skip(self, observation))]
    pub async fn run_cycle_with(
        &self,
        observation: ObservationWindow,
    ) -> Result<AdaptationCycleResult, AdaptationError> {
        let started_at = Utc::now();
        let cycle_id = Uuid::new_v4().to_string();

        let state = *self.state.read().await;
        if matches!(state, AdaptationState::Halted | AdaptationState::Reviewing) {
            return Ok(AdaptationCycleResult {
                cycle_id,
                state,
                started_at,
                completed_at: Utc::now(),
                proposals_generated: 0,
                changes_applied: 0,
                variance_before: self.current_variance().await,
                variance_after: self.current_variance().await,
                requires_review: state == AdaptationState::Reviewing,
                error: None,
            });
        }

        *self.state.write().await = AdaptationState::Proposing;
        let variance_before = self.current_variance().await;
        let proposals = self.propose(&observation).await;

        if proposals.is_empty() {
            *self.state.write().await = AdaptationState::Learning;
            return Ok(AdaptationCycleResult {
                cycle_id,
                state: AdaptationState::Learning,
                started_at,
                completed_at: Utc::now(),
                proposals_generated: 0,
                changes_applied: 0,
                variance_before,
                variance_after: variance_before,
                requires_review: false,
                error: None,
            });
        }

        // Gate: cumulative + proposed must stay at or under the ceiling.
        let proposed_sum: f64 = proposals.iter().map(|c| c.estimated_variance).sum();
        let ceiling = *self.ceiling_percent.read().await;
        if variance_before + proposed_sum > ceiling {
            *self.state.write().await = AdaptationState::Reviewing;
            let count = proposals.len();
            self.audit
                .record(
                    AuditEventType::ConfigChange,
                    "adaptation",
                    json!({
                        "cycle_id": cycle_id,
                        "status": "requires_review",
                        "variance_before": variance_before,
                        "proposed_variance": proposed_sum,
                        "ceiling": ceiling,
                        "proposals": proposals,
                    }),
                )
                .await?;
            *self.pending_review.lock().await = proposals;
            return Ok(AdaptationCycleResult {
                cycle_id,
                state: AdaptationState::Reviewing,
                started_at,
                completed_at: Utc::now(),
                proposals_generated: count,
                changes_applied: 0,
                variance_before,
                variance_after: variance_before,
                requires_review: true,
                error: None,
            });
        }

        // Apply the approved set.
        *self.state.write().await = AdaptationState::Adapting;
        let proposals_generated = proposals.len();
        let changes_applied = self.apply_changes(proposals, &cycle_id).await?;
        let variance_after = self.current_variance().await;
        *self.state.write().await = AdaptationState::Stabilizing;

        Ok(AdaptationCycleResult {
            cycle_id,
            state: AdaptationState::Stabilizing,
            started_at,
            completed_at: Utc::now(),
            proposals_generated,
            changes_applied,
            variance_before,
            variance_after,
            requires_review: false,
            error: None,
        })
    }

    async fn apply_changes(
        &self,
        proposals: Vec<ConfigurationChange>,
        cycle_id: &str,
    ) -> Result<usize, AdaptationError> {
        let mut current = self.current.write().await;
        let mut history = self.history.lock().await;
        let mut applied = 0usize;

        for mut change in proposals {
            current
                .set(&change.target_path, &change.new_value)
                .map_err(|detail| AdaptationError::BadChange {
                    path: change.target_path.clone(),
                    detail,
                })?;
            change.status = ChangeStatus::Applied;
            change.applied_at = Some(Utc::now());

            self.audit
                .record(
                    AuditEventType::ConfigChange,
                    "adaptation",
                    json!({
                        "cycle_id": cycle_id,
                        "status": "applied",
                        "change": change,
                    }),
                )
                .await?;

            history.push(change);
            applied += 1;
        }
        Ok(applied)
    }

    /// Measure the most recent applied changes against a post-settle
    /// observation; ineffective changes are rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptationError`] on audit failure.
    #[instrument(skip(self, pre, post))]
    pub async fn measure(
        &self,
        pre: &ObservationWindow,
        post: &ObservationWindow,
    ) -> Result<usize, AdaptationError> {
        let improved = post.guardrail_failures + post.deferrals + post.incidents
            < pre.guardrail_failures + pre.deferrals + pre.incidents;

        let mut rolled_back = 0usize;
        {
            let mut history = self.history.lock().await;
            let mut current = self.current.write().await;
            for change in history
                .iter_mut()
                .filter(|c| c.status == ChangeStatus::Applied && c.effective.is_none())
            {
                change.effective = Some(improved);
                if !improved {
                    // Ineffective: revert to the old value.
                    if current.set(&change.target_path, &change.old_value).is_ok() {
                        change.status = ChangeStatus::RolledBack;
                        rolled_back += 1;
                    }
                    self.audit
                        .record(
                            AuditEventType::ConfigChange,
                            "adaptation",
                            json!({"status": "rolled_back", "change": change}),
                        )
                        .await?;
                }
            }
        }

        let mut state = self.state.write().await;
        if *state == AdaptationState::Stabilizing {
            *state = AdaptationState::Learning;
        }
        Ok(rolled_back)
    }

    /// Apply an external review to the parked proposal set.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptationError`] on audit failure.
    #[instrument(skip(self, outcome), fields(reviewer = %outcome.reviewer_id))]
    pub async fn apply_review(&self, outcome: ReviewOutcome) -> Result<usize, AdaptationError> {
        if let Some(new_ceiling) = outcome.new_variance_ceiling {
            *self.ceiling_percent.write().await = new_ceiling;
        }

        let parked = std::mem::take(&mut *self.pending_review.lock().await);
        let approved: Vec<ConfigurationChange> = parked
            .into_iter()
            .filter(|change| outcome.approved_changes.contains(&change.change_id))
            .map(|mut change| {
                change.status = ChangeStatus::Approved;
                change
            })
            .collect();

        let applied = self.apply_changes(approved, "review").await?;

        let mut state = self.state.write().await;
        if *state == AdaptationState::Reviewing {
            *state = if outcome.resume_adaptation {
                AdaptationState::Learning
            } else {
                AdaptationState::Halted
            };
        }
        Ok(applied)
    }

    /// Emergency stop: force terminal HALTED from any state.
    pub async fn emergency_stop(&self, reason: &str) {
        *self.state.write().await = AdaptationState::Halted;
        *self.halt_reason.write().await = Some(reason.to_string());
        tracing::warn!(%reason, "adaptation emergency stop");
    }

    /// Manually clear a halt, returning to LEARNING.
    pub async fn clear_halt(&self) {
        let mut state = self.state.write().await;
        if *state == AdaptationState::Halted {
            *state = AdaptationState::Learning;
            *self.halt_reason.write().await = None;
        }
    }

    /// Applied-change history (for the control plane and tests).
    pub async fn history(&self) -> Vec<ConfigurationChange> {
        self.history.lock().await.clone()
    }

    /// Spawn the periodic cycle loop: run a cycle, wait out the settle
    /// period, measure. Exits when `shutdown` flips to true.
    #[must_use]
    pub fn spawn_loop(
        self: Arc<Self>,
        cycle_interval: Duration,
        settle: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cycle_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let pre = self.observe();
                        match self.run_cycle_with(pre).await {
                            Ok(result) if result.changes_applied > 0 => {
                                tokio::time::sleep(settle).await;
                                let post = self.observe();
                                if let Err(err) = self.measure(&pre, &post).await {
                                    tracing::error!(error = %err, "adaptation measurement failed");
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                tracing::error!(error = %err, "adaptation cycle failed");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
