//! The cooperative scheduler.
//!
//! Single-threaded per agent: at most one thought is in the pipeline at
//! any instant. One round populates the queue from the store (task
//! priority descending, then task age), dequeues one thought, runs the
//! pipeline, and commits status plus audit before looking at the queue
//! again. Pause suspends rounds; single-step processes exactly one thought
//! while paused; integrity failures halt the agent.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::types::ErrorClass;

use super::control::RuntimeControl;
use super::pipeline::process_thought;
use super::{EngineContext, EngineError, RuntimeState};

/// Idle poll interval when the queue is empty.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Drives processing rounds until shutdown.
pub struct Scheduler {
    ctx: Arc<EngineContext>,
    control: Arc<RuntimeControl>,
    round: u32,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("round", &self.round)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a scheduler over a wired context and control plane.
    #[must_use]
    pub fn new(ctx: Arc<EngineContext>, control: Arc<RuntimeControl>) -> Self {
        Self {
            ctx,
            control,
            round: 0,
        }
    }

    /// Rounds completed so far.
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.round
    }

    /// Run until the control plane moves to ShuttingDown or Halted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] only when the store or audit chain is
    /// unusable; per-thought failures are committed as dispositions and
    /// the loop continues.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let mut state_rx = self.control.state_receiver();

        loop {
            let state = *state_rx.borrow();
            match state {
                RuntimeState::ShuttingDown | RuntimeState::Halted => break,
                RuntimeState::Paused => {
                    let control = Arc::clone(&self.control);
                    let step = tokio::select! {
                        _ = state_rx.changed() => false,
                        () = control.step_requested() => true,
                    };
                    if step {
                        self.process_one().await?;
                    }
                }
                RuntimeState::Running => {
                    let processed = self.process_one().await?;
                    if !processed {
                        tokio::select! {
                            _ = state_rx.changed() => {}
                            () = tokio::time::sleep(IDLE_WAIT) => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Process at most one thought. Returns whether one ran.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for infrastructure failures.
    pub async fn process_one(&mut self) -> Result<bool, EngineError> {
        let mut queue = self.ctx.store.round_queue(1).await?;
        let Some(thought) = queue.pop() else {
            return Ok(false);
        };

        self.round += 1;
        let cancel = self.control.cancel_receiver();
        match process_thought(&self.ctx, thought, self.round, cancel).await {
            Ok(report) => {
                tracing::debug!(
                    thought_id = %report.thought_id,
                    disposition = %report.disposition,
                    action = report.action.as_deref().unwrap_or("-"),
                    round = self.round,
                    "round complete"
                );
                Ok(true)
            }
            Err(err) if err.class() == ErrorClass::Integrity => {
                self.control.halt_for_integrity(&err.to_string()).await;
                Err(err)
            }
            Err(err) if err.class() == ErrorClass::Invariant => {
                // Crash the pipeline task for this thought, keep the agent.
                tracing::error!(error = %err, "invariant violation in pipeline");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}
