//! Runtime: engine context, the per-thought pipeline, the cooperative
//! scheduler, and the control plane.
//!
//! - [`context`] – service wiring and lifecycle (no globals; everything is
//!   threaded through [`context::EngineContext`])
//! - [`pipeline`] – one thought through secrets → DMAs → selection →
//!   guardrails → dispatch → audit
//! - [`scheduler`] – processing rounds, one thought in flight at a time
//! - [`control`] – pause/resume/single-step/queue-status/shutdown and the
//!   signed emergency stop

pub mod context;
pub mod control;
pub mod pipeline;
pub mod scheduler;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adaptation::AdaptationError;
use crate::audit::AuditError;
use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::dma::DmaError;
use crate::handlers::HandlerError;
use crate::llm::LlmError;
use crate::memory::MemoryError;
use crate::store::StoreError;
use crate::types::ErrorClass;

pub use context::EngineContext;
pub use control::RuntimeControl;
pub use pipeline::{PipelineReport, process_thought};
pub use scheduler::Scheduler;

// ============================================================================
// Runtime state
// ============================================================================

/// Coarse runtime state driven by the control plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    /// Processing rounds advance.
    Running,
    /// Rounds are suspended; `single_step` still works.
    Paused,
    /// Graceful shutdown in progress.
    ShuttingDown,
    /// Emergency-stopped; only manual intervention restarts the agent.
    Halted,
}

// ============================================================================
// Errors
// ============================================================================

/// Top-level engine error, classified per the error taxonomy.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// Configuration failure at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Thought store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Audit chain failure.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Graph memory failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// DMA construction or fan-out failure.
    #[error(transparent)]
    Dma(#[from] DmaError),

    /// LLM provider failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Handler dispatch failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Authorization failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Adaptation controller failure.
    #[error(transparent)]
    Adaptation(#[from] AdaptationError),

    /// Secrets pipeline failure.
    #[error("secrets pipeline error: {0}")]
    #[diagnostic(code(praxis::runtime::secrets))]
    Secrets(#[from] px_aegis::ServiceError),

    /// A task or thought referenced by the pipeline is missing.
    #[error("{what} not found: {id}")]
    #[diagnostic(code(praxis::runtime::missing))]
    Missing {
        /// Entity kind.
        what: &'static str,
        /// Entity id.
        id: String,
    },
}

impl EngineError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Validation,
            Self::Store(err) => err.class(),
            Self::Audit(err) => err.class(),
            Self::Memory(err) => err.class(),
            Self::Dma(err) => err.class(),
            Self::Llm(err) => err.class(),
            Self::Handler(err) => err.class(),
            Self::Auth(err) => err.class(),
            Self::Adaptation(err) => err.class(),
            Self::Secrets(_) => ErrorClass::TransientExternal,
            Self::Missing { .. } => ErrorClass::Validation,
        }
    }

    /// Sanitized message for user-visible surfaces: no secret references,
    /// paths, or backtraces. Operators get full detail from the audit log.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self.class() {
            ErrorClass::Authorization => "forbidden",
            ErrorClass::Validation => "request could not be processed",
            ErrorClass::TransientExternal | ErrorClass::Capacity => {
                "temporarily unavailable, please retry"
            }
            ErrorClass::Integrity | ErrorClass::Invariant => "internal error",
        }
    }
}
