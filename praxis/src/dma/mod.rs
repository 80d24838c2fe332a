//! Decision-Making Algorithms: the three first-stage evaluators.
//!
//! Every thought is assessed by three concurrent structured LLM calls —
//! ethical, common-sense, and domain-specific — whose results form a
//! [`DmaTriple`] consumed by the action selector. The triple is a *set*:
//! no inter-DMA ordering is guaranteed or assumed.
//!
//! The domain-specific DMA is a closed union of known kinds selected by
//! the agent profile through a registration table (see [`domain`]).

pub mod common_sense;
pub mod domain;
pub mod ethical;
pub mod runner;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::LlmError;
use crate::store::model::{Task, Thought};
use crate::types::ErrorClass;

pub use common_sense::{CommonSenseAssessment, CommonSenseDma};
pub use domain::{DomainAssessment, DomainDma, build_domain_dma, registered_domain_kinds};
pub use ethical::{ConflictSeverity, EthicalAssessment, EthicalConflict, EthicalDma};
pub use runner::DmaRunner;

// ============================================================================
// Input
// ============================================================================

/// Everything a DMA may look at when evaluating one thought.
#[derive(Clone, Debug)]
pub struct DmaInput {
    /// The thought under evaluation (content already secret-filtered).
    pub thought: Thought,
    /// The task the thought works on.
    pub task: Task,
    /// Agent display name from the profile.
    pub agent_name: String,
    /// Per-DMA system-prompt overrides from the profile, keyed by DMA name.
    pub prompt_overrides: FxHashMap<String, String>,
}

impl DmaInput {
    /// The override for `dma_name`, when the profile carries one.
    #[must_use]
    pub fn prompt_override(&self, dma_name: &str) -> Option<&str> {
        self.prompt_overrides.get(dma_name).map(String::as_str)
    }
}

// ============================================================================
// Triple
// ============================================================================

/// Aggregated results of the three first-stage evaluations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DmaTriple {
    /// Ethical alignment assessment.
    pub ethical: EthicalAssessment,
    /// Common-sense plausibility assessment.
    pub common_sense: CommonSenseAssessment,
    /// Domain fitness assessment.
    pub domain: DomainAssessment,
}

// ============================================================================
// Errors
// ============================================================================

/// A single DMA's failure after bounded retries.
#[derive(Debug, Error, Diagnostic)]
#[error("{dma} DMA failed: {source}")]
#[diagnostic(code(praxis::dma::failed))]
pub struct DmaFailure {
    /// Which DMA failed (`"ethical"`, `"common_sense"`, `"domain"`).
    pub dma: &'static str,
    /// Underlying provider error.
    #[source]
    pub source: LlmError,
}

/// Errors from DMA construction and fan-out.
#[derive(Debug, Error, Diagnostic)]
pub enum DmaError {
    /// The profile named a domain DMA kind that is not registered.
    #[error("unknown domain DMA kind '{kind}'")]
    #[diagnostic(
        code(praxis::dma::unknown_kind),
        help("Registered kinds: community, support, research.")
    )]
    UnknownKind {
        /// The unregistered kind name.
        kind: String,
    },

    /// One or more DMAs failed after bounded retries; the thought fails
    /// with the collected errors.
    #[error("{} DMA evaluation(s) failed", failures.len())]
    #[diagnostic(code(praxis::dma::evaluation))]
    Evaluation {
        /// Per-DMA failures.
        #[related]
        failures: Vec<DmaFailure>,
    },

    /// The fan-out was cancelled before completion.
    #[error("DMA evaluation cancelled")]
    #[diagnostic(code(praxis::dma::cancelled))]
    Cancelled,
}

impl DmaError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownKind { .. } => ErrorClass::Validation,
            Self::Evaluation { .. } | Self::Cancelled => ErrorClass::TransientExternal,
        }
    }
}
