//! Core types for the praxis governance engine.
//!
//! This module defines the fundamental status machines and classification
//! enums used throughout the system: task and thought lifecycles, graph
//! memory scopes, and the error taxonomy that drives propagation policy.
//!
//! # Status machines
//!
//! ```text
//! Task:    pending ──► active ──► { completed | failed | deferred }
//!
//! Thought: pending ──► processing ──► { completed | failed | deferred }
//!                        │   ▲
//!                        └───┘  (ponder re-queue, below the ponder cap)
//! ```
//!
//! Terminal states admit no further transitions; attempts are
//! [`IllegalTransition`](crate::store::StoreError::IllegalTransition)
//! failures of the Invariant class.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Task status
// ============================================================================

/// Lifecycle status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, not yet picked up by the scheduler.
    Pending,
    /// Currently the source of in-flight thoughts.
    Active,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished unsuccessfully. Terminal.
    Failed,
    /// Escalated to a Wise Authority. Terminal.
    Deferred,
}

impl TaskStatus {
    /// True for statuses that admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deferred)
    }

    /// Whether the machine admits `self -> next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Active),
            Self::Active => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Deferred => false,
        }
    }

    /// Stable text form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "deferred" => Ok(Self::Deferred),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

// ============================================================================
// Thought status
// ============================================================================

/// Lifecycle status of a thought.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtStatus {
    /// Queued for a processing round.
    Pending,
    /// In the pipeline right now.
    Processing,
    /// Finished with a terminal action. Terminal.
    Completed,
    /// Failed validation or evaluation. Terminal.
    Failed,
    /// Escalated to a Wise Authority. Terminal.
    Deferred,
}

impl ThoughtStatus {
    /// True for statuses that admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deferred)
    }

    /// Whether the machine admits `self -> next`.
    ///
    /// `Processing -> Pending` is the ponder re-queue edge; its ponder-cap
    /// precondition is enforced by the store, not here.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing),
            Self::Processing => matches!(next, Self::Pending) || next.is_terminal(),
            Self::Completed | Self::Failed | Self::Deferred => false,
        }
    }

    /// Stable text form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for ThoughtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThoughtStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "deferred" => Ok(Self::Deferred),
            other => Err(format!("unknown thought status: {other}")),
        }
    }
}

// ============================================================================
// Thought kind
// ============================================================================

/// How a thought came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
    /// First thought derived from a task.
    Seed,
    /// Re-queued by a Ponder action with accumulated questions.
    Ponder,
    /// Spawned by a handler to continue work.
    FollowUp,
    /// Derived from an Observe result.
    Observation,
}

impl ThoughtKind {
    /// Stable text form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Ponder => "ponder",
            Self::FollowUp => "follow_up",
            Self::Observation => "observation",
        }
    }
}

impl fmt::Display for ThoughtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThoughtKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Self::Seed),
            "ponder" => Ok(Self::Ponder),
            "follow_up" => Ok(Self::FollowUp),
            "observation" => Ok(Self::Observation),
            other => Err(format!("unknown thought kind: {other}")),
        }
    }
}

// ============================================================================
// Graph scope
// ============================================================================

/// Namespace for graph memory nodes and edges. Edges require both
/// endpoints in the same scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GraphScope {
    /// Agent-local working memory.
    Local,
    /// Observations about the surrounding environment.
    Environment,
    /// The agent's identity: baseline configuration, self-knowledge.
    Identity,
    /// Shared community knowledge.
    Community,
}

impl GraphScope {
    /// Stable text form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Environment => "ENVIRONMENT",
            Self::Identity => "IDENTITY",
            Self::Community => "COMMUNITY",
        }
    }
}

impl fmt::Display for GraphScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GraphScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCAL" => Ok(Self::Local),
            "ENVIRONMENT" => Ok(Self::Environment),
            "IDENTITY" => Ok(Self::Identity),
            "COMMUNITY" => Ok(Self::Community),
            other => Err(format!("unknown graph scope: {other}")),
        }
    }
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Propagation class of an error. Each class carries a distinct policy:
///
/// | Class             | Policy                                          |
/// |-------------------|-------------------------------------------------|
/// | Validation        | fail the thought, audit, no retry               |
/// | TransientExternal | bounded retry with jitter; then Defer           |
/// | Integrity         | fatal: halt new processing                      |
/// | Capacity          | back-pressure: re-queue at tail                 |
/// | Authorization     | reject; reveal nothing beyond "forbidden"       |
/// | Invariant         | crash the pipeline task; do not corrupt state   |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed input; deterministic failure.
    Validation,
    /// External dependency hiccup worth retrying.
    TransientExternal,
    /// Corruption of a trust artifact (audit chain, key material).
    Integrity,
    /// A budget or queue limit was hit.
    Capacity,
    /// Missing scope or invalid credential.
    Authorization,
    /// An internal state machine was about to be violated.
    Invariant,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validation => "validation",
            Self::TransientExternal => "transient_external",
            Self::Integrity => "integrity",
            Self::Capacity => "capacity",
            Self::Authorization => "authorization",
            Self::Invariant => "invariant",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_machine_edges() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Active));
        assert!(TaskStatus::Active.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Active.can_transition_to(TaskStatus::Deferred));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Active));
    }

    #[test]
    fn thought_machine_admits_ponder_requeue() {
        assert!(ThoughtStatus::Processing.can_transition_to(ThoughtStatus::Pending));
        assert!(!ThoughtStatus::Pending.can_transition_to(ThoughtStatus::Completed));
        assert!(!ThoughtStatus::Deferred.can_transition_to(ThoughtStatus::Pending));
    }

    #[test]
    fn terminal_states_are_closed() {
        for status in [
            ThoughtStatus::Completed,
            ThoughtStatus::Failed,
            ThoughtStatus::Deferred,
        ] {
            for next in [
                ThoughtStatus::Pending,
                ThoughtStatus::Processing,
                ThoughtStatus::Completed,
                ThoughtStatus::Failed,
                ThoughtStatus::Deferred,
            ] {
                assert!(!status.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Deferred,
        ] {
            let parsed: TaskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        for scope in [
            GraphScope::Local,
            GraphScope::Environment,
            GraphScope::Identity,
            GraphScope::Community,
        ] {
            let parsed: GraphScope = scope.as_str().parse().unwrap();
            assert_eq!(parsed, scope);
        }
    }
}
