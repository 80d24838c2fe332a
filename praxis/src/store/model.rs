//! Persistent models for the task/thought queue.
//!
//! Tasks are units of work attributable to a channel; thoughts are the
//! reasoning steps derived from them. Both carry typed context records —
//! free-form maps only survive in the explicit `extra` field.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{TaskStatus, ThoughtKind, ThoughtStatus};

// ============================================================================
// Context records
// ============================================================================

/// Safe summary of a secret reference carried in context. Never contains
/// plaintext.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRefSummary {
    /// Secret identifier.
    pub uuid: String,
    /// Human-readable description from the detection pattern.
    pub description: String,
    /// Sensitivity level text.
    pub sensitivity: String,
}

/// Structured context attached to a task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Author of the originating stimulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Transport message that created the task, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_message_id: Option<String>,
    /// References to secrets detected in the originating content.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_references: Vec<SecretRefSummary>,
    /// Additional adapter- or handler-specific values.
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub extra: FxHashMap<String, Value>,
}

/// Structured context attached to a thought.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThoughtContext {
    /// Channel the work is associated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Author of the originating stimulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// References to secrets present in the content as tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_references: Vec<SecretRefSummary>,
    /// Additional pipeline-specific values.
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub extra: FxHashMap<String, Value>,
}

// ============================================================================
// Task
// ============================================================================

/// Signature triple attached to externally submitted tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSignature {
    /// WA id of the signer.
    pub signed_by: String,
    /// Base64 Ed25519 signature over the task description.
    pub signature: String,
    /// When the signature was produced.
    pub signed_at: DateTime<Utc>,
}

/// A unit of work attributable to a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Opaque identifier.
    pub task_id: String,
    /// Channel the task belongs to.
    pub channel_id: String,
    /// Human description of the work.
    pub description: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Scheduling priority; higher first.
    pub priority: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Optional parent task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    /// Structured context.
    #[serde(default)]
    pub context: TaskContext,
    /// Outcome payload recorded at terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    /// Optional signature triple.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<TaskSignature>,
}

impl Task {
    /// Create a pending task.
    #[must_use]
    pub fn new(channel_id: &str, description: &str, priority: i32, context: TaskContext) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            parent_task_id: None,
            context,
            outcome: None,
            signature: None,
        }
    }
}

// ============================================================================
// Thought
// ============================================================================

/// A reasoning step derived from a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Opaque identifier.
    pub thought_id: String,
    /// Task this thought works on.
    pub source_task_id: String,
    /// Parent thought, when spawned as a follow-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thought_id: Option<String>,
    /// How the thought came to exist.
    pub kind: ThoughtKind,
    /// Lifecycle status.
    pub status: ThoughtStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Processing round the thought last entered the pipeline on.
    pub round_number: u32,
    /// Depth along the parent chain; capped.
    pub depth: u32,
    /// The content being reasoned about (secrets already filtered).
    pub content: String,
    /// Structured context.
    #[serde(default)]
    pub context: ThoughtContext,
    /// Ponder re-queues so far; capped.
    pub ponder_count: u32,
    /// Key questions accumulated across Ponder re-queues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ponder_notes: Option<Vec<String>>,
    /// Final action record, set at terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_action: Option<Value>,
}

impl Thought {
    /// Create the seed thought for a task.
    #[must_use]
    pub fn seed(task: &Task, content: &str) -> Self {
        let now = Utc::now();
        Self {
            thought_id: Uuid::new_v4().to_string(),
            source_task_id: task.task_id.clone(),
            parent_thought_id: None,
            kind: ThoughtKind::Seed,
            status: ThoughtStatus::Pending,
            created_at: now,
            updated_at: now,
            round_number: 0,
            depth: 0,
            content: content.to_string(),
            context: ThoughtContext {
                channel_id: Some(task.channel_id.clone()),
                author_id: task.context.author_id.clone(),
                secret_references: task.context.secret_references.clone(),
                extra: FxHashMap::default(),
            },
            ponder_count: 0,
            ponder_notes: None,
            final_action: None,
        }
    }

    /// Create a follow-up thought one level deeper than its parent.
    #[must_use]
    pub fn follow_up(parent: &Thought, content: &str) -> Self {
        let now = Utc::now();
        Self {
            thought_id: Uuid::new_v4().to_string(),
            source_task_id: parent.source_task_id.clone(),
            parent_thought_id: Some(parent.thought_id.clone()),
            kind: ThoughtKind::FollowUp,
            status: ThoughtStatus::Pending,
            created_at: now,
            updated_at: now,
            round_number: 0,
            depth: parent.depth + 1,
            content: content.to_string(),
            context: parent.context.clone(),
            ponder_count: 0,
            ponder_notes: None,
            final_action: None,
        }
    }
}

// ============================================================================
// Queue status
// ============================================================================

/// Snapshot of queue counts for the control plane and context builders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tasks in `pending`.
    pub pending_tasks: u64,
    /// Thoughts in `pending`.
    pub pending_thoughts: u64,
    /// Thoughts in `processing`.
    pub processing_thoughts: u64,
    /// All tasks, any status.
    pub total_tasks: u64,
    /// All thoughts, any status.
    pub total_thoughts: u64,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_thought_inherits_task_channel() {
        let task = Task::new("chan-1", "greet the user", 1, TaskContext::default());
        let thought = Thought::seed(&task, "Say hello.");
        assert_eq!(thought.source_task_id, task.task_id);
        assert_eq!(thought.context.channel_id.as_deref(), Some("chan-1"));
        assert_eq!(thought.depth, 0);
        assert_eq!(thought.kind, ThoughtKind::Seed);
    }

    #[test]
    fn follow_up_increments_depth() {
        let task = Task::new("chan-1", "investigate", 0, TaskContext::default());
        let seed = Thought::seed(&task, "look into it");
        let follow = Thought::follow_up(&seed, "dig deeper");
        assert_eq!(follow.depth, 1);
        assert_eq!(follow.parent_thought_id.as_deref(), Some(seed.thought_id.as_str()));
    }

    #[test]
    fn task_serde_round_trip() {
        let task = Task::new("chan-9", "round trip", 3, TaskContext::default());
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, task);
    }
}
