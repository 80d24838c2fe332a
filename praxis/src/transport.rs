//! The transport adapter contract.
//!
//! Transports (chat, HTTP, CLI) deliver stimuli into the engine as tasks
//! and carry outbound messages to their channels. The core only ever calls
//! the three methods below; everything protocol-specific stays in the
//! adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::message::InboundMessage;
use crate::types::ErrorClass;

/// Errors from a transport adapter.
#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    /// The transport is temporarily unreachable (timeouts, 5xx).
    #[error("transport unavailable: {message}")]
    #[diagnostic(code(praxis::transport::unavailable))]
    Unavailable {
        /// Adapter-reported detail.
        message: String,
    },

    /// The transport rejected the request (bad channel, permissions).
    #[error("transport rejected request: {message}")]
    #[diagnostic(code(praxis::transport::rejected))]
    Rejected {
        /// Adapter-reported detail.
        message: String,
    },
}

impl TransportError {
    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Unavailable { .. } => ErrorClass::TransientExternal,
            Self::Rejected { .. } => ErrorClass::Validation,
        }
    }
}

/// Contract every transport adapter implements.
///
/// Adapters are additionally responsible for delivering inbound messages as
/// tasks through the runtime's task-submission surface; the engine never
/// polls for input.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Deliver `content` to `channel_id`. Returns whether the transport
    /// accepted the message.
    async fn send_message(&self, channel_id: &str, content: &str) -> Result<bool, TransportError>;

    /// Fetch up to `limit` recent messages from `channel_id`, optionally
    /// only those before `before`.
    async fn fetch_messages(
        &self,
        channel_id: &str,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// The adapter's home channel, when it has one.
    fn home_channel_id(&self) -> Option<String>;
}
