//! Message primitives: LLM chat messages and inbound transport messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message in an LLM conversation, containing a role and text content.
///
/// Chat messages are the payload of every structured LLM call made by the
/// DMAs, the action selector, and the guardrail faculties.
///
/// # Examples
///
/// ```
/// use praxis::message::ChatMessage;
///
/// let system = ChatMessage::system("You are an evaluation faculty.");
/// let user = ChatMessage::user("Evaluate: say hello.");
/// assert!(system.has_role(ChatMessage::SYSTEM));
/// assert!(!user.has_role(ChatMessage::ASSISTANT));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender (e.g., "user", "assistant", "system").
    ///
    /// Use the constants on [`ChatMessage`] for standardized values.
    pub role: String,
    /// The text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    /// Creates a user message with the specified content.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message with the specified content.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message with the specified content.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// An inbound message delivered by a transport adapter.
///
/// Adapters turn these into tasks; the engine only ever sees the filtered
/// form (secrets already replaced by references).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-scoped message identifier.
    pub message_id: String,
    /// Channel the message arrived on.
    pub channel_id: String,
    /// Author identity as reported by the transport.
    pub author_id: String,
    /// Raw message text.
    pub content: String,
    /// Transport timestamp.
    pub timestamp: DateTime<Utc>,
    /// Whether the message arrived via a direct-message channel.
    pub is_dm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("yo").role, "assistant");
        assert_eq!(ChatMessage::system("be good").role, "system");
    }

    #[test]
    fn chat_message_serde_round_trip() {
        let msg = ChatMessage::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, parsed);
    }
}
