//! Message and conversation primitives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message (instructions or synthetic context)
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Condensed stand-in for compacted history
    Summary,
}

impl Role {
    /// Stable string form used by storage backends.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Summary => "summary",
        }
    }

    /// Parse the storage string form. Unknown values fall back to `User`.
    pub fn parse(s: &str) -> Role {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            "summary" => Role::Summary,
            _ => Role::User,
        }
    }
}

/// A single message in a conversation.
///
/// Position within a session is implicit: messages live in an ordered list
/// that is rewritten in full on every replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: Role,
    /// Message text, never null
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message with the given role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new summary message.
    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(Role::Summary, content)
    }
}
