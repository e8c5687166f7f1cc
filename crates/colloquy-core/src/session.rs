//! Session metadata and display derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ChatMessage, Role};

/// Title used when nothing can be derived from the conversation.
pub const DEFAULT_SESSION_TITLE: &str = "New conversation";

/// Character budget for derived titles.
pub const AUTO_TITLE_MAX_CHARS: usize = 48;

/// Character budget for message previews.
pub const PREVIEW_MAX_CHARS: usize = 160;

/// Marker appended when derived display text is cut.
pub const TRUNCATION_MARKER: char = '…';

/// Session metadata for indexing and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Unique session ID
    pub id: String,
    /// User-supplied title, `None` unless explicitly set
    pub title: Option<String>,
    /// Derived title, never empty
    pub auto_title: String,
    /// Derived preview of the latest visible message
    pub last_message_preview: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last write timestamp, never before `created_at`
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Create a new empty session. A non-blank title seeds both the title
    /// and the derived title.
    pub fn new(title: Option<&str>) -> Self {
        let now = Utc::now();
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let auto_title = title
            .as_deref()
            .map(|t| truncate_chars(&collapse_whitespace(t), AUTO_TITLE_MAX_CHARS))
            .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            auto_title,
            last_message_preview: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Session metadata together with its full ordered message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSessionDetail {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

/// Metadata fields rewritten on every message-list replacement.
#[derive(Debug, Clone)]
pub struct MetadataPatch {
    pub auto_title: String,
    pub last_message_preview: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl MetadataPatch {
    /// Derive the patch for a message list about to replace a session's
    /// history. `previous_updated_at` keeps the logical clock monotonic.
    pub fn derive(messages: &[ChatMessage], previous_updated_at: DateTime<Utc>) -> Self {
        Self {
            auto_title: derive_auto_title(messages),
            last_message_preview: derive_preview(messages),
            updated_at: Utc::now().max(previous_updated_at),
        }
    }
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to `max_chars` characters, appending the marker when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push(TRUNCATION_MARKER);
    out
}

/// The latest message whose content may drive display metadata. System
/// messages are skipped; summary messages only bound cost and are never
/// shown as a preview.
fn latest_visible_content(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| collapse_whitespace(&m.content))
        .find(|c| !c.is_empty())
}

/// Derive the display title from the latest user or assistant message.
pub fn derive_auto_title(messages: &[ChatMessage]) -> String {
    latest_visible_content(messages)
        .map(|c| truncate_chars(&c, AUTO_TITLE_MAX_CHARS))
        .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string())
}

/// Derive the list preview from the latest user or assistant message.
pub fn derive_preview(messages: &[ChatMessage]) -> Option<String> {
    latest_visible_content(messages).map(|c| truncate_chars(&c, PREVIEW_MAX_CHARS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_with_blank_title_uses_default() {
        let session = ChatSession::new(Some("   "));
        assert_eq!(session.title, None);
        assert_eq!(session.auto_title, DEFAULT_SESSION_TITLE);
        assert_eq!(session.last_message_preview, None);
        assert!(session.updated_at >= session.created_at);
    }

    #[test]
    fn new_session_title_seeds_auto_title() {
        let session = ChatSession::new(Some("Quarterly  budget\nreview"));
        assert_eq!(session.title.as_deref(), Some("Quarterly  budget\nreview"));
        assert_eq!(session.auto_title, "Quarterly budget review");
    }

    #[test]
    fn truncation_appends_marker_only_when_cut() {
        assert_eq!(truncate_chars("short", 48), "short");
        let long = "x".repeat(60);
        let cut = truncate_chars(&long, 48);
        assert_eq!(cut.chars().count(), 49);
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn auto_title_skips_system_and_summary_messages() {
        let messages = vec![
            ChatMessage::user("What is the capital of Peru?"),
            ChatMessage::summary("earlier talk about geography"),
            ChatMessage::system("be concise"),
        ];
        assert_eq!(derive_auto_title(&messages), "What is the capital of Peru?");
        assert_eq!(
            derive_preview(&messages).as_deref(),
            Some("What is the capital of Peru?")
        );
    }

    #[test]
    fn auto_title_falls_back_when_only_system_messages() {
        let messages = vec![
            ChatMessage::system("be concise"),
            ChatMessage::system("answer in French"),
        ];
        assert_eq!(derive_auto_title(&messages), DEFAULT_SESSION_TITLE);
        assert_eq!(derive_preview(&messages), None);
    }

    #[test]
    fn empty_content_candidates_are_skipped() {
        let messages = vec![
            ChatMessage::user("an actual question"),
            ChatMessage::assistant("  \n\t"),
        ];
        assert_eq!(derive_auto_title(&messages), "an actual question");
    }

    #[test]
    fn patch_clock_never_runs_backwards() {
        let messages = vec![ChatMessage::user("tick")];
        let future = Utc::now() + chrono::Duration::hours(1);
        let patch = MetadataPatch::derive(&messages, future);
        assert_eq!(patch.updated_at, future);
    }
}
