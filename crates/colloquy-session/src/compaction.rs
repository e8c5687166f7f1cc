//! Deterministic history compression.
//!
//! A greedy, order-preserving, lossy compressor: one bullet per message,
//! first sentence only, bounded to a character budget. Not abstractive
//! summarization; identical input always yields identical output.

use colloquy_core::message::ChatMessage;
use colloquy_core::session::collapse_whitespace;

/// Marker distinguishing machine-written summaries from user-edited ones.
pub const AUTO_SUMMARY_PREFIX: &str = "[auto-summary]";

/// Returned when there is no history to compress.
pub const EMPTY_HISTORY_SUMMARY: &str = "Nothing to summarize yet.";

/// Default character budget for a standalone summary.
pub const DEFAULT_SUMMARY_TARGET: usize = 260;

const MIN_SUMMARY_CHARS: usize = 200;
const MAX_SUMMARY_CHARS: usize = 320;
const BULLET_MAX_CHARS: usize = 140;
const MIN_BULLETS: usize = 3;
const MAX_BULLETS: usize = 6;
const CHARS_PER_BULLET: usize = 70;
const ELLIPSIS: char = '…';

/// True when `content` was produced by the summarizer rather than a person.
pub fn is_auto_summary(content: &str) -> bool {
    content.trim_start().starts_with(AUTO_SUMMARY_PREFIX)
}

/// Compress an ordered message list into bounded text.
///
/// The first sentence of each message becomes a bullet until the bullet
/// budget is spent; the joined text is then cut to a clamped character
/// budget. Never errors; empty or malformed content degrades to
/// deterministic fallback text.
pub fn summarize(messages: &[ChatMessage], target_chars: usize) -> String {
    if messages.is_empty() {
        return EMPTY_HISTORY_SUMMARY.to_string();
    }

    let max_bullets = target_chars
        .div_ceil(CHARS_PER_BULLET)
        .clamp(MIN_BULLETS, MAX_BULLETS);

    let mut bullets = Vec::new();
    for message in messages {
        if bullets.len() >= max_bullets {
            break;
        }
        if let Some(sentence) = first_sentence(&message.content) {
            bullets.push(format!("- {}", truncate_to(&sentence, BULLET_MAX_CHARS)));
        }
    }

    let text = if bullets.is_empty() {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        bullets.join("\n")
    };

    let budget = target_chars.clamp(MIN_SUMMARY_CHARS, MAX_SUMMARY_CHARS);
    let mut out = truncate_to(&text, budget);
    if out.chars().count() >= target_chars && !out.ends_with(ELLIPSIS) {
        // The marker stays inside the budget so output never exceeds it.
        out = truncate_to(&out, budget.saturating_sub(1));
        out.push(ELLIPSIS);
    }
    out
}

/// First non-empty sentence of `content`, whitespace-collapsed.
fn first_sentence(content: &str) -> Option<String> {
    content
        .split(['.', '!', '?', '\n'])
        .map(collapse_whitespace)
        .find(|s| !s.is_empty())
}

/// Truncate to a character budget without splitting a code point.
fn truncate_to(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
