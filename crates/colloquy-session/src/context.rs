//! Context window preparation.
//!
//! Estimates token cost for message lists and decides whether a conversation
//! fits the downstream call directly or must go out compacted behind a
//! synthetic summary.

use serde::{Deserialize, Serialize};

pub use colloquy_core::config::ContextConfig;
use colloquy_core::message::ChatMessage;

use crate::compaction::{self, AUTO_SUMMARY_PREFIX};

/// Words-to-tokens inflation factor of the estimator.
const TOKENS_PER_WORD: f64 = 1.3;

/// Estimate the token cost of a single message.
///
/// A crude proxy for a real tokenizer: whitespace-delimited words times 1.3,
/// rounded up. Determinism across languages matters more than exactness.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let words = message.content.split_whitespace().count();
    (words as f64 * TOKENS_PER_WORD).ceil() as u32
}

/// Estimate the token cost of a message list.
pub fn estimate_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

/// How the context for a downstream call was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// The full history fit under the trigger.
    Direct,
    /// Older history was folded into a synthetic summary message.
    Compacted,
}

impl ContextStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextStrategy::Direct => "direct",
            ContextStrategy::Compacted => "compacted",
        }
    }
}

/// Bounded context ready for the downstream responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedContext {
    pub strategy: ContextStrategy,
    pub messages: Vec<ChatMessage>,
    /// Estimate for the full history the decision was based on.
    pub estimated_tokens: u32,
}

/// Assemble the bounded context for a conversation.
///
/// Histories at or under the trigger go through unchanged. Anything larger
/// is split: everything but the trailing `preserve_recent_messages` is
/// compressed into one synthetic system message, followed by the recent tail
/// verbatim.
pub fn prepare_context(messages: &[ChatMessage], config: &ContextConfig) -> PreparedContext {
    let estimated_tokens = estimate_tokens(messages);

    if estimated_tokens <= config.compaction_trigger_tokens {
        return PreparedContext {
            strategy: ContextStrategy::Direct,
            messages: messages.to_vec(),
            estimated_tokens,
        };
    }

    let split = messages
        .len()
        .saturating_sub(config.preserve_recent_messages);
    let (historical, recent) = messages.split_at(split);

    let summary = compaction::summarize(historical, config.summary_target_chars);
    let synthetic = ChatMessage::system(format!("{AUTO_SUMMARY_PREFIX} {summary}"));

    let mut context = Vec::with_capacity(recent.len() + 1);
    context.push(synthetic);
    context.extend_from_slice(recent);

    PreparedContext {
        strategy: ContextStrategy::Compacted,
        messages: context,
        estimated_tokens,
    }
}
