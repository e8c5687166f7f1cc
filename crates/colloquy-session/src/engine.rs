//! Conversation orchestration.
//!
//! The engine owns the read-modify-replace cycles against the session store:
//! appending user input, deciding whether the history must be compacted,
//! invoking the downstream responder, and persisting its reply.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use colloquy_core::{
    config::ContextConfig,
    message::{ChatMessage, Role},
    session::MetadataPatch,
};

use crate::compaction::{self, is_auto_summary, AUTO_SUMMARY_PREFIX, DEFAULT_SUMMARY_TARGET};
use crate::context::{self, ContextStrategy};
use crate::store::{SessionStore, StoreError};

/// Errors surfaced by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The downstream responder failed. The user message appended before the
    /// call stays persisted; the utterance is still valid history.
    #[error("Responder error: {0}")]
    Responder(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Downstream generation call. Treated as a black box that may fail.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce the assistant's reply for a bounded context.
    async fn respond(&self, context: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Telemetry collaborator. The signature is infallible: whatever an
/// implementation does internally cannot affect the conversation result.
pub trait Telemetry: Send + Sync {
    fn record(&self, event: &str, payload: serde_json::Value);
}

/// Telemetry sink that drops everything.
#[derive(Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: &str, _payload: serde_json::Value) {}
}

/// Telemetry sink that forwards events to tracing.
#[derive(Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &str, payload: serde_json::Value) {
        tracing::debug!(event, %payload, "telemetry");
    }
}

/// Orchestrates conversations over a session store.
pub struct ChatEngine {
    store: Arc<dyn SessionStore>,
    config: ContextConfig,
    telemetry: Arc<dyn Telemetry>,
    /// Serializes read-modify-replace cycles per session id. Raw store calls
    /// from other handles still race last-write-wins.
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatEngine {
    /// Create an engine with default context settings.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(store, ContextConfig::default())
    }

    /// Create an engine with custom context settings.
    pub fn with_config(store: Arc<dyn SessionStore>, config: ContextConfig) -> Self {
        Self {
            store,
            config,
            telemetry: Arc::new(NoopTelemetry),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The underlying session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn write_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap();
        locks.entry(session_id.to_string()).or_default().clone()
    }

    /// Append `message` to the session's history and persist the rewritten
    /// list. Returns the full list after the append.
    async fn append_message(
        &self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<Vec<ChatMessage>> {
        let detail = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let mut messages = detail.messages;
        messages.push(message);

        let patch = MetadataPatch::derive(&messages, detail.session.updated_at);
        self.store
            .replace_messages(session_id, &messages, patch)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        Ok(messages)
    }

    /// Drive one conversational turn.
    ///
    /// Blank input is rejected silently (`Ok(None)`, nothing persisted). The
    /// user message is persisted before the responder runs and is not rolled
    /// back on responder failure.
    pub async fn generate_reply(
        &self,
        session_id: &str,
        user_text: &str,
        responder: &dyn Responder,
    ) -> Result<Option<String>> {
        if user_text.trim().is_empty() {
            return Ok(None);
        }

        let lock = self.write_lock(session_id);
        let _guard = lock.lock().await;

        self.append_message(session_id, ChatMessage::user(user_text))
            .await?;

        let detail = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let prepared = context::prepare_context(&detail.messages, &self.config);
        if prepared.strategy == ContextStrategy::Compacted {
            tracing::info!(
                session_id,
                estimated_tokens = prepared.estimated_tokens,
                context_messages = prepared.messages.len(),
                "compacted history for downstream call"
            );
        }
        self.telemetry.record(
            "context.prepared",
            json!({
                "session_id": session_id,
                "strategy": prepared.strategy.as_str(),
                "estimated_tokens": prepared.estimated_tokens,
                "context_messages": prepared.messages.len(),
            }),
        );

        let reply = responder
            .respond(&prepared.messages)
            .await
            .map_err(EngineError::Responder)?;

        self.append_message(session_id, ChatMessage::assistant(reply.clone()))
            .await?;

        Ok(Some(reply))
    }

    /// Force a refresh of the persisted whole-history summary.
    ///
    /// Machine-written summaries (marked with [`AUTO_SUMMARY_PREFIX`]) are
    /// overwritten freely. A summary a person has edited is preserved and
    /// returned as-is unless `force` is set.
    pub async fn summarize_to_date(&self, session_id: &str, force: bool) -> Result<String> {
        let lock = self.write_lock(session_id);
        let _guard = lock.lock().await;

        let detail = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        let existing = detail
            .messages
            .iter()
            .position(|m| m.role == Role::Summary);

        if let Some(index) = existing {
            let current = &detail.messages[index];
            if !is_auto_summary(&current.content) && !force {
                tracing::debug!(session_id, "keeping manually edited summary");
                return Ok(current.content.clone());
            }
        }

        // Summary messages are excluded from the source so a refresh never
        // feeds on its own output.
        let source: Vec<ChatMessage> = detail
            .messages
            .iter()
            .filter(|m| m.role != Role::Summary)
            .cloned()
            .collect();
        let summary_text = format!(
            "{AUTO_SUMMARY_PREFIX} {}",
            compaction::summarize(&source, DEFAULT_SUMMARY_TARGET)
        );

        let mut messages = detail.messages;
        match existing {
            Some(index) => messages[index] = ChatMessage::summary(summary_text.clone()),
            None => messages.insert(0, ChatMessage::summary(summary_text.clone())),
        }

        let patch = MetadataPatch::derive(&messages, detail.session.updated_at);
        self.store
            .replace_messages(session_id, &messages, patch)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;

        self.telemetry.record(
            "summary.upserted",
            json!({
                "session_id": session_id,
                "forced": force,
                "source_messages": source.len(),
            }),
        );

        Ok(summary_text)
    }
}
