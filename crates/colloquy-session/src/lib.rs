//! # colloquy-session
//!
//! Session persistence and context-window compaction for Colloquy.
//!
//! This crate provides:
//! - Two interchangeable storage backends (SQLite and in-memory) behind one
//!   repository contract
//! - Deterministic token estimation and heuristic history summarization
//! - A chat engine that appends turns, compacts oversized histories, and
//!   feeds a bounded context to a pluggable responder
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use colloquy_core::Config;
//! use colloquy_session::{open_backend, ChatEngine};
//!
//! let config = Config::load_validated()?;
//! let store = open_backend(&config.storage)?;
//! store.initialize().await?;
//!
//! let engine = ChatEngine::with_config(store, config.context);
//! let session = engine.store().create_session(None).await?;
//! let reply = engine.generate_reply(&session.id, "hello", &responder).await?;
//! ```
//!
//! ## Storage architecture
//!
//! SQLite keeps two tables: `chat_sessions` for metadata and `chat_messages`
//! ordered by an explicit `message_index` column. A message-list replacement
//! is a single transaction: delete, ordered re-insert, metadata update. The
//! in-memory backend answers identically from a process-local map and is the
//! automatic fallback where no writable data directory exists.
//!
//! ## Context management
//!
//! [`context::prepare_context`] estimates token cost and, past the trigger,
//! folds everything but the most recent messages into one synthetic summary
//! produced by the deterministic compressor in [`compaction`]. The
//! [`engine::ChatEngine`] wires the two into the per-turn store cycle.

pub mod compaction;
pub mod context;
pub mod engine;
pub mod store;

// Re-export commonly used types
pub use compaction::{
    is_auto_summary, summarize, AUTO_SUMMARY_PREFIX, DEFAULT_SUMMARY_TARGET,
    EMPTY_HISTORY_SUMMARY,
};
pub use context::{
    estimate_message_tokens, estimate_tokens, prepare_context, ContextConfig, ContextStrategy,
    PreparedContext,
};
pub use engine::{
    ChatEngine, EngineError, NoopTelemetry, Responder, Telemetry, TracingTelemetry,
};
pub use store::{
    default_db_path, open_backend, MemorySessionStore, SessionStore, SqliteSessionStore,
    StoreError,
};
