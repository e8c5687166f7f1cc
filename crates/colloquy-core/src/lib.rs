//! # colloquy-core
//!
//! Core types for Colloquy - the conversation store and context-window
//! compaction engine.
//!
//! This crate provides:
//! - Message and session primitives
//! - Display metadata derivation (titles, previews)
//! - Configuration system

pub mod config;
pub mod message;
pub mod session;

pub use config::{BackendMode, Config, ConfigError, ContextConfig, StorageConfig};
pub use message::{ChatMessage, Role};
pub use session::{
    ChatSession, ChatSessionDetail, MetadataPatch, DEFAULT_SESSION_TITLE,
};
