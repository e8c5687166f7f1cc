//! Configuration system for Colloquy.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("configuration validation failed:\n  {0}")]
    Invalid(String),
}

/// Main configuration struct for Colloquy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend settings
    pub storage: StorageConfig,
    /// Context window settings
    pub context: ContextConfig,
}

/// Which storage backend to open at startup. The choice is made once and is
/// immutable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Probe SQLite, fall back to in-memory
    Auto,
    /// Embedded SQLite database
    Sqlite,
    /// In-process map, lost on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: BackendMode,
    /// Database file path; defaults to the platform data directory
    pub db_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendMode::Auto,
            db_path: None,
        }
    }
}

/// Tunables for context window preparation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Estimated token count above which compaction kicks in
    pub compaction_trigger_tokens: u32,
    /// Number of trailing messages always carried verbatim
    pub preserve_recent_messages: usize,
    /// Character budget for the synthesized history summary
    pub summary_target_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compaction_trigger_tokens: 1800,
            preserve_recent_messages: 8,
            summary_target_chars: 280,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "context.preserve_recent_messages")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        let config_dir = Self::config_dir();

        Figment::new()
            // Default values
            .merge(figment::providers::Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(config_dir.join("config.toml")))
            // Project config
            .merge(Toml::file(".colloquy/config.toml"))
            // Environment variables
            .merge(Env::prefixed("COLLOQUY_").split("_"))
            .extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, ConfigError> {
        let config = Self::load()?;
        let result = config.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(ConfigError::Invalid(errors.join("\n  ")));
        }

        for warning in result.warnings() {
            tracing::warn!("config warning - {}: {}", warning.field, warning.message);
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.context.compaction_trigger_tokens == 0 {
            result.add_error(
                "context.compaction_trigger_tokens",
                "must be greater than 0",
            );
        }

        if self.context.preserve_recent_messages == 0 {
            result.add_error("context.preserve_recent_messages", "must be greater than 0");
        }

        if self.context.summary_target_chars < 200 || self.context.summary_target_chars > 320 {
            result.add_warning(
                "context.summary_target_chars",
                "outside 200-320, the summarizer will clamp it",
            );
        }

        if self.storage.backend == BackendMode::Memory && self.storage.db_path.is_some() {
            result.add_warning("storage.db_path", "ignored when backend is 'memory'");
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("colloquy"))
            .unwrap_or_else(|| PathBuf::from("~/.config/colloquy"))
    }

    /// Get the data directory (for the session database).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("colloquy"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/colloquy"))
    }
}
