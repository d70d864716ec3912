//! Error types for mediagate
//!
//! All modules use `MediagateResult<T>` as their return type. Capability
//! failures raised by assessment stages live in [`crate::stage::CapabilityError`]
//! and never escape a single asset's pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mediagate operations
pub type MediagateResult<T> = Result<T, MediagateError>;

/// All errors that can occur in mediagate
#[derive(Error, Debug)]
pub enum MediagateError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid stage configuration for '{stage}': {reason}")]
    StageConfig { stage: String, reason: String },

    #[error("No assessment stages configured")]
    NoStages,

    #[error("Invalid budget: {0}")]
    BudgetConfig(String),

    // Cache errors
    #[error("Cache entry not found: {0}")]
    CacheEntryNotFound(String),

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Failed to write cache entry {hash}: {reason}")]
    CacheWrite { hash: String, reason: String },

    // Budget ledger errors
    #[error("Budget ledger at {path} is unreadable: {reason}")]
    LedgerCorrupt { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl MediagateError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a stage configuration error
    pub fn stage_config(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageConfig {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::CacheWrite { .. })
    }

    /// Check if error is a startup configuration error
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::StageConfig { .. }
                | Self::NoStages
                | Self::BudgetConfig(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoStages => Some("Add at least one [[stages]] table, or run: mediagate config init"),
            Self::BudgetConfig(_) => {
                Some("Every [budget] ceiling must be a positive amount in the same currency unit")
            }
            Self::StageConfig { .. } => Some("Check the [[stages]] list with: mediagate config show"),
            Self::LedgerCorrupt { .. } => Some("Inspect or remove budget.json in the state directory"),
            _ => None,
        }
    }
}
