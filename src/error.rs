//! Error kinds shared across the engine.
//!
//! Callers match on [`EngramError`] variants — circuit-open, duplicate, and
//! not-found conditions are ordinary results here, never panics. The CLI maps
//! each kind to a process exit code via [`EngramError::exit_code`].

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the engine core.
pub type Result<T> = std::result::Result<T, EngramError>;

#[derive(Debug, Error)]
pub enum EngramError {
    /// Caller-side validation failure; surfaced immediately.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A memory id (or backing file) that does not exist.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// A concurrent writer held the per-id lock past the retry.
    #[error("conflicting edit on memory {0}")]
    ConflictingEdit(String),

    /// The named circuit breaker rejected the call without invoking it.
    #[error("circuit breaker '{name}' is open ({failures} consecutive failures)")]
    CircuitOpen { name: String, failures: u32 },

    /// A sidecar database or external dependency is unreachable.
    #[error("dependency failed: {0}")]
    DependencyFailed(String),

    /// Unparsable frontmatter; the file has been quarantined.
    #[error("corrupt memory file {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frontmatter error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngramError {
    /// Process exit code for the CLI: 0 success, 1 usage, 2 not-found,
    /// 3 invalid state, 4 downstream dependency failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput(_) => 1,
            Self::NotFound(_) => 2,
            Self::ConflictingEdit(_) | Self::Corruption { .. } => 3,
            Self::CircuitOpen { .. } | Self::DependencyFailed(_) => 4,
            Self::Database(_) | Self::Io(_) | Self::Yaml(_) | Self::Json(_) | Self::Other(_) => 1,
        }
    }
}
