//! Error types for the build core.
//!
//! Toolchain exits and timeouts are not errors here: they are classified
//! outcomes (see [`crate::toolchain::ExitKind`]) recorded per unit. Everything
//! in this enum either aborts before a subprocess runs (configuration) or
//! reports filesystem trouble that survived its retry budget.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepError>;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Unknown board '{0}' (not present in the [board] catalog)")]
    UnknownTarget(String),

    #[error("Example '{name}' not found at '{}'", path.display())]
    UnitNotFound { name: String, path: PathBuf },

    #[error("Example '{unit}' has no .ino sketch in '{}'", dir.display())]
    MissingEntry { unit: String, dir: PathBuf },

    #[error("Example '{unit}' has several candidate sketches: {}", candidates.join(", "))]
    AmbiguousEntry {
        unit: String,
        candidates: Vec<String>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {} after {attempts} attempts: {source}", path.display())]
    RemoveFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build cache error in {}: {message}", path.display())]
    Cache { path: PathBuf, message: String },
}

impl SweepError {
    /// Wrap an I/O error with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn cache(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Cache {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Configuration errors abort the run before any subprocess is started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownTarget(_)
                | Self::UnitNotFound { .. }
                | Self::MissingEntry { .. }
                | Self::AmbiguousEntry { .. }
                | Self::Config(_)
        )
    }
}
