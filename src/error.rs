//! Error types for knowledge-pack assembly.
//!
//! [`LoadError`] is what a single store load returns; only
//! [`LoadError::NotFound`] is recoverable. [`KnowledgePackError`] is what
//! escapes the orchestrator.

use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::LoadPhase;

/// Failure loading one partition into a store.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The source directory does not exist. Degradable.
    #[error("source not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("source is not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid frontmatter in {}: {message}", .path.display())]
    Frontmatter { path: PathBuf, message: String },

    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    #[error("index database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl LoadError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classify an I/O error on `path`, keeping "does not exist" degradable.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Io { path, source }
        }
    }
}

/// Errors that abort knowledge-pack initialization.
#[derive(Debug, Error)]
pub enum KnowledgePackError {
    /// The pack root does not exist.
    #[error("knowledge pack not found at {}", .path.display())]
    PackNotFound { path: PathBuf },

    #[error("invalid knowledge pack manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    #[error("invalid context {name:?}: {reason}")]
    InvalidContext { name: String, reason: String },

    /// The embedding model or its client could not be set up.
    #[error("embedding configuration error: {0:#}")]
    Configuration(#[source] anyhow::Error),

    /// A load failed for a reason other than a missing source.
    #[error("{phase} load failed{}: {source}", context_suffix(.context.as_deref()))]
    Load {
        phase: LoadPhase,
        context: Option<String>,
        #[source]
        source: LoadError,
    },
}

fn context_suffix(context: Option<&str>) -> String {
    context
        .map(|name| format!(" for context {name:?}"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, KnowledgePackError>;
