use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::{DenseIndexError, EmbeddingError, LexicalIndexError};
use crate::retrieval::SearchError;
use crate::storage::SnapshotError;

/// Main error type for Conflux
#[derive(Error, Debug)]
pub enum ConfluxError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// An index or the search engine was used before it finished loading
    #[error("{component} is not initialized")]
    NotInitialized { component: String },

    /// The embedding provider could not process the input
    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    /// On-disk index structure is unreadable
    #[error("Index corruption in {index}: {message}")]
    IndexCorruption { index: String, message: String },

    /// Malformed request, rejected before any index is touched
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// One or both indexes failed to absorb a write
    #[error("Partial index write: succeeded {succeeded:?}, failed {failed:?}")]
    PartialIndexWrite {
        succeeded: Vec<IndexKind>,
        failed: Vec<(IndexKind, String)>,
    },

    /// Both retrieval paths failed for a query
    #[error("All retrieval paths failed: dense: {dense}; lexical: {lexical}")]
    AllPathsFailed { dense: String, lexical: String },

    /// Index operation failures that are not corruption
    #[error("Index error: {0}")]
    Index(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool and other storage failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The two retrieval indexes kept in sync by index maintenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Dense,
    Lexical,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Dense => write!(f, "dense"),
            IndexKind::Lexical => write!(f, "lexical"),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<EmbeddingError> for ConfluxError {
    fn from(err: EmbeddingError) -> Self {
        ConfluxError::EmbeddingFailure(err.to_string())
    }
}

impl From<DenseIndexError> for ConfluxError {
    fn from(err: DenseIndexError) -> Self {
        match err {
            DenseIndexError::NotInitialized => ConfluxError::NotInitialized {
                component: "dense index".to_string(),
            },
            DenseIndexError::Corrupted(message) => ConfluxError::IndexCorruption {
                index: "dense".to_string(),
                message,
            },
            DenseIndexError::Embedding(e) => ConfluxError::EmbeddingFailure(e.to_string()),
            other => ConfluxError::Index(other.to_string()),
        }
    }
}

impl From<LexicalIndexError> for ConfluxError {
    fn from(err: LexicalIndexError) -> Self {
        match err {
            LexicalIndexError::Corrupted(message) => ConfluxError::IndexCorruption {
                index: "lexical".to_string(),
                message,
            },
            other => ConfluxError::Index(other.to_string()),
        }
    }
}

impl From<SnapshotError> for ConfluxError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Corrupted { name, reason } => ConfluxError::IndexCorruption {
                index: name,
                message: reason,
            },
            SnapshotError::Io { source, context } => ConfluxError::Io { source, context },
        }
    }
}

impl From<SearchError> for ConfluxError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(message) => ConfluxError::InvalidRequest(message),
            SearchError::UnknownChunk(chunk_id) => {
                ConfluxError::InvalidRequest(format!("Unknown chunk: {}", chunk_id))
            }
            SearchError::NotInitialized(component) => ConfluxError::NotInitialized { component },
            SearchError::AllPathsFailed { dense, lexical } => {
                ConfluxError::AllPathsFailed { dense, lexical }
            }
            SearchError::Dense(e) => e.into(),
            SearchError::Store(message) => ConfluxError::Storage(message),
        }
    }
}

/// Result type for Conflux operations
pub type Result<T> = std::result::Result<T, ConfluxError>;
