//! Error types for gridstore

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Integrity check failed for file {id}: store reported {reported}, computed {computed}")]
    Integrity {
        id: String,
        reported: String,
        computed: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Coarse classification of a [`GridError`], used by callers that branch on
/// the failure class rather than the concrete cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input, detected before or independent of the store.
    Argument,
    /// Safe-mode hash mismatch; the chunk set has been purged.
    Integrity,
    /// Anything the backing store reported.
    BackingStore,
    /// A referenced record or chunk does not exist.
    NotFound,
}

impl GridError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridError::Argument(_) | GridError::Io(_) => ErrorKind::Argument,
            GridError::Integrity { .. } => ErrorKind::Integrity,
            GridError::NotFound(_) => ErrorKind::NotFound,
            GridError::Database(_)
            | GridError::Store(_)
            | GridError::Serialization(_)
            | GridError::Other(_) => ErrorKind::BackingStore,
        }
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        GridError::Argument(msg.into())
    }

    pub(crate) fn store(msg: impl Into<String>) -> Self {
        GridError::Store(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
