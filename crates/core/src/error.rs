//! Error taxonomy shared by the collector and the ingestion service

use thiserror::Error;

/// A client-supplied value was rejected. Storage is never touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("payload must be a JSON array")]
    NotAnArray,

    #[error("field '{field}' must be a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("item {index}: {reason}")]
    BatchItem {
        index: usize,
        reason: Box<ValidationError>,
    },

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("{param} must be ISO datetime")]
    InvalidTimestamp { param: &'static str },

    #[error("{param} must be a non-negative integer")]
    InvalidLimit { param: &'static str },
}

impl ValidationError {
    pub fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_string(),
            expected,
        }
    }
}

/// Failure inside the event store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored row is corrupt: {0}")]
    Corrupt(String),

    #[error("store connection poisoned")]
    Poisoned,
}
