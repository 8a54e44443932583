//! Error types for query validation and execution.

use forecast_core::StoreError;
use thiserror::Error;

use crate::sink::SinkError;

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;

/// A single problem found while validating a query specification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Specification is not a mapping, has unknown keys, or a value has
    /// the wrong type.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// A name did not resolve to a catalog object.
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// `as_of` is not an absolute, zone-qualified instant.
    #[error("bad timestamp: {0}")]
    BadTimestamp(String),

    /// A conversion option has the wrong shape.
    #[error("bad option: {0}")]
    BadOption(String),
}

/// Errors that can occur running a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query specification was rejected. Nothing was executed.
    #[error("invalid query: {}", join_messages(.errors))]
    Invalid { errors: Vec<ValidationError> },

    /// The result exceeded a configured cap. Output already written is
    /// incomplete and must be discarded.
    #[error("result too large: {count} exceeds maximum of {max}")]
    ResultTooLarge { count: usize, max: usize },

    /// The caller asked the query to stop.
    #[error("query cancelled")]
    Cancelled,

    /// Underlying store failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Output sink failed.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl QueryError {
    /// Validation errors, if this is a rejected query.
    pub fn validation_errors(&self) -> &[ValidationError] {
        match self {
            Self::Invalid { errors } => errors,
            _ => &[],
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Interrupted => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
