//! Error types for the version store and data model.

use thiserror::Error;

use crate::types::{ModelId, TimePointId, VersionId};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur reading or writing forecast versions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// A store lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,

    /// Invalid data read back from storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Catalog is internally inconsistent.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A referenced catalog object does not exist.
    #[error("unknown reference: {0}")]
    UnknownReference(String),

    /// Version not found.
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),

    /// Another version of the same pair already claims this instant.
    #[error("a version of model {model_id} / time-point {time_point_id} is already issued at {issued_at}")]
    DuplicateIssuedAt {
        model_id: ModelId,
        time_point_id: TimePointId,
        issued_at: String,
    },

    /// New version would be positioned before an existing one.
    #[error("version issued at {issued_at} is not newer than existing version issued at {latest}")]
    OutOfOrder { issued_at: String, latest: String },

    /// A newer version of the same pair exists.
    #[error("cannot delete version {0}: a newer version of the same model and time-point exists")]
    NewerVersionExists(VersionId),

    /// Data was loaded into a version that already has data.
    #[error("cannot load data into non-empty version {0}")]
    VersionNotEmpty(VersionId),

    /// Load contained no predictions.
    #[error("cannot load empty data")]
    EmptyData,

    /// Every incoming element matches its cell's current state.
    #[error("cannot load 100% duplicate data")]
    DuplicateData,

    /// Load omits cells present in older versions.
    #[error("new data is a subset of previous versions; missing cells must be retracted explicitly: {0}")]
    ImplicitRetraction(String),

    /// A scan was stopped by its cancellation token.
    #[error("scan interrupted")]
    Interrupted,

    /// A prediction failed structural validation.
    #[error("invalid prediction: {0}")]
    InvalidPrediction(String),
}
