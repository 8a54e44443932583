//! Versioned forecast data model and append-only version store.
//!
//! A forecast hub stores successive *versions* of each model's forecast for
//! each time-point. This crate owns the records involved:
//!
//! - [`Catalog`] resolves project objects (models, units, targets,
//!   time-points) and their human-readable names
//! - [`ForecastVersion`] and [`PredictionElement`] are the immutable records
//!   a version is made of
//! - [`PredictionPayload`] is the numeric content of a non-retracted element
//! - [`VersionStore`] is the storage seam, with in-memory and SQLite
//!   implementations
//!
//! Stores are append-only: versions are created, loaded once, and deleted
//! only as a whole. Query-side logic lives in the `forecast-query` crate.

mod catalog;
mod error;
mod prediction;
mod rules;
pub mod store;
mod types;
mod validation;
mod version;

pub use catalog::{Catalog, Model, Target, TargetType, TimePoint, Unit, DATE_FORMAT};
pub use error::{Result, StoreError};
pub use prediction::{NamedFamily, PredictionKind, PredictionPayload, Scalar, format_float};
pub use rules::LoadSummary;
pub use store::{ElementFilter, ElementRecord, MemoryVersionStore, SqliteVersionStore, VersionStore};
pub use types::{ElementId, ModelId, TargetId, TimePointId, UnitId, VersionId};
pub use validation::{validate_payload, validate_quantile_levels};
pub use version::{CellKey, ForecastVersion, NewPrediction, NewVersion, PredictionElement};
