//! As-of queries over versioned forecast data.
//!
//! A query flows through four stages:
//!
//! 1. [`validate_forecast_query`] checks a JSON specification and resolves
//!    names to catalog ids
//! 2. the resolver picks the authoritative element of every matching cell as
//!    of the query's cutoff
//! 3. [`plan_cells`] decides which cells are emitted as stored and which are
//!    derived by a declared conversion rule
//! 4. [`RowProjector`] streams fixed-width rows, reading one payload at a
//!    time and enforcing the row cap as it goes
//!
//! [`QueryEngine`] wires the stages together; [`QueryJobRunner`] runs them
//! in the background under a time budget.

mod config;
mod convert;
mod engine;
mod error;
mod job;
mod projector;
mod resolver;
mod sink;
mod validator;

pub use config::{DEFAULT_MAX_ROWS, DEFAULT_TIMEOUT, QueryConfig};
pub use convert::{
    CellPlan, ConversionRule, ConvertFn, RULES, find_rule, mean, median, plan_cells,
    quantile_linear,
};
pub use engine::{QueryEngine, QueryKind, SnapshotCell, write_rows};
pub use error::{QueryError, Result, ValidationError};
pub use job::{DEFAULT_RETAINED_JOBS, JobId, JobStatus, QueryJobRunner, STOP_GRACE};
pub use projector::{ROW_HEADER, Row, RowProjector, RowShape, TRUTH_HEADER, forecast_rows, truth_rows};
pub use resolver::{ResolveOptions, ResolvedCell, resolve, resolve_records};
pub use sink::{CsvSink, JsonLinesSink, RowSink, SinkError, VecSink};
pub use validator::{
    ConversionOptions, ForecastQuery, PointReduction, TruthQuery, parse_as_of,
    validate_forecast_query, validate_truth_query,
};

pub use tokio_util::sync::CancellationToken;
