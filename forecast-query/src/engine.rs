//! Query engine: validation, resolution, conversion and projection wired
//! together over one store and catalog.

use std::sync::Arc;

use forecast_core::{
    Catalog, ElementFilter, PredictionKind, PredictionPayload, StoreError, VersionId,
    VersionStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::QueryConfig;
use crate::convert::{CellPlan, plan_cells};
use crate::error::{QueryError, Result};
use crate::projector::{RowProjector, RowShape};
use crate::resolver::{ResolveOptions, ResolvedCell, resolve};
use crate::sink::RowSink;
use crate::validator::{ForecastQuery, TruthQuery, validate_forecast_query, validate_truth_query};

/// Which query a specification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Forecasts,
    Truth,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forecasts => "forecasts",
            Self::Truth => "truth",
        }
    }
}

/// One cell of a version snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCell {
    pub cell: ResolvedCell,
    /// `None` for retractions.
    pub payload: Option<PredictionPayload>,
}

/// Runs read-only queries against a version store.
pub struct QueryEngine {
    store: Arc<dyn VersionStore>,
    catalog: Arc<Catalog>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn VersionStore>, catalog: Arc<Catalog>) -> Self {
        Self {
            store,
            catalog,
            config: QueryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &dyn VersionStore {
        self.store.as_ref()
    }

    /// Resolve and plan the cells of a validated forecast query without
    /// reading any payload.
    #[instrument(name = "engine::plan_forecasts", skip_all, fields(as_of = ?query.as_of))]
    pub fn plan_forecasts(
        &self,
        query: &ForecastQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<CellPlan>> {
        if query.model_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut filter = ElementFilter::new()
            .with_models(query.model_ids.iter().copied())
            .with_units(query.unit_ids.iter().copied())
            .with_targets(query.target_ids.iter().copied())
            .with_time_points(query.time_point_ids.iter().copied());
        // conversion sources may be kinds the caller did not ask for
        if query.options.is_empty() {
            filter = filter.with_kinds(query.kinds.iter().copied());
        }

        let options = ResolveOptions::new(self.config.max_cells).with_cutoff(query.as_of);
        let cells = resolve(self.store.as_ref(), &filter, &options, cancel)?;
        checkpoint(cancel)?;
        let plans = plan_cells(&cells, &self.catalog, &query.kinds, &query.options);
        debug!(
            cells = cells.len(),
            plans = plans.len(),
            converted = plans.iter().filter(|p| p.is_converted()).count(),
            "Planned forecast query"
        );
        Ok(plans)
    }

    /// Rows of a validated forecast query. With a `cancel` token every
    /// stage, row production included, stops once it fires.
    pub fn query_forecasts(
        &self,
        query: &ForecastQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<RowProjector<'_>> {
        let plans = self.plan_forecasts(query, cancel)?;
        checkpoint(cancel)?;
        Ok(self
            .projector(RowShape::Forecast, plans, cancel)
            .with_conversion(query.options.clone()))
    }

    /// Rows of a validated truth query: the oracle model's point values.
    #[instrument(name = "engine::query_truth", skip_all, fields(as_of = ?query.as_of))]
    pub fn query_truth(
        &self,
        query: &TruthQuery,
        cancel: Option<&CancellationToken>,
    ) -> Result<RowProjector<'_>> {
        let Some(oracle) = self.catalog.oracle_model() else {
            debug!("No oracle model, truth query is empty");
            return Ok(self.projector(RowShape::Truth, Vec::new(), cancel));
        };

        let filter = ElementFilter::new()
            .with_models([oracle.id])
            .with_units(query.unit_ids.iter().copied())
            .with_targets(query.target_ids.iter().copied())
            .with_time_points(query.time_point_ids.iter().copied())
            .with_kinds([PredictionKind::Point]);
        let options = ResolveOptions::new(self.config.max_cells).with_cutoff(query.as_of);
        let plans = resolve(self.store.as_ref(), &filter, &options, cancel)?
            .into_iter()
            .map(CellPlan::Native)
            .collect();
        checkpoint(cancel)?;
        Ok(self.projector(RowShape::Truth, plans, cancel))
    }

    /// Validate `spec`, run it, and write every row to `sink`.
    pub fn query_to_sink(&self, spec: &Value, sink: &mut dyn RowSink) -> Result<usize> {
        self.run(QueryKind::Forecasts, spec, sink, None)
    }

    /// Validate a truth `spec`, run it, and write every row to `sink`.
    pub fn truth_to_sink(&self, spec: &Value, sink: &mut dyn RowSink) -> Result<usize> {
        self.run(QueryKind::Truth, spec, sink, None)
    }

    /// Validate and run a query of either kind, stopping early if `cancel`
    /// fires. Returns the number of rows written.
    #[instrument(name = "engine::run", skip_all, fields(kind = kind.as_str()))]
    pub fn run(
        &self,
        kind: QueryKind,
        spec: &Value,
        sink: &mut dyn RowSink,
        cancel: Option<CancellationToken>,
    ) -> Result<usize> {
        let cancel = cancel.as_ref();
        let rows = match kind {
            QueryKind::Forecasts => {
                let query = validate_forecast_query(&self.catalog, spec)?;
                checkpoint(cancel)?;
                self.query_forecasts(&query, cancel)?
            }
            QueryKind::Truth => {
                let query = validate_truth_query(&self.catalog, spec)?;
                checkpoint(cancel)?;
                self.query_truth(&query, cancel)?
            }
        };
        let count = write_rows(rows, sink)?;
        info!(rows = count, "Query complete");
        Ok(count)
    }

    /// Full state of a version's (model, time-point) as of the version's
    /// `issued_at`, merging older versions. With `include_retracted`, cells
    /// whose latest element is a retraction are listed without a payload.
    pub fn version_snapshot(
        &self,
        version_id: VersionId,
        include_retracted: bool,
    ) -> Result<Vec<SnapshotCell>> {
        let version = self
            .store
            .version(version_id)?
            .ok_or(StoreError::VersionNotFound(version_id))?;
        let filter = ElementFilter::new()
            .with_models([version.model_id])
            .with_time_points([version.time_point_id]);
        let options = ResolveOptions::new(self.config.max_cells)
            .with_cutoff(Some(version.issued_at))
            .with_retracted(include_retracted);

        resolve(self.store.as_ref(), &filter, &options, None)?
            .into_iter()
            .map(|cell| -> Result<SnapshotCell> {
                let payload = if cell.is_retracted {
                    None
                } else {
                    self.store.payload(cell.element_id)?
                };
                Ok(SnapshotCell { cell, payload })
            })
            .collect()
    }

    fn projector(
        &self,
        shape: RowShape,
        plans: Vec<CellPlan>,
        cancel: Option<&CancellationToken>,
    ) -> RowProjector<'_> {
        let rows = RowProjector::new(
            self.store.as_ref(),
            &self.catalog,
            shape,
            plans,
            self.config.max_rows,
        );
        match cancel {
            Some(token) => rows.with_cancellation(token.clone()),
            None => rows,
        }
    }
}

/// Fail with [`QueryError::Cancelled`] between stages once `cancel` fires.
fn checkpoint(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(QueryError::Cancelled),
        _ => Ok(()),
    }
}

/// Write the projector's header and rows to `sink`, returning the row count.
///
/// On error the sink holds partial output, which the caller must discard.
pub fn write_rows(rows: RowProjector<'_>, sink: &mut dyn RowSink) -> Result<usize> {
    sink.write_header(rows.header())?;
    let mut count = 0;
    for row in rows {
        sink.write_row(&row?)?;
        count += 1;
    }
    sink.finish()?;
    Ok(count)
}
