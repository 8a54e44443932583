//! Row projection: planned cells to flat, fixed-width rows.
//!
//! [`RowProjector`] is a single forward pass. Cell plans are held in memory,
//! payloads are read from the store one cell at a time, and the row cap is
//! checked as each row is produced.

use std::collections::VecDeque;
use std::vec;

use forecast_core::{Catalog, CellKey, PredictionPayload, VersionStore, format_float};
use tokio_util::sync::CancellationToken;

use crate::convert::CellPlan;
use crate::error::{QueryError, Result};
use crate::validator::ConversionOptions;

/// Column order of forecast rows.
pub const ROW_HEADER: [&str; 15] = [
    "model",
    "time_point",
    "group_label",
    "unit",
    "target",
    "kind",
    "value",
    "category",
    "probability",
    "sample",
    "quantile_level",
    "family",
    "param1",
    "param2",
    "param3",
];

/// Column order of truth rows.
pub const TRUTH_HEADER: [&str; 4] = ["time_point", "unit", "target", "value"];

/// One output row. Unused columns are empty strings.
pub type Row = Vec<String>;

/// Which row layout a projector emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Forecast,
    Truth,
}

impl RowShape {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            Self::Forecast => &ROW_HEADER,
            Self::Truth => &TRUTH_HEADER,
        }
    }
}

// forecast row column indexes
const VALUE: usize = 6;
const CATEGORY: usize = 7;
const PROBABILITY: usize = 8;
const SAMPLE: usize = 9;
const QUANTILE_LEVEL: usize = 10;
const FAMILY: usize = 11;
const PARAM1: usize = 12;

/// Lazily expands cell plans into rows.
pub struct RowProjector<'a> {
    store: &'a dyn VersionStore,
    catalog: &'a Catalog,
    shape: RowShape,
    options: ConversionOptions,
    plans: vec::IntoIter<CellPlan>,
    pending: VecDeque<Row>,
    emitted: usize,
    max_rows: usize,
    cancel: Option<CancellationToken>,
    done: bool,
}

impl<'a> RowProjector<'a> {
    pub fn new(
        store: &'a dyn VersionStore,
        catalog: &'a Catalog,
        shape: RowShape,
        plans: Vec<CellPlan>,
        max_rows: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            shape,
            options: ConversionOptions::default(),
            plans: plans.into_iter(),
            pending: VecDeque::new(),
            emitted: 0,
            max_rows,
            cancel: None,
            done: false,
        }
    }

    /// Options passed to conversion rules of converted plans.
    #[must_use]
    pub fn with_conversion(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop with [`QueryError::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn header(&self) -> &'static [&'static str] {
        self.shape.header()
    }

    /// Rows produced so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Expand plans until at least one row is pending. Returns false once
    /// plans are exhausted.
    fn fill(&mut self) -> Result<bool> {
        while let Some(plan) = self.plans.next() {
            let payload = match &plan {
                CellPlan::Native(cell) => self.store.payload(cell.element_id)?,
                CellPlan::Converted { source, rule, .. } => self
                    .store
                    .payload(source.element_id)?
                    .and_then(|p| (rule.convert)(&p, &self.options)),
            };
            let Some(payload) = payload else {
                continue;
            };
            let rows = match self.shape {
                RowShape::Forecast => forecast_rows(self.catalog, &plan.key(), &payload),
                RowShape::Truth => truth_rows(self.catalog, &plan.key(), &payload),
            };
            if !rows.is_empty() {
                self.pending.extend(rows);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn fail(&mut self, err: QueryError) -> Option<Result<Row>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for RowProjector<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancelled() {
            return self.fail(QueryError::Cancelled);
        }

        if self.pending.is_empty() {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => return self.fail(e),
            }
            // a payload read can outlast the budget
            if self.cancelled() {
                return self.fail(QueryError::Cancelled);
            }
        }

        let row = self.pending.pop_front()?;
        self.emitted += 1;
        if self.emitted > self.max_rows {
            return self.fail(QueryError::ResultTooLarge {
                count: self.emitted,
                max: self.max_rows,
            });
        }
        Some(Ok(row))
    }
}

/// Rows for one forecast cell. Bin, sample and quantile payloads expand to
/// one row per entry; every other kind to a single row.
pub fn forecast_rows(catalog: &Catalog, key: &CellKey, payload: &PredictionPayload) -> Vec<Row> {
    let base = forecast_base(catalog, key);
    let row_with = |cells: &[(usize, String)]| {
        let mut row = base.clone();
        for (idx, value) in cells {
            row[*idx] = value.clone();
        }
        row
    };

    match payload {
        PredictionPayload::Bin { cat, prob } => cat
            .iter()
            .zip(prob)
            .map(|(c, p)| row_with(&[(CATEGORY, c.to_string()), (PROBABILITY, format_float(*p))]))
            .collect(),
        PredictionPayload::Named {
            family,
            param1,
            param2,
            param3,
        } => {
            let mut cells = vec![(FAMILY, family.as_str().to_string())];
            for (offset, param) in [param1, param2, param3].into_iter().enumerate() {
                if let Some(p) = param {
                    cells.push((PARAM1 + offset, format_float(*p)));
                }
            }
            vec![row_with(&cells)]
        }
        PredictionPayload::Point { value }
        | PredictionPayload::Mean { value }
        | PredictionPayload::Median { value }
        | PredictionPayload::Mode { value } => vec![row_with(&[(VALUE, value.to_string())])],
        PredictionPayload::Sample { sample } => sample
            .iter()
            .map(|s| row_with(&[(SAMPLE, s.to_string())]))
            .collect(),
        PredictionPayload::Quantile { quantile, value } => quantile
            .iter()
            .zip(value)
            .map(|(q, v)| row_with(&[(QUANTILE_LEVEL, format_float(*q)), (VALUE, v.to_string())]))
            .collect(),
    }
}

fn forecast_base(catalog: &Catalog, key: &CellKey) -> Row {
    let mut row = vec![String::new(); ROW_HEADER.len()];
    row[0] = catalog
        .model(key.model_id)
        .map(|m| m.display_name().to_string())
        .unwrap_or_default();
    row[1] = catalog
        .time_point(key.time_point_id)
        .map(|tp| tp.date_str())
        .unwrap_or_default();
    row[2] = catalog
        .season_label(key.time_point_id)
        .unwrap_or_default()
        .to_string();
    row[3] = unit_name(catalog, key);
    row[4] = target_name(catalog, key);
    row[5] = key.kind.to_string();
    row
}

/// Truth rows come only from point payloads.
pub fn truth_rows(catalog: &Catalog, key: &CellKey, payload: &PredictionPayload) -> Vec<Row> {
    let PredictionPayload::Point { value } = payload else {
        return Vec::new();
    };
    vec![vec![
        catalog
            .time_point(key.time_point_id)
            .map(|tp| tp.date_str())
            .unwrap_or_default(),
        unit_name(catalog, key),
        target_name(catalog, key),
        value.to_string(),
    ]]
}

fn unit_name(catalog: &Catalog, key: &CellKey) -> String {
    catalog
        .unit(key.unit_id)
        .map(|u| u.abbreviation.clone())
        .unwrap_or_default()
}

fn target_name(catalog: &Catalog, key: &CellKey) -> String {
    catalog
        .target(key.target_id)
        .map(|t| t.name.clone())
        .unwrap_or_default()
}
