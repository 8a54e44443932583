//! Conversion between prediction kinds.
//!
//! Conversions are declared in [`RULES`], a closed table of
//! (destination, source) pairs. A requested kind that a cell did not submit
//! is derived only when the target is numeric, the caller opted in to that
//! destination, and a source kind from the table is present. Otherwise the
//! cell simply has nothing to offer for that kind.

use forecast_core::{Catalog, CellKey, PredictionKind, PredictionPayload, Scalar};

use crate::resolver::ResolvedCell;
use crate::validator::{ConversionOptions, PointReduction};

/// Derives a destination payload from a source payload.
pub type ConvertFn = fn(&PredictionPayload, &ConversionOptions) -> Option<PredictionPayload>;

/// One declared conversion.
#[derive(Debug, Clone, Copy)]
pub struct ConversionRule {
    pub destination: PredictionKind,
    pub source: PredictionKind,
    pub convert: ConvertFn,
}

/// Every supported conversion, in order of preference per destination.
pub const RULES: &[ConversionRule] = &[
    ConversionRule {
        destination: PredictionKind::Point,
        source: PredictionKind::Sample,
        convert: point_from_samples,
    },
    ConversionRule {
        destination: PredictionKind::Quantile,
        source: PredictionKind::Sample,
        convert: quantiles_from_samples,
    },
];

/// First declared rule producing `destination` from one of `available`.
pub fn find_rule(
    destination: PredictionKind,
    available: &[PredictionKind],
) -> Option<&'static ConversionRule> {
    RULES
        .iter()
        .find(|rule| rule.destination == destination && available.contains(&rule.source))
}

/// How one output cell is produced.
#[derive(Debug, Clone)]
pub enum CellPlan {
    /// Emit the resolved element as stored.
    Native(ResolvedCell),
    /// Derive `key.kind` from `source` with `rule`.
    Converted {
        key: CellKey,
        source: ResolvedCell,
        rule: &'static ConversionRule,
    },
}

impl CellPlan {
    /// Key of the output cell.
    pub fn key(&self) -> CellKey {
        match self {
            Self::Native(cell) => cell.key,
            Self::Converted { key, .. } => *key,
        }
    }

    pub fn is_converted(&self) -> bool {
        matches!(self, Self::Converted { .. })
    }
}

/// Decide, per resolved cell group, which cells are emitted natively and
/// which are derived.
///
/// `cells` must be in [`CellKey`] order, as returned by the resolver. An
/// empty `kinds` list admits every kind.
pub fn plan_cells(
    cells: &[ResolvedCell],
    catalog: &Catalog,
    kinds: &[PredictionKind],
    options: &ConversionOptions,
) -> Vec<CellPlan> {
    let wanted = |kind: PredictionKind| kinds.is_empty() || kinds.contains(&kind);
    let destinations = options.destinations();

    let mut plans = Vec::with_capacity(cells.len());
    for group in cells.chunk_by(|a, b| same_prediction(&a.key, &b.key)) {
        plans.extend(
            group
                .iter()
                .filter(|cell| wanted(cell.key.kind))
                .cloned()
                .map(CellPlan::Native),
        );

        let Some(first) = group.first() else {
            continue;
        };
        let numeric = catalog
            .target(first.key.target_id)
            .is_some_and(|t| t.target_type.is_numeric());
        if destinations.is_empty() || !numeric {
            continue;
        }

        let available: Vec<PredictionKind> = group.iter().map(|c| c.key.kind).collect();
        for &destination in &destinations {
            if !wanted(destination) || available.contains(&destination) {
                continue;
            }
            let Some(rule) = find_rule(destination, &available) else {
                continue;
            };
            let Some(source) = group.iter().find(|c| c.key.kind == rule.source) else {
                continue;
            };
            plans.push(CellPlan::Converted {
                key: CellKey {
                    kind: destination,
                    ..first.key
                },
                source: source.clone(),
                rule,
            });
        }
    }

    plans.sort_by_key(CellPlan::key);
    plans
}

/// Cells of the same (model, time-point, unit, target).
fn same_prediction(a: &CellKey, b: &CellKey) -> bool {
    a.model_id == b.model_id
        && a.time_point_id == b.time_point_id
        && a.unit_id == b.unit_id
        && a.target_id == b.target_id
}

fn numeric_samples(payload: &PredictionPayload) -> Option<Vec<f64>> {
    let PredictionPayload::Sample { sample } = payload else {
        return None;
    };
    let values: Vec<f64> = sample.iter().map(Scalar::as_f64).collect::<Option<_>>()?;
    (!values.is_empty()).then_some(values)
}

fn point_from_samples(
    payload: &PredictionPayload,
    options: &ConversionOptions,
) -> Option<PredictionPayload> {
    let values = numeric_samples(payload)?;
    let value = match options.point? {
        PointReduction::Mean => mean(&values),
        PointReduction::Median => median(&values),
    };
    Some(PredictionPayload::Point {
        value: Scalar::Float(value),
    })
}

fn quantiles_from_samples(
    payload: &PredictionPayload,
    options: &ConversionOptions,
) -> Option<PredictionPayload> {
    let mut levels = options.quantile.clone()?;
    levels.sort_by(f64::total_cmp);
    let mut values = numeric_samples(payload)?;
    values.sort_by(f64::total_cmp);

    let quantiles = levels
        .iter()
        .map(|&q| Scalar::Float(quantile_linear(&values, q)))
        .collect();
    Some(PredictionPayload::Quantile {
        quantile: levels,
        value: quantiles,
    })
}

/// Arithmetic mean. `values` must be non-empty.
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median; the midpoint of the two central values for even lengths.
/// `values` must be non-empty.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Quantile by linear interpolation between order statistics
/// (Hyndman & Fan type 7). `sorted` must be non-empty and ascending, and
/// `q` within [0, 1].
pub fn quantile_linear(sorted: &[f64], q: f64) -> f64 {
    let last = sorted.len() - 1;
    let h = last as f64 * q;
    let lo = (h.floor() as usize).min(last);
    let hi = (lo + 1).min(last);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}
