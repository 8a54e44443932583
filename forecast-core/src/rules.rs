//! Forecast version rules applied when data is loaded into a version.
//!
//! Both store implementations gather the elements already stored for the
//! version's (model, time-point) pair and hand them to [`plan_load`], which
//! validates the incoming predictions and decides what to insert.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{Result, StoreError};
use crate::prediction::{PredictionKind, PredictionPayload};
use crate::types::{ElementId, TargetId, UnitId};
use crate::validation::validate_payload;
use crate::version::{ForecastVersion, NewPrediction};

/// Outcome of loading predictions into a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Elements written, retractions included.
    pub inserted: usize,
    /// Elements identical to the cell's current state, not written.
    pub skipped_duplicates: usize,
    /// Explicit retractions written.
    pub retractions: usize,
}

/// An element already stored for the pair being loaded.
#[derive(Debug, Clone)]
pub(crate) struct ExistingElement {
    pub element_id: ElementId,
    pub unit_id: UnitId,
    pub target_id: TargetId,
    pub kind: PredictionKind,
    pub is_retracted: bool,
    pub data_hash: String,
    pub issued_at: DateTime<Utc>,
}

/// An element that passed validation and should be inserted.
#[derive(Debug, Clone)]
pub(crate) struct PlannedElement {
    pub unit_id: UnitId,
    pub target_id: TargetId,
    pub kind: PredictionKind,
    pub data_hash: String,
    pub payload: Option<PredictionPayload>,
}

impl PlannedElement {
    pub fn is_retracted(&self) -> bool {
        self.payload.is_none()
    }
}

type Cell = (UnitId, TargetId, PredictionKind);

/// The instant a store records for `issued_at`. Stores keep microseconds,
/// so two stores given the same input agree on every cutoff comparison.
pub(crate) fn stored_instant(issued_at: DateTime<Utc>) -> DateTime<Utc> {
    issued_at.trunc_subsecs(6)
}

/// Check that `issued_at` can be appended after the pair's existing versions.
pub(crate) fn check_issue_order(
    new_issued_at: DateTime<Utc>,
    existing: &[ForecastVersion],
) -> Result<()> {
    let Some(latest) = existing.iter().map(|v| v.issued_at).max() else {
        return Ok(());
    };
    if let Some(dup) = existing.iter().find(|v| v.issued_at == new_issued_at) {
        return Err(StoreError::DuplicateIssuedAt {
            model_id: dup.model_id,
            time_point_id: dup.time_point_id,
            issued_at: new_issued_at.to_rfc3339(),
        });
    }
    if new_issued_at < latest {
        return Err(StoreError::OutOfOrder {
            issued_at: new_issued_at.to_rfc3339(),
            latest: latest.to_rfc3339(),
        });
    }
    Ok(())
}

/// Validate `incoming` and decide which elements to insert into `version`.
///
/// `existing` holds the elements of every other version of the same pair.
pub(crate) fn plan_load(
    version: &ForecastVersion,
    catalog: &Catalog,
    incoming: Vec<NewPrediction>,
    existing: &[ExistingElement],
) -> Result<(Vec<PlannedElement>, LoadSummary)> {
    if incoming.is_empty() {
        return Err(StoreError::EmptyData);
    }
    let is_oracle = catalog
        .model(version.model_id)
        .ok_or_else(|| StoreError::UnknownReference(format!("model {}", version.model_id)))?
        .is_oracle;

    let mut planned = Vec::with_capacity(incoming.len());
    let mut seen: HashSet<Cell> = HashSet::with_capacity(incoming.len());
    let mut kinds_per_pair: HashMap<(UnitId, TargetId), Vec<PredictionKind>> = HashMap::new();

    for prediction in incoming {
        if catalog.unit(prediction.unit_id).is_none() {
            return Err(StoreError::UnknownReference(format!("unit {}", prediction.unit_id)));
        }
        let target = catalog.target(prediction.target_id).ok_or_else(|| {
            StoreError::UnknownReference(format!("target {}", prediction.target_id))
        })?;

        let cell = (prediction.unit_id, prediction.target_id, prediction.kind);
        if !seen.insert(cell) {
            return Err(StoreError::InvalidPrediction(format!(
                "more than one {} element for unit {} / target {}",
                prediction.kind, prediction.unit_id, prediction.target_id
            )));
        }
        kinds_per_pair
            .entry((prediction.unit_id, prediction.target_id))
            .or_default()
            .push(prediction.kind);

        let data_hash = match &prediction.payload {
            Some(payload) => {
                validate_payload(prediction.kind, payload, target.target_type)?;
                payload.content_hash()?
            }
            None => String::new(),
        };
        planned.push(PlannedElement {
            unit_id: prediction.unit_id,
            target_id: prediction.target_id,
            kind: prediction.kind,
            data_hash,
            payload: prediction.payload,
        });
    }

    if let Some(((unit, target), _)) = kinds_per_pair.iter().find(|(_, kinds)| {
        kinds.contains(&PredictionKind::Bin) && kinds.contains(&PredictionKind::Named)
    }) {
        return Err(StoreError::InvalidPrediction(format!(
            "unit {} / target {} has both bin and named elements",
            unit, target
        )));
    }

    let current = current_state(existing, version.issued_at);

    if !is_oracle {
        // cells already retracted need not be repeated
        let mut missing: Vec<&Cell> = current
            .iter()
            .filter(|(cell, element)| !element.is_retracted && !seen.contains(*cell))
            .map(|(cell, _)| cell)
            .collect();
        if !missing.is_empty() {
            missing.sort();
            let listed: Vec<String> = missing
                .iter()
                .take(5)
                .map(|(u, t, k)| format!("(unit {}, target {}, {})", u, t, k))
                .collect();
            return Err(StoreError::ImplicitRetraction(listed.join(", ")));
        }
    }

    let mut summary = LoadSummary::default();
    planned.retain(|p| {
        let duplicate = current
            .get(&(p.unit_id, p.target_id, p.kind))
            .is_some_and(|e| e.is_retracted == p.is_retracted() && e.data_hash == p.data_hash);
        if duplicate {
            summary.skipped_duplicates += 1;
        }
        !duplicate
    });
    if planned.is_empty() {
        return Err(StoreError::DuplicateData);
    }

    summary.inserted = planned.len();
    summary.retractions = planned.iter().filter(|p| p.is_retracted()).count();
    Ok((planned, summary))
}

/// Latest element per cell among versions issued before `before`.
fn current_state(
    existing: &[ExistingElement],
    before: DateTime<Utc>,
) -> HashMap<Cell, &ExistingElement> {
    let mut current: HashMap<Cell, &ExistingElement> = HashMap::new();
    for element in existing.iter().filter(|e| e.issued_at < before) {
        let cell = (element.unit_id, element.target_id, element.kind);
        let newer = current
            .get(&cell)
            .is_none_or(|prev| (element.issued_at, element.element_id) > (prev.issued_at, prev.element_id));
        if newer {
            current.insert(cell, element);
        }
    }
    current
}
