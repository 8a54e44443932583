//! Forecast versions and their prediction elements.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prediction::{PredictionKind, PredictionPayload};
use crate::types::{ElementId, ModelId, TargetId, TimePointId, UnitId, VersionId};

/// One upload batch for a single (model, time-point) pair.
///
/// Never mutated after creation; a correction is a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastVersion {
    pub id: VersionId,
    pub model_id: ModelId,
    pub time_point_id: TimePointId,
    /// Establishes version order within the pair.
    pub issued_at: DateTime<Utc>,
    pub label: Option<String>,
}

/// Request to create a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
    pub model_id: ModelId,
    pub time_point_id: TimePointId,
    pub issued_at: DateTime<Utc>,
    #[serde(default)]
    pub label: Option<String>,
}

impl NewVersion {
    pub fn new(model_id: ModelId, time_point_id: TimePointId, issued_at: DateTime<Utc>) -> Self {
        Self {
            model_id,
            time_point_id,
            issued_at,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Identity of the finest-grained queryable unit of information.
///
/// Field order defines the output order of resolved cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellKey {
    pub model_id: ModelId,
    pub time_point_id: TimePointId,
    pub unit_id: UnitId,
    pub target_id: TargetId,
    pub kind: PredictionKind,
}

/// A stored element: one cell's entry within one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionElement {
    pub id: ElementId,
    pub version_id: VersionId,
    pub key: CellKey,
    pub is_retracted: bool,
    /// Empty for retractions.
    pub data_hash: String,
}

/// One incoming prediction. `payload: None` is an explicit retraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub unit_id: UnitId,
    pub target_id: TargetId,
    pub kind: PredictionKind,
    pub payload: Option<PredictionPayload>,
}

impl NewPrediction {
    pub fn data(unit_id: UnitId, target_id: TargetId, payload: PredictionPayload) -> Self {
        Self {
            unit_id,
            target_id,
            kind: payload.kind(),
            payload: Some(payload),
        }
    }

    pub fn retraction(unit_id: UnitId, target_id: TargetId, kind: PredictionKind) -> Self {
        Self {
            unit_id,
            target_id,
            kind,
            payload: None,
        }
    }

    pub fn is_retraction(&self) -> bool {
        self.payload.is_none()
    }
}
