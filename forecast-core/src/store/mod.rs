//! Version store trait and implementations

mod memory;
mod migrations;
mod sqlite;

pub use memory::MemoryVersionStore;
pub use sqlite::SqliteVersionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::error::{Result, StoreError};
use crate::prediction::{PredictionKind, PredictionPayload};
use crate::rules::LoadSummary;
use crate::types::{ElementId, ModelId, TargetId, TimePointId, UnitId, VersionId};
use crate::version::{CellKey, ForecastVersion, NewPrediction, NewVersion, PredictionElement};

/// Durable, append-only storage of forecast versions and their elements.
///
/// Writes enforce the version rules; reads never mutate.
pub trait VersionStore: Send + Sync {
    /// Create an empty version. Its `issued_at` must be later than every
    /// existing version of the same pair.
    fn create_version(&self, new: NewVersion) -> Result<ForecastVersion>;

    /// Load predictions into an empty version.
    fn load_predictions(
        &self,
        version_id: VersionId,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<LoadSummary>;

    /// Create a version and load `predictions` into it as one write. If
    /// any rule rejects the load, no version is created.
    fn create_and_load(
        &self,
        new: NewVersion,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<(ForecastVersion, LoadSummary)>;

    /// Delete a version and its elements. Only the newest version of a
    /// pair can be deleted.
    fn delete_version(&self, version_id: VersionId) -> Result<()>;

    fn version(&self, version_id: VersionId) -> Result<Option<ForecastVersion>>;

    /// Versions of a pair in issue order.
    fn versions_for(
        &self,
        model_id: ModelId,
        time_point_id: TimePointId,
    ) -> Result<Vec<ForecastVersion>>;

    /// Elements stored in one version, ordered by element id.
    fn elements_for_version(&self, version_id: VersionId) -> Result<Vec<PredictionElement>>;

    /// Every element matching `filter` across all versions, ordered by
    /// element id.
    fn scan_elements(&self, filter: &ElementFilter) -> Result<Vec<ElementRecord>>;

    /// Like [`scan_elements`](Self::scan_elements), but fails with
    /// [`StoreError::Interrupted`] once `cancel` fires. Stores that can stop
    /// mid-scan override this; the default only checks around the scan.
    fn scan_elements_cancellable(
        &self,
        filter: &ElementFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Interrupted);
        }
        let records = self.scan_elements(filter)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Interrupted);
        }
        Ok(records)
    }

    /// Payload of a non-retracted element.
    fn payload(&self, element_id: ElementId) -> Result<Option<PredictionPayload>>;
}

/// Restricts an element scan. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementFilter {
    pub model_ids: Vec<ModelId>,
    pub time_point_ids: Vec<TimePointId>,
    pub unit_ids: Vec<UnitId>,
    pub target_ids: Vec<TargetId>,
    pub kinds: Vec<PredictionKind>,
    /// Only versions issued at or before this instant.
    pub cutoff: Option<DateTime<Utc>>,
}

impl ElementFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(mut self, ids: impl IntoIterator<Item = ModelId>) -> Self {
        self.model_ids = ids.into_iter().collect();
        self
    }

    pub fn with_time_points(mut self, ids: impl IntoIterator<Item = TimePointId>) -> Self {
        self.time_point_ids = ids.into_iter().collect();
        self
    }

    pub fn with_units(mut self, ids: impl IntoIterator<Item = UnitId>) -> Self {
        self.unit_ids = ids.into_iter().collect();
        self
    }

    pub fn with_targets(mut self, ids: impl IntoIterator<Item = TargetId>) -> Self {
        self.target_ids = ids.into_iter().collect();
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = PredictionKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_cutoff(mut self, cutoff: DateTime<Utc>) -> Self {
        self.cutoff = Some(cutoff);
        self
    }

    pub fn matches(&self, key: &CellKey, issued_at: DateTime<Utc>) -> bool {
        fn allowed<T: PartialEq>(list: &[T], v: &T) -> bool {
            list.is_empty() || list.contains(v)
        }
        allowed(&self.model_ids, &key.model_id)
            && allowed(&self.time_point_ids, &key.time_point_id)
            && allowed(&self.unit_ids, &key.unit_id)
            && allowed(&self.target_ids, &key.target_id)
            && allowed(&self.kinds, &key.kind)
            && self.cutoff.is_none_or(|c| issued_at <= c)
    }
}

/// An element as seen by the resolver: identity, version time and
/// retraction flag, without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub element_id: ElementId,
    pub version_id: VersionId,
    pub key: CellKey,
    pub issued_at: DateTime<Utc>,
    pub is_retracted: bool,
}
