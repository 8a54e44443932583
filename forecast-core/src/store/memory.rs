//! In-memory version store

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::error::{Result, StoreError};
use crate::prediction::PredictionPayload;
use crate::rules::{self, ExistingElement, LoadSummary};
use crate::types::{ElementId, ModelId, TimePointId, VersionId};
use crate::version::{CellKey, ForecastVersion, NewPrediction, NewVersion, PredictionElement};

use super::{ElementFilter, ElementRecord, VersionStore};

/// Elements visited between cancellation checks during a scan.
const CANCEL_CHECK_INTERVAL: usize = 256;

#[derive(Default)]
struct Inner {
    versions: BTreeMap<VersionId, ForecastVersion>,
    elements: BTreeMap<ElementId, PredictionElement>,
    payloads: HashMap<ElementId, PredictionPayload>,
    next_version_id: i64,
    next_element_id: i64,
}

impl Inner {
    fn pair_versions(&self, model_id: ModelId, time_point_id: TimePointId) -> Vec<ForecastVersion> {
        let mut versions: Vec<ForecastVersion> = self
            .versions
            .values()
            .filter(|v| v.model_id == model_id && v.time_point_id == time_point_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| (v.issued_at, v.id));
        versions
    }

    /// Build the next version without recording it.
    fn next_version(&self, new: NewVersion) -> Result<ForecastVersion> {
        let issued_at = rules::stored_instant(new.issued_at);
        rules::check_issue_order(
            issued_at,
            &self.pair_versions(new.model_id, new.time_point_id),
        )?;
        Ok(ForecastVersion {
            id: VersionId(self.next_version_id + 1),
            model_id: new.model_id,
            time_point_id: new.time_point_id,
            issued_at,
            label: new.label,
        })
    }

    fn record_version(&mut self, version: &ForecastVersion) {
        self.next_version_id = version.id.0;
        self.versions.insert(version.id, version.clone());
    }

    /// Plan and insert `predictions` into `version`. Nothing is written
    /// unless the whole load is accepted.
    fn load_into(
        &mut self,
        version: &ForecastVersion,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<LoadSummary> {
        let existing: Vec<ExistingElement> = self
            .elements
            .values()
            .filter(|e| {
                e.key.model_id == version.model_id && e.key.time_point_id == version.time_point_id
            })
            .filter_map(|e| {
                let issued_at = self.versions.get(&e.version_id)?.issued_at;
                Some(ExistingElement {
                    element_id: e.id,
                    unit_id: e.key.unit_id,
                    target_id: e.key.target_id,
                    kind: e.key.kind,
                    is_retracted: e.is_retracted,
                    data_hash: e.data_hash.clone(),
                    issued_at,
                })
            })
            .collect();

        let (planned, summary) = rules::plan_load(version, catalog, predictions, &existing)?;

        for element in planned {
            self.next_element_id += 1;
            let id = ElementId(self.next_element_id);
            let is_retracted = element.is_retracted();
            self.elements.insert(
                id,
                PredictionElement {
                    id,
                    version_id: version.id,
                    key: CellKey {
                        model_id: version.model_id,
                        time_point_id: version.time_point_id,
                        unit_id: element.unit_id,
                        target_id: element.target_id,
                        kind: element.kind,
                    },
                    is_retracted,
                    data_hash: element.data_hash,
                },
            );
            if let Some(payload) = element.payload {
                self.payloads.insert(id, payload);
            }
        }
        Ok(summary)
    }

    fn scan(
        &self,
        filter: &ElementFilter,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ElementRecord>> {
        let cancelled = || cancel.is_some_and(|t| t.is_cancelled());
        if cancelled() {
            return Err(StoreError::Interrupted);
        }
        let mut records = Vec::new();
        for (i, element) in self.elements.values().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 && cancelled() {
                return Err(StoreError::Interrupted);
            }
            let Some(version) = self.versions.get(&element.version_id) else {
                continue;
            };
            if filter.matches(&element.key, version.issued_at) {
                records.push(ElementRecord {
                    element_id: element.id,
                    version_id: element.version_id,
                    key: element.key,
                    issued_at: version.issued_at,
                    is_retracted: element.is_retracted,
                });
            }
        }
        Ok(records)
    }
}

/// Version store backed by process memory. Ids are never reused.
#[derive(Default)]
pub struct MemoryVersionStore {
    inner: RwLock<Inner>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }
}

impl VersionStore for MemoryVersionStore {
    fn create_version(&self, new: NewVersion) -> Result<ForecastVersion> {
        let mut inner = self.write()?;
        let version = inner.next_version(new)?;
        inner.record_version(&version);
        tracing::debug!(version_id = %version.id, "Created version");
        Ok(version)
    }

    fn load_predictions(
        &self,
        version_id: VersionId,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<LoadSummary> {
        let mut inner = self.write()?;
        let version = inner
            .versions
            .get(&version_id)
            .cloned()
            .ok_or(StoreError::VersionNotFound(version_id))?;
        if inner.elements.values().any(|e| e.version_id == version_id) {
            return Err(StoreError::VersionNotEmpty(version_id));
        }

        let summary = inner.load_into(&version, catalog, predictions)?;
        tracing::debug!(
            version_id = %version_id,
            inserted = summary.inserted,
            skipped = summary.skipped_duplicates,
            "Loaded predictions"
        );
        Ok(summary)
    }

    fn create_and_load(
        &self,
        new: NewVersion,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<(ForecastVersion, LoadSummary)> {
        let mut inner = self.write()?;
        let version = inner.next_version(new)?;
        let summary = inner.load_into(&version, catalog, predictions)?;
        inner.record_version(&version);
        tracing::debug!(
            version_id = %version.id,
            inserted = summary.inserted,
            skipped = summary.skipped_duplicates,
            "Created and loaded version"
        );
        Ok((version, summary))
    }

    fn delete_version(&self, version_id: VersionId) -> Result<()> {
        let mut inner = self.write()?;
        let version = inner
            .versions
            .get(&version_id)
            .cloned()
            .ok_or(StoreError::VersionNotFound(version_id))?;
        if let Some(newer) = inner
            .pair_versions(version.model_id, version.time_point_id)
            .into_iter()
            .find(|v| v.issued_at > version.issued_at)
        {
            return Err(StoreError::NewerVersionExists(newer.id));
        }

        let doomed: Vec<ElementId> = inner
            .elements
            .values()
            .filter(|e| e.version_id == version_id)
            .map(|e| e.id)
            .collect();
        for id in doomed {
            inner.elements.remove(&id);
            inner.payloads.remove(&id);
        }
        inner.versions.remove(&version_id);
        tracing::debug!(version_id = %version_id, "Deleted version");
        Ok(())
    }

    fn version(&self, version_id: VersionId) -> Result<Option<ForecastVersion>> {
        Ok(self.read()?.versions.get(&version_id).cloned())
    }

    fn versions_for(
        &self,
        model_id: ModelId,
        time_point_id: TimePointId,
    ) -> Result<Vec<ForecastVersion>> {
        Ok(self.read()?.pair_versions(model_id, time_point_id))
    }

    fn elements_for_version(&self, version_id: VersionId) -> Result<Vec<PredictionElement>> {
        Ok(self
            .read()?
            .elements
            .values()
            .filter(|e| e.version_id == version_id)
            .cloned()
            .collect())
    }

    fn scan_elements(&self, filter: &ElementFilter) -> Result<Vec<ElementRecord>> {
        self.read()?.scan(filter, None)
    }

    fn scan_elements_cancellable(
        &self,
        filter: &ElementFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        self.read()?.scan(filter, Some(cancel))
    }

    fn payload(&self, element_id: ElementId) -> Result<Option<PredictionPayload>> {
        Ok(self.read()?.payloads.get(&element_id).cloned())
    }
}
