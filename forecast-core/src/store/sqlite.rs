//! SQLite-backed version store

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::error::{Result, StoreError};
use crate::prediction::{PredictionKind, PredictionPayload};
use crate::rules::{self, ExistingElement, LoadSummary};
use crate::types::{ElementId, ModelId, TargetId, TimePointId, UnitId, VersionId};
use crate::version::{CellKey, ForecastVersion, NewPrediction, NewVersion, PredictionElement};

use super::migrations::Migrator;
use super::{ElementFilter, ElementRecord, VersionStore};

/// SQLite VM instructions between cancellation checks during a scan.
const PROGRESS_OPS: i32 = 1000;

/// SQLite-backed version store
pub struct SqliteVersionStore {
    conn: Mutex<Connection>,
}

impl SqliteVersionStore {
    /// Open or create database at path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Migrator::new(&conn).migrate()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn row_to_version(row: &Row) -> rusqlite::Result<ForecastVersion> {
        Ok(ForecastVersion {
            id: VersionId(row.get(0)?),
            model_id: ModelId(row.get(1)?),
            time_point_id: TimePointId(row.get(2)?),
            issued_at: micros_to_utc(3, row.get(3)?)?,
            label: row.get(4)?,
        })
    }

    fn get_version(conn: &Connection, version_id: VersionId) -> Result<Option<ForecastVersion>> {
        Ok(conn
            .query_row(
                "SELECT id, model_id, time_point_id, issued_at, label
                 FROM forecast_versions WHERE id = ?1",
                [version_id.0],
                Self::row_to_version,
            )
            .optional()?)
    }

    fn pair_versions(
        conn: &Connection,
        model_id: ModelId,
        time_point_id: TimePointId,
    ) -> Result<Vec<ForecastVersion>> {
        let mut stmt = conn.prepare(
            "SELECT id, model_id, time_point_id, issued_at, label
             FROM forecast_versions
             WHERE model_id = ?1 AND time_point_id = ?2
             ORDER BY issued_at, id",
        )?;
        let rows = stmt.query_map([model_id.0, time_point_id.0], Self::row_to_version)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_version(conn: &Connection, new: NewVersion) -> Result<ForecastVersion> {
        let issued_at = rules::stored_instant(new.issued_at);
        rules::check_issue_order(
            issued_at,
            &Self::pair_versions(conn, new.model_id, new.time_point_id)?,
        )?;

        conn.execute(
            "INSERT INTO forecast_versions (model_id, time_point_id, issued_at, label)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.model_id.0,
                new.time_point_id.0,
                issued_at.timestamp_micros(),
                new.label
            ],
        )?;
        Ok(ForecastVersion {
            id: VersionId(conn.last_insert_rowid()),
            model_id: new.model_id,
            time_point_id: new.time_point_id,
            issued_at,
            label: new.label,
        })
    }

    /// Plan and insert `predictions` into the empty `version`. Callers run
    /// this inside a transaction.
    fn load_into(
        conn: &Connection,
        version: &ForecastVersion,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<LoadSummary> {
        let existing = {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.unit_id, e.target_id, e.kind, e.is_retracted, e.data_hash, v.issued_at
                 FROM prediction_elements e
                 JOIN forecast_versions v ON v.id = e.version_id
                 WHERE e.model_id = ?1 AND e.time_point_id = ?2",
            )?;
            let rows = stmt.query_map([version.model_id.0, version.time_point_id.0], |row| {
                Ok(ExistingElement {
                    element_id: ElementId(row.get(0)?),
                    unit_id: UnitId(row.get(1)?),
                    target_id: TargetId(row.get(2)?),
                    kind: kind_from_code(3, row.get(3)?)?,
                    is_retracted: row.get(4)?,
                    data_hash: row.get(5)?,
                    issued_at: micros_to_utc(6, row.get(6)?)?,
                })
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let (planned, summary) = rules::plan_load(version, catalog, predictions, &existing)?;

        for element in &planned {
            conn.execute(
                "INSERT INTO prediction_elements
                 (version_id, model_id, time_point_id, unit_id, target_id, kind, is_retracted, data_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    version.id.0,
                    version.model_id.0,
                    version.time_point_id.0,
                    element.unit_id.0,
                    element.target_id.0,
                    element.kind.code(),
                    element.is_retracted(),
                    element.data_hash,
                ],
            )?;
            if let Some(payload) = &element.payload {
                let element_id = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO prediction_data (element_id, data) VALUES (?1, ?2)",
                    params![element_id, payload.to_json()?],
                )?;
            }
        }
        Ok(summary)
    }

    fn scan(conn: &Connection, filter: &ElementFilter) -> Result<Vec<ElementRecord>> {
        let mut conditions = Vec::new();
        if !filter.model_ids.is_empty() {
            conditions.push(format!("e.model_id IN ({})", id_list(&filter.model_ids, |i| i.0)));
        }
        if !filter.time_point_ids.is_empty() {
            conditions.push(format!(
                "e.time_point_id IN ({})",
                id_list(&filter.time_point_ids, |i| i.0)
            ));
        }
        if !filter.unit_ids.is_empty() {
            conditions.push(format!("e.unit_id IN ({})", id_list(&filter.unit_ids, |i| i.0)));
        }
        if !filter.target_ids.is_empty() {
            conditions.push(format!("e.target_id IN ({})", id_list(&filter.target_ids, |i| i.0)));
        }
        if !filter.kinds.is_empty() {
            conditions.push(format!("e.kind IN ({})", id_list(&filter.kinds, |k| k.code())));
        }

        let mut params: Vec<i64> = Vec::new();
        if let Some(cutoff) = filter.cutoff {
            conditions.push(format!("v.issued_at <= ?{}", params.len() + 1));
            params.push(cutoff.timestamp_micros());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT e.id, e.version_id, e.model_id, e.time_point_id, e.unit_id, e.target_id, e.kind,
                    e.is_retracted, v.issued_at
             FROM prediction_elements e
             JOIN forecast_versions v ON v.id = e.version_id
             {} ORDER BY e.id",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(ElementRecord {
                element_id: ElementId(row.get(0)?),
                version_id: VersionId(row.get(1)?),
                key: CellKey {
                    model_id: ModelId(row.get(2)?),
                    time_point_id: TimePointId(row.get(3)?),
                    unit_id: UnitId(row.get(4)?),
                    target_id: TargetId(row.get(5)?),
                    kind: kind_from_code(6, row.get(6)?)?,
                },
                is_retracted: row.get(7)?,
                issued_at: micros_to_utc(8, row.get(8)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Run [`scan`](Self::scan) with a progress handler that aborts the
    /// statement once `cancel` fires.
    fn scan_interruptible(
        conn: &Connection,
        filter: &ElementFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        let token = cancel.clone();
        conn.progress_handler(PROGRESS_OPS, Some(move || token.is_cancelled()));
        let result = Self::scan(conn, filter);
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Err(_) if cancel.is_cancelled() => Err(StoreError::Interrupted),
            other => other,
        }
    }
}

fn micros_to_utc(idx: usize, micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

fn kind_from_code(idx: usize, code: i64) -> rusqlite::Result<PredictionKind> {
    PredictionKind::from_code(code).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, code))
}

fn id_list<T>(ids: &[T], f: impl Fn(&T) -> i64) -> String {
    ids.iter()
        .map(|id| f(id).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl VersionStore for SqliteVersionStore {
    fn create_version(&self, new: NewVersion) -> Result<ForecastVersion> {
        let conn = self.lock()?;
        let version = Self::insert_version(&conn, new)?;
        tracing::debug!(version_id = %version.id, "Created version");
        Ok(version)
    }

    fn load_predictions(
        &self,
        version_id: VersionId,
        catalog: &Catalog,
        predictions: Vec<NewPrediction>,
    ) -> Result<LoadSummary> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let version =
            Self::get_version(&tx, version_id)?.ok_or(StoreError::VersionNotFound(version_id))?;
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM prediction_elements WHERE version_id = ?1",
            [version_id.0],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Err(StoreError::VersionNotEmpty(version_id));
        }

        let summary = Self::load_into(&tx, &version, catalog, predictions)?;
        tx.commit()?;

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
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let version = Self::insert_version(&tx, new)?;
        let summary = Self::load_into(&tx, &version, catalog, predictions)?;
        tx.commit()?;

        tracing::debug!(
            version_id = %version.id,
            inserted = summary.inserted,
            skipped = summary.skipped_duplicates,
            "Created and loaded version"
        );
        Ok((version, summary))
    }

    fn delete_version(&self, version_id: VersionId) -> Result<()> {
        let conn = self.lock()?;
        let version =
            Self::get_version(&conn, version_id)?.ok_or(StoreError::VersionNotFound(version_id))?;

        let newer: Option<i64> = conn
            .query_row(
                "SELECT id FROM forecast_versions
                 WHERE model_id = ?1 AND time_point_id = ?2 AND issued_at > ?3
                 ORDER BY issued_at LIMIT 1",
                params![
                    version.model_id.0,
                    version.time_point_id.0,
                    version.issued_at.timestamp_micros()
                ],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(newer) = newer {
            return Err(StoreError::NewerVersionExists(VersionId(newer)));
        }

        conn.execute("DELETE FROM forecast_versions WHERE id = ?1", [version_id.0])?;
        tracing::debug!(version_id = %version_id, "Deleted version");
        Ok(())
    }

    fn version(&self, version_id: VersionId) -> Result<Option<ForecastVersion>> {
        let conn = self.lock()?;
        Self::get_version(&conn, version_id)
    }

    fn versions_for(
        &self,
        model_id: ModelId,
        time_point_id: TimePointId,
    ) -> Result<Vec<ForecastVersion>> {
        let conn = self.lock()?;
        Self::pair_versions(&conn, model_id, time_point_id)
    }

    fn elements_for_version(&self, version_id: VersionId) -> Result<Vec<PredictionElement>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, version_id, model_id, time_point_id, unit_id, target_id, kind, is_retracted, data_hash
             FROM prediction_elements WHERE version_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([version_id.0], |row| {
            Ok(PredictionElement {
                id: ElementId(row.get(0)?),
                version_id: VersionId(row.get(1)?),
                key: CellKey {
                    model_id: ModelId(row.get(2)?),
                    time_point_id: TimePointId(row.get(3)?),
                    unit_id: UnitId(row.get(4)?),
                    target_id: TargetId(row.get(5)?),
                    kind: kind_from_code(6, row.get(6)?)?,
                },
                is_retracted: row.get(7)?,
                data_hash: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn scan_elements(&self, filter: &ElementFilter) -> Result<Vec<ElementRecord>> {
        let conn = self.lock()?;
        Self::scan(&conn, filter)
    }

    fn scan_elements_cancellable(
        &self,
        filter: &ElementFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<ElementRecord>> {
        if cancel.is_cancelled() {
            return Err(StoreError::Interrupted);
        }
        let conn = self.lock()?;
        Self::scan_interruptible(&conn, filter, cancel)
    }

    fn payload(&self, element_id: ElementId) -> Result<Option<PredictionPayload>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM prediction_data WHERE element_id = ?1",
                [element_id.0],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|json| PredictionPayload::from_json(&json))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Model, Target, TargetType, TimePoint, Unit};
    use crate::prediction::Scalar;
    use chrono::{NaiveDate, TimeZone};

    fn catalog() -> Catalog {
        Catalog::new(
            vec![Model {
                id: ModelId(1),
                abbreviation: "m".into(),
                name: String::new(),
                is_oracle: false,
            }],
            vec![Unit {
                id: UnitId(1),
                abbreviation: "u".into(),
            }],
            vec![Target {
                id: TargetId(1),
                name: "t".into(),
                target_type: TargetType::Continuous,
            }],
            vec![TimePoint {
                id: TimePointId(1),
                date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                is_season_start: false,
                season_name: None,
            }],
        )
        .unwrap()
    }

    fn point(value: f64) -> NewPrediction {
        NewPrediction::data(
            UnitId(1),
            TargetId(1),
            PredictionPayload::Point {
                value: Scalar::Float(value),
            },
        )
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_version_round_trip() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let created = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)).with_label("first"))
            .unwrap();

        let fetched = store.version(created.id).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.label.as_deref(), Some("first"));
        assert!(store.version(VersionId(999)).unwrap().is_none());
    }

    #[test]
    fn test_load_and_read_payload() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let v = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
            .unwrap();
        let summary = store.load_predictions(v.id, &catalog(), vec![point(2.5)]).unwrap();
        assert_eq!(summary.inserted, 1);

        let elements = store.elements_for_version(v.id).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].key.kind, PredictionKind::Point);
        assert_eq!(
            store.payload(elements[0].id).unwrap(),
            Some(PredictionPayload::Point {
                value: Scalar::Float(2.5)
            })
        );
    }

    #[test]
    fn test_failed_load_leaves_version_empty() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let v = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
            .unwrap();
        let bad = NewPrediction::data(
            UnitId(1),
            TargetId(1),
            PredictionPayload::Point {
                value: Scalar::from("x"),
            },
        );
        assert!(store.load_predictions(v.id, &catalog(), vec![bad]).is_err());
        assert!(store.elements_for_version(v.id).unwrap().is_empty());
        assert!(store.load_predictions(v.id, &catalog(), vec![point(1.0)]).is_ok());
    }

    #[test]
    fn test_delete_cascades() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let v = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
            .unwrap();
        store.load_predictions(v.id, &catalog(), vec![point(1.0)]).unwrap();
        let element_id = store.elements_for_version(v.id).unwrap()[0].id;

        store.delete_version(v.id).unwrap();
        assert!(store.version(v.id).unwrap().is_none());
        assert!(store.elements_for_version(v.id).unwrap().is_empty());
        assert!(store.payload(element_id).unwrap().is_none());
    }

    #[test]
    fn test_scan_with_cutoff() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let v1 = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
            .unwrap();
        store.load_predictions(v1.id, &catalog(), vec![point(1.0)]).unwrap();
        let v2 = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(2)))
            .unwrap();
        store.load_predictions(v2.id, &catalog(), vec![point(2.0)]).unwrap();

        assert_eq!(store.scan_elements(&ElementFilter::new()).unwrap().len(), 2);
        let early = store
            .scan_elements(&ElementFilter::new().with_cutoff(day(1)))
            .unwrap();
        assert_eq!(early.len(), 1);
        assert_eq!(early[0].version_id, v1.id);
        assert_eq!(early[0].issued_at, day(1));
    }

    #[test]
    fn test_cancelled_scan_is_interrupted_mid_statement() {
        let store = SqliteVersionStore::open_in_memory().unwrap();
        let v = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
            .unwrap();
        let conn = store.lock().unwrap();
        conn.execute(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 5000)
             INSERT INTO prediction_elements (version_id, model_id, time_point_id, unit_id, target_id, kind)
             SELECT ?1, 1, 1, i, 1, 0 FROM n",
            [v.id.0],
        )
        .unwrap();

        let live = CancellationToken::new();
        let all = SqliteVersionStore::scan_interruptible(&conn, &ElementFilter::new(), &live);
        assert_eq!(all.unwrap().len(), 5000);

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = SqliteVersionStore::scan_interruptible(&conn, &ElementFilter::new(), &cancelled)
            .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted));

        // the handler is removed afterwards
        assert_eq!(SqliteVersionStore::scan(&conn, &ElementFilter::new()).unwrap().len(), 5000);
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.db");
        let id = {
            let store = SqliteVersionStore::open(&path).unwrap();
            store
                .create_version(NewVersion::new(ModelId(1), TimePointId(1), day(1)))
                .unwrap()
                .id
        };
        let store = SqliteVersionStore::open(&path).unwrap();
        assert!(store.version(id).unwrap().is_some());
    }
}
