//! Shared fixtures for query tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use forecast_core::{
    Catalog, MemoryVersionStore, Model, ModelId, NewPrediction, NewVersion, PredictionKind,
    PredictionPayload, Scalar, Target, TargetId, TargetType, TimePoint, TimePointId, Unit, UnitId,
    VersionId, VersionStore,
};
use forecast_query::{QueryConfig, QueryEngine, VecSink};
use serde_json::Value;

pub const DOCS_MOD: ModelId = ModelId(1);
pub const OTHER_MOD: ModelId = ModelId(2);
pub const ORACLE: ModelId = ModelId(3);

pub const LOC1: UnitId = UnitId(1);
pub const LOC2: UnitId = UnitId(2);

pub const PCT: TargetId = TargetId(1);
pub const CASES: TargetId = TargetId(2);
pub const SEVERITY: TargetId = TargetId(3);

pub const TP1: TimePointId = TimePointId(1);
pub const TP2: TimePointId = TimePointId(2);

pub fn catalog() -> Catalog {
    let model = |id, abbreviation: &str, is_oracle| Model {
        id,
        abbreviation: abbreviation.into(),
        name: String::new(),
        is_oracle,
    };
    let target = |id, name: &str, target_type| Target {
        id,
        name: name.into(),
        target_type,
    };
    Catalog::new(
        vec![
            model(DOCS_MOD, "docs_mod", false),
            model(OTHER_MOD, "other_mod", false),
            model(ORACLE, "oracle", true),
        ],
        vec![
            Unit {
                id: LOC1,
                abbreviation: "loc1".into(),
            },
            Unit {
                id: LOC2,
                abbreviation: "loc2".into(),
            },
        ],
        vec![
            target(PCT, "pct next week", TargetType::Continuous),
            target(CASES, "cases next week", TargetType::Discrete),
            target(SEVERITY, "season severity", TargetType::Nominal),
        ],
        vec![
            TimePoint {
                id: TP1,
                date: NaiveDate::from_ymd_opt(2011, 10, 2).unwrap(),
                is_season_start: true,
                season_name: Some("2011-2012".into()),
            },
            TimePoint {
                id: TP2,
                date: NaiveDate::from_ymd_opt(2011, 10, 9).unwrap(),
                is_season_start: false,
                season_name: None,
            },
        ],
    )
    .unwrap()
}

/// Midnight UTC on the given day of October 2011.
pub fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 10, d, 0, 0, 0).unwrap()
}

pub fn point(unit: UnitId, target: TargetId, value: i64) -> NewPrediction {
    NewPrediction::data(
        unit,
        target,
        PredictionPayload::Point {
            value: Scalar::Int(value),
        },
    )
}

pub fn samples(unit: UnitId, target: TargetId, values: &[i64]) -> NewPrediction {
    NewPrediction::data(
        unit,
        target,
        PredictionPayload::Sample {
            sample: values.iter().map(|&v| Scalar::Int(v)).collect(),
        },
    )
}

pub fn retract(unit: UnitId, target: TargetId, kind: PredictionKind) -> NewPrediction {
    NewPrediction::retraction(unit, target, kind)
}

pub struct Hub {
    pub store: Arc<dyn VersionStore>,
    pub catalog: Arc<Catalog>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryVersionStore::new()))
    }

    pub fn with_store(store: Arc<dyn VersionStore>) -> Self {
        Self {
            store,
            catalog: Arc::new(catalog()),
        }
    }

    /// Create a version issued on `d` and load `predictions` into it.
    pub fn load(
        &self,
        model: ModelId,
        time_point: TimePointId,
        d: u32,
        predictions: Vec<NewPrediction>,
    ) -> VersionId {
        let version = self
            .store
            .create_version(NewVersion::new(model, time_point, day(d)))
            .unwrap();
        self.store
            .load_predictions(version.id, &self.catalog, predictions)
            .unwrap();
        version.id
    }

    pub fn engine(&self) -> QueryEngine {
        self.engine_with(QueryConfig::default())
    }

    pub fn engine_with(&self, config: QueryConfig) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.store), Arc::clone(&self.catalog)).with_config(config)
    }

    /// Run a forecast query and collect its rows.
    pub fn rows(&self, spec: Value) -> Vec<Vec<String>> {
        let mut sink = VecSink::new();
        self.engine().query_to_sink(&spec, &mut sink).unwrap();
        sink.rows
    }
}

/// Column `name` of every row.
pub fn column(rows: &[Vec<String>], name: &str) -> Vec<String> {
    let idx = forecast_query::ROW_HEADER
        .iter()
        .position(|c| *c == name)
        .unwrap();
    rows.iter().map(|r| r[idx].clone()).collect()
}
