//! Version rules, checked against every store implementation.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use forecast_core::{
    Catalog, ElementFilter, MemoryVersionStore, Model, ModelId, NewPrediction, NewVersion,
    PredictionKind, PredictionPayload, Scalar, SqliteVersionStore, StoreError, Target, TargetId,
    TargetType, TimePoint, TimePointId, Unit, UnitId, VersionStore,
};
use tokio_util::sync::CancellationToken;

fn catalog() -> Catalog {
    Catalog::new(
        vec![
            Model {
                id: ModelId(1),
                abbreviation: "model-a".into(),
                name: "Model A".into(),
                is_oracle: false,
            },
            Model {
                id: ModelId(2),
                abbreviation: "oracle".into(),
                name: "Truth".into(),
                is_oracle: true,
            },
        ],
        vec![
            Unit {
                id: UnitId(1),
                abbreviation: "loc1".into(),
            },
            Unit {
                id: UnitId(2),
                abbreviation: "loc2".into(),
            },
        ],
        vec![Target {
            id: TargetId(1),
            name: "cases next week".into(),
            target_type: TargetType::Discrete,
        }],
        vec![TimePoint {
            id: TimePointId(1),
            date: NaiveDate::from_ymd_opt(2011, 10, 2).unwrap(),
            is_season_start: true,
            season_name: Some("2011-2012".into()),
        }],
    )
    .unwrap()
}

fn stores() -> Vec<(&'static str, Box<dyn VersionStore>)> {
    vec![
        ("memory", Box::new(MemoryVersionStore::new())),
        ("sqlite", Box::new(SqliteVersionStore::open_in_memory().unwrap())),
    ]
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2011, 10, d, 0, 0, 0).unwrap()
}

fn point(unit: i64, value: i64) -> NewPrediction {
    NewPrediction::data(
        UnitId(unit),
        TargetId(1),
        PredictionPayload::Point {
            value: Scalar::Int(value),
        },
    )
}

fn new_version(model: i64, d: u32) -> NewVersion {
    NewVersion::new(ModelId(model), TimePointId(1), day(d))
}

#[test]
fn issued_at_must_increase_within_pair() {
    for (name, store) in stores() {
        store.create_version(new_version(1, 5)).unwrap();

        let dup = store.create_version(new_version(1, 5)).unwrap_err();
        assert!(matches!(dup, StoreError::DuplicateIssuedAt { .. }), "{name}");

        let older = store.create_version(new_version(1, 4)).unwrap_err();
        assert!(matches!(older, StoreError::OutOfOrder { .. }), "{name}");

        // other pairs are independent
        store.create_version(new_version(2, 4)).unwrap();
        store.create_version(new_version(1, 6)).unwrap();

        let versions = store.versions_for(ModelId(1), TimePointId(1)).unwrap();
        let days: Vec<_> = versions.iter().map(|v| v.issued_at).collect();
        assert_eq!(days, vec![day(5), day(6)], "{name}");
    }
}

#[test]
fn version_is_loaded_once() {
    for (name, store) in stores() {
        let v = store.create_version(new_version(1, 1)).unwrap();
        store.load_predictions(v.id, &catalog(), vec![point(1, 10)]).unwrap();
        let err = store
            .load_predictions(v.id, &catalog(), vec![point(2, 10)])
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionNotEmpty(_)), "{name}");
    }
}

#[test]
fn loading_into_missing_version_fails() {
    for (name, store) in stores() {
        let err = store
            .load_predictions(forecast_core::VersionId(42), &catalog(), vec![point(1, 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound(_)), "{name}");
    }
}

#[test]
fn only_newest_version_can_be_deleted() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(1, 1)).unwrap();
        store.load_predictions(v1.id, &catalog(), vec![point(1, 10)]).unwrap();
        let v2 = store.create_version(new_version(1, 2)).unwrap();
        store.load_predictions(v2.id, &catalog(), vec![point(1, 11)]).unwrap();

        let err = store.delete_version(v1.id).unwrap_err();
        assert!(matches!(err, StoreError::NewerVersionExists(id) if id == v2.id), "{name}");

        store.delete_version(v2.id).unwrap();
        store.delete_version(v1.id).unwrap();
        assert!(store.versions_for(ModelId(1), TimePointId(1)).unwrap().is_empty());
        assert!(store.scan_elements(&ElementFilter::new()).unwrap().is_empty());
    }
}

#[test]
fn corrections_store_only_changed_cells() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(1, 1)).unwrap();
        store
            .load_predictions(v1.id, &catalog(), vec![point(1, 10), point(2, 20)])
            .unwrap();

        let v2 = store.create_version(new_version(1, 2)).unwrap();
        let summary = store
            .load_predictions(v2.id, &catalog(), vec![point(1, 10), point(2, 21)])
            .unwrap();
        assert_eq!(summary.inserted, 1, "{name}");
        assert_eq!(summary.skipped_duplicates, 1, "{name}");

        let elements = store.elements_for_version(v2.id).unwrap();
        assert_eq!(elements.len(), 1, "{name}");
        assert_eq!(elements[0].key.unit_id, UnitId(2), "{name}");
    }
}

#[test]
fn identical_resubmission_is_rejected() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(1, 1)).unwrap();
        store.load_predictions(v1.id, &catalog(), vec![point(1, 10)]).unwrap();
        let v2 = store.create_version(new_version(1, 2)).unwrap();
        let err = store
            .load_predictions(v2.id, &catalog(), vec![point(1, 10)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateData), "{name}");
    }
}

#[test]
fn reverting_to_an_earlier_value_is_stored() {
    for (name, store) in stores() {
        for (d, value) in [(1, 5), (2, 7), (3, 5)] {
            let v = store.create_version(new_version(1, d)).unwrap();
            let summary = store
                .load_predictions(v.id, &catalog(), vec![point(1, value)])
                .unwrap();
            assert_eq!(summary.inserted, 1, "{name} day {d}");
        }
    }
}

#[test]
fn omitted_cells_must_be_retracted_explicitly() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(1, 1)).unwrap();
        store
            .load_predictions(v1.id, &catalog(), vec![point(1, 10), point(2, 20)])
            .unwrap();

        let v2 = store.create_version(new_version(1, 2)).unwrap();
        let err = store
            .load_predictions(v2.id, &catalog(), vec![point(1, 11)])
            .unwrap_err();
        assert!(matches!(err, StoreError::ImplicitRetraction(_)), "{name}");

        let summary = store
            .load_predictions(
                v2.id,
                &catalog(),
                vec![
                    point(1, 11),
                    NewPrediction::retraction(UnitId(2), TargetId(1), PredictionKind::Point),
                ],
            )
            .unwrap();
        assert_eq!(summary.retractions, 1, "{name}");

        let retracted: Vec<_> = store
            .elements_for_version(v2.id)
            .unwrap()
            .into_iter()
            .filter(|e| e.is_retracted)
            .collect();
        assert_eq!(retracted.len(), 1, "{name}");
        assert!(store.payload(retracted[0].id).unwrap().is_none(), "{name}");
    }
}

#[test]
fn oracle_versions_may_be_partial() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(2, 1)).unwrap();
        store
            .load_predictions(v1.id, &catalog(), vec![point(1, 10), point(2, 20)])
            .unwrap();
        let v2 = store.create_version(new_version(2, 2)).unwrap();
        assert!(
            store
                .load_predictions(v2.id, &catalog(), vec![point(1, 12)])
                .is_ok(),
            "{name}"
        );
    }
}

#[test]
fn invalid_payloads_are_rejected() {
    for (name, store) in stores() {
        let v = store.create_version(new_version(1, 1)).unwrap();
        let fractional = NewPrediction::data(
            UnitId(1),
            TargetId(1),
            PredictionPayload::Point {
                value: Scalar::Float(1.5),
            },
        );
        let err = store
            .load_predictions(v.id, &catalog(), vec![fractional])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPrediction(_)), "{name}");

        let err = store.load_predictions(v.id, &catalog(), vec![]).unwrap_err();
        assert!(matches!(err, StoreError::EmptyData), "{name}");
    }
}

#[test]
fn element_ids_increase_across_deletes() {
    for (name, store) in stores() {
        let v1 = store.create_version(new_version(1, 1)).unwrap();
        store.load_predictions(v1.id, &catalog(), vec![point(1, 10)]).unwrap();
        let first = store.elements_for_version(v1.id).unwrap()[0].id;
        store.delete_version(v1.id).unwrap();

        let v2 = store.create_version(new_version(1, 2)).unwrap();
        assert!(v2.id > v1.id, "{name}");
        store.load_predictions(v2.id, &catalog(), vec![point(1, 10)]).unwrap();
        let second = store.elements_for_version(v2.id).unwrap()[0].id;
        assert!(second > first, "{name}");
    }
}

#[test]
fn create_and_load_is_all_or_nothing() {
    for (name, store) in stores() {
        let (v1, summary) = store
            .create_and_load(new_version(1, 1), &catalog(), vec![point(1, 10), point(2, 20)])
            .unwrap();
        assert_eq!(summary.inserted, 2, "{name}");
        assert_eq!(store.elements_for_version(v1.id).unwrap().len(), 2, "{name}");

        // rejected load: no version is left behind
        let err = store
            .create_and_load(new_version(1, 2), &catalog(), vec![point(1, 10), point(2, 20)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateData), "{name}");
        let versions = store.versions_for(ModelId(1), TimePointId(1)).unwrap();
        assert_eq!(versions, vec![v1.clone()], "{name}");

        // rejected issue order: nothing written either
        let err = store
            .create_and_load(new_version(1, 1), &catalog(), vec![point(1, 11), point(2, 20)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIssuedAt { .. }), "{name}");

        let (v2, summary) = store
            .create_and_load(new_version(1, 3), &catalog(), vec![point(1, 11), point(2, 20)])
            .unwrap();
        assert_eq!(summary.inserted, 1, "{name}");
        assert!(v2.id > v1.id, "{name}");
        assert_eq!(store.versions_for(ModelId(1), TimePointId(1)).unwrap().len(), 2, "{name}");
    }
}

#[test]
fn issued_at_is_kept_to_the_microsecond() {
    let at = day(1) + chrono::TimeDelta::nanoseconds(1_500);
    let stored = day(1) + chrono::TimeDelta::microseconds(1);
    for (name, store) in stores() {
        let v = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), at))
            .unwrap();
        assert_eq!(v.issued_at, stored, "{name}");
        assert_eq!(store.version(v.id).unwrap().unwrap().issued_at, stored, "{name}");
        store.load_predictions(v.id, &catalog(), vec![point(1, 1)]).unwrap();

        // a cutoff inside the same microsecond sees the version in every store
        let inside = day(1) + chrono::TimeDelta::nanoseconds(1_200);
        let found = store
            .scan_elements(&ElementFilter::new().with_cutoff(inside))
            .unwrap();
        assert_eq!(found.len(), 1, "{name}");

        // instants that collapse to one microsecond collide
        let twin = day(1) + chrono::TimeDelta::nanoseconds(1_900);
        let err = store
            .create_version(NewVersion::new(ModelId(1), TimePointId(1), twin))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIssuedAt { .. }), "{name}");
    }
}

#[test]
fn cancelled_scan_is_interrupted() {
    for (name, store) in stores() {
        let v = store.create_version(new_version(1, 1)).unwrap();
        store
            .load_predictions(v.id, &catalog(), vec![point(1, 1), point(2, 2)])
            .unwrap();

        let token = CancellationToken::new();
        let records = store
            .scan_elements_cancellable(&ElementFilter::new(), &token)
            .unwrap();
        assert_eq!(records.len(), 2, "{name}");

        token.cancel();
        let err = store
            .scan_elements_cancellable(&ElementFilter::new(), &token)
            .unwrap_err();
        assert!(matches!(err, StoreError::Interrupted), "{name}");
    }
}
