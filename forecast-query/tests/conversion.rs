//! Kind conversion at query time.

mod common;

use common::*;
use forecast_core::{NewPrediction, PredictionPayload, Scalar};
use serde_json::json;

fn sample_hub(values: &[i64]) -> Hub {
    let hub = Hub::new();
    hub.load(DOCS_MOD, TP1, 1, vec![samples(LOC1, PCT, values)]);
    hub
}

fn converted(hub: &Hub, options: serde_json::Value, kind: &str) -> Vec<Vec<String>> {
    hub.rows(json!({"kinds": [kind], "options": options}))
}

#[test]
fn point_from_samples_mean_and_median() {
    let hub = sample_hub(&[0, 2, 2, 5]);

    let rows = converted(&hub, json!({"convert.point": "mean"}), "point");
    assert_eq!(column(&rows, "kind"), vec!["point"]);
    assert_eq!(column(&rows, "value"), vec!["2.25"]);

    let rows = converted(&hub, json!({"convert.point": "median"}), "point");
    assert_eq!(column(&rows, "value"), vec!["2.0"]);
}

#[test]
fn quantiles_from_samples_sorted_by_level() {
    let hub = sample_hub(&[5, 0, 2]);

    let rows = converted(&hub, json!({"convert.quantile": [0.75, 0.5, 0.25]}), "quantile");
    assert_eq!(column(&rows, "quantile_level"), vec!["0.25", "0.5", "0.75"]);
    assert_eq!(column(&rows, "value"), vec!["1.0", "2.0", "3.5"]);
}

#[test]
fn without_options_nothing_is_derived() {
    let hub = sample_hub(&[0, 2, 5]);
    assert!(hub.rows(json!({"kinds": ["point"]})).is_empty());
}

#[test]
fn native_kind_is_preferred() {
    let hub = Hub::new();
    hub.load(
        DOCS_MOD,
        TP1,
        1,
        vec![point(LOC1, PCT, 42), samples(LOC1, PCT, &[0, 2, 5])],
    );

    let rows = converted(&hub, json!({"convert.point": "mean"}), "point");
    assert_eq!(column(&rows, "value"), vec!["42"]);
}

#[test]
fn converted_and_native_rows_interleave_by_kind() {
    let hub = sample_hub(&[1, 3]);

    let rows = hub.rows(json!({"options": {"convert.point": "mean"}}));
    assert_eq!(column(&rows, "kind"), vec!["point", "sample", "sample"]);
    assert_eq!(column(&rows, "value"), vec!["2.0", "", ""]);
    assert_eq!(column(&rows, "sample"), vec!["", "1", "3"]);
}

#[test]
fn non_numeric_targets_are_not_converted() {
    let hub = Hub::new();
    hub.load(
        DOCS_MOD,
        TP1,
        1,
        vec![NewPrediction::data(
            LOC1,
            SEVERITY,
            PredictionPayload::Sample {
                sample: vec![Scalar::Text("high".into()), Scalar::Text("low".into())],
            },
        )],
    );

    let rows = converted(&hub, json!({"convert.point": "median"}), "point");
    assert!(rows.is_empty());

    let rows = hub.rows(json!({"options": {"convert.point": "median"}}));
    assert_eq!(column(&rows, "sample"), vec!["high", "low"]);
}

#[test]
fn retracted_source_yields_nothing() {
    let hub = sample_hub(&[0, 2, 5]);
    hub.load(
        DOCS_MOD,
        TP1,
        2,
        vec![retract(LOC1, PCT, forecast_core::PredictionKind::Sample)],
    );

    let rows = converted(&hub, json!({"convert.point": "mean"}), "point");
    assert!(rows.is_empty());
}

#[test]
fn conversion_follows_as_of() {
    let hub = sample_hub(&[0, 2, 5]);
    hub.load(DOCS_MOD, TP1, 3, vec![samples(LOC1, PCT, &[10, 20])]);

    let at = |ts: &str| {
        column(
            &hub.rows(json!({
                "kinds": ["point"],
                "as_of": ts,
                "options": {"convert.point": "mean"},
            })),
            "value",
        )
    };
    assert_eq!(at("2011-10-02T00:00:00Z"), vec!["2.3333333333333335"]);
    assert_eq!(at("2011-10-04T00:00:00Z"), vec!["15.0"]);
}
