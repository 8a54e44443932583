//! Create a version and load predictions into it

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::Args;
use forecast_core::{
    Catalog, ForecastVersion, LoadSummary, NewPrediction, NewVersion, PredictionKind,
    PredictionPayload,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use super::Hub;
use crate::config::HubConfig;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Model abbreviation
    #[arg(long)]
    pub model: String,

    /// Time-point date (YYYY-MM-DD)
    #[arg(long)]
    pub time_point: String,

    /// Issue instant with a timezone, e.g. 2011-10-02T12:00:00Z (default: now)
    #[arg(long)]
    pub issued_at: Option<String>,

    /// Free-form version label
    #[arg(long)]
    pub label: Option<String>,

    /// JSON list of {unit, target, class, prediction} objects
    pub file: PathBuf,
}

/// One prediction as written in a load file. A null `prediction` retracts
/// the cell.
#[derive(Debug, Deserialize)]
struct LoadRow {
    unit: String,
    target: String,
    class: PredictionKind,
    prediction: Option<Map<String, Value>>,
}

pub fn run(args: LoadArgs, config: &HubConfig) -> Result<()> {
    let hub = Hub::open(config)?;
    let (version, summary) = load_file(&hub, &args)?;
    println!(
        "Loaded version {} ({} / {}): {} elements written, {} retractions, {} unchanged",
        version.id,
        args.model,
        args.time_point,
        summary.inserted,
        summary.retractions,
        summary.skipped_duplicates
    );
    Ok(())
}

/// Create the version and load the file as one store write. A rejected
/// load leaves no version behind.
pub fn load_file(hub: &Hub, args: &LoadArgs) -> Result<(ForecastVersion, LoadSummary)> {
    let catalog = hub.catalog.as_ref();
    let model = catalog
        .model_by_abbreviation(&args.model)
        .ok_or_else(|| anyhow!("model '{}' not found", args.model))?;
    let time_point = catalog
        .time_point_by_date(&args.time_point)
        .ok_or_else(|| anyhow!("time-point '{}' not found", args.time_point))?;
    let issued_at = match &args.issued_at {
        Some(s) => forecast_query::parse_as_of(s).map_err(|e| anyhow!("--issued-at: {}", e))?,
        None => Utc::now(),
    };

    let contents = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let predictions = parse_predictions(catalog, &contents)?;

    let mut new = NewVersion::new(model.id, time_point.id, issued_at);
    if let Some(label) = &args.label {
        new = new.with_label(label);
    }
    let (version, summary) = hub.store.create_and_load(new, catalog, predictions)?;
    info!(
        version_id = %version.id,
        inserted = summary.inserted,
        retractions = summary.retractions,
        skipped = summary.skipped_duplicates,
        "Loaded predictions"
    );
    Ok((version, summary))
}

/// Parse a load file, resolving unit abbreviations and target names.
fn parse_predictions(catalog: &Catalog, contents: &str) -> Result<Vec<NewPrediction>> {
    let rows: Vec<LoadRow> = serde_json::from_str(contents).context("parsing predictions")?;
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| to_prediction(catalog, row).with_context(|| format!("prediction #{}", i + 1)))
        .collect()
}

fn to_prediction(catalog: &Catalog, row: LoadRow) -> Result<NewPrediction> {
    let unit = catalog
        .unit_by_abbreviation(&row.unit)
        .ok_or_else(|| anyhow!("unit '{}' not found", row.unit))?;
    let target = catalog
        .target_by_name(&row.target)
        .ok_or_else(|| anyhow!("target '{}' not found", row.target))?;

    let Some(mut fields) = row.prediction else {
        return Ok(NewPrediction::retraction(unit.id, target.id, row.class));
    };
    fields.insert("class".into(), Value::from(row.class.as_str()));
    let payload: PredictionPayload = serde_json::from_value(Value::Object(fields))?;
    Ok(NewPrediction::data(unit.id, target.id, payload))
}
