//! Version listing, snapshots and deletion

use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Args;
use forecast_core::{ForecastVersion, VersionId};
use forecast_query::QueryEngine;
use serde::Serialize;
use tracing::info;

use super::Hub;
use crate::config::HubConfig;

#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Model abbreviation
    #[arg(long)]
    pub model: String,

    /// Time-point date (YYYY-MM-DD)
    #[arg(long)]
    pub time_point: String,
}

#[derive(Args, Debug)]
pub struct DeleteVersionArgs {
    /// Version to delete; must be the newest of its model and time-point
    pub id: i64,
}

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Version whose full state to print
    pub id: i64,

    /// Also list retracted cells
    #[arg(long)]
    pub include_retracted: bool,
}

/// One line of `versions` output.
#[derive(Debug, Serialize)]
struct VersionLine {
    #[serde(flatten)]
    version: ForecastVersion,
    elements: usize,
}

pub fn list(args: VersionsArgs, config: &HubConfig) -> Result<()> {
    let hub = Hub::open(config)?;
    let versions = list_versions(&hub, &args)?;
    if versions.is_empty() {
        println!("No versions for {} / {}", args.model, args.time_point);
    }
    for line in versions {
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn list_versions(hub: &Hub, args: &VersionsArgs) -> Result<Vec<VersionLine>> {
    let model = hub
        .catalog
        .model_by_abbreviation(&args.model)
        .ok_or_else(|| anyhow!("model '{}' not found", args.model))?;
    let time_point = hub
        .catalog
        .time_point_by_date(&args.time_point)
        .ok_or_else(|| anyhow!("time-point '{}' not found", args.time_point))?;

    hub.store
        .versions_for(model.id, time_point.id)?
        .into_iter()
        .map(|version| -> Result<VersionLine> {
            let elements = hub.store.elements_for_version(version.id)?.len();
            Ok(VersionLine { version, elements })
        })
        .collect()
}

pub fn delete(args: DeleteVersionArgs, config: &HubConfig) -> Result<()> {
    let hub = Hub::open(config)?;
    let id = VersionId(args.id);
    hub.store.delete_version(id)?;
    info!(version_id = %id, "Deleted version");
    println!("Deleted version {}", id);
    Ok(())
}

pub fn snapshot(args: SnapshotArgs, config: &HubConfig) -> Result<()> {
    let hub = Hub::open(config)?;
    let engine = QueryEngine::new(Arc::clone(&hub.store), Arc::clone(&hub.catalog))
        .with_config(config.query.to_query_config());
    for cell in engine.version_snapshot(VersionId(args.id), args.include_retracted)? {
        let key = &cell.cell.key;
        let line = serde_json::json!({
            "unit": hub.catalog.unit(key.unit_id).map(|u| u.abbreviation.as_str()),
            "target": hub.catalog.target(key.target_id).map(|t| t.name.as_str()),
            "kind": key.kind,
            "version_id": cell.cell.version_id,
            "retracted": cell.cell.is_retracted,
            "prediction": cell.payload,
        });
        println!("{}", line);
    }
    Ok(())
}
