//! Project catalog: the models, units, targets and time-points queries refer to.
//!
//! The catalog is owned by the surrounding application; this crate only reads
//! it. Lookups go both ways: human-readable name to id (used when resolving
//! query specifications) and id to object (used when projecting rows).

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::types::{ModelId, TargetId, TimePointId, UnitId};

/// Date format used for time-point identifiers in queries and output rows.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Semantic type of a target's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Continuous,
    Discrete,
    Nominal,
    Binary,
    Date,
}

impl TargetType {
    /// Numeric targets are the only ones that support prediction conversion.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Continuous | Self::Discrete)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Discrete => "discrete",
            Self::Nominal => "nominal",
            Self::Binary => "binary",
            Self::Date => "date",
        }
    }
}

/// A forecasting model. The oracle model holds ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub abbreviation: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_oracle: bool,
}

impl Model {
    /// Label used in output rows: abbreviation, falling back to name.
    pub fn display_name(&self) -> &str {
        if self.abbreviation.is_empty() {
            &self.name
        } else {
            &self.abbreviation
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub abbreviation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
}

/// A point in the modeled timeline, optionally starting a season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub id: TimePointId,
    pub date: NaiveDate,
    #[serde(default)]
    pub is_season_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_name: Option<String>,
}

impl TimePoint {
    pub fn date_str(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

/// Catalog as stored in JSON/TOML files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    models: Vec<Model>,
    #[serde(default)]
    units: Vec<Unit>,
    #[serde(default)]
    targets: Vec<Target>,
    #[serde(default)]
    time_points: Vec<TimePoint>,
}

/// Indexed, read-only view of a project's objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "CatalogData", into = "CatalogData")]
pub struct Catalog {
    models: Vec<Model>,
    units: Vec<Unit>,
    targets: Vec<Target>,
    time_points: Vec<TimePoint>,
    model_idx: HashMap<ModelId, usize>,
    unit_idx: HashMap<UnitId, usize>,
    target_idx: HashMap<TargetId, usize>,
    time_point_idx: HashMap<TimePointId, usize>,
    season_labels: HashMap<TimePointId, String>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids or duplicate lookup names.
    pub fn new(
        models: Vec<Model>,
        units: Vec<Unit>,
        targets: Vec<Target>,
        time_points: Vec<TimePoint>,
    ) -> Result<Self> {
        let model_idx = index_unique(&models, |m| m.id, "model")?;
        let unit_idx = index_unique(&units, |u| u.id, "unit")?;
        let target_idx = index_unique(&targets, |t| t.id, "target")?;
        let time_point_idx = index_unique(&time_points, |t| t.id, "time-point")?;

        index_unique(&models, |m| m.abbreviation.clone(), "model abbreviation")?;
        index_unique(&time_points, |t| t.date, "time-point date")?;
        if models.iter().filter(|m| m.is_oracle).count() > 1 {
            return Err(StoreError::InvalidCatalog(
                "more than one oracle model".to_string(),
            ));
        }

        let season_labels = season_labels(&time_points);

        Ok(Self {
            models,
            units,
            targets,
            time_points,
            model_idx,
            unit_idx,
            target_idx,
            time_point_idx,
            season_labels,
        })
    }

    /// Parse a catalog from JSON.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn time_points(&self) -> &[TimePoint] {
        &self.time_points
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.model_idx.get(&id).map(|&i| &self.models[i])
    }

    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.unit_idx.get(&id).map(|&i| &self.units[i])
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.target_idx.get(&id).map(|&i| &self.targets[i])
    }

    pub fn time_point(&self, id: TimePointId) -> Option<&TimePoint> {
        self.time_point_idx.get(&id).map(|&i| &self.time_points[i])
    }

    pub fn model_by_abbreviation(&self, abbreviation: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.abbreviation == abbreviation)
    }

    /// Units names are not enforced unique; the first match wins.
    pub fn unit_by_abbreviation(&self, abbreviation: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.abbreviation == abbreviation)
    }

    /// Target names are not enforced unique; the first match wins.
    pub fn target_by_name(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Look up a time-point by its `YYYY-MM-DD` date string.
    pub fn time_point_by_date(&self, date: &str) -> Option<&TimePoint> {
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
        self.time_points.iter().find(|t| t.date == date)
    }

    /// The project's truth model, if any.
    pub fn oracle_model(&self) -> Option<&Model> {
        self.models.iter().find(|m| m.is_oracle)
    }

    /// Ids of every non-oracle model, in catalog order.
    pub fn forecast_model_ids(&self) -> Vec<ModelId> {
        self.models
            .iter()
            .filter(|m| !m.is_oracle)
            .map(|m| m.id)
            .collect()
    }

    /// Season a time-point falls in: the latest season start on or before it.
    pub fn season_label(&self, id: TimePointId) -> Option<&str> {
        self.season_labels.get(&id).map(String::as_str)
    }
}

impl TryFrom<CatalogData> for Catalog {
    type Error = StoreError;

    fn try_from(data: CatalogData) -> Result<Self> {
        Catalog::new(data.models, data.units, data.targets, data.time_points)
    }
}

impl From<Catalog> for CatalogData {
    fn from(catalog: Catalog) -> Self {
        CatalogData {
            models: catalog.models,
            units: catalog.units,
            targets: catalog.targets,
            time_points: catalog.time_points,
        }
    }
}

fn index_unique<T, K, F>(items: &[T], key: F, what: &str) -> Result<HashMap<K, usize>>
where
    K: std::hash::Hash + Eq + std::fmt::Debug,
    F: Fn(&T) -> K,
{
    let mut index = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let k = key(item);
        if index.contains_key(&k) {
            return Err(StoreError::InvalidCatalog(format!("duplicate {}: {:?}", what, k)));
        }
        index.insert(k, i);
    }
    Ok(index)
}

fn season_labels(time_points: &[TimePoint]) -> HashMap<TimePointId, String> {
    let mut ordered: Vec<&TimePoint> = time_points.iter().collect();
    ordered.sort_by_key(|t| t.date);

    let mut labels = HashMap::new();
    let mut current: Option<&str> = None;
    for tp in ordered {
        if tp.is_season_start {
            current = tp.season_name.as_deref();
        }
        if let Some(name) = current {
            labels.insert(tp.id, name.to_string());
        }
    }
    labels
}
