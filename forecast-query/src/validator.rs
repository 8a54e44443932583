//! Query specification validation.
//!
//! A specification arrives as a JSON mapping of human-readable names. It is
//! checked in two passes: structure first (mapping, known keys, value types),
//! returning early on any problem, then name resolution, timestamp parsing
//! and option checks, where every problem is collected before the query is
//! rejected.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use forecast_core::{
    Catalog, ModelId, PredictionKind, TargetId, TimePointId, UnitId, validate_quantile_levels,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{QueryError, Result, ValidationError};

const FORECAST_KEYS: [&str; 7] = [
    "models",
    "units",
    "targets",
    "time_points",
    "kinds",
    "as_of",
    "options",
];

const TRUTH_KEYS: [&str; 4] = ["units", "targets", "time_points", "as_of"];

const ZONED_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// How a point estimate is derived from samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointReduction {
    Mean,
    Median,
}

/// Conversion flags from the `options` mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// `convert.bin`
    pub bin: bool,
    /// `convert.point`
    pub point: Option<PointReduction>,
    /// `convert.quantile`, in the order given.
    pub quantile: Option<Vec<f64>>,
    /// `convert.sample`
    pub sample: Option<u64>,
}

impl ConversionOptions {
    pub fn is_empty(&self) -> bool {
        !self.bin && self.point.is_none() && self.quantile.is_none() && self.sample.is_none()
    }

    /// Kinds the caller opted in to receiving by conversion.
    pub fn destinations(&self) -> Vec<PredictionKind> {
        let mut kinds = Vec::new();
        if self.bin {
            kinds.push(PredictionKind::Bin);
        }
        if self.point.is_some() {
            kinds.push(PredictionKind::Point);
        }
        if self.sample.is_some() {
            kinds.push(PredictionKind::Sample);
        }
        if self.quantile.is_some() {
            kinds.push(PredictionKind::Quantile);
        }
        kinds
    }
}

/// A validated forecast query with every name resolved to an id.
///
/// `model_ids` is never empty for a catalog with forecast models: when the
/// specification names none, it holds every non-oracle model. The other id
/// lists are empty when unrestricted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastQuery {
    pub model_ids: Vec<ModelId>,
    pub unit_ids: Vec<UnitId>,
    pub target_ids: Vec<TargetId>,
    pub time_point_ids: Vec<TimePointId>,
    pub kinds: Vec<PredictionKind>,
    /// `None` means latest.
    pub as_of: Option<DateTime<Utc>>,
    pub options: ConversionOptions,
}

/// A validated truth query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruthQuery {
    pub unit_ids: Vec<UnitId>,
    pub target_ids: Vec<TargetId>,
    pub time_point_ids: Vec<TimePointId>,
    pub as_of: Option<DateTime<Utc>>,
}

/// Validate a forecast query specification against `catalog`.
pub fn validate_forecast_query(catalog: &Catalog, spec: &Value) -> Result<ForecastQuery> {
    let fields = check_shape(spec, &FORECAST_KEYS)?;
    let mut errors = Vec::new();

    let mut model_ids = resolve_names(&fields, "models", "model", &mut errors, |name| {
        catalog.model_by_abbreviation(name).map(|m| m.id)
    });
    let unit_ids = resolve_names(&fields, "units", "unit", &mut errors, |name| {
        catalog.unit_by_abbreviation(name).map(|u| u.id)
    });
    let target_ids = resolve_names(&fields, "targets", "target", &mut errors, |name| {
        catalog.target_by_name(name).map(|t| t.id)
    });
    let time_point_ids = resolve_time_points(catalog, &fields, &mut errors);

    let mut kinds = Vec::new();
    for &name in fields.list("kinds") {
        match PredictionKind::parse(name) {
            Some(kind) if !kinds.contains(&kind) => kinds.push(kind),
            Some(_) => {}
            None => errors.push(ValidationError::InvalidShape(format!(
                "'{}' is not a prediction kind",
                name
            ))),
        }
    }

    let as_of = resolve_as_of(&fields, &mut errors);
    let options = parse_options(fields.options, &mut errors);

    if !errors.is_empty() {
        tracing::debug!(errors = errors.len(), "Rejected forecast query");
        return Err(QueryError::Invalid { errors });
    }

    if model_ids.is_empty() {
        model_ids = catalog.forecast_model_ids();
    }

    let query = ForecastQuery {
        model_ids,
        unit_ids,
        target_ids,
        time_point_ids,
        kinds,
        as_of,
        options,
    };
    tracing::debug!(
        models = query.model_ids.len(),
        units = query.unit_ids.len(),
        targets = query.target_ids.len(),
        time_points = query.time_point_ids.len(),
        as_of = ?query.as_of,
        "Validated forecast query"
    );
    Ok(query)
}

/// Validate a truth query specification against `catalog`.
pub fn validate_truth_query(catalog: &Catalog, spec: &Value) -> Result<TruthQuery> {
    let fields = check_shape(spec, &TRUTH_KEYS)?;
    let mut errors = Vec::new();

    let unit_ids = resolve_names(&fields, "units", "unit", &mut errors, |name| {
        catalog.unit_by_abbreviation(name).map(|u| u.id)
    });
    let target_ids = resolve_names(&fields, "targets", "target", &mut errors, |name| {
        catalog.target_by_name(name).map(|t| t.id)
    });
    let time_point_ids = resolve_time_points(catalog, &fields, &mut errors);
    let as_of = resolve_as_of(&fields, &mut errors);

    if !errors.is_empty() {
        tracing::debug!(errors = errors.len(), "Rejected truth query");
        return Err(QueryError::Invalid { errors });
    }

    Ok(TruthQuery {
        unit_ids,
        target_ids,
        time_point_ids,
        as_of,
    })
}

/// Parse an absolute, zone-qualified instant.
pub fn parse_as_of(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }

    let naive = NAIVE_FORMATS
        .iter()
        .any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || NaiveDate::parse_from_str(s, forecast_core::DATE_FORMAT).is_ok();
    if naive {
        Err(format!("'{}' has no timezone", s))
    } else {
        Err(format!("'{}' could not be parsed as a timestamp", s))
    }
}

/// Structurally checked top-level fields.
struct Fields<'a> {
    lists: Vec<(&'a str, Vec<&'a str>)>,
    as_of: Option<&'a str>,
    options: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn list(&self, key: &str) -> &[&'a str] {
        self.lists
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }
}

fn check_shape<'a>(spec: &'a Value, allowed: &[&str]) -> Result<Fields<'a>> {
    let shape_error = |message: String| QueryError::Invalid {
        errors: vec![ValidationError::InvalidShape(message)],
    };

    let Value::Object(map) = spec else {
        return Err(shape_error("query specification is not a mapping".into()));
    };

    let mut unknown: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|k| !allowed.contains(k))
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(shape_error(format!(
            "unrecognized keys: {}",
            unknown.join(", ")
        )));
    }

    let mut errors = Vec::new();
    let mut fields = Fields {
        lists: Vec::new(),
        as_of: None,
        options: None,
    };
    for (key, value) in map {
        match key.as_str() {
            "as_of" => match value {
                Value::String(s) => fields.as_of = Some(s.as_str()),
                _ => errors.push(ValidationError::InvalidShape(
                    "'as_of' must be a string".into(),
                )),
            },
            "options" => match value {
                Value::Object(options) => fields.options = Some(options),
                _ => errors.push(ValidationError::InvalidShape(
                    "'options' must be a mapping".into(),
                )),
            },
            list_key => {
                let items = value.as_array().and_then(|items| {
                    items.iter().map(Value::as_str).collect::<Option<Vec<_>>>()
                });
                match items {
                    Some(items) => fields.lists.push((list_key, items)),
                    None => errors.push(ValidationError::InvalidShape(format!(
                        "'{}' must be a list of strings",
                        list_key
                    ))),
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(fields)
    } else {
        Err(QueryError::Invalid { errors })
    }
}

fn resolve_names<T: PartialEq>(
    fields: &Fields<'_>,
    key: &str,
    what: &str,
    errors: &mut Vec<ValidationError>,
    lookup: impl Fn(&str) -> Option<T>,
) -> Vec<T> {
    let mut ids = Vec::new();
    for &name in fields.list(key) {
        match lookup(name) {
            Some(id) if !ids.contains(&id) => ids.push(id),
            Some(_) => {}
            None => errors.push(ValidationError::UnknownReference(format!(
                "{} '{}' not found",
                what, name
            ))),
        }
    }
    ids
}

fn resolve_time_points(
    catalog: &Catalog,
    fields: &Fields<'_>,
    errors: &mut Vec<ValidationError>,
) -> Vec<TimePointId> {
    let mut ids = Vec::new();
    for &date in fields.list("time_points") {
        if NaiveDate::parse_from_str(date, forecast_core::DATE_FORMAT).is_err() {
            errors.push(ValidationError::InvalidShape(format!(
                "time point '{}' is not a YYYY-MM-DD date",
                date
            )));
            continue;
        }
        match catalog.time_point_by_date(date) {
            Some(tp) if !ids.contains(&tp.id) => ids.push(tp.id),
            Some(_) => {}
            None => errors.push(ValidationError::UnknownReference(format!(
                "time point '{}' not found",
                date
            ))),
        }
    }
    ids
}

fn resolve_as_of(fields: &Fields<'_>, errors: &mut Vec<ValidationError>) -> Option<DateTime<Utc>> {
    let s = fields.as_of?;
    match parse_as_of(s) {
        Ok(dt) => Some(dt),
        Err(message) => {
            errors.push(ValidationError::BadTimestamp(message));
            None
        }
    }
}

fn parse_options(
    options: Option<&Map<String, Value>>,
    errors: &mut Vec<ValidationError>,
) -> ConversionOptions {
    let mut parsed = ConversionOptions::default();
    let Some(options) = options else {
        return parsed;
    };

    for (key, value) in options {
        match key.as_str() {
            "convert.bin" => match value.as_bool() {
                Some(flag) => parsed.bin = flag,
                None => errors.push(ValidationError::BadOption(
                    "convert.bin must be true or false".into(),
                )),
            },
            "convert.point" => match value.as_str() {
                Some("mean") => parsed.point = Some(PointReduction::Mean),
                Some("median") => parsed.point = Some(PointReduction::Median),
                _ => errors.push(ValidationError::BadOption(format!(
                    "convert.point must be \"mean\" or \"median\", got {}",
                    value
                ))),
            },
            "convert.quantile" => {
                let levels = value
                    .as_array()
                    .and_then(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>());
                match levels {
                    Some(levels) => match validate_quantile_levels(&levels) {
                        Ok(()) => parsed.quantile = Some(levels),
                        Err(message) => errors.push(ValidationError::BadOption(format!(
                            "convert.quantile: {}",
                            message
                        ))),
                    },
                    None => errors.push(ValidationError::BadOption(
                        "convert.quantile must be a list of numbers".into(),
                    )),
                }
            }
            "convert.sample" => match value.as_u64().filter(|n| *n > 0) {
                Some(n) => parsed.sample = Some(n),
                None => errors.push(ValidationError::BadOption(format!(
                    "convert.sample must be a positive integer, got {}",
                    value
                ))),
            },
            other => errors.push(ValidationError::BadOption(format!(
                "unrecognized option '{}'",
                other
            ))),
        }
    }
    parsed
}
