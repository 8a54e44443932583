//! Structural validation of incoming prediction payloads.

use crate::catalog::TargetType;
use crate::error::{Result, StoreError};
use crate::prediction::{NamedFamily, PredictionKind, PredictionPayload, Scalar};

/// Relative tolerance for bin probabilities summing to 1.
const BIN_SUM_REL_TOL: f64 = 0.001;

/// Relative tolerance when checking quantile values are non-decreasing.
const QUANTILE_LE_REL_TOL: f64 = 1e-5;

/// Validate a list of quantile levels: non-empty, each in [0, 1], unique.
///
/// Shared by payload validation and by the query-side `convert.quantile`
/// option.
pub fn validate_quantile_levels(levels: &[f64]) -> std::result::Result<(), String> {
    if levels.is_empty() {
        return Err("quantile list was empty".to_string());
    }
    if levels.iter().any(|q| !(0.0..=1.0).contains(q)) {
        return Err(format!("quantile levels must be numbers in [0, 1]: {:?}", levels));
    }
    let mut sorted = levels.to_vec();
    sorted.sort_by(f64::total_cmp);
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(format!("quantile levels must be unique: {:?}", levels));
    }
    Ok(())
}

/// Validate a payload against its declared kind and its target's type.
pub fn validate_payload(
    kind: PredictionKind,
    payload: &PredictionPayload,
    target_type: TargetType,
) -> Result<()> {
    if payload.kind() != kind {
        return invalid(format!(
            "declared class {} does not match payload class {}",
            kind,
            payload.kind()
        ));
    }

    match payload {
        PredictionPayload::Bin { cat, prob } => validate_bin(cat, prob, target_type),
        PredictionPayload::Named {
            family,
            param1,
            param2,
            param3,
        } => validate_named(*family, [*param1, *param2, *param3], target_type),
        PredictionPayload::Point { value } | PredictionPayload::Mode { value } => {
            validate_value(value, target_type)
        }
        PredictionPayload::Mean { value } => {
            if matches!(target_type, TargetType::Nominal | TargetType::Binary) {
                return invalid(format!("mean is not valid for {} targets", target_type.as_str()));
            }
            validate_value(value, target_type)
        }
        PredictionPayload::Median { value } => {
            if target_type == TargetType::Nominal {
                return invalid("median is not valid for nominal targets");
            }
            validate_value(value, target_type)
        }
        PredictionPayload::Sample { sample } => {
            if sample.is_empty() {
                return invalid("sample list was empty");
            }
            sample.iter().try_for_each(|s| validate_value(s, target_type))
        }
        PredictionPayload::Quantile { quantile, value } => {
            validate_quantile(quantile, value, target_type)
        }
    }
}

fn invalid(message: impl Into<String>) -> Result<()> {
    Err(StoreError::InvalidPrediction(message.into()))
}

/// Value must be non-blank and of a shape compatible with the target type.
fn validate_value(value: &Scalar, target_type: TargetType) -> Result<()> {
    if value.is_blank() {
        return invalid("values cannot be empty, \"NA\" or NaN");
    }
    let compatible = match (target_type, value) {
        (TargetType::Continuous, Scalar::Int(_) | Scalar::Float(_)) => true,
        (TargetType::Discrete, Scalar::Int(_)) => true,
        (TargetType::Discrete, Scalar::Float(f)) => f.fract() == 0.0,
        (TargetType::Nominal, Scalar::Text(_)) => true,
        (TargetType::Binary, Scalar::Bool(_)) => true,
        (TargetType::Date, Scalar::Text(s)) => {
            chrono::NaiveDate::parse_from_str(s, crate::catalog::DATE_FORMAT).is_ok()
        }
        _ => false,
    };
    if !compatible {
        return invalid(format!(
            "value {} is not compatible with {} targets",
            value,
            target_type.as_str()
        ));
    }
    Ok(())
}

fn validate_bin(cat: &[Scalar], prob: &[f64], target_type: TargetType) -> Result<()> {
    if cat.len() != prob.len() {
        return invalid(format!(
            "cat and prob must have the same length: |cat|={}, |prob|={}",
            cat.len(),
            prob.len()
        ));
    }
    if cat.is_empty() {
        return invalid("bin prediction has no categories");
    }
    cat.iter().try_for_each(|c| validate_value(c, target_type))?;

    if prob.iter().any(|p| !(0.0..=1.0).contains(p)) {
        return invalid(format!("probabilities must be numbers in [0, 1]: {:?}", prob));
    }
    let sum: f64 = prob.iter().sum();
    if (sum - 1.0).abs() > BIN_SUM_REL_TOL * sum.abs().max(1.0) {
        return invalid(format!("probabilities must sum to 1.0: sum={}", sum));
    }
    if target_type == TargetType::Binary && cat.len() != 2 {
        return invalid("binary targets need exactly two categories");
    }
    Ok(())
}

fn validate_named(
    family: NamedFamily,
    params: [Option<f64>; 3],
    target_type: TargetType,
) -> Result<()> {
    let family_ok = match target_type {
        TargetType::Continuous => matches!(
            family,
            NamedFamily::Norm | NamedFamily::Lnorm | NamedFamily::Gamma | NamedFamily::Beta
        ),
        TargetType::Discrete => matches!(
            family,
            NamedFamily::Pois | NamedFamily::Nbinom | NamedFamily::Nbinom2
        ),
        _ => false,
    };
    if !family_ok {
        return invalid(format!(
            "family {} is not valid for {} targets",
            family.as_str(),
            target_type.as_str()
        ));
    }

    let given = params.iter().take_while(|p| p.is_some()).count();
    let total = params.iter().filter(|p| p.is_some()).count();
    if given != total || total != family.param_count() {
        return invalid(format!(
            "family {} takes {} parameter(s), got {}",
            family.as_str(),
            family.param_count(),
            total
        ));
    }

    let p1 = params[0].unwrap_or_default();
    let p2 = params[1].unwrap_or_default();
    let in_range = match family {
        NamedFamily::Norm | NamedFamily::Lnorm => p2 >= 0.0,
        NamedFamily::Gamma | NamedFamily::Beta | NamedFamily::Nbinom2 => p1 > 0.0 && p2 > 0.0,
        NamedFamily::Pois => p1 > 0.0,
        NamedFamily::Nbinom => p1 > 0.0 && (0.0..=1.0).contains(&p2),
    };
    if !in_range {
        return invalid(format!("parameters out of range for family {}", family.as_str()));
    }
    Ok(())
}

fn validate_quantile(levels: &[f64], values: &[Scalar], target_type: TargetType) -> Result<()> {
    if matches!(target_type, TargetType::Nominal | TargetType::Binary) {
        return invalid(format!(
            "quantile is not valid for {} targets",
            target_type.as_str()
        ));
    }
    if levels.len() != values.len() {
        return invalid(format!(
            "quantile and value must have the same length: |quantile|={}, |value|={}",
            levels.len(),
            values.len()
        ));
    }
    validate_quantile_levels(levels).map_err(StoreError::InvalidPrediction)?;
    values.iter().try_for_each(|v| validate_value(v, target_type))?;

    let mut pairs: Vec<(f64, &Scalar)> = levels.iter().copied().zip(values).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let non_decreasing = pairs.windows(2).all(|w| match (w[0].1, w[1].1) {
        (Scalar::Text(a), Scalar::Text(b)) => a <= b,
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a <= b || (a - b).abs() <= QUANTILE_LE_REL_TOL * b.abs().max(a.abs()),
            _ => false,
        },
    });
    if !non_decreasing {
        return invalid("quantile values must be non-decreasing as quantile levels increase");
    }
    Ok(())
}
