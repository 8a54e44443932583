//! Prediction kinds and payloads.
//!
//! A payload is a closed sum type with one variant per prediction kind, so
//! every consumer (validation, conversion, row projection) matches
//! exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Representation family of a forecasted distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionKind {
    Bin,
    Named,
    Point,
    Sample,
    Quantile,
    Mean,
    Median,
    Mode,
}

impl PredictionKind {
    /// Every kind, in canonical order.
    pub const ALL: [PredictionKind; 8] = [
        Self::Bin,
        Self::Named,
        Self::Point,
        Self::Sample,
        Self::Quantile,
        Self::Mean,
        Self::Median,
        Self::Mode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bin => "bin",
            Self::Named => "named",
            Self::Point => "point",
            Self::Sample => "sample",
            Self::Quantile => "quantile",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// Stable integer code used by the SQLite store.
    pub fn code(&self) -> i64 {
        match self {
            Self::Bin => 0,
            Self::Named => 1,
            Self::Point => 2,
            Self::Sample => 3,
            Self::Quantile => 4,
            Self::Mean => 5,
            Self::Median => 6,
            Self::Mode => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.code() == code)
    }
}

impl fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value inside a payload. Numeric, boolean or text (dates and
/// nominal categories arrive as text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(_) | Self::Text(_) => None,
        }
    }

    /// Empty or "NA" text (any case) is not an acceptable value.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty() || s.eq_ignore_ascii_case("na"),
            Self::Float(f) => f.is_nan(),
            Self::Bool(_) | Self::Int(_) => false,
        }
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(v) => f.write_str(&format_float(*v)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Render a float so integral values keep a trailing `.0`.
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

/// Parametric distribution families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamedFamily {
    Norm,
    Lnorm,
    Gamma,
    Beta,
    Pois,
    Nbinom,
    Nbinom2,
}

impl NamedFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Norm => "norm",
            Self::Lnorm => "lnorm",
            Self::Gamma => "gamma",
            Self::Beta => "beta",
            Self::Pois => "pois",
            Self::Nbinom => "nbinom",
            Self::Nbinom2 => "nbinom2",
        }
    }

    /// Number of parameters the family takes.
    pub fn param_count(&self) -> usize {
        match self {
            Self::Pois => 1,
            _ => 2,
        }
    }
}

/// Numeric content of a non-retracted prediction element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "lowercase")]
pub enum PredictionPayload {
    Bin {
        cat: Vec<Scalar>,
        prob: Vec<f64>,
    },
    Named {
        family: NamedFamily,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param1: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param2: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        param3: Option<f64>,
    },
    Point {
        value: Scalar,
    },
    Sample {
        sample: Vec<Scalar>,
    },
    Quantile {
        quantile: Vec<f64>,
        value: Vec<Scalar>,
    },
    Mean {
        value: Scalar,
    },
    Median {
        value: Scalar,
    },
    Mode {
        value: Scalar,
    },
}

impl PredictionPayload {
    pub fn kind(&self) -> PredictionKind {
        match self {
            Self::Bin { .. } => PredictionKind::Bin,
            Self::Named { .. } => PredictionKind::Named,
            Self::Point { .. } => PredictionKind::Point,
            Self::Sample { .. } => PredictionKind::Sample,
            Self::Quantile { .. } => PredictionKind::Quantile,
            Self::Mean { .. } => PredictionKind::Mean,
            Self::Median { .. } => PredictionKind::Median,
            Self::Mode { .. } => PredictionKind::Mode,
        }
    }

    /// Serialize to the JSON stored alongside an element.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// SHA-256 hex digest of the payload's canonical JSON.
    ///
    /// Field order comes from the payload type rather than the input, so two
    /// payloads with equal content hash equally.
    pub fn content_hash(&self) -> Result<String> {
        let canonical = serde_json::to_value(self)?.to_string();
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in PredictionKind::ALL {
            assert_eq!(PredictionKind::parse(kind.as_str()), Some(kind));
            assert_eq!(PredictionKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(PredictionKind::parse("histogram"), None);
    }

    #[test]
    fn test_payload_json_tagged_by_class() {
        let payload = PredictionPayload::Sample {
            sample: vec![Scalar::Int(0), Scalar::Int(2), Scalar::Float(5.5)],
        };
        let json = payload.to_json().unwrap();
        assert!(json.contains(r#""class":"sample""#));
        assert_eq!(PredictionPayload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn test_named_payload_omits_missing_params() {
        let payload = PredictionPayload::from_json(r#"{"class":"named","family":"pois","param1":1.1}"#)
            .unwrap();
        assert_eq!(
            payload,
            PredictionPayload::Named {
                family: NamedFamily::Pois,
                param1: Some(1.1),
                param2: None,
                param3: None,
            }
        );
        assert!(!payload.to_json().unwrap().contains("param2"));
    }

    #[test]
    fn test_content_hash_ignores_input_key_order() {
        let a = PredictionPayload::from_json(r#"{"class":"bin","cat":["a","b"],"prob":[0.5,0.5]}"#)
            .unwrap();
        let b = PredictionPayload::from_json(r#"{"prob":[0.5,0.5],"class":"bin","cat":["a","b"]}"#)
            .unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
        assert_eq!(a.content_hash().unwrap().len(), 64);

        let c = PredictionPayload::Point {
            value: Scalar::Int(5),
        };
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn test_scalar_display() {
        assert_eq!(Scalar::Int(5).to_string(), "5");
        assert_eq!(Scalar::Float(2.0).to_string(), "2.0");
        assert_eq!(Scalar::Float(2.25).to_string(), "2.25");
        assert_eq!(Scalar::Bool(true).to_string(), "true");
        assert_eq!(Scalar::from("2020-01-01").to_string(), "2020-01-01");
    }

    #[test]
    fn test_scalar_blank() {
        assert!(Scalar::from("NA").is_blank());
        assert!(Scalar::from("").is_blank());
        assert!(!Scalar::from("x").is_blank());
        assert!(!Scalar::Int(0).is_blank());
    }
}
