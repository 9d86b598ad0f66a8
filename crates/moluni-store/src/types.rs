//! Read-side types for the analysis query surface.

use moluni_core::{CalculationJob, CalculationType, JobStatus};
use serde::Serialize;

/// Filter applied to property values in `query_by_property`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyPredicate {
    Any,
    LessThan(f64),
    GreaterThan(f64),
    /// Inclusive on both ends.
    Between(f64, f64),
}

impl PropertyPredicate {
    /// SQL fragment and bound parameters, appended after `property_name = ?1`.
    pub(crate) fn sql(&self) -> (&'static str, Vec<f64>) {
        match *self {
            Self::Any => ("", Vec::new()),
            Self::LessThan(v) => (" AND p.property_value < ?2", vec![v]),
            Self::GreaterThan(v) => (" AND p.property_value > ?2", vec![v]),
            Self::Between(lo, hi) => (
                " AND p.property_value BETWEEN ?2 AND ?3",
                vec![lo.min(hi), lo.max(hi)],
            ),
        }
    }
}

/// A job matched by a property query, with the matched value.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyMatch {
    pub job: CalculationJob,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationTypeCount {
    #[serde(rename = "calculationType")]
    pub calculation_type: Option<CalculationType>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyNameCount {
    pub name: String,
    pub count: i64,
}

/// Summary statistics for one property across all jobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyStats {
    pub name: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample standard deviation; 0 for a single value.
    #[serde(rename = "stdDev")]
    pub std_dev: f64,
}

impl PropertyStats {
    pub(crate) fn from_values(name: &str, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std_dev = if count > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        Some(Self {
            name: name.to_string(),
            count,
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std_dev,
        })
    }
}

/// One row of a lowest/highest listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyExtreme {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    pub value: f64,
}
