//! Calculation job model: lifecycle status, calculation types, properties.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle status of a calculation job.
///
/// `COMPLETED`, `FAILED` and `ERROR` are terminal; nothing leaves them.
/// Serialized upper case; decoded through [`JobStatus::parse`], so any case
/// is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Error,
    /// Anything the remote reports that we do not recognise.
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse: unrecognised strings become `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" => Self::Submitted,
            "RUNNING" => Self::Running,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "ERROR" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of calculation requested from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationType {
    /// Density functional theory single point.
    Dft,
    /// Molecular dynamics run.
    Md,
}

impl CalculationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dft => "dft",
            Self::Md => "md",
        }
    }

    /// Default solver parameters sent with every request of this type.
    pub fn parameters(self) -> serde_json::Value {
        match self {
            Self::Dft => serde_json::json!({
                "functional": "PBE",
                "basis_set": "def2-SVP",
                "task": "single_point",
            }),
            Self::Md => serde_json::json!({
                "ensemble": "NVT",
                "temperature": 300,
                "steps": 1000,
                "timestep": 1.0,
            }),
        }
    }
}

impl std::fmt::Display for CalculationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CalculationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dft" => Ok(Self::Dft),
            "md" => Ok(Self::Md),
            other => Err(Error::Config(format!(
                "unknown calculation type '{}' (expected dft|md)",
                other
            ))),
        }
    }
}

/// What a job computes on. Informational only, never used for identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Canonical identifier, e.g. a SMILES string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,
    /// Alternate canonical form, e.g. an InChI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate: Option<String>,
    /// Empirical formula.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// One externally tracked unit of computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationJob {
    pub id: String,
    pub input: InputDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculation_type: Option<CalculationType>,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Error text reported by the remote or the transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl CalculationJob {
    /// A freshly submitted job.
    pub fn submitted(
        id: impl Into<String>,
        input: InputDescriptor,
        calculation_type: CalculationType,
        submission_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            input,
            calculation_type: Some(calculation_type),
            status: JobStatus::Submitted,
            submission_time: Some(submission_time),
            completion_time: None,
            diagnostic: None,
        }
    }
}

/// A scalar property value, with or without units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    United { value: f64, units: Option<String> },
    Scalar(f64),
}

impl PropertyValue {
    pub fn value(&self) -> f64 {
        match self {
            Self::United { value, .. } | Self::Scalar(value) => *value,
        }
    }

    pub fn units(&self) -> Option<&str> {
        match self {
            Self::United { units, .. } => units.as_deref(),
            Self::Scalar(_) => None,
        }
    }
}

/// One named result value of a job. Names are unique per job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub job_id: String,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl PropertyRecord {
    pub fn new(job_id: &str, name: &str, value: PropertyValue) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            value: value.value(),
            units: value.units().map(str::to_string),
        }
    }
}

/// Decode one raw property. Accepts a bare number or
/// `{"value": <number>, "units": <string|null>}`; anything else is rejected.
pub fn decode_property(name: &str, raw: &serde_json::Value) -> Result<PropertyValue> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(PropertyValue::Scalar)
            .ok_or_else(|| Error::Decode(format!("property '{}': number out of range", name))),
        serde_json::Value::Object(obj) => {
            let value = obj
                .get("value")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| {
                    Error::Decode(format!("property '{}': missing numeric 'value'", name))
                })?;
            let units = match obj.get("units") {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::String(u)) => Some(u.clone()),
                Some(other) => {
                    return Err(Error::Decode(format!(
                        "property '{}': units must be a string, got {}",
                        name, other
                    )))
                }
            };
            Ok(PropertyValue::United { value, units })
        }
        other => Err(Error::Decode(format!(
            "property '{}': unrecognised shape {}",
            name, other
        ))),
    }
}

/// Decode a whole property map. Returns the accepted records and one
/// error per rejected entry.
pub fn decode_properties(
    job_id: &str,
    raw: &serde_json::Map<String, serde_json::Value>,
) -> (Vec<PropertyRecord>, Vec<Error>) {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    for (name, value) in raw {
        match decode_property(name, value) {
            Ok(v) => records.push(PropertyRecord::new(job_id, name, v)),
            Err(e) => rejected.push(e),
        }
    }
    (records, rejected)
}

/// Parse a remote timestamp: RFC 3339, or naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
