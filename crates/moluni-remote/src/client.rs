//! Remote client trait and the status report it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::request::CalculationRequest;
use moluni_core::{
    decode_properties, parse_timestamp, CalculationJob, Error, InputDescriptor, JobStatus,
    PropertyRecord, Result,
};

/// Submit/status surface of the external compute service.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Submit a calculation. Returns the id the service assigned.
    /// Failures are `Error::Submission`.
    async fn submit(&self, request: &CalculationRequest) -> Result<String>;

    /// Current status of a job. Transport failures, timeouts included,
    /// are `Error::RemoteStatus`. A refusal that will not change on retry
    /// (unknown job, bad credentials, unreadable body) is
    /// `Error::RemoteRejected`.
    async fn status(&self, job_id: &str) -> Result<StatusReport>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inchi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// What the service says about one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default = "unknown_status")]
    pub status: JobStatus,
    /// Raw property map; decoded explicitly at the storage boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, alias = "error", skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation: Option<CalculationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,
}

fn unknown_status() -> JobStatus {
    JobStatus::Unknown
}

impl StatusReport {
    /// A report with only a status.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            properties: None,
            diagnostic: None,
            metadata: None,
            calculation: None,
            submission_time: None,
            completion_time: None,
        }
    }

    /// Synthetic `ERROR` report carrying a local diagnostic.
    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: Some(diagnostic.into()),
            ..Self::with_status(JobStatus::Error)
        }
    }

    /// Job record implied by this report.
    pub fn to_job(&self, job_id: &str) -> CalculationJob {
        let meta = self.metadata.clone().unwrap_or_default();
        CalculationJob {
            id: job_id.to_string(),
            input: InputDescriptor {
                canonical: meta.smiles,
                alternate: meta.inchi,
                formula: meta.formula,
            },
            calculation_type: self
                .calculation
                .as_ref()
                .and_then(|c| c.kind.as_deref())
                .and_then(|k| k.parse().ok()),
            status: self.status,
            submission_time: self.submission_time.as_deref().and_then(parse_timestamp),
            completion_time: self.completion_time.as_deref().and_then(parse_timestamp),
            diagnostic: self.diagnostic.clone(),
        }
    }

    /// Typed properties, plus one decode error per rejected entry.
    pub fn decoded_properties(&self, job_id: &str) -> (Vec<PropertyRecord>, Vec<Error>) {
        match &self.properties {
            Some(map) => decode_properties(job_id, map),
            None => (Vec::new(), Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moluni_core::CalculationType;
    use serde_json::json;

    #[test]
    fn test_completed_report() {
        let report: StatusReport = serde_json::from_value(json!({
            "job_id": "j1",
            "status": "COMPLETED",
            "metadata": {"smiles": "CCO", "inchi": "InChI=1S/C2H6O", "formula": "C2H6O"},
            "calculation": {"type": "dft"},
            "submission_time": "2025-03-01 12:00:00",
            "completion_time": "2025-03-01T13:00:00Z",
            "properties": {
                "energy": {"value": -5.2, "units": "eV"},
                "homo_lumo_gap": 4.1,
            },
        }))
        .unwrap();

        let job = report.to_job("j1");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.input.canonical.as_deref(), Some("CCO"));
        assert_eq!(job.calculation_type, Some(CalculationType::Dft));
        assert!(job.submission_time.is_some());
        assert!(job.completion_time.is_some());

        let (props, rejected) = report.decoded_properties("j1");
        assert_eq!(props.len(), 2);
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_sparse_reports() {
        let report: StatusReport = serde_json::from_value(json!({})).unwrap();
        assert_eq!(report.status, JobStatus::Unknown);
        assert!(report.decoded_properties("j").0.is_empty());

        let report: StatusReport =
            serde_json::from_value(json!({"status": "ERROR", "error": "out of memory"})).unwrap();
        assert_eq!(report.status, JobStatus::Error);
        assert_eq!(report.to_job("j").diagnostic.as_deref(), Some("out of memory"));

        let report: StatusReport =
            serde_json::from_value(json!({"status": "QUEUED_ON_GPU"})).unwrap();
        assert_eq!(report.status, JobStatus::Unknown);
    }
}
