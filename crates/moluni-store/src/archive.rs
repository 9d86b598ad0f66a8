//! Per-job result records written as JSON files next to the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::write_atomically;
use moluni_core::{
    CalculationJob, CalculationType, InputDescriptor, JobStatus, PropertyRecord, PropertyValue,
    Result,
};

/// Serialized snapshot of one finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultRecord {
    pub id: String,
    pub status: JobStatus,
    #[serde(rename = "submissionTime", skip_serializing_if = "Option::is_none")]
    pub submission_time: Option<DateTime<Utc>>,
    #[serde(rename = "completionTime", skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub input: InputDescriptor,
    #[serde(rename = "calculationType", skip_serializing_if = "Option::is_none")]
    pub calculation_type: Option<CalculationType>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl JobResultRecord {
    pub fn new(job: &CalculationJob, properties: &[PropertyRecord]) -> Self {
        let properties = properties
            .iter()
            .map(|p| {
                let value = PropertyValue::United {
                    value: p.value,
                    units: p.units.clone(),
                };
                (p.name.clone(), value)
            })
            .collect();
        Self {
            id: job.id.clone(),
            status: job.status,
            submission_time: job.submission_time,
            completion_time: job.completion_time,
            input: job.input.clone(),
            calculation_type: job.calculation_type,
            properties,
            diagnostic: job.diagnostic.clone(),
        }
    }
}

/// Directory of `<job-id>.json` result records.
pub struct ResultArchive {
    dir: PathBuf,
}

impl ResultArchive {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// File a record for `job_id` lives at.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Write (or overwrite) the record for a job.
    pub fn write(&self, record: &JobResultRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.id);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomically(&path, &json)?;
        debug!("Archived result for job {} to {}", record.id, path.display());
        Ok(path)
    }

    /// Read a previously archived record.
    pub fn read(&self, job_id: &str) -> Result<Option<JobResultRecord>> {
        match std::fs::read_to_string(self.path_for(job_id)) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
