//! Runtime types.

use std::time::Duration;

use serde::Serialize;

use moluni_core::config::{DEFAULT_POLL_CONCURRENCY, DEFAULT_STATUS_RETRIES};
use moluni_core::{JobStatus, MoluniConfig, TransportErrorPolicy};
use moluni_remote::StatusReport;

/// Outcome of one `submit_all` run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionReport {
    /// Ids returned by the remote, in submission order.
    #[serde(rename = "jobIds")]
    pub job_ids: Vec<String>,
    /// Number of batches processed (one ledger save each).
    pub batches: usize,
    /// Descriptors that failed preprocessing or submission.
    pub skipped: usize,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Jobs committed in a terminal status and removed from the ledger.
    pub resolved: usize,
    /// Jobs left in the ledger after the pass.
    #[serde(rename = "stillPending")]
    pub still_pending: usize,
    /// Of `still_pending`, how many could not be polled at all.
    pub indeterminate: usize,
}

/// Knobs for a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Status polls in flight at once.
    pub poll_concurrency: usize,
    /// Extra attempts after a transport failure.
    pub status_retries: u32,
    /// Delay before the first retry; doubled for each later one.
    pub retry_backoff: Duration,
    pub transport_errors: TransportErrorPolicy,
    /// Also poll jobs the store holds as unresolved but the ledger lost.
    pub recover_from_store: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            poll_concurrency: DEFAULT_POLL_CONCURRENCY,
            status_retries: DEFAULT_STATUS_RETRIES,
            retry_backoff: Duration::from_millis(500),
            transport_errors: TransportErrorPolicy::Retry,
            recover_from_store: false,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &MoluniConfig) -> Self {
        Self {
            poll_concurrency: config.poll_concurrency,
            status_retries: config.status_retries,
            transport_errors: config.transport_errors,
            ..Self::default()
        }
    }
}

/// What a single status poll established about a job.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The remote reported a terminal status.
    Terminal(StatusReport),
    /// The remote answered with a non-terminal status.
    Pending(JobStatus),
    /// No answer after every retry. Carries the last transport diagnostic.
    Indeterminate(String),
    /// The remote refused the poll outright; asking again will not help.
    Rejected(String),
}
