//! Reconciliation poller: drains the pending ledger toward terminal states.
//!
//! One pass loads the ledger, polls every id (bounded concurrency, results
//! consumed in ledger order), commits terminal results through the job
//! store and saves the surviving set once at the end. A crash before that
//! save only means resolved jobs get polled again, which the store absorbs.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::types::{PollOutcome, ReconcileOptions, ReconciliationReport};
use moluni_core::{
    CalculationJob, Error, InputDescriptor, JobStatus, PropertyRecord, Result,
    TransportErrorPolicy,
};
use moluni_remote::{RemoteJobClient, StatusReport};
use moluni_store::{JobResultRecord, JobStore, PendingLedger, ResultArchive};

pub struct ReconciliationPoller {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PendingLedger>,
    client: Arc<dyn RemoteJobClient>,
    archive: Option<ResultArchive>,
    options: ReconcileOptions,
}

impl ReconciliationPoller {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PendingLedger>,
        client: Arc<dyn RemoteJobClient>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            ledger,
            client,
            archive: None,
            options,
        }
    }

    /// Also write a per-job result record for every terminal job.
    pub fn with_archive(mut self, archive: ResultArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Run one reconciliation pass.
    ///
    /// A store failure aborts the pass before the ledger is saved, leaving
    /// the previous durable ledger in place for the next run.
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let mut pending = self.ledger.load()?;

        if self.options.recover_from_store {
            let mut recovered = 0;
            for id in self.store.unresolved_job_ids()? {
                if pending.insert(id) {
                    recovered += 1;
                }
            }
            if recovered > 0 {
                info!("Recovered {} unresolved jobs from the store", recovered);
            }
        }

        if pending.is_empty() {
            debug!("No pending jobs");
            return Ok(ReconciliationReport::default());
        }

        info!("Reconciling {} pending jobs", pending.len());
        let ids: Vec<String> = pending.iter().cloned().collect();
        let concurrency = self.options.poll_concurrency.max(1);
        let mut polls = stream::iter(ids)
            .map(|id| async move {
                let outcome = self.poll(&id).await;
                (id, outcome)
            })
            .buffered(concurrency);

        let mut report = ReconciliationReport::default();
        while let Some((id, outcome)) = polls.next().await {
            match outcome {
                PollOutcome::Terminal(status) => {
                    self.commit(&id, &status)?;
                    pending.shift_remove(&id);
                    report.resolved += 1;
                }
                PollOutcome::Pending(status) => {
                    debug!("Job {} still {}", id, status);
                }
                PollOutcome::Rejected(diagnostic) => {
                    warn!("Job {} rejected by the remote, recording ERROR: {}", id, diagnostic);
                    self.commit(&id, &StatusReport::error(diagnostic))?;
                    pending.shift_remove(&id);
                    report.resolved += 1;
                }
                PollOutcome::Indeterminate(diagnostic) => match self.options.transport_errors {
                    TransportErrorPolicy::Retry => {
                        warn!(
                            "Job {} could not be polled, keeping it pending: {}",
                            id, diagnostic
                        );
                        report.indeterminate += 1;
                    }
                    TransportErrorPolicy::Terminal => {
                        warn!("Job {} could not be polled, recording ERROR: {}", id, diagnostic);
                        self.commit(&id, &StatusReport::error(diagnostic))?;
                        pending.shift_remove(&id);
                        report.resolved += 1;
                    }
                },
            }
        }

        report.still_pending = pending.len();
        self.ledger.save(&pending)?;
        info!(
            "Reconciliation done: {} resolved, {} still pending ({} unreachable)",
            report.resolved, report.still_pending, report.indeterminate
        );
        Ok(report)
    }

    /// Poll one job, retrying transport failures with exponential backoff.
    async fn poll(&self, id: &str) -> PollOutcome {
        let mut backoff = self.options.retry_backoff;
        let mut attempt = 0;
        loop {
            match self.client.status(id).await {
                Ok(status) if status.status.is_terminal() => return PollOutcome::Terminal(status),
                Ok(status) => return PollOutcome::Pending(status.status),
                Err(Error::RemoteRejected(msg)) => return PollOutcome::Rejected(msg),
                Err(e) if attempt < self.options.status_retries => {
                    attempt += 1;
                    debug!(
                        "Status poll for {} failed (attempt {}), retrying in {:?}: {}",
                        id, attempt, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return PollOutcome::Indeterminate(e.to_string()),
            }
        }
    }

    /// Write a terminal result: archive record first, then the store.
    fn commit(&self, id: &str, status: &StatusReport) -> Result<()> {
        let existing = self.store.get_job(id)?;
        let mut job = status.to_job(id);
        if let Some(existing) = &existing {
            fill_identity(&mut job, existing);
        }
        if job.completion_time.is_none() {
            job.completion_time = Some(Utc::now());
        }

        let properties = if job.status == JobStatus::Completed {
            decoded_properties(id, status)
        } else {
            Vec::new()
        };

        let already_terminal = existing.as_ref().is_some_and(|e| e.status.is_terminal());
        if let (Some(archive), false) = (&self.archive, already_terminal) {
            if let Err(e) = archive.write(&JobResultRecord::new(&job, &properties)) {
                error!("Failed to archive result of {}: {}", id, e);
            }
        }

        self.store.record_result(&job, &properties)?;
        info!("Job {} {}: {} properties", id, job.status, properties.len());
        Ok(())
    }
}

/// Identity fields the remote left out come from the stored row.
fn fill_identity(job: &mut CalculationJob, existing: &CalculationJob) {
    let InputDescriptor {
        canonical,
        alternate,
        formula,
    } = &mut job.input;
    if canonical.is_none() {
        canonical.clone_from(&existing.input.canonical);
    }
    if alternate.is_none() {
        alternate.clone_from(&existing.input.alternate);
    }
    if formula.is_none() {
        formula.clone_from(&existing.input.formula);
    }
    if job.calculation_type.is_none() {
        job.calculation_type = existing.calculation_type;
    }
    if job.submission_time.is_none() {
        job.submission_time = existing.submission_time;
    }
}

fn decoded_properties(id: &str, status: &StatusReport) -> Vec<PropertyRecord> {
    let (records, rejected) = status.decoded_properties(id);
    for e in rejected {
        warn!("Job {}: dropping property: {}", id, e);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{report, CountingLedger, FakeClient, Scripted, UnavailableStore};
    use moluni_core::{CalculationType, Error};
    use moluni_store::SqliteJobStore;
    use serde_json::json;
    use std::time::Duration;

    fn test_store() -> (Arc<SqliteJobStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteJobStore::open(dir.path().join("moluni.db")).unwrap();
        (Arc::new(store), dir)
    }

    fn fast_options() -> ReconcileOptions {
        ReconcileOptions {
            retry_backoff: Duration::from_millis(1),
            ..ReconcileOptions::default()
        }
    }

    fn poller(
        store: Arc<dyn JobStore>,
        ledger: Arc<CountingLedger>,
        client: Arc<FakeClient>,
        options: ReconcileOptions,
    ) -> ReconciliationPoller {
        ReconciliationPoller::new(store, ledger, client, options)
    }

    fn energy() -> serde_json::Value {
        json!({"energy": {"value": -5.2, "units": "eV"}})
    }

    #[tokio::test]
    async fn test_completed_and_running() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1", "j2"]));
        let client = Arc::new(
            FakeClient::new()
                .with_status("j1", vec![report(JobStatus::Completed, energy())])
                .with_status("j2", vec![report(JobStatus::Running, json!(null))]),
        );

        let result = poller(store.clone(), ledger.clone(), client, fast_options())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(
            result,
            ReconciliationReport {
                resolved: 1,
                still_pending: 1,
                indeterminate: 0
            }
        );
        assert_eq!(ledger.current(), vec!["j2"]);
        assert_eq!(ledger.save_count(), 1);

        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completion_time.is_some());
        let props = store.get_properties("j1").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "energy");
        assert_eq!(props[0].value, -5.2);
        assert_eq!(props[0].units.as_deref(), Some("eV"));
        assert!(store.get_job("j2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_and_unknown() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1", "j2"]));
        let mut failed = StatusReport::with_status(JobStatus::Failed);
        failed.diagnostic = Some("SCF did not converge".into());
        let client = Arc::new(
            FakeClient::new()
                .with_status("j1", vec![Scripted::Report(failed)])
                .with_status("j2", vec![report(JobStatus::Unknown, json!(null))]),
        );

        let result = poller(store.clone(), ledger.clone(), client, fast_options())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        assert_eq!(ledger.current(), vec!["j2"]);
        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.diagnostic.as_deref(), Some("SCF did not converge"));
        assert!(store.get_properties("j1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_retries_then_stays_pending() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(FakeClient::new().with_status(
            "j1",
            vec![Scripted::TransportError("connection refused".into())],
        ));

        let result = poller(store.clone(), ledger.clone(), client.clone(), fast_options())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 0);
        assert_eq!(result.still_pending, 1);
        assert_eq!(result.indeterminate, 1);
        assert_eq!(client.status_calls_for("j1"), 4);
        assert_eq!(ledger.current(), vec!["j1"]);
        assert!(store.get_job("j1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_recovers_within_retries() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(FakeClient::new().with_status(
            "j1",
            vec![
                Scripted::TransportError("timed out".into()),
                report(JobStatus::Completed, energy()),
            ],
        ));

        let result = poller(store.clone(), ledger.clone(), client.clone(), fast_options())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        assert_eq!(client.status_calls_for("j1"), 2);
        assert!(ledger.current().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_terminal_policy() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(FakeClient::new().with_status(
            "j1",
            vec![Scripted::TransportError("connection reset".into())],
        ));
        let options = ReconcileOptions {
            status_retries: 0,
            transport_errors: TransportErrorPolicy::Terminal,
            ..fast_options()
        };

        let result = poller(store.clone(), ledger.clone(), client, options)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        assert!(ledger.current().is_empty());
        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.diagnostic.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_not_found_job_is_resolved_as_error() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["gone", "j2"]));
        let client = Arc::new(
            FakeClient::new()
                .with_status(
                    "gone",
                    vec![Scripted::Rejected("gone: API error 404: job not found".into())],
                )
                .with_status("j2", vec![report(JobStatus::Running, json!(null))]),
        );
        // Retry policy and a retry budget: neither applies to a rejection.
        let options = ReconcileOptions {
            status_retries: 3,
            transport_errors: TransportErrorPolicy::Retry,
            ..fast_options()
        };

        let result = poller(store.clone(), ledger.clone(), client.clone(), options.clone())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        assert_eq!(result.indeterminate, 0);
        assert_eq!(result.still_pending, 1);
        assert_eq!(client.status_calls_for("gone"), 1);
        let current = ledger.current();
        let ids: Vec<&str> = current.iter().map(String::as_str).collect();
        assert_eq!(ids, vec!["j2"]);

        let job = store.get_job("gone").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.diagnostic.unwrap().contains("404"));

        // The next pass no longer asks about it.
        poller(store, ledger.clone(), client.clone(), options)
            .reconcile()
            .await
            .unwrap();
        assert_eq!(client.status_calls_for("gone"), 1);
    }

    #[tokio::test]
    async fn test_repoll_of_resolved_job_is_idempotent() {
        let (store, _dir) = test_store();
        let client = Arc::new(
            FakeClient::new().with_status("j1", vec![report(JobStatus::Completed, energy())]),
        );

        // Simulates a crash after the commit but before the ledger save.
        for _ in 0..2 {
            let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
            let result = poller(store.clone(), ledger.clone(), client.clone(), fast_options())
                .reconcile()
                .await
                .unwrap();
            assert_eq!(result.resolved, 1);
            assert!(ledger.current().is_empty());
        }

        assert_eq!(store.count_jobs().unwrap(), 1);
        assert_eq!(store.get_properties("j1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_regressed() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(
            FakeClient::new().with_status("j1", vec![report(JobStatus::Completed, energy())]),
        );
        poller(store.clone(), ledger.clone(), client, fast_options())
            .reconcile()
            .await
            .unwrap();
        let first = store.get_job("j1").unwrap().unwrap();

        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(FakeClient::new().with_status(
            "j1",
            vec![report(JobStatus::Failed, json!({"energy": 1.0}))],
        ));
        poller(store.clone(), ledger, client, fast_options())
            .reconcile()
            .await
            .unwrap();

        let second = store.get_job("j1").unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(second.completion_time, first.completion_time);
        assert_eq!(store.get_properties("j1").unwrap()[0].value, -5.2);
    }

    #[tokio::test]
    async fn test_keeps_submission_identity() {
        let (store, _dir) = test_store();
        store
            .upsert_job(&CalculationJob::submitted(
                "j1",
                InputDescriptor {
                    canonical: Some("CCO".into()),
                    alternate: None,
                    formula: Some("C2H6O".into()),
                },
                CalculationType::Dft,
                Utc::now(),
            ))
            .unwrap();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(
            FakeClient::new().with_status("j1", vec![report(JobStatus::Completed, energy())]),
        );

        poller(store.clone(), ledger, client, fast_options())
            .reconcile()
            .await
            .unwrap();

        let job = store.get_job("j1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.input.canonical.as_deref(), Some("CCO"));
        assert_eq!(job.calculation_type, Some(CalculationType::Dft));
        assert!(job.submission_time.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_properties_are_dropped() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(FakeClient::new().with_status(
            "j1",
            vec![report(
                JobStatus::Completed,
                json!({"energy": -5.2, "forces": [[0.0, 0.1, 0.2]], "label": "ok"}),
            )],
        ));

        let result = poller(store.clone(), ledger, client, fast_options())
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        let props = store.get_properties("j1").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name, "energy");
        assert!(props[0].units.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_before_ledger_save() {
        let ledger = Arc::new(CountingLedger::with_ids(&["j1", "j2"]));
        let client = Arc::new(
            FakeClient::new()
                .with_status("j1", vec![report(JobStatus::Completed, energy())])
                .with_status("j2", vec![report(JobStatus::Completed, energy())]),
        );

        let err = poller(Arc::new(UnavailableStore), ledger.clone(), client, fast_options())
            .reconcile()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(ledger.save_count(), 0);
        assert_eq!(ledger.current(), vec!["j1", "j2"]);
    }

    #[tokio::test]
    async fn test_empty_ledger_skips_save() {
        let (store, _dir) = test_store();
        let ledger = Arc::new(CountingLedger::default());
        let result = poller(store, ledger.clone(), Arc::new(FakeClient::new()), fast_options())
            .reconcile()
            .await
            .unwrap();
        assert_eq!(result, ReconciliationReport::default());
        assert_eq!(ledger.save_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_polls_keep_ledger_order() {
        let (store, _dir) = test_store();
        let ids = ["j1", "j2", "j3", "j4", "j5"];
        let ledger = Arc::new(CountingLedger::with_ids(&ids));
        let mut client = FakeClient::new();
        for (i, id) in ids.iter().enumerate() {
            let status = if i % 2 == 0 {
                JobStatus::Running
            } else {
                JobStatus::Completed
            };
            client = client
                .with_status(id, vec![report(status, energy())])
                .with_delay(id, Duration::from_millis(5 * (ids.len() - i) as u64));
        }
        let options = ReconcileOptions {
            poll_concurrency: 5,
            ..fast_options()
        };

        let result = poller(store, ledger.clone(), Arc::new(client), options)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 2);
        assert_eq!(result.still_pending, 3);
        assert_eq!(ledger.current(), vec!["j1", "j3", "j5"]);
    }

    #[tokio::test]
    async fn test_recover_from_store() {
        let (store, _dir) = test_store();
        store
            .upsert_job(&CalculationJob::submitted(
                "lost",
                InputDescriptor::default(),
                CalculationType::Md,
                Utc::now(),
            ))
            .unwrap();
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(
            FakeClient::new()
                .with_status("j1", vec![report(JobStatus::Running, json!(null))])
                .with_status("lost", vec![report(JobStatus::Completed, energy())]),
        );
        let options = ReconcileOptions {
            recover_from_store: true,
            ..fast_options()
        };

        let result = poller(store.clone(), ledger.clone(), client, options)
            .reconcile()
            .await
            .unwrap();

        assert_eq!(result.resolved, 1);
        assert_eq!(ledger.current(), vec!["j1"]);
        assert_eq!(
            store.get_job("lost").unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_writes_archive_record() {
        let (store, dir) = test_store();
        let archive = ResultArchive::new(dir.path().join("results"));
        let ledger = Arc::new(CountingLedger::with_ids(&["j1"]));
        let client = Arc::new(
            FakeClient::new().with_status("j1", vec![report(JobStatus::Completed, energy())]),
        );

        poller(store, ledger, client, fast_options())
            .with_archive(ResultArchive::new(dir.path().join("results")))
            .reconcile()
            .await
            .unwrap();

        let record = archive.read("j1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.properties["energy"].value(), -5.2);
    }
}
