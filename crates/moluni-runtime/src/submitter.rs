//! Batch submitter: input descriptors in, pending remote jobs out.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::types::SubmissionReport;
use moluni_core::{CalculationJob, CalculationType, Error, Result};
use moluni_prep::Preprocessor;
use moluni_remote::{CalculationRequest, RemoteJobClient};
use moluni_store::{JobStore, PendingLedger};

pub struct BatchSubmitter {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn PendingLedger>,
    preprocessor: Arc<dyn Preprocessor>,
    client: Arc<dyn RemoteJobClient>,
}

impl BatchSubmitter {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn PendingLedger>,
        preprocessor: Arc<dyn Preprocessor>,
        client: Arc<dyn RemoteJobClient>,
    ) -> Self {
        Self {
            store,
            ledger,
            preprocessor,
            client,
        }
    }

    /// Submit every descriptor, `batch_size` at a time.
    ///
    /// Descriptors that fail preprocessing or submission are logged and
    /// skipped. The ledger is saved once per batch with the prior pending
    /// set plus every id accepted so far, so a crash loses at most the
    /// current batch. A store failure saves the ledger and aborts.
    pub async fn submit_all(
        &self,
        descriptors: &[String],
        batch_size: usize,
        calculation_type: CalculationType,
    ) -> Result<SubmissionReport> {
        if batch_size == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }

        let mut pending = self.ledger.load()?;
        let mut report = SubmissionReport::default();

        for (index, batch) in descriptors.chunks(batch_size).enumerate() {
            for descriptor in batch {
                let prepared = match self.preprocessor.prepare(descriptor) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Skipping '{}': {}", descriptor, e);
                        report.skipped += 1;
                        continue;
                    }
                };

                let request = CalculationRequest::build(&prepared, calculation_type);
                let job_id = match self.client.submit(&request).await {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("Submission of '{}' failed: {}", descriptor, e);
                        report.skipped += 1;
                        continue;
                    }
                };
                info!("Submitted {} as job {}", prepared.canonical_form, job_id);

                pending.insert(job_id.clone());
                report.job_ids.push(job_id.clone());

                let job = CalculationJob::submitted(
                    job_id.as_str(),
                    prepared.descriptor(),
                    calculation_type,
                    Utc::now(),
                );
                if let Err(e) = self.store.upsert_job(&job) {
                    error!("Failed to record job {}: {}", job_id, e);
                    if let Err(save_err) = self.ledger.save(&pending) {
                        error!("Failed to save pending ledger: {}", save_err);
                    }
                    return Err(e);
                }
            }

            self.ledger.save(&pending)?;
            report.batches += 1;
            info!(
                "Batch {} done: {} submitted so far, {} pending",
                index + 1,
                report.job_ids.len(),
                pending.len()
            );
        }

        Ok(report)
    }
}
