//! The write contract of the persistent job store.

use moluni_core::{CalculationJob, PropertyRecord, Result};

/// Durable storage of calculation jobs and their properties with
/// idempotent merge semantics. Writes are committed before returning.
pub trait JobStore: Send + Sync {
    /// Insert the job, or merge it into the existing row with the same id.
    ///
    /// An existing row only takes `status`, `completion_time` and
    /// `diagnostic`. Identity fields are never overwritten once set, and a
    /// row in a terminal status never changes status again.
    fn upsert_job(&self, job: &CalculationJob) -> Result<()>;

    /// Replace every property of `job_id` with `records`, atomically.
    fn replace_properties(&self, job_id: &str, records: &[PropertyRecord]) -> Result<()>;

    /// Upsert the job and, when it is `COMPLETED`, replace its properties,
    /// all in one transaction.
    fn record_result(&self, job: &CalculationJob, properties: &[PropertyRecord]) -> Result<()>;

    /// Get a job by id.
    fn get_job(&self, id: &str) -> Result<Option<CalculationJob>>;

    /// All properties of a job, ordered by name.
    fn get_properties(&self, job_id: &str) -> Result<Vec<PropertyRecord>>;

    /// Ids of jobs not yet in a terminal status, oldest submission first.
    fn unresolved_job_ids(&self) -> Result<Vec<String>>;
}
