//! Moluni Runtime: batch submission and ledger reconciliation.
//!
//! `BatchSubmitter` turns input descriptors into remote jobs and records
//! them in the pending ledger. `ReconciliationPoller` drains that ledger,
//! committing terminal results to the job store. The two never share
//! memory; every handoff goes through the ledger and the store.

pub mod poller;
pub mod submitter;
pub mod types;

#[cfg(test)]
pub(crate) mod fakes;

pub use poller::ReconciliationPoller;
pub use submitter::BatchSubmitter;
pub use types::*;
