//! Moluni Store: durable job records, pending-job ledger, result archive.
//!
//! Every write here is durable before it returns. Files are replaced
//! atomically; SQLite writes commit synchronously inside transactions.

pub mod archive;
pub mod atomic;
pub mod job_store;
pub mod ledger;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use archive::{JobResultRecord, ResultArchive};
pub use ledger::{JsonFileLedger, LedgerSet, PendingLedger};
pub use job_store::JobStore;
pub use sqlite::SqliteJobStore;
pub use types::*;
