//! Error types for Moluni.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad input descriptor. Skipped per item, never aborts a batch.
    #[error("Preprocess error: {0}")]
    Preprocess(String),

    /// Remote service rejected the submission or could not be reached.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Transport failure while polling job status (includes timeouts).
    #[error("Remote status error: {0}")]
    RemoteStatus(String),

    /// The remote answered a status poll with a definitive refusal
    /// (client error status or an unreadable body). Polling again will
    /// not change the answer.
    #[error("Remote rejected status request: {0}")]
    RemoteRejected(String),

    /// Backing storage cannot be reached. Fatal for the current pass.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Ledger corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors raised by the backing store. These abort a pass.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
