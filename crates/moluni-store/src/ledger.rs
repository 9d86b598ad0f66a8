//! Pending-job ledger: the durable set of job ids not yet resolved.
//!
//! Stored as a JSON array of strings. Insertion order is preserved so
//! reconciliation passes are deterministic.

use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::atomic::write_atomically;
use moluni_core::{Error, Result};

/// Ordered set of pending job ids.
pub type LedgerSet = IndexSet<String>;

/// Durable storage for the pending set.
pub trait PendingLedger: Send + Sync {
    /// Read the pending set. Never-written ledgers load as empty.
    fn load(&self) -> Result<LedgerSet>;

    /// Replace the pending set. On failure the previous value stays intact.
    fn save(&self, ids: &LedgerSet) -> Result<()>;
}

/// Ledger kept in a single JSON file at a well-known path.
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PendingLedger for JsonFileLedger {
    fn load(&self) -> Result<LedgerSet> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No ledger at {}; starting empty", self.path.display());
                return Ok(LedgerSet::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(e) => {
                let err = Error::LedgerCorrupt(format!("{}: {}", self.path.display(), e));
                warn!("{}; treating ledger as empty", err);
                Ok(LedgerSet::new())
            }
        }
    }

    fn save(&self, ids: &LedgerSet) -> Result<()> {
        let json = serde_json::to_vec(ids)?;
        write_atomically(&self.path, &json)?;
        debug!("Saved ledger with {} ids to {}", ids.len(), self.path.display());
        Ok(())
    }
}
