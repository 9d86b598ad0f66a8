//! In-process doubles for the runtime's collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use moluni_core::{CalculationJob, Error, JobStatus, PropertyRecord, Result};
use moluni_prep::{Geometry, PreparedMolecule, Preprocessor};
use moluni_remote::{CalculationRequest, RemoteJobClient, StatusReport};
use moluni_store::{JobStore, LedgerSet, PendingLedger};

/// Accepts any descriptor not starting with `bad`.
pub(crate) struct FakePreprocessor;

impl Preprocessor for FakePreprocessor {
    fn prepare(&self, descriptor: &str) -> Result<PreparedMolecule> {
        if descriptor.starts_with("bad") {
            return Err(Error::Preprocess(format!("cannot parse '{}'", descriptor)));
        }
        Ok(PreparedMolecule {
            canonical_form: descriptor.to_string(),
            alternate_form: None,
            formula: "H2".into(),
            geometry: Geometry {
                elements: vec!["H".into(), "H".into()],
                positions: vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.74]],
                lattice: None,
            },
        })
    }
}

#[derive(Clone)]
pub(crate) enum Scripted {
    Report(StatusReport),
    TransportError(String),
    Rejected(String),
}

/// Remote double. Submissions get ids from a queue; statuses follow a
/// per-job script whose last entry repeats.
#[derive(Default)]
pub(crate) struct FakeClient {
    ids: Mutex<VecDeque<String>>,
    reject: HashSet<String>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: HashMap<String, Duration>,
    pub(crate) submitted: Mutex<Vec<CalculationRequest>>,
    pub(crate) status_calls: Mutex<Vec<String>>,
}

impl FakeClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_ids(self, ids: &[&str]) -> Self {
        *self.ids.lock() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Submissions whose canonical form equals `descriptor` fail.
    pub(crate) fn rejecting(mut self, descriptor: &str) -> Self {
        self.reject.insert(descriptor.to_string());
        self
    }

    pub(crate) fn with_status(self, id: &str, script: Vec<Scripted>) -> Self {
        self.scripts.lock().insert(id.to_string(), script.into());
        self
    }

    pub(crate) fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub(crate) fn status_calls_for(&self, id: &str) -> usize {
        self.status_calls.lock().iter().filter(|c| *c == id).count()
    }
}

#[async_trait]
impl RemoteJobClient for FakeClient {
    async fn submit(&self, request: &CalculationRequest) -> Result<String> {
        if self.reject.contains(&request.metadata.smiles) {
            return Err(Error::Submission("API error 503: busy".into()));
        }
        let id = self
            .ids
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Submission("no ids left".into()))?;
        self.submitted.lock().push(request.clone());
        Ok(id)
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport> {
        self.status_calls.lock().push(job_id.to_string());
        if let Some(delay) = self.delays.get(job_id) {
            tokio::time::sleep(*delay).await;
        }
        let next = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(job_id) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };
        match next {
            Some(Scripted::Report(report)) => Ok(report),
            Some(Scripted::TransportError(msg)) => Err(Error::RemoteStatus(msg)),
            Some(Scripted::Rejected(msg)) => Err(Error::RemoteRejected(msg)),
            None => Ok(StatusReport::with_status(JobStatus::Unknown)),
        }
    }
}

/// In-memory ledger that keeps every saved snapshot.
#[derive(Default)]
pub(crate) struct CountingLedger {
    current: Mutex<LedgerSet>,
    pub(crate) saves: Mutex<Vec<LedgerSet>>,
    read_only: bool,
}

impl CountingLedger {
    pub(crate) fn with_ids(ids: &[&str]) -> Self {
        let ledger = Self::default();
        *ledger.current.lock() = ids.iter().map(|s| s.to_string()).collect();
        ledger
    }

    /// Every save fails, as on a read-only filesystem.
    pub(crate) fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub(crate) fn current(&self) -> Vec<String> {
        self.current.lock().iter().cloned().collect()
    }

    pub(crate) fn save_count(&self) -> usize {
        self.saves.lock().len()
    }
}

impl PendingLedger for CountingLedger {
    fn load(&self) -> Result<LedgerSet> {
        Ok(self.current.lock().clone())
    }

    fn save(&self, ids: &LedgerSet) -> Result<()> {
        if self.read_only {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            )));
        }
        *self.current.lock() = ids.clone();
        self.saves.lock().push(ids.clone());
        Ok(())
    }
}

/// Store whose backing storage is gone.
pub(crate) struct UnavailableStore;

impl UnavailableStore {
    fn err() -> Error {
        Error::StoreUnavailable("unable to open database file".into())
    }
}

impl JobStore for UnavailableStore {
    fn upsert_job(&self, _job: &CalculationJob) -> Result<()> {
        Err(Self::err())
    }

    fn replace_properties(&self, _job_id: &str, _records: &[PropertyRecord]) -> Result<()> {
        Err(Self::err())
    }

    fn record_result(&self, _job: &CalculationJob, _properties: &[PropertyRecord]) -> Result<()> {
        Err(Self::err())
    }

    fn get_job(&self, _id: &str) -> Result<Option<CalculationJob>> {
        Err(Self::err())
    }

    fn get_properties(&self, _job_id: &str) -> Result<Vec<PropertyRecord>> {
        Err(Self::err())
    }

    fn unresolved_job_ids(&self) -> Result<Vec<String>> {
        Err(Self::err())
    }
}

pub(crate) fn report(status: JobStatus, properties: serde_json::Value) -> Scripted {
    let mut report = StatusReport::with_status(status);
    report.properties = properties.as_object().cloned();
    Scripted::Report(report)
}
