//! Configuration and data directory management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "http://localhost:8003/v1/infer";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_POLL_CONCURRENCY: usize = 4;
pub const DEFAULT_STATUS_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Paths to all Moluni data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Per-job result records (`data/results/`).
    pub results: PathBuf,
    /// SQLite store (`data/moluni.db`).
    pub db_file: PathBuf,
    /// Pending job ledger (`data/pending_jobs.json`).
    pub ledger_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            results: root.join("results"),
            db_file: root.join("moluni.db"),
            ledger_file: root.join("pending_jobs.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.results)?;
        Ok(())
    }
}

/// What a reconciliation pass does with a poll that never got an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorPolicy {
    /// Keep the job pending and poll it again next pass.
    Retry,
    /// Record the job as `ERROR` with the transport diagnostic.
    Terminal,
}

impl std::str::FromStr for TransportErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "terminal" => Ok(Self::Terminal),
            other => Err(Error::Config(format!(
                "unknown transport error policy '{}' (expected retry|terminal)",
                other
            ))),
        }
    }
}

/// Connection settings for the remote compute service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base inference endpoint. Status lives at `{api_url}/{job_id}`.
    pub api_url: String,
    /// Bearer token, if the endpoint requires one.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout. A timeout counts as a transport error.
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Top-level Moluni configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoluniConfig {
    pub data_paths: DataPaths,
    pub remote: RemoteConfig,
    pub batch_size: usize,
    pub poll_concurrency: usize,
    pub status_retries: u32,
    pub transport_errors: TransportErrorPolicy,
}

impl MoluniConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_vars(data_dir, |key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_vars<F>(data_dir: impl AsRef<Path>, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_paths = DataPaths::new(data_dir)?;

        let timeout_secs = parse_var(&var, "MOLUNI_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let remote = RemoteConfig {
            api_url: var("MOLUNI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: var("MOLUNI_API_KEY").filter(|k| !k.is_empty()),
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let batch_size = parse_var(&var, "MOLUNI_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(Error::Config("MOLUNI_BATCH_SIZE must be positive".into()));
        }
        let poll_concurrency = parse_var(&var, "MOLUNI_POLL_CONCURRENCY")?
            .unwrap_or(DEFAULT_POLL_CONCURRENCY)
            .max(1);
        let status_retries =
            parse_var(&var, "MOLUNI_STATUS_RETRIES")?.unwrap_or(DEFAULT_STATUS_RETRIES);
        let transport_errors = match var("MOLUNI_TRANSPORT_ERRORS") {
            Some(v) => v.parse()?,
            None => TransportErrorPolicy::Retry,
        };

        Ok(Self {
            data_paths,
            remote,
            batch_size,
            poll_concurrency,
            status_retries,
            transport_errors,
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}
