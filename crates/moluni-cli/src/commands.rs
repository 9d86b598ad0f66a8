//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use serde::Serialize;

use moluni_core::{CalculationType, JobStatus, MoluniConfig};
use moluni_prep::XyzPreprocessor;
use moluni_remote::HttpJobClient;
use moluni_runtime::{
    BatchSubmitter, ReconcileOptions, ReconciliationPoller, ReconciliationReport,
    SubmissionReport,
};
use moluni_store::atomic::write_atomically;
use moluni_store::{
    CalculationTypeCount, JobResultRecord, JobStore, JsonFileLedger, PropertyExtreme,
    PropertyNameCount, PropertyStats, ResultArchive, SqliteJobStore, StatusCount,
};

const EXTREMES_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitArgs {
    pub file: PathBuf,
    pub batch_size: Option<usize>,
    pub calculation_type: CalculationType,
}

/// Parse `<descriptor-file> [--batch-size N] [--calc-type dft|md]`.
pub fn parse_submit_args(args: &[String]) -> anyhow::Result<SubmitArgs> {
    let mut file = None;
    let mut batch_size = None;
    let mut calculation_type = CalculationType::Dft;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--batch-size" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--batch-size needs a value"))?;
                let n: usize = raw
                    .parse()
                    .with_context(|| format!("invalid batch size '{}'", raw))?;
                if n == 0 {
                    bail!("batch size must be positive");
                }
                batch_size = Some(n);
            }
            "--calc-type" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--calc-type needs a value"))?;
                calculation_type = raw.parse()?;
            }
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            path if file.is_none() => file = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument '{}'", extra),
        }
    }

    Ok(SubmitArgs {
        file: file.ok_or_else(|| anyhow!("missing descriptor file"))?,
        batch_size,
        calculation_type,
    })
}

/// One descriptor per non-blank line.
pub fn read_descriptors(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn open_store(config: &MoluniConfig) -> anyhow::Result<Arc<SqliteJobStore>> {
    let store = SqliteJobStore::open(&config.data_paths.db_file)
        .map_err(|e| anyhow!("Failed to open store: {}", e))?;
    Ok(Arc::new(store))
}

pub async fn submit(config: &MoluniConfig, args: &SubmitArgs) -> anyhow::Result<SubmissionReport> {
    let descriptors = read_descriptors(&args.file)?;
    let base_dir = args
        .file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let submitter = BatchSubmitter::new(
        open_store(config)?,
        Arc::new(JsonFileLedger::new(&config.data_paths.ledger_file)),
        Arc::new(XyzPreprocessor::with_base_dir(base_dir)),
        Arc::new(HttpJobClient::new(config.remote.clone())?),
    );
    let batch_size = args.batch_size.unwrap_or(config.batch_size);
    Ok(submitter
        .submit_all(&descriptors, batch_size, args.calculation_type)
        .await?)
}

pub async fn reconcile(
    config: &MoluniConfig,
    recover_from_store: bool,
) -> anyhow::Result<ReconciliationReport> {
    let options = ReconcileOptions {
        recover_from_store,
        ..ReconcileOptions::from_config(config)
    };
    let poller = ReconciliationPoller::new(
        open_store(config)?,
        Arc::new(JsonFileLedger::new(&config.data_paths.ledger_file)),
        Arc::new(HttpJobClient::new(config.remote.clone())?),
        options,
    )
    .with_archive(ResultArchive::new(&config.data_paths.results));
    Ok(poller.reconcile().await?)
}

/// Read-only summary of the store.
#[derive(Debug, Serialize)]
pub struct StoreReport {
    pub statuses: Vec<StatusCount>,
    #[serde(rename = "calculationTypes")]
    pub calculation_types: Vec<CalculationTypeCount>,
    pub properties: Vec<PropertyNameCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyReport>,
}

#[derive(Debug, Serialize)]
pub struct PropertyReport {
    pub stats: PropertyStats,
    pub lowest: Vec<PropertyExtreme>,
    pub highest: Vec<PropertyExtreme>,
}

pub fn build_report(store: &SqliteJobStore, property: Option<&str>) -> anyhow::Result<StoreReport> {
    let property = match property {
        Some(name) => match store.property_stats(name)? {
            Some(stats) => Some(PropertyReport {
                stats,
                lowest: store.property_extremes(name, EXTREMES_LIMIT, true)?,
                highest: store.property_extremes(name, EXTREMES_LIMIT, false)?,
            }),
            None => bail!("no job has property '{}'", name),
        },
        None => None,
    };

    Ok(StoreReport {
        statuses: store.status_summary()?,
        calculation_types: store.calculation_type_summary()?,
        properties: store.property_names()?,
        property,
    })
}

pub fn report(config: &MoluniConfig, property: Option<&str>) -> anyhow::Result<StoreReport> {
    let store = open_store(config)?;
    build_report(&store, property)
}

/// Write every completed job with its properties to `path` as a JSON array.
pub fn export_completed(store: &SqliteJobStore, path: &Path) -> anyhow::Result<usize> {
    let mut records = Vec::new();
    for job in store.jobs_with_status(JobStatus::Completed)? {
        let properties = store.get_properties(&job.id)?;
        records.push(JobResultRecord::new(&job, &properties));
    }
    let json = serde_json::to_vec_pretty(&records)?;
    write_atomically(path, &json)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(records.len())
}

pub fn export(config: &MoluniConfig, path: &Path) -> anyhow::Result<usize> {
    let store = open_store(config)?;
    export_completed(&store, path)
}

pub fn print_report(report: &StoreReport) {
    println!("=== Moluni Store Report ===");
    println!();
    println!("Jobs by status:");
    for s in &report.statuses {
        println!("  {:<12} {}", s.status.as_str(), s.count);
    }
    println!();
    println!("Jobs by calculation type:");
    for t in &report.calculation_types {
        let name = t.calculation_type.map(|c| c.as_str()).unwrap_or("-");
        println!("  {:<12} {}", name, t.count);
    }
    println!();
    println!("Properties:");
    for p in &report.properties {
        println!("  {:<24} {}", p.name, p.count);
    }

    if let Some(property) = &report.property {
        let s = &property.stats;
        println!();
        println!("=== {} ===", s.name);
        println!("Count:   {}", s.count);
        println!("Min:     {:.6}", s.min);
        println!("Max:     {:.6}", s.max);
        println!("Mean:    {:.6}", s.mean);
        println!("Std dev: {:.6}", s.std_dev);
        for (title, rows) in [("Lowest", &property.lowest), ("Highest", &property.highest)] {
            println!();
            println!("{}:", title);
            for row in rows {
                println!(
                    "  {:<16} {:<12} {:<24} {:.6}",
                    row.job_id,
                    row.formula.as_deref().unwrap_or("-"),
                    row.canonical.as_deref().unwrap_or("-"),
                    row.value
                );
            }
        }
    }
}
