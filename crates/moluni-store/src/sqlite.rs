//! SQLite-backed job store.
//!
//! One connection behind a mutex: the orchestrator is the single writer.
//! Multi-statement writes run inside a transaction so readers never see a
//! job halfway through a property replacement.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::job_store::JobStore;
use crate::schema::SCHEMA_SQL;
use crate::types::*;
use moluni_core::{
    parse_timestamp, CalculationJob, Error, InputDescriptor, JobStatus, PropertyRecord, Result,
};

/// SQLite store of calculation jobs and properties.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteJobStore {
    /// Open or create the store at `db_path` (e.g., `data/moluni.db`).
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::StoreUnavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        info!(
            "SqliteJobStore initialized: {} jobs, path={}",
            store.count_jobs()?,
            store.db_path.display()
        );
        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = FULL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Count all jobs.
    pub fn count_jobs(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM calculations", [], |row| row.get(0))
            .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Merge logic
    // ---------------------------------------------------------------

    /// Upsert inside an open transaction. Returns the status the row has
    /// afterwards.
    fn upsert_in(conn: &Connection, job: &CalculationJob) -> Result<JobStatus> {
        let existing = conn
            .prepare_cached("SELECT * FROM calculations WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![job.id], |row| Ok(Self::row_to_job(row)))
            .optional()
            .map_err(db_err)?;

        let calc_type = job.calculation_type.map(|t| t.as_str());

        let Some(existing) = existing else {
            let completion = if job.status.is_terminal() {
                Some(job.completion_time.unwrap_or_else(Utc::now))
            } else {
                None
            };
            conn.prepare_cached(
                "INSERT INTO calculations (id, canonical_form, alternate_form, formula, \
                 calculation_type, status, submission_time, completion_time, diagnostic) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .map_err(db_err)?
            .execute(params![
                job.id,
                job.input.canonical,
                job.input.alternate,
                job.input.formula,
                calc_type,
                job.status.as_str(),
                to_text(job.submission_time),
                to_text(completion),
                job.diagnostic,
            ])
            .map_err(db_err)?;
            debug!("Inserted job {} ({})", job.id, job.status);
            return Ok(job.status);
        };

        warn_identity_mismatch(&existing, job);

        // Identity columns are only ever filled in, never replaced.
        conn.prepare_cached(
            "UPDATE calculations SET \
             canonical_form = COALESCE(canonical_form, ?2), \
             alternate_form = COALESCE(alternate_form, ?3), \
             formula = COALESCE(formula, ?4), \
             calculation_type = COALESCE(calculation_type, ?5), \
             submission_time = COALESCE(submission_time, ?6) \
             WHERE id = ?1",
        )
        .map_err(db_err)?
        .execute(params![
            job.id,
            job.input.canonical,
            job.input.alternate,
            job.input.formula,
            calc_type,
            to_text(job.submission_time),
        ])
        .map_err(db_err)?;

        if existing.status.is_terminal() {
            if job.status != existing.status {
                warn!(
                    "Job {} is already {}; ignoring transition to {}",
                    job.id, existing.status, job.status
                );
            }
            return Ok(existing.status);
        }

        let completion = if job.status.is_terminal() {
            Some(job.completion_time.unwrap_or_else(Utc::now))
        } else {
            None
        };
        conn.prepare_cached(
            "UPDATE calculations SET status = ?2, completion_time = ?3, \
             diagnostic = COALESCE(?4, diagnostic) WHERE id = ?1",
        )
        .map_err(db_err)?
        .execute(params![
            job.id,
            job.status.as_str(),
            to_text(completion),
            job.diagnostic,
        ])
        .map_err(db_err)?;
        debug!("Job {}: {} -> {}", job.id, existing.status, job.status);
        Ok(job.status)
    }

    fn replace_properties_in(
        conn: &Connection,
        job_id: &str,
        records: &[PropertyRecord],
    ) -> Result<()> {
        conn.prepare_cached("DELETE FROM properties WHERE calculation_id = ?1")
            .map_err(db_err)?
            .execute(params![job_id])
            .map_err(db_err)?;

        let mut insert = conn
            .prepare_cached(
                "INSERT OR REPLACE INTO properties \
                 (calculation_id, property_name, property_value, units) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(db_err)?;
        for record in records {
            if record.job_id != job_id {
                return Err(Error::Internal(format!(
                    "property '{}' belongs to job {}, not {}",
                    record.name, record.job_id, job_id
                )));
            }
            insert
                .execute(params![job_id, record.name, record.value, record.units])
                .map_err(db_err)?;
        }
        Ok(())
    }

    fn job_exists(conn: &Connection, job_id: &str) -> Result<bool> {
        conn.prepare_cached("SELECT 1 FROM calculations WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![job_id], |_| Ok(()))
            .optional()
            .map(|r| r.is_some())
            .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Query surface (read-only)
    // ---------------------------------------------------------------

    /// Jobs holding property `name` whose value satisfies `predicate`,
    /// ordered by value ascending.
    pub fn query_by_property(
        &self,
        name: &str,
        predicate: PropertyPredicate,
    ) -> Result<Vec<PropertyMatch>> {
        let (clause, bounds) = predicate.sql();
        let sql = format!(
            "SELECT c.*, p.property_value, p.units FROM properties p \
             JOIN calculations c ON p.calculation_id = c.id \
             WHERE p.property_name = ?1{} ORDER BY p.property_value, c.id",
            clause
        );
        let mut values = vec![rusqlite::types::Value::Text(name.to_string())];
        values.extend(bounds.into_iter().map(rusqlite::types::Value::Real));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(PropertyMatch {
                    job: Self::row_to_job(row),
                    value: row.get("property_value")?,
                    units: row.get("units")?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Every job in `status`, ordered by id.
    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<CalculationJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT * FROM calculations WHERE status = ?1 ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], |row| Ok(Self::row_to_job(row)))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Job counts per status, most frequent first.
    pub fn status_summary(&self) -> Result<Vec<StatusCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT status, COUNT(*) AS n FROM calculations \
                 GROUP BY status ORDER BY n DESC, status",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StatusCount {
                    status: JobStatus::parse(&row.get::<_, String>(0)?),
                    count: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Job counts per calculation type, most frequent first.
    pub fn calculation_type_summary(&self) -> Result<Vec<CalculationTypeCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT calculation_type, COUNT(*) AS n FROM calculations \
                 GROUP BY calculation_type ORDER BY n DESC, calculation_type",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let raw: Option<String> = row.get(0)?;
                Ok(CalculationTypeCount {
                    calculation_type: raw.and_then(|t| t.parse().ok()),
                    count: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Distinct property names with their value counts, most frequent first.
    pub fn property_names(&self) -> Result<Vec<PropertyNameCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT property_name, COUNT(*) AS n FROM properties \
                 GROUP BY property_name ORDER BY n DESC, property_name",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PropertyNameCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    /// Count, range, mean and standard deviation of one property.
    /// `None` when no job has it.
    pub fn property_stats(&self, name: &str) -> Result<Option<PropertyStats>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT property_value FROM properties WHERE property_name = ?1")
            .map_err(db_err)?;
        let values = stmt
            .query_map(params![name], |row| row.get::<_, f64>(0))
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(PropertyStats::from_values(name, &values))
    }

    /// The `limit` lowest (or highest) values of a property.
    pub fn property_extremes(
        &self,
        name: &str,
        limit: usize,
        ascending: bool,
    ) -> Result<Vec<PropertyExtreme>> {
        let order = if ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT c.id, c.formula, c.canonical_form, p.property_value \
             FROM properties p JOIN calculations c ON p.calculation_id = c.id \
             WHERE p.property_name = ?1 ORDER BY p.property_value {} LIMIT ?2",
            order
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params![name, limit as i64], |row| {
                Ok(PropertyExtreme {
                    job_id: row.get(0)?,
                    formula: row.get(1)?,
                    canonical: row.get(2)?,
                    value: row.get(3)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_job(row: &rusqlite::Row<'_>) -> CalculationJob {
        let text = |col: &str| row.get::<_, Option<String>>(col).ok().flatten();
        CalculationJob {
            id: row.get("id").unwrap_or_default(),
            input: InputDescriptor {
                canonical: text("canonical_form"),
                alternate: text("alternate_form"),
                formula: text("formula"),
            },
            calculation_type: text("calculation_type").and_then(|t| t.parse().ok()),
            status: text("status")
                .map(|s| JobStatus::parse(&s))
                .unwrap_or(JobStatus::Unknown),
            submission_time: text("submission_time").and_then(|t| parse_timestamp(&t)),
            completion_time: text("completion_time").and_then(|t| parse_timestamp(&t)),
            diagnostic: text("diagnostic"),
        }
    }
}

impl JobStore for SqliteJobStore {
    fn upsert_job(&self, job: &CalculationJob) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        Self::upsert_in(&tx, job)?;
        tx.commit().map_err(db_err)
    }

    fn replace_properties(&self, job_id: &str, records: &[PropertyRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        if !Self::job_exists(&tx, job_id)? {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        Self::replace_properties_in(&tx, job_id, records)?;
        tx.commit().map_err(db_err)
    }

    fn record_result(&self, job: &CalculationJob, properties: &[PropertyRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let effective = Self::upsert_in(&tx, job)?;
        if job.status == JobStatus::Completed && effective == JobStatus::Completed {
            Self::replace_properties_in(&tx, &job.id, properties)?;
        }
        tx.commit().map_err(db_err)
    }

    fn get_job(&self, id: &str) -> Result<Option<CalculationJob>> {
        let conn = self.conn.lock();
        let job = conn
            .prepare_cached("SELECT * FROM calculations WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![id], |row| Ok(Self::row_to_job(row)))
            .optional()
            .map_err(db_err)?;
        Ok(job)
    }

    fn get_properties(&self, job_id: &str) -> Result<Vec<PropertyRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT calculation_id, property_name, property_value, units \
                 FROM properties WHERE calculation_id = ?1 ORDER BY property_name",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok(PropertyRecord {
                    job_id: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                    units: row.get(3)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    fn unresolved_job_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT id FROM calculations \
                 WHERE status NOT IN ('COMPLETED', 'FAILED', 'ERROR') \
                 ORDER BY submission_time IS NULL, submission_time, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}

/// Map a rusqlite error onto the store taxonomy. Failures that mean the
/// database cannot be reached become `StoreUnavailable`.
pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    use rusqlite::ErrorCode;
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if matches!(
                f.code,
                ErrorCode::CannotOpen
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::NotADatabase
            ) =>
        {
            Error::StoreUnavailable(e.to_string())
        }
        _ => Error::Database(e.to_string()),
    }
}

fn to_text(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn warn_identity_mismatch(existing: &CalculationJob, incoming: &CalculationJob) {
    fn differs<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
        matches!((a, b), (Some(x), Some(y)) if x != y)
    }
    let fields = [
        ("canonical_form", differs(&existing.input.canonical, &incoming.input.canonical)),
        ("alternate_form", differs(&existing.input.alternate, &incoming.input.alternate)),
        ("formula", differs(&existing.input.formula, &incoming.input.formula)),
        (
            "calculation_type",
            differs(&existing.calculation_type, &incoming.calculation_type),
        ),
    ];
    for (field, mismatch) in fields {
        if mismatch {
            warn!(
                "Job {}: ignoring divergent {} on upsert (stored value kept)",
                existing.id, field
            );
        }
    }
}
