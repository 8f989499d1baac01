use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{JobBatch, JobRecord, JobStatus};

/// Thread-safe repository for job and batch rows.
///
/// Wraps a single SQLite connection in a `Mutex`; every public method runs
/// its statements under one lock acquisition, which is the store's
/// serialization boundary. Retries and commit/rollback policy belong to
/// the caller.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    // --- batches -----------------------------------------------------------

    #[instrument(skip(self, description))]
    pub fn insert_batch(&self, name: &str, description: Option<&str>) -> Result<JobBatch> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_batch (name, description) VALUES (?1, ?2)",
            rusqlite::params![name, description],
        )
        .map_err(|e| match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::DuplicateBatchName {
                    name: name.to_string(),
                }
            }
            _ => StoreError::Database(e),
        })?;
        debug!(batch = %name, "batch created");
        Ok(JobBatch {
            name: name.to_string(),
            description: description.map(String::from),
        })
    }

    pub fn get_batch(&self, name: &str) -> Result<Option<JobBatch>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT name, description FROM job_batch WHERE name = ?1",
            [name],
            |row| {
                Ok(JobBatch {
                    name: row.get(0)?,
                    description: row.get(1)?,
                })
            },
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Physically remove a batch row; owned job rows go with it via the
    /// cascading foreign key. Returns false when no such batch existed.
    #[instrument(skip(self))]
    pub fn delete_batch_row(&self, name: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM job_batch WHERE name = ?1", [name])?;
        if n > 0 {
            debug!(batch = %name, "batch row removed");
        }
        Ok(n > 0)
    }

    // --- jobs --------------------------------------------------------------

    /// Insert a fresh PENDING row. The batch must already exist.
    #[instrument(skip(self, description))]
    pub fn insert_job(
        &self,
        id: &str,
        description: &str,
        batch_id: &str,
        scheduler_ref: Option<&str>,
    ) -> Result<JobRecord> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO job_information
             (id, description, status, scheduler_ref, batch_id, issues, created_at)
             VALUES (?1, ?2, 'PENDING', ?3, ?4, '[]', ?5)",
            rusqlite::params![id, description, scheduler_ref, batch_id, created_at],
        )
        .map_err(|e| match &e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                StoreError::DuplicateJobId { id: id.to_string() }
            }
            rusqlite::Error::SqliteFailure(f, _)
                if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                StoreError::BatchNotFound {
                    name: batch_id.to_string(),
                }
            }
            _ => StoreError::Database(e),
        })?;
        debug!(job_id = %id, batch = %batch_id, "job row inserted");

        Ok(JobRecord {
            id: id.to_string(),
            description: description.to_string(),
            status: JobStatus::Pending,
            batch_id: batch_id.to_string(),
            scheduler_ref: scheduler_ref.map(String::from),
            issues: Vec::new(),
            exception: None,
            created_at,
        })
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, description, status, scheduler_ref, batch_id, issues,
                    exception, created_at
             FROM job_information WHERE id = ?1",
            [id],
            row_to_job,
        ) {
            Ok(j) => Ok(Some(j)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Current status of a job, `None` when the row does not exist.
    pub fn status(&self, id: &str) -> Result<Option<JobStatus>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT status FROM job_information WHERE id = ?1",
            [id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(s) => Ok(Some(parse_status(&s)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn ids_for_batch(&self, batch_id: &str) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id FROM job_information WHERE batch_id = ?1 ORDER BY created_at, id",
        )?;
        let ids = stmt
            .query_map([batch_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// All job ids currently in the given status.
    pub fn ids_with_status(&self, status: JobStatus) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id FROM job_information WHERE status = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map([status.to_string()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Ids whose hierarchical path starts with `prefix`.
    ///
    /// An empty prefix matches everything; a non-empty prefix is normalized
    /// to end with `/` so `"a/b"` matches `"a/b/x"` but never `"a/bc/x"`.
    pub fn ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let normalized = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare("SELECT id FROM job_information ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids
            .into_iter()
            .filter(|id| id.starts_with(&normalized))
            .collect())
    }

    #[instrument(skip(self))]
    pub fn update_status(&self, id: &str, status: JobStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE job_information SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.to_string(), id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        debug!(job_id = %id, status = %status, "status updated");
        Ok(())
    }

    /// Flip a job to DELETED. The row itself stays until its batch goes.
    pub fn mark_deleted(&self, id: &str) -> Result<()> {
        self.update_status(id, JobStatus::Deleted)
    }

    /// Append a structured note to the job's issue list. Issues are never
    /// removed.
    #[instrument(skip(self, issue))]
    pub fn append_issue(&self, id: &str, issue: &serde_json::Value) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE job_information
             SET issues = json_insert(issues, '$[#]', json(?1))
             WHERE id = ?2",
            rusqlite::params![serde_json::to_string(issue)?, id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Record the captured exception, only if none has been recorded yet.
    /// Returns whether this call wrote it.
    #[instrument(skip(self, exception))]
    pub fn set_exception(&self, id: &str, exception: &serde_json::Value) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE job_information SET exception = ?1
             WHERE id = ?2 AND exception IS NULL",
            rusqlite::params![serde_json::to_string(exception)?, id],
        )?;
        Ok(n > 0)
    }

    /// Null out the timer registration reference once the timer-side entry
    /// is gone.
    #[instrument(skip(self))]
    pub fn clear_scheduler_ref(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE job_information SET scheduler_ref = NULL WHERE id = ?1",
            [id],
        )?;
        if n == 0 {
            return Err(StoreError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Map a SQLite row to a `JobRecord`.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    let status_str: String = row.get(2)?;
    let issues_json: String = row.get(5)?;
    let exception_json: Option<String> = row.get(6)?;

    let status = JobStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let issues: Vec<serde_json::Value> = serde_json::from_str(&issues_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let exception = match exception_json {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(JobRecord {
        id: row.get(0)?,
        description: row.get(1)?,
        status,
        scheduler_ref: row.get(3)?,
        batch_id: row.get(4)?,
        issues,
        exception,
        created_at: row.get(7)?,
    })
}

fn parse_status(s: &str) -> Result<JobStatus> {
    JobStatus::from_str(s).map_err(|e| {
        StoreError::Database(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.into(),
        ))
    })
}
