use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job persistence schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
/// Foreign keys are enabled so deleting a batch row cascades to its job
/// rows; job-level deletion never removes rows, it only flips status.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS job_batch (
            name        TEXT NOT NULL PRIMARY KEY,
            description TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_information (
            id            TEXT NOT NULL PRIMARY KEY,
            description   TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'PENDING',
            scheduler_ref TEXT,              -- timer registration id, NULL once gone
            batch_id      TEXT NOT NULL
                          REFERENCES job_batch(name) ON DELETE CASCADE,
            issues        TEXT NOT NULL DEFAULT '[]',  -- append-only JSON array
            exception     TEXT,              -- JSON, written at most once
            created_at    TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_job_information_batch
            ON job_information (batch_id);
        ",
    )?;
    Ok(())
}
