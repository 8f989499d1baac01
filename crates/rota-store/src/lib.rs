//! `rota-store` — SQLite persistence for job and batch records.
//!
//! Job rows live in `job_information`, batches in `job_batch`. Job-level
//! deletion only flips status to `DELETED`; rows are physically removed
//! solely by deleting their owning batch (cascading foreign key).

pub mod db;
pub mod error;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::JobStore;
pub use types::{JobBatch, JobRecord, JobStatus};
