use thiserror::Error;

/// Errors that can occur during job persistence operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No job row with the given id exists.
    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// No batch row with the given name exists.
    #[error("batch not found: {name}")]
    BatchNotFound { name: String },

    /// A job with this id has already been persisted.
    #[error("duplicate job id: {id}")]
    DuplicateJobId { id: String },

    /// A batch with this name already exists.
    #[error("duplicate batch name: {name}")]
    DuplicateBatchName { name: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
