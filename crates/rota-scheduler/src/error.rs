use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The id is already taken in the store, the timer engine, or both.
    #[error("job id already in use: {id}")]
    DuplicateJobId { id: String },

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    /// An event arrived for a job whose status is terminal. This means the
    /// timer engine and the store disagree about whether the job is alive;
    /// the record is left untouched.
    #[error("job {id} is {status} but received a {event} event")]
    TerminalState {
        id: String,
        status: rota_store::JobStatus,
        event: String,
    },

    #[error(transparent)]
    Store(#[from] rota_store::StoreError),

    #[error(transparent)]
    Calendar(#[from] rota_calendar::CalendarError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
