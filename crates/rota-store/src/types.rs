use serde::{Deserialize, Serialize};

/// Lifecycle state of a persisted job.
///
/// `Pending` is the initial state; `Deleted` is terminal — no event may
/// move a job out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Registered with the timer engine, waiting for its run time.
    Pending,
    /// Submitted to a worker and currently executing.
    Running,
    /// Finished without error.
    Success,
    /// Execution raised an error; the exception column holds the details.
    Failure,
    /// The scheduled window passed without execution.
    Missed,
    /// Cancelled while pending. Terminal.
    Deleted,
}

impl JobStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Deleted)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Missed => "MISSED",
            JobStatus::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "MISSED" => Ok(JobStatus::Missed),
            "DELETED" => Ok(JobStatus::Deleted),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Hierarchical job id, e.g. `"mavdaks/2025-10-09/pre_deadline_job/0"`.
    /// Doubles as the timer-engine registration key; stable for the job's
    /// entire life.
    pub id: String,
    pub description: String,
    pub status: JobStatus,
    /// Owning batch; the row is physically removed only when the batch is.
    pub batch_id: String,
    /// Live timer registration id; `None` once the timer-side entry is gone.
    pub scheduler_ref: Option<String>,
    /// Structured notes appended during execution. Never removed.
    pub issues: Vec<serde_json::Value>,
    /// Structured error captured on the first FAILURE transition, at most once.
    pub exception: Option<serde_json::Value>,
    /// RFC3339 creation timestamp. Immutable.
    pub created_at: String,
}

/// A named group of jobs created and cancelled together.
///
/// The name is a hierarchical namespace (e.g. `"mavdaks/2025-10-09"`) that
/// job ids nest under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBatch {
    pub name: String,
    pub description: Option<String>,
}
