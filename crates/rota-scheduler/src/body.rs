//! The work a job performs when it fires.

use std::sync::Arc;

use async_trait::async_trait;
use rota_store::JobStore;
use serde_json::json;

/// Errors crossing the body boundary are opaque to the engine; it only
/// serializes them into the job's exception record.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// Handle a running body gets to its own persisted record.
pub struct JobContext {
    store: Arc<JobStore>,
    job_id: String,
}

impl JobContext {
    pub fn new(store: Arc<JobStore>, job_id: impl Into<String>) -> Self {
        Self {
            store,
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append a structured note to this job's issue list.
    pub fn add_issue(&self, issue: &serde_json::Value) -> rota_store::Result<()> {
        self.store.append_issue(&self.job_id, issue)
    }
}

/// A named unit of work the engine can execute. Registered on the engine
/// by name; registrations refer to that name in their payload.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self, ctx: &JobContext, args: &serde_json::Value)
        -> std::result::Result<(), BodyError>;
}

/// Serialize a body error into the structured form stored in the
/// exception column.
pub fn error_json(kind: &str, message: &str) -> serde_json::Value {
    json!({ "type": kind, "message": message })
}
