//! Timer-engine façade.
//!
//! The lifecycle coordinator talks to the timer side only through
//! [`SchedulerAdapter`], so the in-process [`TimerEngine`] can be swapped
//! for another timing backend without touching persistence or lifecycle
//! logic. Only one-shot, fire-at-an-instant registrations exist: the
//! persisted status model assumes each job id fires at most once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Default misfire grace, matching the engine config default.
pub const DEFAULT_MISFIRE_GRACE: Duration =
    Duration::from_secs(rota_core::config::DEFAULT_MISFIRE_GRACE_SECS);

/// What a registration executes when it fires: a named job body plus its
/// JSON arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    /// Name of a body registered with the engine.
    pub body: String,
    pub args: serde_json::Value,
}

/// A one-shot timer registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Shared with the persisted job row; stable for the job's life.
    pub id: String,
    pub run_at: DateTime<Utc>,
    pub payload: JobPayload,
    /// Carried for parity with the registration model; every registration
    /// fires at most once, so there is never anything to coalesce.
    pub coalesce: bool,
    /// How far past `run_at` the engine may still execute instead of
    /// declaring the job missed.
    pub misfire_grace: Duration,
}

impl Registration {
    pub fn once(id: impl Into<String>, run_at: DateTime<Utc>, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            run_at,
            payload,
            coalesce: true,
            misfire_grace: DEFAULT_MISFIRE_GRACE,
        }
    }
}

/// Read-side view of a live registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationInfo {
    pub id: String,
    pub next_run_time: DateTime<Utc>,
}

/// What happened to a registration inside the timer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Handed to a worker; execution is starting.
    Submitted,
    /// Execution finished cleanly.
    Executed,
    /// Execution returned an error.
    ExecutionError,
    /// The run time plus misfire grace passed without execution.
    Missed,
    /// The registration was dropped from the engine.
    Removed,
    /// Anything the engine may grow later; never advances job status.
    Other(String),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Submitted => write!(f, "SUBMITTED"),
            EventKind::Executed => write!(f, "EXECUTED"),
            EventKind::ExecutionError => write!(f, "EXECUTION_ERROR"),
            EventKind::Missed => write!(f, "MISSED"),
            EventKind::Removed => write!(f, "REMOVED"),
            EventKind::Other(name) => write!(f, "OTHER({name})"),
        }
    }
}

/// Broadcast by the engine as registrations move through their life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub job_id: String,
    pub kind: EventKind,
    /// Structured error details, present on `ExecutionError` events.
    pub error: Option<serde_json::Value>,
    pub scheduled_run_time: Option<DateTime<Utc>>,
}

impl LifecycleEvent {
    pub fn new(job_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            error: None,
            scheduled_run_time: None,
        }
    }
}

/// Narrow façade over the timer engine.
#[async_trait]
pub trait SchedulerAdapter: Send + Sync {
    /// Register a one-shot job. Fails on a duplicate id.
    async fn register_once(&self, registration: Registration) -> Result<()>;

    /// Drop a live registration. Returns false when no such registration
    /// exists, so callers can cancel unconditionally.
    async fn cancel(&self, id: &str) -> Result<bool>;

    /// Look up a live registration by id.
    async fn get(&self, id: &str) -> Result<Option<RegistrationInfo>>;

    /// Subscribe to lifecycle events. Events broadcast before the call are
    /// not replayed.
    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent>;
}
