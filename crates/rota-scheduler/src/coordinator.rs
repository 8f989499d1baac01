//! Keeps the timer engine and the job store in agreement.
//!
//! Every job exists in two places: a timer registration and a persisted
//! row. The coordinator owns the ordering between the two — registration
//! before row on creation, cancellation before the DELETED write on
//! removal — and is the single writer applying lifecycle events to
//! persisted status.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rota_calendar::TimeDistributor;
use rota_core::EngineConfig;
use rota_store::{JobBatch, JobRecord, JobStatus, JobStore, StoreError};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{EventKind, JobPayload, LifecycleEvent, Registration, SchedulerAdapter};
use crate::body::error_json;
use crate::error::{Result, SchedulerError};
use crate::machine;

/// A job to create: one registration plus one row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub batch_id: String,
    pub description: String,
    pub run_at: DateTime<FixedOffset>,
    pub payload: JobPayload,
}

/// A batch of jobs spread across business time.
#[derive(Debug, Clone)]
pub struct SpreadRequest {
    pub batch_id: String,
    /// Id segment between the batch name and the run index, e.g.
    /// `"pre_deadline_job"` yields ids like `"{batch}/pre_deadline_job/0"`.
    pub label: String,
    pub description: String,
    pub start: DateTime<FixedOffset>,
    pub deadline: Option<DateTime<FixedOffset>>,
    pub min_gap: Option<chrono::Duration>,
    pub runs: u32,
    pub payload: JobPayload,
}

/// A persisted record joined with its live registration, if any.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub record: JobRecord,
    pub next_run_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct JobListing {
    pub prefix: String,
    pub count: usize,
    pub jobs: Vec<JobInfo>,
}

/// What `delete_job` found to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// A live registration was cancelled and the record marked DELETED.
    Cancelled,
    /// No live registration; the record, if any, was left untouched.
    NotPending,
}

#[derive(Debug, Clone)]
pub struct BatchDeletion {
    pub batch_id: String,
    /// Info for each job whose registration was cancelled, captured before
    /// the rows went away with the batch.
    pub deleted: Vec<JobInfo>,
    pub batch_row_removed: bool,
}

pub struct JobLifecycleCoordinator {
    store: Arc<JobStore>,
    adapter: Arc<dyn SchedulerAdapter>,
    distributor: TimeDistributor,
    misfire_grace: Duration,
}

impl JobLifecycleCoordinator {
    pub fn new(
        store: Arc<JobStore>,
        adapter: Arc<dyn SchedulerAdapter>,
        distributor: TimeDistributor,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            distributor,
            misfire_grace: Duration::from_secs(config.misfire_grace_secs),
        }
    }

    // --- creation ----------------------------------------------------------

    pub fn create_batch(&self, name: &str, description: Option<&str>) -> Result<JobBatch> {
        Ok(self.store.insert_batch(name, description)?)
    }

    pub fn batch(&self, name: &str) -> Result<Option<JobBatch>> {
        Ok(self.store.get_batch(name)?)
    }

    /// Create one job: register the timer first, persist the row second.
    ///
    /// The order guarantees a persisted row always had a registration
    /// behind it. There is no compensating cancel when the row insert
    /// fails: the orphan registration fires against no row and its events
    /// are ignored as unknown.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn create_job(&self, job: NewJob) -> Result<JobRecord> {
        if self.store.get_job(&job.id)?.is_some() || self.adapter.get(&job.id).await?.is_some() {
            return Err(SchedulerError::DuplicateJobId { id: job.id });
        }

        let mut registration =
            Registration::once(job.id.clone(), job.run_at.with_timezone(&Utc), job.payload);
        registration.misfire_grace = self.misfire_grace;
        self.adapter.register_once(registration).await?;

        let record = self
            .store
            .insert_job(&job.id, &job.description, &job.batch_id, Some(&job.id))
            .map_err(|e| {
                warn!(job_id = %job.id, error = %e, "row insert failed after registration");
                e
            })?;

        info!(batch = %job.batch_id, run_at = %job.run_at, "job created");
        Ok(record)
    }

    /// Create `runs` jobs spread across business time, with ids
    /// `{batch_id}/{label}/{index}`.
    #[instrument(skip(self, request), fields(batch = %request.batch_id, runs = request.runs))]
    pub async fn create_spread_jobs(&self, request: SpreadRequest) -> Result<Vec<JobRecord>> {
        let times = self.distributor.spread(
            request.start,
            request.deadline,
            request.min_gap,
            request.runs,
        )?;

        let mut records = Vec::with_capacity(times.len());
        for (index, run_at) in times.into_iter().enumerate() {
            let record = self
                .create_job(NewJob {
                    id: format!("{}/{}/{}", request.batch_id, request.label, index),
                    batch_id: request.batch_id.clone(),
                    description: request.description.clone(),
                    run_at,
                    payload: request.payload.clone(),
                })
                .await?;
            records.push(record);
        }
        Ok(records)
    }

    // --- queries -----------------------------------------------------------

    pub async fn job_info(&self, id: &str) -> Result<Option<JobInfo>> {
        let Some(record) = self.store.get_job(id)? else {
            return Ok(None);
        };
        let next_run_time = self.adapter.get(id).await?.map(|r| r.next_run_time);
        Ok(Some(JobInfo {
            record,
            next_run_time,
        }))
    }

    /// All jobs whose id path starts with `prefix` (empty matches all).
    pub async fn jobs_with_prefix(&self, prefix: &str) -> Result<JobListing> {
        let ids = self.store.ids_with_prefix(prefix)?;
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = self.job_info(&id).await? {
                jobs.push(info);
            }
        }
        Ok(JobListing {
            prefix: prefix.to_string(),
            count: jobs.len(),
            jobs,
        })
    }

    // --- deletion ----------------------------------------------------------

    /// Cancel a job's registration and mark its record DELETED.
    ///
    /// Only jobs with a live registration can be cancelled; anything else
    /// already ran, missed, or never existed, and is left as it stands.
    /// Deletion never fails over a missing row: cancelling an orphan
    /// registration (row insert failed after registration) is still a
    /// successful cancellation.
    #[instrument(skip(self))]
    pub async fn delete_job(&self, id: &str) -> Result<DeleteOutcome> {
        if self.adapter.get(id).await?.is_none() {
            debug!(job_id = %id, "no live registration to cancel");
            return Ok(DeleteOutcome::NotPending);
        }

        if !self.adapter.cancel(id).await? {
            // The engine fired the job between the lookup and the cancel;
            // its outcome event settles the record.
            debug!(job_id = %id, "registration fired before it could be cancelled");
            return Ok(DeleteOutcome::NotPending);
        }

        match self.store.mark_deleted(id) {
            Ok(()) => {}
            Err(StoreError::JobNotFound { .. }) => {
                warn!(job_id = %id, "cancelled a registration with no persisted row");
                return Ok(DeleteOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }
        self.store.clear_scheduler_ref(id)?;
        info!(job_id = %id, "job cancelled");
        Ok(DeleteOutcome::Cancelled)
    }

    /// Cancel every job in a batch and physically remove the batch row,
    /// cascading the job rows away with it.
    ///
    /// Idempotent: a second call finds no jobs and no row, and reports an
    /// empty deletion rather than an error.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, batch_id: &str) -> Result<BatchDeletion> {
        let mut deleted = Vec::new();
        for id in self.store.ids_for_batch(batch_id)? {
            if self.delete_job(&id).await? == DeleteOutcome::Cancelled {
                if let Some(info) = self.job_info(&id).await? {
                    deleted.push(info);
                }
            }
        }

        let batch_row_removed = self.store.delete_batch_row(batch_id)?;
        info!(
            batch = %batch_id,
            cancelled = deleted.len(),
            batch_row_removed,
            "batch deleted"
        );
        Ok(BatchDeletion {
            batch_id: batch_id.to_string(),
            deleted,
            batch_row_removed,
        })
    }

    /// Delete a batch and immediately recreate it empty, ready for a fresh
    /// set of jobs under the same name.
    pub async fn delete_and_recreate_batch(
        &self,
        batch_id: &str,
        description: Option<&str>,
    ) -> Result<(BatchDeletion, JobBatch)> {
        let deletion = self.delete_batch(batch_id).await?;
        let batch = self.store.insert_batch(batch_id, description)?;
        Ok((deletion, batch))
    }

    // --- lifecycle events --------------------------------------------------

    /// Apply one timer event to the persisted record.
    ///
    /// Events for unknown ids are ignored. An event for a terminal record
    /// is a [`SchedulerError::TerminalState`] and leaves the record
    /// untouched. On a FAILURE transition the exception is recorded before
    /// the status, so readers never see FAILURE without its cause.
    pub async fn on_lifecycle_event(&self, event: &LifecycleEvent) -> Result<Option<JobStatus>> {
        let Some(current) = self.store.status(&event.job_id)? else {
            debug!(job_id = %event.job_id, kind = %event.kind, "event for unknown job ignored");
            return Ok(None);
        };

        let next =
            machine::next(current, &event.kind).map_err(|_| SchedulerError::TerminalState {
                id: event.job_id.clone(),
                status: current,
                event: event.kind.to_string(),
            })?;

        // A REMOVED event means the timer-side entry is gone, whether or
        // not the status moves.
        if event.kind == EventKind::Removed {
            self.store.clear_scheduler_ref(&event.job_id)?;
        }

        let Some(next) = next else {
            debug!(job_id = %event.job_id, status = %current, kind = %event.kind, "event does not advance job");
            return Ok(None);
        };

        if next == JobStatus::Failure {
            let detail = event
                .error
                .clone()
                .unwrap_or_else(|| error_json("Unknown", "execution error with no detail"));
            self.store.set_exception(&event.job_id, &detail)?;
        }
        self.store.update_status(&event.job_id, next)?;
        info!(job_id = %event.job_id, from = %current, to = %next, "job status advanced");
        Ok(Some(next))
    }

    /// Consume lifecycle events until shutdown. Events are applied one at
    /// a time, which is the serialization point for status writes; a
    /// failed event is logged and the loop keeps going.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<LifecycleEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("lifecycle coordinator started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.on_lifecycle_event(&event).await {
                            error!(
                                job_id = %event.job_id,
                                kind = %event.kind,
                                error = %e,
                                "lifecycle event handling failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "lifecycle events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("event channel closed; coordinator stopping");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("lifecycle coordinator stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Startup sweep: any PENDING record without a live registration can
    /// never fire, so mark it MISSED with a note. Run after registrations
    /// are restored, before the engine starts.
    pub async fn reconcile(&self) -> Result<u32> {
        let mut swept = 0;
        for id in self.store.ids_with_status(JobStatus::Pending)? {
            if self.adapter.get(&id).await?.is_some() {
                continue;
            }
            self.store.append_issue(
                &id,
                &json!({ "note": "no live timer registration found at startup" }),
            )?;
            self.store.update_status(&id, JobStatus::Missed)?;
            self.store.clear_scheduler_ref(&id)?;
            swept += 1;
        }
        if swept > 0 {
            warn!(count = swept, "pending jobs without registrations marked missed");
        }
        Ok(swept)
    }
}
