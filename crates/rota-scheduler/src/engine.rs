//! In-process timer engine.
//!
//! Holds one-shot registrations in memory, polls them on a fixed tick, and
//! broadcasts [`LifecycleEvent`]s as they fire. Execution happens on
//! spawned tasks so a slow body never stalls the tick loop. A registration
//! is removed from the map before its body starts, which is what makes
//! every job fire at most once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rota_core::EngineConfig;
use rota_store::JobStore;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{
    EventKind, LifecycleEvent, Registration, RegistrationInfo, SchedulerAdapter,
};
use crate::body::{error_json, JobBody, JobContext};
use crate::error::{Result, SchedulerError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct TimerEngine {
    registrations: DashMap<String, Registration>,
    bodies: HashMap<String, Arc<dyn JobBody>>,
    store: Arc<JobStore>,
    events: broadcast::Sender<LifecycleEvent>,
    tick: Duration,
}

impl TimerEngine {
    pub fn new(store: Arc<JobStore>, config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registrations: DashMap::new(),
            bodies: HashMap::new(),
            store,
            events,
            tick: Duration::from_millis(config.tick_ms),
        }
    }

    /// Register a named body. Must happen before the engine is shared;
    /// registrations refer to bodies by this name.
    pub fn with_body(mut self, name: impl Into<String>, body: Arc<dyn JobBody>) -> Self {
        self.bodies.insert(name.into(), body);
        self
    }

    /// Poll loop. Runs until `shutdown` flips to true or its sender drops.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tick_ms = self.tick.as_millis() as u64, "timer engine started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.fire_due(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("timer engine stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Pull everything due off the map and hand it to workers.
    fn fire_due(&self) {
        let now = Utc::now();
        let due: Vec<Registration> = self
            .registrations
            .iter()
            .filter(|entry| entry.value().run_at <= now)
            .map(|entry| entry.value().clone())
            .collect();

        for registration in due {
            // A concurrent cancel between the scan and here wins.
            if self.registrations.remove(&registration.id).is_none() {
                continue;
            }

            let late = now.signed_duration_since(registration.run_at);
            let beyond_grace = late
                .to_std()
                .map(|d| d > registration.misfire_grace)
                .unwrap_or(false);
            if beyond_grace {
                warn!(
                    job_id = %registration.id,
                    late_secs = late.num_seconds(),
                    "run time missed beyond grace"
                );
                emit(&self.events, event(&registration, EventKind::Missed, None));
                emit(&self.events, event(&registration, EventKind::Removed, None));
                continue;
            }

            emit(&self.events, event(&registration, EventKind::Submitted, None));
            let body = self.bodies.get(&registration.payload.body).cloned();
            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            tokio::spawn(execute(body, store, events, registration));
        }
    }
}

#[instrument(skip_all, fields(job_id = %registration.id))]
async fn execute(
    body: Option<Arc<dyn JobBody>>,
    store: Arc<JobStore>,
    events: broadcast::Sender<LifecycleEvent>,
    registration: Registration,
) {
    let ctx = JobContext::new(store, registration.id.clone());
    let outcome = match body {
        Some(body) => body
            .run(&ctx, &registration.payload.args)
            .await
            .map_err(|e| error_json("JobBodyError", &e.to_string())),
        None => Err(error_json(
            "UnknownJobBody",
            &format!("no body registered under {:?}", registration.payload.body),
        )),
    };

    match outcome {
        Ok(()) => {
            debug!("job executed");
            emit(&events, event(&registration, EventKind::Executed, None));
        }
        Err(error) => {
            warn!(%error, "job execution failed");
            emit(&events, event(&registration, EventKind::ExecutionError, Some(error)));
        }
    }
    // The registration was dropped at fire time; tell subscribers.
    emit(&events, event(&registration, EventKind::Removed, None));
}

fn event(
    registration: &Registration,
    kind: EventKind,
    error: Option<serde_json::Value>,
) -> LifecycleEvent {
    LifecycleEvent {
        job_id: registration.id.clone(),
        kind,
        error,
        scheduled_run_time: Some(registration.run_at),
    }
}

fn emit(events: &broadcast::Sender<LifecycleEvent>, event: LifecycleEvent) {
    if events.send(event).is_err() {
        debug!("no lifecycle subscribers; event dropped");
    }
}

#[async_trait]
impl SchedulerAdapter for TimerEngine {
    async fn register_once(&self, registration: Registration) -> Result<()> {
        match self.registrations.entry(registration.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SchedulerError::DuplicateJobId {
                id: registration.id,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(
                    job_id = %registration.id,
                    run_at = %registration.run_at,
                    "registration added"
                );
                slot.insert(registration);
                Ok(())
            }
        }
    }

    // No event is broadcast here: the caller cancelling is also the one
    // recording the outcome, and a REMOVED event racing that write would
    // arrive for an already-terminal record.
    async fn cancel(&self, id: &str) -> Result<bool> {
        let removed = self.registrations.remove(id).is_some();
        if removed {
            debug!(job_id = %id, "registration cancelled");
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<RegistrationInfo>> {
        Ok(self.registrations.get(id).map(|entry| RegistrationInfo {
            id: entry.id.clone(),
            next_run_time: entry.run_at,
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
