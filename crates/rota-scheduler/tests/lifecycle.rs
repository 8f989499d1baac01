//! End-to-end lifecycle tests: timer engine, coordinator, and store
//! working against an in-memory database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc, Weekday};
use rota_calendar::{BusinessCalendar, TimeDistributor};
use rota_core::{CalendarConfig, EngineConfig};
use rota_scheduler::{
    BodyError, DeleteOutcome, EventKind, JobBody, JobContext, JobLifecycleCoordinator,
    JobPayload, LifecycleEvent, NewJob, Registration, RegistrationInfo, SchedulerAdapter,
    SchedulerError, SpreadRequest, TimerEngine,
};
use rota_store::{JobStatus, JobStore};
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::{broadcast, watch};

struct OkBody;

#[async_trait]
impl JobBody for OkBody {
    async fn run(&self, _ctx: &JobContext, _args: &serde_json::Value) -> Result<(), BodyError> {
        Ok(())
    }
}

struct BoomBody;

#[async_trait]
impl JobBody for BoomBody {
    async fn run(&self, _ctx: &JobContext, _args: &serde_json::Value) -> Result<(), BodyError> {
        Err("wires crossed".into())
    }
}

struct Fixture {
    store: Arc<JobStore>,
    engine: Arc<TimerEngine>,
    coordinator: Arc<JobLifecycleCoordinator>,
}

fn offset() -> FixedOffset {
    FixedOffset::east_opt(2 * 3600).unwrap()
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
    offset().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// Mon-Thu 08:00-20:00, Fri 09:00-13:00, Sat closed, Sun 08:00-20:00.
fn distributor() -> TimeDistributor {
    let calendar = BusinessCalendar::from_config(&CalendarConfig::default()).unwrap();
    TimeDistributor::new(calendar, at(2025, 10, 1, 0, 0))
}

fn fixture(config: EngineConfig) -> Fixture {
    let store = Arc::new(JobStore::new(Connection::open_in_memory().unwrap()).unwrap());
    let engine = Arc::new(
        TimerEngine::new(Arc::clone(&store), &config)
            .with_body("ok", Arc::new(OkBody))
            .with_body("boom", Arc::new(BoomBody)),
    );
    let coordinator = Arc::new(JobLifecycleCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&engine) as Arc<dyn SchedulerAdapter>,
        distributor(),
        &config,
    ));
    Fixture {
        store,
        engine,
        coordinator,
    }
}

fn quick_fixture() -> Fixture {
    fixture(EngineConfig {
        tick_ms: 20,
        misfire_grace_secs: 600,
    })
}

/// Start the engine loop and the coordinator event loop; dropping the
/// returned sender stops both.
fn start(f: &Fixture) -> watch::Sender<bool> {
    let (tx, rx) = watch::channel(false);
    let events = f.engine.subscribe();
    tokio::spawn(Arc::clone(&f.engine).run(rx.clone()));
    let coordinator = Arc::clone(&f.coordinator);
    tokio::spawn(async move { coordinator.run(events, rx).await });
    tx
}

async fn wait_for_status(store: &JobStore, id: &str, expected: JobStatus) {
    for _ in 0..150 {
        if store.status(id).unwrap() == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "job {id} never reached {expected}, last seen {:?}",
        store.status(id).unwrap()
    );
}

fn soon() -> DateTime<FixedOffset> {
    (Utc::now() + chrono::Duration::milliseconds(100)).with_timezone(&offset())
}

fn payload(body: &str) -> JobPayload {
    JobPayload {
        body: body.to_string(),
        args: json!({}),
    }
}

#[tokio::test]
async fn job_executes_and_lands_on_success() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "notify the customer".into(),
            run_at: soon(),
            payload: payload("ok"),
        })
        .await
        .unwrap();

    let _shutdown = start(&f);
    wait_for_status(&f.store, "orders/2025-12-01/notify/0", JobStatus::Success).await;

    let job = f.store.get_job("orders/2025-12-01/notify/0").unwrap().unwrap();
    assert!(job.exception.is_none());
    assert!(job.scheduler_ref.is_none(), "registration reference should be cleared");
}

#[tokio::test]
async fn failed_execution_records_the_exception() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "doomed".into(),
            run_at: soon(),
            payload: payload("boom"),
        })
        .await
        .unwrap();

    let _shutdown = start(&f);
    wait_for_status(&f.store, "orders/2025-12-01/notify/0", JobStatus::Failure).await;

    let job = f.store.get_job("orders/2025-12-01/notify/0").unwrap().unwrap();
    let exception = job.exception.expect("exception should be recorded");
    assert_eq!(exception["type"], "JobBodyError");
    assert!(exception["message"].as_str().unwrap().contains("wires crossed"));
}

#[tokio::test]
async fn overdue_job_is_marked_missed() {
    let f = fixture(EngineConfig {
        tick_ms: 20,
        misfire_grace_secs: 1,
    });
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "long overdue".into(),
            run_at: (Utc::now() - chrono::Duration::hours(1)).with_timezone(&offset()),
            payload: payload("ok"),
        })
        .await
        .unwrap();

    let _shutdown = start(&f);
    wait_for_status(&f.store, "orders/2025-12-01/notify/0", JobStatus::Missed).await;
}

#[tokio::test]
async fn delete_job_cancels_and_marks_deleted() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "to be cancelled".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap();

    let outcome = f.coordinator.delete_job("orders/2025-12-01/notify/0").await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Cancelled);

    let job = f.store.get_job("orders/2025-12-01/notify/0").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Deleted);
    assert!(job.scheduler_ref.is_none());
    assert!(f.engine.get("orders/2025-12-01/notify/0").await.unwrap().is_none());

    // Cancelling again finds nothing to do and changes nothing.
    let again = f.coordinator.delete_job("orders/2025-12-01/notify/0").await.unwrap();
    assert_eq!(again, DeleteOutcome::NotPending);
    assert_eq!(
        f.store.status("orders/2025-12-01/notify/0").unwrap(),
        Some(JobStatus::Deleted)
    );
}

#[tokio::test]
async fn delete_batch_twice_is_idempotent() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    for i in 0..2 {
        f.coordinator
            .create_job(NewJob {
                id: format!("orders/2025-12-01/notify/{i}"),
                batch_id: "orders/2025-12-01".into(),
                description: "batch member".into(),
                run_at: at(2027, 6, 7, 10 + i, 0),
                payload: payload("ok"),
            })
            .await
            .unwrap();
    }

    let deletion = f.coordinator.delete_batch("orders/2025-12-01").await.unwrap();
    assert_eq!(deletion.deleted.len(), 2);
    assert!(deletion.batch_row_removed);
    for info in &deletion.deleted {
        assert_eq!(info.record.status, JobStatus::Deleted);
    }
    // The cascade removed the rows with the batch.
    assert!(f.store.get_job("orders/2025-12-01/notify/0").unwrap().is_none());

    let again = f.coordinator.delete_batch("orders/2025-12-01").await.unwrap();
    assert!(again.deleted.is_empty());
    assert!(!again.batch_row_removed);
}

#[tokio::test]
async fn delete_and_recreate_leaves_an_empty_batch() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "old plan".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap();

    let (deletion, batch) = f
        .coordinator
        .delete_and_recreate_batch("orders/2025-12-01", Some("new plan"))
        .await
        .unwrap();
    assert_eq!(deletion.deleted.len(), 1);
    assert_eq!(batch.description.as_deref(), Some("new plan"));
    assert!(f.store.ids_for_batch("orders/2025-12-01").unwrap().is_empty());
}

#[tokio::test]
async fn deleted_jobs_reject_further_events() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "cancelled before firing".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap();
    f.coordinator.delete_job("orders/2025-12-01/notify/0").await.unwrap();

    let err = f
        .coordinator
        .on_lifecycle_event(&LifecycleEvent::new(
            "orders/2025-12-01/notify/0",
            EventKind::Submitted,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::TerminalState { .. }));
    // The record is untouched.
    assert_eq!(
        f.store.status("orders/2025-12-01/notify/0").unwrap(),
        Some(JobStatus::Deleted)
    );
}

#[tokio::test]
async fn events_for_unknown_jobs_are_ignored() {
    let f = quick_fixture();
    let advanced = f
        .coordinator
        .on_lifecycle_event(&LifecycleEvent::new("ghost/0", EventKind::Executed))
        .await
        .unwrap();
    assert!(advanced.is_none());
}

#[tokio::test]
async fn duplicate_job_ids_are_rejected() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();
    let job = NewJob {
        id: "orders/2025-12-01/notify/0".into(),
        batch_id: "orders/2025-12-01".into(),
        description: "first".into(),
        run_at: at(2027, 6, 7, 10, 0),
        payload: payload("ok"),
    };
    f.coordinator.create_job(job.clone()).await.unwrap();

    let err = f.coordinator.create_job(job).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateJobId { .. }));

    // The first creation is intact in both systems.
    assert!(f.engine.get("orders/2025-12-01/notify/0").await.unwrap().is_some());
    assert_eq!(
        f.store.status("orders/2025-12-01/notify/0").unwrap(),
        Some(JobStatus::Pending)
    );
}

#[tokio::test]
async fn failed_row_insert_surfaces_and_leaves_the_registration() {
    let f = quick_fixture();
    // No batch row: the insert hits the foreign key after the
    // registration already went in. No rollback happens; the orphan
    // registration's events are later ignored as unknown.
    let err = f
        .coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/0".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "orphan".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Store(rota_store::StoreError::BatchNotFound { .. })
    ));
    assert!(f.engine.get("orders/2025-12-01/notify/0").await.unwrap().is_some());
}

#[tokio::test]
async fn spread_jobs_stay_inside_business_hours() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-10-03", None).unwrap();

    // Friday start, Monday deadline: the only business time in between is
    // Friday 11:00-13:00 and Sunday 08:00-20:00, so every run must dodge
    // Saturday entirely.
    let records = f
        .coordinator
        .create_spread_jobs(SpreadRequest {
            batch_id: "orders/2025-10-03".into(),
            label: "pre_deadline_job".into(),
            description: "reminder".into(),
            start: at(2025, 10, 3, 11, 0),
            deadline: Some(at(2025, 10, 6, 11, 0)),
            min_gap: None,
            runs: 3,
            payload: payload("ok"),
        })
        .await
        .unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, "orders/2025-10-03/pre_deadline_job/0");
    assert_eq!(records[2].id, "orders/2025-10-03/pre_deadline_job/2");

    for record in &records {
        let info = f.engine.get(&record.id).await.unwrap().expect("registered");
        let local = info.next_run_time.with_timezone(&offset());
        assert_ne!(local.weekday(), Weekday::Sat, "run scheduled on a closed day");
        assert!(local.hour() >= 8, "run before opening: {local}");
    }

    let listing = f.coordinator.jobs_with_prefix("orders/2025-10-03").await.unwrap();
    assert_eq!(listing.count, 3);
    assert!(listing.jobs.iter().all(|j| j.next_run_time.is_some()));
}

#[tokio::test]
async fn deleting_an_orphan_registration_is_non_fatal() {
    let f = quick_fixture();
    // Missing batch: the row insert fails after the registration went in,
    // stranding an orphan registration.
    f.coordinator
        .create_job(NewJob {
            id: "ghost/orphan/0".into(),
            batch_id: "ghost".into(),
            description: "orphan".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap_err();
    assert!(f.engine.get("ghost/orphan/0").await.unwrap().is_some());

    let outcome = f.coordinator.delete_job("ghost/orphan/0").await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Cancelled);
    assert!(f.engine.get("ghost/orphan/0").await.unwrap().is_none());
}

/// Adapter standing in for an engine whose tick fires the job between the
/// coordinator's lookup and its cancel: the registration is still visible
/// to `get` but the cancel finds nothing left to remove.
struct FiredMidCancelAdapter {
    events: broadcast::Sender<LifecycleEvent>,
}

#[async_trait]
impl SchedulerAdapter for FiredMidCancelAdapter {
    async fn register_once(&self, _registration: Registration) -> rota_scheduler::Result<()> {
        Ok(())
    }

    async fn cancel(&self, _id: &str) -> rota_scheduler::Result<bool> {
        Ok(false)
    }

    async fn get(&self, id: &str) -> rota_scheduler::Result<Option<RegistrationInfo>> {
        Ok(Some(RegistrationInfo {
            id: id.to_string(),
            next_run_time: Utc::now(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}

#[tokio::test]
async fn delete_job_yields_to_a_registration_fired_mid_cancel() {
    let store = Arc::new(JobStore::new(Connection::open_in_memory().unwrap()).unwrap());
    store.insert_batch("orders/2025-12-01", None).unwrap();
    store
        .insert_job(
            "orders/2025-12-01/notify/0",
            "racing",
            "orders/2025-12-01",
            Some("orders/2025-12-01/notify/0"),
        )
        .unwrap();

    let (events, _) = broadcast::channel(8);
    let coordinator = JobLifecycleCoordinator::new(
        Arc::clone(&store),
        Arc::new(FiredMidCancelAdapter { events }),
        distributor(),
        &EngineConfig {
            tick_ms: 20,
            misfire_grace_secs: 600,
        },
    );

    let outcome = coordinator.delete_job("orders/2025-12-01/notify/0").await.unwrap();
    assert_eq!(outcome, DeleteOutcome::NotPending);
    // The record is left for the in-flight outcome event to settle.
    assert_eq!(
        store.status("orders/2025-12-01/notify/0").unwrap(),
        Some(JobStatus::Pending)
    );
}

#[tokio::test]
async fn reconcile_marks_stranded_pending_jobs_missed() {
    let f = quick_fixture();
    f.coordinator.create_batch("orders/2025-12-01", None).unwrap();

    // A row with no backing registration, as after an unclean restart.
    f.store
        .insert_job(
            "orders/2025-12-01/notify/0",
            "stranded",
            "orders/2025-12-01",
            Some("orders/2025-12-01/notify/0"),
        )
        .unwrap();
    // A healthy pending job for contrast.
    f.coordinator
        .create_job(NewJob {
            id: "orders/2025-12-01/notify/1".into(),
            batch_id: "orders/2025-12-01".into(),
            description: "healthy".into(),
            run_at: at(2027, 6, 7, 10, 0),
            payload: payload("ok"),
        })
        .await
        .unwrap();

    let swept = f.coordinator.reconcile().await.unwrap();
    assert_eq!(swept, 1);

    let stranded = f.store.get_job("orders/2025-12-01/notify/0").unwrap().unwrap();
    assert_eq!(stranded.status, JobStatus::Missed);
    assert!(stranded.scheduler_ref.is_none());
    assert_eq!(stranded.issues.len(), 1);

    assert_eq!(
        f.store.status("orders/2025-12-01/notify/1").unwrap(),
        Some(JobStatus::Pending)
    );
}
