//! `rota-scheduler` — deferred one-shot job execution.
//!
//! # Overview
//!
//! Jobs live in two systems at once: a one-shot registration inside the
//! [`TimerEngine`] (or any other [`SchedulerAdapter`] implementation) and
//! a durable row in the [`rota_store`] job store. The
//! [`JobLifecycleCoordinator`] keeps the two in agreement: it creates and
//! cancels jobs in the right order, consumes the engine's lifecycle event
//! stream, and advances persisted status through the rules in
//! [`machine`].
//!
//! What a job does when it fires is a [`body::JobBody`] registered on the
//! engine by name; [`gateway`] provides the body used for outbound sends,
//! with bounded retry on connection failures.

pub mod adapter;
pub mod body;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod machine;

pub use adapter::{
    EventKind, JobPayload, LifecycleEvent, Registration, RegistrationInfo, SchedulerAdapter,
};
pub use body::{BodyError, JobBody, JobContext};
pub use coordinator::{
    BatchDeletion, DeleteOutcome, JobInfo, JobLifecycleCoordinator, JobListing, NewJob,
    SpreadRequest,
};
pub use engine::TimerEngine;
pub use error::{Result, SchedulerError};
pub use gateway::{GatewayError, SendGateway, SendJobBody};
