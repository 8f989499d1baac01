//! Pure status transition rules.
//!
//! Decides how a persisted [`JobStatus`] reacts to a timer [`EventKind`].
//! No I/O here; the coordinator applies the result to the store.

use rota_store::JobStatus;
use thiserror::Error;

use crate::adapter::EventKind;

/// An event arrived for a job in a terminal status. Terminal means the
/// record is settled; any further event is a disagreement between the
/// timer engine and the store and must be surfaced, not absorbed.
#[derive(Debug, Error)]
#[error("no transitions are permitted out of a terminal status")]
pub struct TerminalStateViolation;

/// Next status for `current` on `event`.
///
/// `Ok(None)` means the event does not move this job (out-of-order
/// duplicate, post-completion removal, unrecognised kind) and the record
/// stays as it is.
pub fn next(
    current: JobStatus,
    event: &EventKind,
) -> std::result::Result<Option<JobStatus>, TerminalStateViolation> {
    if current.is_terminal() {
        return Err(TerminalStateViolation);
    }

    let next = match event {
        // Only a waiting job starts running; a late SUBMITTED after the
        // outcome landed is a duplicate.
        EventKind::Submitted if current == JobStatus::Pending => Some(JobStatus::Running),
        EventKind::Submitted => None,
        EventKind::Executed => Some(JobStatus::Success),
        EventKind::ExecutionError => Some(JobStatus::Failure),
        EventKind::Missed => Some(JobStatus::Missed),
        // The engine drops registrations after they fire too; only removal
        // of a still-waiting job is a cancellation.
        EventKind::Removed if current == JobStatus::Pending => Some(JobStatus::Deleted),
        EventKind::Removed => None,
        EventKind::Other(_) => None,
    };
    Ok(next)
}
