use chrono::{DateTime, FixedOffset};
use thiserror::Error;

/// Errors that can occur during business-calendar computations.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// The instant to measure lies before the reference epoch.
    #[error("instant {instant} is before epoch {epoch}")]
    InvalidRange {
        instant: DateTime<FixedOffset>,
        epoch: DateTime<FixedOffset>,
    },

    /// A negative business-second count cannot be inverted.
    #[error("cannot invert negative business seconds: {seconds}")]
    ExhaustedInput { seconds: i64 },

    /// Every weekday is closed, so no positive count maps to an instant.
    #[error("work week has no open intervals; seconds can never be consumed")]
    NeverOpens,

    /// Deadline-derived spacing is narrower than the required minimum gap.
    /// Surfaced to the caller; the spacing is never silently widened.
    #[error("spacing between runs ({spacing_secs}s) is less than min gap ({min_gap_secs}s)")]
    InsufficientSpacing { spacing_secs: f64, min_gap_secs: i64 },

    /// Neither a deadline nor a minimum gap was supplied.
    #[error("at least one of deadline or min_gap must be provided")]
    MissingConstraint,

    /// The requested number of runs is zero.
    #[error("runs must be at least 1, got {runs}")]
    InvalidRuns { runs: u32 },

    /// A working-hours table entry could not be parsed or is inverted.
    #[error("invalid working hours: {0}")]
    InvalidHours(String),
}

pub type Result<T> = std::result::Result<T, CalendarError>;
