use chrono::{DateTime, Duration, FixedOffset};
use tracing::debug;

use crate::error::{CalendarError, Result};
use crate::workweek::BusinessCalendar;

/// Computes lists of execution instants spread across business time.
///
/// All arithmetic happens in business seconds relative to `epoch`; the
/// returned instants carry the offset of the caller-supplied `start`.
#[derive(Debug, Clone)]
pub struct TimeDistributor {
    calendar: BusinessCalendar,
    epoch: DateTime<FixedOffset>,
}

impl TimeDistributor {
    pub fn new(calendar: BusinessCalendar, epoch: DateTime<FixedOffset>) -> Self {
        Self { calendar, epoch }
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    /// `runs` instants evenly spaced in business seconds between `start`
    /// (inclusive) and `deadline` (exclusive).
    ///
    /// Returns the instants together with the business-second spacing
    /// between consecutive runs, so callers can validate it against a
    /// minimum gap.
    pub fn spread_by_deadline(
        &self,
        start: DateTime<FixedOffset>,
        deadline: DateTime<FixedOffset>,
        runs: u32,
    ) -> Result<(Vec<DateTime<FixedOffset>>, f64)> {
        if runs == 0 {
            return Err(CalendarError::InvalidRuns { runs });
        }
        if deadline < start {
            return Err(CalendarError::InvalidRange {
                instant: deadline,
                epoch: start,
            });
        }

        let start_bs = self.calendar.business_seconds_since(self.epoch, start)?;
        let deadline_bs = self.calendar.business_seconds_since(self.epoch, deadline)?;
        let step = (deadline_bs - start_bs) as f64 / runs as f64;
        debug!(start_bs, deadline_bs, step, runs, "spreading by deadline");

        let mut times = Vec::with_capacity(runs as usize);
        for i in 0..runs {
            let at = self
                .calendar
                .instant_from_business_seconds(self.epoch, start_bs + (step * i as f64) as i64)?;
            times.push(at.with_timezone(start.offset()));
        }
        Ok((times, step))
    }

    /// `runs` instants stepping forward from `start` by `min_gap` business
    /// time each, with no deadline.
    pub fn spread_by_min_gap(
        &self,
        start: DateTime<FixedOffset>,
        min_gap: Duration,
        runs: u32,
    ) -> Result<Vec<DateTime<FixedOffset>>> {
        if runs == 0 {
            return Err(CalendarError::InvalidRuns { runs });
        }

        let start_bs = self.calendar.business_seconds_since(self.epoch, start)?;
        let gap_secs = min_gap.num_seconds();

        let mut times = Vec::with_capacity(runs as usize);
        for i in 0..runs {
            let at = self
                .calendar
                .instant_from_business_seconds(self.epoch, start_bs + gap_secs * i as i64)?;
            times.push(at.with_timezone(start.offset()));
        }
        Ok(times)
    }

    /// Spread `runs` instants using a deadline, a minimum gap, or both.
    ///
    /// With both, the instants are computed from the deadline and the
    /// resulting spacing must be at least `min_gap`; a narrower spacing is
    /// an [`CalendarError::InsufficientSpacing`] error, never widened
    /// silently.
    pub fn spread(
        &self,
        start: DateTime<FixedOffset>,
        deadline: Option<DateTime<FixedOffset>>,
        min_gap: Option<Duration>,
        runs: u32,
    ) -> Result<Vec<DateTime<FixedOffset>>> {
        match (deadline, min_gap) {
            (None, None) => Err(CalendarError::MissingConstraint),
            (Some(deadline), gap) => {
                let (times, spacing_secs) = self.spread_by_deadline(start, deadline, runs)?;
                if let Some(gap) = gap {
                    let min_gap_secs = gap.num_seconds();
                    if spacing_secs < min_gap_secs as f64 {
                        return Err(CalendarError::InsufficientSpacing {
                            spacing_secs,
                            min_gap_secs,
                        });
                    }
                }
                Ok(times)
            }
            (None, Some(gap)) => self.spread_by_min_gap(start, gap, runs),
        }
    }
}
