use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, Timelike};
use rota_core::config::CalendarConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CalendarError, Result};

/// Working interval for a single weekday. `start == end` means closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DayHours {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if end < start {
            return Err(CalendarError::InvalidHours(format!(
                "end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A fully closed day.
    pub fn closed() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::MIN,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.start == self.end
    }

    /// Length of the working interval in seconds.
    pub fn len_secs(&self) -> i64 {
        secs_from_midnight(self.end) - secs_from_midnight(self.start)
    }
}

/// Per-weekday working-hour table, index 0 = Monday … 6 = Sunday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkWeek {
    days: [DayHours; 7],
}

impl WorkWeek {
    pub fn new(days: [DayHours; 7]) -> Self {
        Self { days }
    }

    /// Build a week from the config table (`["HH:MM", "HH:MM"]` pairs).
    pub fn from_config(cfg: &CalendarConfig) -> Result<Self> {
        if cfg.hours.len() != 7 {
            return Err(CalendarError::InvalidHours(format!(
                "expected 7 weekday entries, got {}",
                cfg.hours.len()
            )));
        }
        let mut days = [DayHours::closed(); 7];
        for (i, [start, end]) in cfg.hours.iter().enumerate() {
            days[i] = DayHours::new(parse_hhmm(start)?, parse_hhmm(end)?)?;
        }
        Ok(Self { days })
    }

    /// Working interval for the weekday of `dt` (Monday = 0).
    pub fn day_for(&self, dt: &NaiveDateTime) -> &DayHours {
        &self.days[dt.weekday().num_days_from_monday() as usize]
    }

    /// Total working seconds across one full week.
    pub fn total_secs(&self) -> i64 {
        self.days.iter().map(DayHours::len_secs).sum()
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| CalendarError::InvalidHours(format!("{s}: {e}")))
}

fn secs_from_midnight(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

/// Rebuild a fixed-offset instant from a local wall-clock value.
///
/// Infallible for fixed offsets, unlike `TimeZone::from_local_datetime`.
fn with_offset(naive: NaiveDateTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let utc = naive - Duration::seconds(offset.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(utc, offset)
}

/// Converts between wall-clock instants and business seconds — the count of
/// seconds elapsed inside the configured working intervals since a reference
/// epoch.
///
/// The epoch is interpreted at its calendar-day boundary: contributions are
/// accumulated per whole day from the instant's date back to the epoch's
/// date, matching an epoch placed at local midnight.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    week: WorkWeek,
}

impl BusinessCalendar {
    pub fn new(week: WorkWeek) -> Self {
        Self { week }
    }

    pub fn from_config(cfg: &CalendarConfig) -> Result<Self> {
        Ok(Self::new(WorkWeek::from_config(cfg)?))
    }

    pub fn week(&self) -> &WorkWeek {
        &self.week
    }

    /// Cumulative business seconds elapsed between `epoch` and `instant`.
    ///
    /// Walks backward one calendar day at a time. The boundary day
    /// contributes partially (zero before the interval opens, the elapsed
    /// portion inside it, the full interval once it has closed); every day
    /// strictly between contributes its full interval.
    pub fn business_seconds_since(
        &self,
        epoch: DateTime<FixedOffset>,
        instant: DateTime<FixedOffset>,
    ) -> Result<i64> {
        if instant < epoch {
            return Err(CalendarError::InvalidRange { instant, epoch });
        }

        let epoch_local = epoch.naive_local();
        let mut current = instant.naive_local();
        let mut total: i64 = 0;

        while current >= epoch_local {
            let day = self.week.day_for(&current);
            let start_sec = secs_from_midnight(day.start);
            let end_sec = secs_from_midnight(day.end);
            let cur_sec = secs_from_midnight(current.time());

            total += if cur_sec >= end_sec {
                (end_sec - start_sec).max(0)
            } else if cur_sec >= start_sec {
                cur_sec - start_sec
            } else {
                0
            };

            // Move to 23:59:59 of the previous day so the full interval of
            // every earlier day is counted.
            current = current.date().and_time(NaiveTime::MIN) - Duration::seconds(1);
        }

        Ok(total)
    }

    /// Exact inverse of [`business_seconds_since`](Self::business_seconds_since).
    ///
    /// Walks forward from `epoch`, consuming whole business-day lengths
    /// until the remainder fits within a single day, then lands at that
    /// day's start plus the remainder. Closed days are skipped.
    pub fn instant_from_business_seconds(
        &self,
        epoch: DateTime<FixedOffset>,
        seconds: i64,
    ) -> Result<DateTime<FixedOffset>> {
        if seconds < 0 {
            return Err(CalendarError::ExhaustedInput { seconds });
        }
        if self.week.total_secs() == 0 {
            return Err(CalendarError::NeverOpens);
        }

        let offset = *epoch.offset();
        let mut date = epoch.naive_local().date();
        let mut remaining = seconds;

        loop {
            let day = self.week.day_for(&date.and_time(NaiveTime::MIN));
            let day_len = day.len_secs();
            if remaining >= day_len {
                remaining -= day_len;
                date += Duration::days(1);
            } else {
                let naive = date.and_time(day.start) + Duration::seconds(remaining);
                return Ok(with_offset(naive, offset));
            }
        }
    }
}
