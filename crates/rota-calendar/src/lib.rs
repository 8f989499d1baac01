//! `rota-calendar` — business-time conversion and spread computation.
//!
//! # Overview
//!
//! "Business seconds" count only the time inside a per-weekday table of
//! working-hour intervals (index 0 = Monday). [`BusinessCalendar`] converts
//! between wall-clock instants and business seconds elapsed since a
//! reference epoch, in both directions; [`TimeDistributor`] builds on it to
//! pick N execution instants spread across an interval, either evenly up to
//! a deadline or stepped by a minimum business-time gap.
//!
//! Everything here is a pure, synchronous computation — no clocks, no I/O.

pub mod error;
pub mod spread;
pub mod workweek;

pub use error::{CalendarError, Result};
pub use spread::TimeDistributor;
pub use workweek::{BusinessCalendar, DayHours, WorkWeek};
