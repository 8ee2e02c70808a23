//! Session-date bookkeeping: rollover instants, session windows, holidays.
//!
//! A trading session is bounded by the account's configured rollover time in
//! its local timezone (futures convention, e.g. 17:00 America/New_York).
//! Everything here is pure calendar math; the reset scheduler and the
//! session-block rule drive it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Dates on which no session rollover fires and session windows are closed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HolidayCalendar {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }
}

/// A daily trading window in some local timezone. Windows that close before
/// they open span midnight (e.g. 18:00–09:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl SessionWindow {
    pub fn contains(&self, local: NaiveTime) -> bool {
        if self.open <= self.close {
            local >= self.open && local < self.close
        } else {
            // Overnight window
            local >= self.open || local < self.close
        }
    }
}

/// Converts between wall clocks and session dates for one account.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    pub timezone: Tz,
    pub rollover: NaiveTime,
}

impl SessionClock {
    pub fn new(timezone: Tz, rollover: NaiveTime) -> Self {
        Self { timezone, rollover }
    }

    /// The session date an instant belongs to. Instants at or past the
    /// rollover time belong to the next day's session.
    pub fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        let local = at.with_timezone(&self.timezone);
        if local.time() >= self.rollover {
            local.date_naive() + Duration::days(1)
        } else {
            local.date_naive()
        }
    }

    /// The next rollover instant strictly after `after`, skipping holidays.
    pub fn next_rollover(&self, after: DateTime<Utc>, holidays: &HolidayCalendar) -> DateTime<Utc> {
        let local = after.with_timezone(&self.timezone);
        let mut date = local.date_naive();
        if local.time() >= self.rollover {
            date += Duration::days(1);
        }
        // Bounded scan; a calendar with a year of consecutive holidays is a
        // configuration bug, not a case to serve.
        for _ in 0..366 {
            if !holidays.is_holiday(date) {
                if let Some(instant) = self.local_instant(date, self.rollover) {
                    return instant;
                }
            }
            date += Duration::days(1);
        }
        Utc.with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
            .single()
            .unwrap_or(after + Duration::days(1))
    }

    /// The next instant a session window opens, strictly after `after`,
    /// skipping holidays.
    pub fn next_session_open(
        &self,
        window: &SessionWindow,
        after: DateTime<Utc>,
        holidays: &HolidayCalendar,
    ) -> DateTime<Utc> {
        let local = after.with_timezone(&self.timezone);
        let mut date = local.date_naive();
        if local.time() >= window.open {
            date += Duration::days(1);
        }
        for _ in 0..366 {
            if !holidays.is_holiday(date) {
                if let Some(instant) = self.local_instant(date, window.open) {
                    return instant;
                }
            }
            date += Duration::days(1);
        }
        after + Duration::days(1)
    }

    /// Whether `at` falls inside the window, honoring holidays as
    /// outside-window days.
    pub fn in_session(
        &self,
        window: &SessionWindow,
        at: DateTime<Utc>,
        holidays: &HolidayCalendar,
    ) -> bool {
        let local = at.with_timezone(&self.timezone);
        if holidays.is_holiday(local.date_naive()) {
            return false;
        }
        window.contains(local.time())
    }

    /// Resolves a local date+time to UTC. DST gaps yield `None` for the
    /// skipped hour; ambiguous instants resolve to the earlier offset.
    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
