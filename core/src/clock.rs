//! Time source and processing calendar.
//!
//! RULE: Nothing in the runner reads system time directly.
//! Every "now" flows through an injected Clock so runs are reproducible.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The current calendar day. This is the execution date of a run.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time. Used by the runner binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used in tests; backfills of a past
/// day go through `RewardRunner::run_for_date` on the real clock instead.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Midday UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self::at((date.and_time(NaiveTime::MIN) + Duration::hours(12)).and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// The weekdays on which the distribution job may credit rewards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessCalendar {
    processing_days: Vec<Weekday>,
}

impl BusinessCalendar {
    pub fn new(processing_days: Vec<Weekday>) -> Self {
        Self { processing_days }
    }

    /// Monday through Friday.
    pub fn weekdays() -> Self {
        Self::new(vec![
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ])
    }

    pub fn is_processing_day(&self, date: NaiveDate) -> bool {
        self.processing_days.contains(&date.weekday())
    }

    pub fn processing_days(&self) -> &[Weekday] {
        &self.processing_days
    }

    pub fn is_empty(&self) -> bool {
        self.processing_days.is_empty()
    }
}

impl Default for BusinessCalendar {
    fn default() -> Self {
        Self::weekdays()
    }
}
