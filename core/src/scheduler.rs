//! Fixed daily trigger for the distribution runner.
//!
//! The scheduler holds no job state. It sleeps until the next fire time,
//! calls `RewardRunner::run`, and goes back to sleep. Manual runs go through
//! `run_now`, the same entry point.

use crate::{
    cancel::CancelToken,
    clock::BusinessCalendar,
    error::RewardResult,
    repository::DistributionStore,
    runner::{RewardRunner, RunOutcome},
};
use chrono::{DateTime, Duration, NaiveTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    pub fire_at:  NaiveTime,
    pub calendar: BusinessCalendar,
}

impl DailySchedule {
    pub fn new(fire_at: NaiveTime, calendar: BusinessCalendar) -> Self {
        Self { fire_at, calendar }
    }

    /// The first fire time strictly after `now` that falls on a processing
    /// day. None when the calendar has no processing days.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (0..=7)
            .map(|offset| now.date_naive() + Duration::days(offset))
            .filter(|date| self.calendar.is_processing_day(*date))
            .map(|date| date.and_time(self.fire_at).and_utc())
            .find(|candidate| *candidate > now)
    }
}

pub struct Scheduler<S> {
    runner:        RewardRunner<S>,
    schedule:      DailySchedule,
    poll_interval: std::time::Duration,
}

impl<S: DistributionStore> Scheduler<S> {
    pub fn new(
        runner: RewardRunner<S>,
        schedule: DailySchedule,
        poll_interval: std::time::Duration,
    ) -> Self {
        Self {
            runner,
            schedule,
            poll_interval,
        }
    }

    pub fn runner(&self) -> &RewardRunner<S> {
        &self.runner
    }

    /// Trigger one run immediately.
    pub fn run_now(&self, cancel: &CancelToken) -> RewardResult<RunOutcome> {
        self.runner.run(cancel)
    }

    /// Loop until `cancel` fires. A failed run is logged and the loop moves
    /// on to the next fire time.
    pub fn run(&self, cancel: &CancelToken) -> RewardResult<()> {
        let job = self.runner.config().job_name.clone();
        loop {
            if cancel.is_cancelled() {
                log::info!("{job}: scheduler stopped");
                return Ok(());
            }
            let Some(next) = self.schedule.next_fire_after(self.runner.clock().now()) else {
                log::warn!("{job}: no processing days configured, scheduler exiting");
                return Ok(());
            };
            log::info!("{job}: next run at {next}");

            if !self.sleep_until(next, cancel) {
                log::info!("{job}: scheduler stopped");
                return Ok(());
            }

            match self.run_now(cancel) {
                Ok(outcome) => log::info!("{job}: scheduled run finished: {outcome:?}"),
                Err(e) => log::error!("{job}: scheduled run failed: {e}"),
            }
        }
    }

    /// Sleep in slices of at most `poll_interval` until `deadline`.
    /// Returns false if cancelled first.
    fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = self.runner.clock().now();
            if now >= deadline {
                return true;
            }
            let remaining = (deadline - now)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            std::thread::sleep(remaining.min(self.poll_interval));
        }
    }
}
