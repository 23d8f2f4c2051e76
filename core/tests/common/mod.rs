#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, Utc};
use reward_core::{
    clock::FixedClock,
    config::DistributionConfig,
    runner::RewardRunner,
    store::{NewEnrollment, RewardStore},
    types::{EnrollmentId, EnrollmentStatus},
};
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Monday 2026-10-19.
pub fn monday() -> NaiveDate {
    date(2026, 10, 19)
}

/// Saturday 2026-10-24.
pub fn saturday() -> NaiveDate {
    date(2026, 10, 24)
}

pub fn noon(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(12, 0, 0).expect("valid time").and_utc()
}

pub fn fresh_store() -> RewardStore {
    let store = RewardStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

/// A migrated store in a WAL-mode database file that lives as long as the
/// returned directory. Other connections reach it through `reopen`.
pub fn file_store() -> (tempfile::TempDir, RewardStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("rewards.db");
    let store = RewardStore::open(path.to_str().expect("utf-8 temp path")).expect("file store");
    store.migrate().expect("migration");
    (dir, store)
}

pub fn runner_on(store: RewardStore, day: NaiveDate) -> (RewardRunner<RewardStore>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::on(day));
    let runner = RewardRunner::new(store, clock.clone(), DistributionConfig::default_test());
    (runner, clock)
}

/// An ACTIVE enrollment on a new plan, open for the whole of 2026.
pub fn enroll(
    store: &RewardStore,
    customer_id: &str,
    increment: Decimal,
    target: Decimal,
    current: Decimal,
) -> EnrollmentId {
    let plan_id = store
        .insert_plan(&format!("plan-{customer_id}"), increment, target)
        .expect("insert plan");
    store
        .insert_enrollment(
            &NewEnrollment {
                customer_id: customer_id.into(),
                plan_id,
                status: EnrollmentStatus::Active,
                start_date: date(2026, 1, 1),
                end_date: date(2026, 12, 31),
                current_amount: current,
            },
            noon(date(2026, 1, 1)),
        )
        .expect("insert enrollment")
}

/// Next processing day after `day` under the default Mon–Fri calendar.
pub fn next_weekday(day: NaiveDate) -> NaiveDate {
    use chrono::Datelike;
    let mut next = day + Duration::days(1);
    while next.weekday().number_from_monday() > 5 {
        next += Duration::days(1);
    }
    next
}
