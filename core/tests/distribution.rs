//! End-to-end behaviour of a distribution run against an in-memory store:
//! clamping, steady accrual, saturation, idempotency, the business-day gate
//! and candidate selection.

mod common;

use chrono::NaiveDate;
use common::*;
use reward_core::{
    cancel::CancelToken,
    error::RewardError,
    runner::RunOutcome,
    store::{NewEnrollment, RewardStore},
    types::{EnrollmentStatus, JobStatus, TxnReason, TxnType, DEFAULT_WALLET_TYPE},
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn completed(outcome: RunOutcome) -> reward_core::runner::RunSummary {
    match outcome {
        RunOutcome::Completed(summary) => summary,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[test]
fn clamps_final_reward_to_remaining_target() {
    init_logging();
    let store = fresh_store();
    let id = enroll(&store, "cust-clamp", dec!(10.00), dec!(100.00), dec!(95.00));
    let (runner, _clock) = runner_on(store, monday());

    let summary = completed(runner.run(&CancelToken::new()).unwrap());
    assert_eq!(summary.processed_count, 1);
    assert_eq!(summary.total_rewarded, dec!(5.00));

    let store = runner.store();
    let enrollment = store.enrollment(id).unwrap().unwrap();
    assert_eq!(enrollment.current_amount, dec!(100.00));

    let rewards = store.reward_transactions_for(id).unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].amount, dec!(5.00));
    assert_eq!(rewards[0].txn_type, TxnType::Credit);
    assert_eq!(rewards[0].reason, TxnReason::Reward);
    assert_eq!(rewards[0].subscription_id, Some(id));
    assert_eq!(rewards[0].reward_date, Some(monday()));
    assert_eq!(rewards[0].metadata["rewardDate"], "2026-10-19");

    let wallet = store
        .wallet("cust-clamp", DEFAULT_WALLET_TYPE)
        .unwrap()
        .expect("wallet created on first credit");
    assert_eq!(wallet.balance, dec!(5.00));
}

#[test]
fn five_weekdays_accrue_to_target() {
    init_logging();
    let store = fresh_store();
    let id = enroll(&store, "cust-steady", dec!(10.00), dec!(50.00), dec!(0));
    let (runner, clock) = runner_on(store, monday());

    let mut day = monday();
    for run in 1..=5 {
        clock.set(noon(day));
        let summary = completed(runner.run(&CancelToken::new()).unwrap());
        assert_eq!(summary.total_rewarded, dec!(10.00), "run {run} on {day}");
        day = next_weekday(day);
    }

    let store = runner.store();
    assert_eq!(store.enrollment(id).unwrap().unwrap().current_amount, dec!(50.00));
    let rewards = store.reward_transactions_for(id).unwrap();
    assert_eq!(rewards.len(), 5);
    assert!(rewards.iter().all(|t| t.amount == dec!(10.00)));
    assert_eq!(
        store.wallet("cust-steady", DEFAULT_WALLET_TYPE).unwrap().unwrap().balance,
        dec!(50.00)
    );
}

#[test]
fn saturated_enrollment_is_left_untouched() {
    init_logging();
    let store = fresh_store();
    let id = enroll(&store, "cust-full", dec!(10.00), dec!(50.00), dec!(40.00));
    let (runner, clock) = runner_on(store, monday());

    completed(runner.run(&CancelToken::new()).unwrap());
    let balance_after_first = runner
        .store()
        .wallet("cust-full", DEFAULT_WALLET_TYPE)
        .unwrap()
        .unwrap()
        .balance;
    assert_eq!(balance_after_first, dec!(10.00));

    clock.set(noon(next_weekday(monday())));
    let summary = completed(runner.run(&CancelToken::new()).unwrap());
    assert_eq!(summary.processed_count, 0);
    assert_eq!(summary.saturated_count, 1);

    let store = runner.store();
    assert_eq!(store.reward_transactions_for(id).unwrap().len(), 1);
    assert_eq!(store.enrollment(id).unwrap().unwrap().current_amount, dec!(50.00));
    assert_eq!(
        store.wallet("cust-full", DEFAULT_WALLET_TYPE).unwrap().unwrap().balance,
        balance_after_first
    );
}

#[test]
fn second_run_same_day_is_a_no_op() {
    init_logging();
    let store = fresh_store();
    let id = enroll(&store, "cust-idem", dec!(10.00), dec!(100.00), dec!(0));
    let (runner, clock) = runner_on(store, monday());

    let first = completed(runner.run(&CancelToken::new()).unwrap());
    clock.advance(chrono::Duration::hours(3));
    let second = runner.run(&CancelToken::new()).unwrap();

    assert_eq!(
        second,
        RunOutcome::AlreadyCompleted {
            execution_id: first.execution_id,
            status:       JobStatus::Success,
        }
    );
    let store = runner.store();
    assert_eq!(store.reward_transactions_for(id).unwrap().len(), 1);
    assert_eq!(store.enrollment(id).unwrap().unwrap().current_amount, dec!(10.00));
    assert_eq!(store.job_executions("test_reward_distribution", 10).unwrap().len(), 1);
}

#[test]
fn weekend_run_is_recorded_as_skipped() {
    init_logging();
    let store = fresh_store();
    let id = enroll(&store, "cust-weekend", dec!(10.00), dec!(100.00), dec!(0));
    let (runner, _clock) = runner_on(store, saturday());

    let outcome = runner.run(&CancelToken::new()).unwrap();
    let RunOutcome::Skipped { execution_id, execution_date } = outcome.clone() else {
        panic!("expected a skipped run, got {outcome:?}");
    };
    assert_eq!(execution_date, saturday());

    let store = runner.store();
    assert!(store.reward_transactions_for(id).unwrap().is_empty());
    assert_eq!(store.transaction_count().unwrap(), 0);

    let audit = store.job_execution(execution_id).unwrap().unwrap();
    assert_eq!(audit.status, JobStatus::Skipped);
    assert!(audit.completed_at.is_some());
    assert_eq!(audit.result.unwrap()["reason"], "non_business_day");

    // A SKIPPED day is closed.
    let again = runner.run(&CancelToken::new()).unwrap();
    assert!(matches!(
        again,
        RunOutcome::AlreadyCompleted { status: JobStatus::Skipped, .. }
    ));
}

#[test]
fn only_active_enrollments_inside_their_window_are_selected() {
    init_logging();
    let store = fresh_store();
    let plan = store.insert_plan("standard", dec!(10.00), dec!(100.00)).unwrap();
    let created = noon(date(2026, 1, 1));
    let insert = |customer: &str, status: EnrollmentStatus, start: NaiveDate, end: NaiveDate| {
        store
            .insert_enrollment(
                &NewEnrollment {
                    customer_id: customer.into(),
                    plan_id: plan,
                    status,
                    start_date: start,
                    end_date: end,
                    current_amount: dec!(0),
                },
                created,
            )
            .unwrap()
    };
    let eligible = insert("cust-ok", EnrollmentStatus::Active, date(2026, 1, 1), date(2026, 12, 31));
    let paused = insert("cust-paused", EnrollmentStatus::Paused, date(2026, 1, 1), date(2026, 12, 31));
    let cancelled =
        insert("cust-cancelled", EnrollmentStatus::Cancelled, date(2026, 1, 1), date(2026, 12, 31));
    let future = insert("cust-future", EnrollmentStatus::Active, date(2026, 11, 1), date(2026, 12, 31));
    let expired = insert("cust-expired", EnrollmentStatus::Active, date(2026, 1, 1), date(2026, 10, 18));
    let last_day = insert("cust-lastday", EnrollmentStatus::Active, date(2026, 1, 1), monday());

    let (runner, _clock) = runner_on(store, monday());
    let summary = completed(runner.run(&CancelToken::new()).unwrap());
    assert_eq!(summary.candidate_count, 2);
    assert_eq!(summary.processed_count, 2);

    let store: &RewardStore = runner.store();
    for id in [eligible, last_day] {
        assert_eq!(store.reward_transactions_for(id).unwrap().len(), 1, "enrollment {id}");
    }
    for id in [paused, cancelled, future, expired] {
        assert!(store.reward_transactions_for(id).unwrap().is_empty(), "enrollment {id}");
        assert_eq!(store.enrollment(id).unwrap().unwrap().current_amount, dec!(0));
    }
}

#[test]
fn success_row_carries_run_summary() {
    init_logging();
    let store = fresh_store();
    enroll(&store, "cust-a", dec!(10.00), dec!(100.00), dec!(0));
    enroll(&store, "cust-b", dec!(2.50), dec!(100.00), dec!(99.00));
    enroll(&store, "cust-c", dec!(5.00), dec!(20.00), dec!(20.00));
    let (runner, _clock) = runner_on(store, monday());

    let summary = completed(runner.run(&CancelToken::new()).unwrap());
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.saturated_count, 1);
    assert_eq!(summary.total_rewarded, dec!(11.00));
    assert_eq!(summary.attempt, 1);

    let audit = runner.store().job_execution(summary.execution_id).unwrap().unwrap();
    assert_eq!(audit.status, JobStatus::Success);
    assert!(audit.completed_at.is_some());
    assert!(audit.error_message.is_none());
    let result = audit.result.expect("summary payload");
    assert_eq!(result["processedCount"], 2);
    assert_eq!(result["executionDate"], "2026-10-19");
    assert_eq!(result["totalRewarded"], "11.00");
}

#[test]
fn out_of_range_plans_and_enrollments_are_rejected() {
    init_logging();
    let store = fresh_store();
    for (increment, target) in [(dec!(-3), dec!(-100)), (dec!(0), dec!(100)), (dec!(10), dec!(0))] {
        let err = store.insert_plan("broken", increment, target).unwrap_err();
        assert!(matches!(err, RewardError::InvalidPlan { .. }), "{err}");
    }

    let plan = store.insert_plan("standard", dec!(10.00), dec!(50.00)).unwrap();
    let huge = store.insert_plan("huge", dec!(1), Decimal::MAX).unwrap();
    let new = |plan_id, current_amount, start_date| NewEnrollment {
        customer_id: "cust-bad".into(),
        plan_id,
        status: EnrollmentStatus::Active,
        start_date,
        end_date: date(2026, 12, 31),
        current_amount,
    };
    let rejected = [
        new(plan, dec!(80.00), date(2026, 1, 1)),
        new(plan, dec!(-5.00), date(2026, 1, 1)),
        new(huge, dec!(-1), date(2026, 1, 1)),
        new(plan, dec!(0), date(2027, 1, 1)),
        new(9_999, dec!(0), date(2026, 1, 1)),
    ];
    for enrollment in &rejected {
        let err = store.insert_enrollment(enrollment, noon(monday())).unwrap_err();
        assert!(matches!(err, RewardError::InvalidEnrollment { .. }), "{enrollment:?}: {err}");
    }

    // A run over what was accepted completes instead of tripping on bad rows.
    let (runner, _clock) = runner_on(store, monday());
    let summary = completed(runner.run(&CancelToken::new()).unwrap());
    assert_eq!(summary.candidate_count, 0);
}
