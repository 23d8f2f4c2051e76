//! The distribution runner: one invocation = one attempt at one day.
//!
//! STATE MACHINE:
//!   NOT_STARTED → CLAIMED → PROCESSING → SUCCESS
//!                         ↘ SKIPPED      ↘ FAILED
//!
//! RULES:
//!   - A day closed by SUCCESS or SKIPPED is never processed again.
//!   - A FAILED day may be claimed again; enrollments already rewarded that
//!     day are skipped by the per-enrollment marker, never re-credited.
//!   - Every claimed attempt is finalized on every exit path.
//!   - Enrollments are processed sequentially, in store order.

use crate::{
    cancel::CancelToken,
    clock::{BusinessCalendar, Clock},
    config::DistributionConfig,
    error::{RewardError, RewardResult},
    repository::DistributionStore,
    reward::compute_reward,
    store::{ClaimOutcome, JobClaim, RewardOutcome},
    types::{ExecutionId, JobStatus},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// What a single invocation did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The day was already closed by an earlier attempt.
    AlreadyCompleted {
        execution_id: ExecutionId,
        status:       JobStatus,
    },
    /// Another attempt holds the day (in progress, or won the claim race).
    AlreadyRunning,
    /// Not a processing day. The attempt was recorded as SKIPPED.
    Skipped {
        execution_id:   ExecutionId,
        execution_date: NaiveDate,
    },
    Completed(RunSummary),
}

/// Stored as the `result` payload of a successful attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub execution_id:           ExecutionId,
    pub execution_date:         NaiveDate,
    pub attempt:                u32,
    pub candidate_count:        usize,
    pub processed_count:        usize,
    pub saturated_count:        usize,
    pub already_rewarded_count: usize,
    pub not_eligible_count:     usize,
    pub total_rewarded:         Decimal,
}

impl RunSummary {
    fn new(claim: JobClaim, execution_date: NaiveDate) -> Self {
        Self {
            execution_id: claim.execution_id,
            execution_date,
            attempt: claim.attempt,
            candidate_count: 0,
            processed_count: 0,
            saturated_count: 0,
            already_rewarded_count: 0,
            not_eligible_count: 0,
            total_rewarded: Decimal::ZERO,
        }
    }
}

pub struct RewardRunner<S> {
    store:    S,
    clock:    Arc<dyn Clock>,
    calendar: BusinessCalendar,
    config:   DistributionConfig,
}

impl<S: DistributionStore> RewardRunner<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>, config: DistributionConfig) -> Self {
        Self {
            calendar: config.calendar(),
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Run the distribution job for the clock's current day.
    ///
    /// Idempotency skips and claim races come back as `Ok` outcomes. An
    /// `Err` means the attempt was recorded FAILED (or could not be claimed
    /// at all) and the day is open for a retry.
    pub fn run(&self, cancel: &CancelToken) -> RewardResult<RunOutcome> {
        self.run_for_date(self.clock.today(), cancel)
    }

    /// Run the job for `execution_date`, e.g. to backfill a missed day.
    /// Audit timestamps still come from the clock. Future days are refused.
    pub fn run_for_date(
        &self,
        execution_date: NaiveDate,
        cancel: &CancelToken,
    ) -> RewardResult<RunOutcome> {
        let job = self.config.job_name.as_str();
        let started_at = self.clock.now();
        if execution_date > started_at.date_naive() {
            return Err(RewardError::Other(anyhow::anyhow!(
                "{job}: cannot run for {execution_date}, it is still in the future"
            )));
        }

        let recovered = self.store.abandon_stale_executions(
            job,
            self.config.stale_cutoff(started_at)?,
            started_at,
        )?;
        if recovered > 0 {
            log::warn!("{job}: marked {recovered} stale RUNNING attempt(s) as FAILED");
        }

        if let Some(prior) = self.store.latest_job_execution(job, execution_date)? {
            match prior.status {
                JobStatus::Success | JobStatus::Skipped => {
                    log::info!(
                        "{job}: {execution_date} already closed by attempt {} ({}), nothing to do",
                        prior.attempt,
                        prior.status
                    );
                    return Ok(RunOutcome::AlreadyCompleted {
                        execution_id: prior.id,
                        status:       prior.status,
                    });
                }
                JobStatus::Running => {
                    log::info!(
                        "{job}: {execution_date} attempt {} is still running, nothing to do",
                        prior.attempt
                    );
                    return Ok(RunOutcome::AlreadyRunning);
                }
                JobStatus::Failed => {
                    log::info!(
                        "{job}: {execution_date} attempt {} failed, retrying",
                        prior.attempt
                    );
                }
            }
        }

        let claim = match self.store.claim_job_execution(job, execution_date, started_at)? {
            ClaimOutcome::Claimed(claim) => claim,
            ClaimOutcome::AlreadyClaimed => {
                log::info!("{job}: {execution_date} claimed by another runner, nothing to do");
                return Ok(RunOutcome::AlreadyRunning);
            }
        };
        log::info!(
            "{job}: claimed {execution_date} as execution {} (attempt {})",
            claim.execution_id,
            claim.attempt
        );

        if !self.calendar.is_processing_day(execution_date) {
            let result = serde_json::json!({
                "reason":        "non_business_day",
                "executionDate": execution_date,
                "weekday":       execution_date.format("%A").to_string(),
            });
            let skipped = self.store.complete_job_execution(
                claim.execution_id,
                JobStatus::Skipped,
                &result,
                self.clock.now(),
            );
            self.finalize(claim, skipped)?;
            log::info!("{job}: {execution_date} is not a processing day, skipped");
            return Ok(RunOutcome::Skipped {
                execution_id: claim.execution_id,
                execution_date,
            });
        }

        let outcome = self
            .distribute(claim, execution_date, started_at, cancel)
            .and_then(|summary| {
                let result = serde_json::to_value(&summary)?;
                self.store.complete_job_execution(
                    claim.execution_id,
                    JobStatus::Success,
                    &result,
                    self.clock.now(),
                )?;
                Ok(summary)
            });
        let summary = self.finalize(claim, outcome)?;

        log::info!(
            "{job}: {execution_date} done: {} credited ({} total), {} saturated, {} already rewarded",
            summary.processed_count,
            summary.total_rewarded,
            summary.saturated_count,
            summary.already_rewarded_count
        );
        Ok(RunOutcome::Completed(summary))
    }

    /// Record FAILED for the attempt when `outcome` is an error, then pass
    /// the outcome through.
    fn finalize<T>(&self, claim: JobClaim, outcome: RewardResult<T>) -> RewardResult<T> {
        if let Err(e) = &outcome {
            log::warn!(
                "{}: execution {} failed: {e}",
                self.config.job_name,
                claim.execution_id
            );
            if let Err(audit_err) =
                self.store
                    .fail_job_execution(claim.execution_id, &e.to_string(), self.clock.now())
            {
                log::error!(
                    "{}: could not record failure of execution {}: {audit_err}",
                    self.config.job_name,
                    claim.execution_id
                );
            }
        }
        outcome
    }

    fn distribute(
        &self,
        claim: JobClaim,
        execution_date: NaiveDate,
        started_at: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> RewardResult<RunSummary> {
        let deadline = self.config.run_deadline(started_at)?;
        let candidates = self.store.active_enrollments(execution_date)?;
        log::info!(
            "{}: {} active enrollment(s) for {execution_date}",
            self.config.job_name,
            candidates.len()
        );

        let mut summary = RunSummary::new(claim, execution_date);
        summary.candidate_count = candidates.len();

        for candidate in &candidates {
            self.check_continue(cancel, deadline)?;

            let enrollment = &candidate.enrollment;
            if compute_reward(&candidate.plan, enrollment).is_none() {
                log::debug!("enrollment {}: target reached, skipped", enrollment.id);
                summary.saturated_count += 1;
                continue;
            }

            match self.store.apply_reward(
                enrollment.id,
                execution_date,
                &self.config.wallet_type,
                self.clock.now(),
            )? {
                RewardOutcome::Credited(receipt) => {
                    log::debug!(
                        "enrollment {}: credited {} to wallet {} ({} -> {}), progress {}",
                        enrollment.id,
                        receipt.amount,
                        receipt.wallet_id,
                        receipt.balance_before,
                        receipt.balance_after,
                        receipt.current_amount
                    );
                    summary.processed_count += 1;
                    let total = summary.total_rewarded;
                    summary.total_rewarded = total
                        .checked_add(receipt.amount)
                        .ok_or_else(|| anyhow::anyhow!("run total overflows after {total}"))?;
                }
                RewardOutcome::Saturated => summary.saturated_count += 1,
                RewardOutcome::AlreadyRewarded => {
                    log::debug!(
                        "enrollment {}: already rewarded for {execution_date}",
                        enrollment.id
                    );
                    summary.already_rewarded_count += 1;
                }
                RewardOutcome::NotEligible => summary.not_eligible_count += 1,
            }
        }
        Ok(summary)
    }

    fn check_continue(
        &self,
        cancel: &CancelToken,
        deadline: Option<DateTime<Utc>>,
    ) -> RewardResult<()> {
        if cancel.is_cancelled() {
            return Err(RewardError::Cancelled {
                reason: "cancellation requested".into(),
            });
        }
        if let Some(deadline) = deadline {
            if self.clock.now() > deadline {
                return Err(RewardError::Cancelled {
                    reason: format!("run exceeded its deadline of {deadline}"),
                });
            }
        }
        Ok(())
    }
}
