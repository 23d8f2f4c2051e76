//! The persistence seams the runner depends on.
//!
//! RewardStore implements all of them against SQLite. Tests wrap or replace
//! it to inject failures; the runner never names a concrete store.

use crate::{
    error::RewardResult,
    store::{
        ClaimOutcome, EnrollmentWithPlan, JobExecution, RewardOutcome, RewardStore,
    },
    types::{EnrollmentId, ExecutionId, JobStatus},
};
use chrono::{DateTime, NaiveDate, Utc};

/// Enrollment queries plus the per-enrollment atomic reward write.
pub trait EnrollmentRepository {
    fn active_enrollments(&self, today: NaiveDate) -> RewardResult<Vec<EnrollmentWithPlan>>;

    fn apply_reward(
        &self,
        enrollment_id: EnrollmentId,
        reward_date: NaiveDate,
        wallet_type: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<RewardOutcome>;
}

/// Job audit trail and the per-day claim.
pub trait JobAuditRepository {
    fn latest_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
    ) -> RewardResult<Option<JobExecution>>;

    fn claim_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> RewardResult<ClaimOutcome>;

    fn complete_job_execution(
        &self,
        execution_id: ExecutionId,
        status: JobStatus,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RewardResult<()>;

    fn fail_job_execution(
        &self,
        execution_id: ExecutionId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<()>;

    fn abandon_stale_executions(
        &self,
        job_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RewardResult<usize>;
}

/// Everything one distribution run touches.
pub trait DistributionStore: EnrollmentRepository + JobAuditRepository {}

impl<T: EnrollmentRepository + JobAuditRepository> DistributionStore for T {}

impl EnrollmentRepository for RewardStore {
    fn active_enrollments(&self, today: NaiveDate) -> RewardResult<Vec<EnrollmentWithPlan>> {
        RewardStore::active_enrollments(self, today)
    }

    fn apply_reward(
        &self,
        enrollment_id: EnrollmentId,
        reward_date: NaiveDate,
        wallet_type: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<RewardOutcome> {
        RewardStore::apply_reward(self, enrollment_id, reward_date, wallet_type, now)
    }
}

impl JobAuditRepository for RewardStore {
    fn latest_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
    ) -> RewardResult<Option<JobExecution>> {
        RewardStore::latest_job_execution(self, job_name, date)
    }

    fn claim_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> RewardResult<ClaimOutcome> {
        RewardStore::claim_job_execution(self, job_name, date, now)
    }

    fn complete_job_execution(
        &self,
        execution_id: ExecutionId,
        status: JobStatus,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RewardResult<()> {
        RewardStore::complete_job_execution(self, execution_id, status, result, now)
    }

    fn fail_job_execution(
        &self,
        execution_id: ExecutionId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<()> {
        RewardStore::fail_job_execution(self, execution_id, error_message, now)
    }

    fn abandon_stale_executions(
        &self,
        job_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RewardResult<usize> {
        RewardStore::abandon_stale_executions(self, job_name, cutoff, now)
    }
}
