use super::{
    format_date, format_ts, parsed,
    wallet::{append_transaction_in, credit_wallet_in},
    Enrollment, EnrollmentWithPlan, NewEnrollment, NewWalletTransaction, RewardOutcome,
    RewardReceipt, RewardStore, SubscriptionPlan,
};
use crate::{
    error::{RewardError, RewardResult},
    reward::compute_reward,
    types::{EnrollmentId, EnrollmentStatus, PlanId, TxnReason, TxnStatus, TxnType},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;

const ENROLLMENT_WITH_PLAN: &str = "SELECT e.id, e.customer_id, e.plan_id, e.status, e.start_date,
            e.end_date, e.current_amount, p.id, p.name, p.reward_increment, p.target_amount
     FROM enrollment e
     JOIN subscription_plan p ON p.id = e.plan_id";

impl RewardStore {
    // ── Plans ──────────────────────────────────────────────────────

    /// Increment and target must both be positive.
    pub fn insert_plan(
        &self,
        name: &str,
        reward_increment: Decimal,
        target_amount: Decimal,
    ) -> RewardResult<PlanId> {
        if reward_increment <= Decimal::ZERO || target_amount <= Decimal::ZERO {
            return Err(RewardError::InvalidPlan {
                reason: format!(
                    "'{name}' needs a positive increment and target, got {reward_increment} / {target_amount}"
                ),
            });
        }
        self.conn.execute(
            "INSERT INTO subscription_plan (name, reward_increment, target_amount)
             VALUES (?1, ?2, ?3)",
            params![name, reward_increment.to_string(), target_amount.to_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn plan(&self, plan_id: PlanId) -> RewardResult<Option<SubscriptionPlan>> {
        let plan = self
            .conn
            .query_row(
                "SELECT id, name, reward_increment, target_amount
                 FROM subscription_plan WHERE id = ?1",
                params![plan_id],
                |row| plan_from_row(row, 0),
            )
            .optional()?;
        Ok(plan)
    }

    // ── Enrollments ────────────────────────────────────────────────

    /// Rejects progress outside `0..=target_amount` of the referenced plan.
    pub fn insert_enrollment(
        &self,
        new: &NewEnrollment,
        now: DateTime<Utc>,
    ) -> RewardResult<EnrollmentId> {
        let plan = self.plan(new.plan_id)?.ok_or_else(|| RewardError::InvalidEnrollment {
            reason: format!("plan {} does not exist", new.plan_id),
        })?;
        if new.current_amount < Decimal::ZERO || new.current_amount > plan.target_amount {
            return Err(RewardError::InvalidEnrollment {
                reason: format!(
                    "current amount {} outside 0..={} of plan {}",
                    new.current_amount, plan.target_amount, plan.id
                ),
            });
        }
        if new.start_date > new.end_date {
            return Err(RewardError::InvalidEnrollment {
                reason: format!("window {}..{} is empty", new.start_date, new.end_date),
            });
        }
        let ts = format_ts(now);
        self.conn.execute(
            "INSERT INTO enrollment (
                customer_id, plan_id, status, start_date, end_date,
                current_amount, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                new.customer_id,
                new.plan_id,
                new.status.as_str(),
                format_date(new.start_date),
                format_date(new.end_date),
                new.current_amount.to_string(),
                ts,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn enrollment(&self, enrollment_id: EnrollmentId) -> RewardResult<Option<Enrollment>> {
        Ok(enrollment_with_plan_in(&self.conn, enrollment_id)?.map(|e| e.enrollment))
    }

    /// Status changes belong to the external lifecycle manager.
    pub fn set_enrollment_status(
        &self,
        enrollment_id: EnrollmentId,
        status: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> RewardResult<()> {
        let changed = self.conn.execute(
            "UPDATE enrollment SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_ts(now), enrollment_id],
        )?;
        if changed == 0 {
            return Err(RewardError::EnrollmentNotFound { enrollment_id });
        }
        Ok(())
    }

    /// ACTIVE enrollments whose window contains `today`, each with its plan.
    pub fn active_enrollments(&self, today: NaiveDate) -> RewardResult<Vec<EnrollmentWithPlan>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENROLLMENT_WITH_PLAN}
             WHERE e.status = 'ACTIVE' AND e.start_date <= ?1 AND e.end_date >= ?1
             ORDER BY e.id ASC"
        ))?;
        let rows = stmt
            .query_map(params![format_date(today)], enrollment_with_plan_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Credit one enrollment's reward for `reward_date`.
    ///
    /// Wallet credit, ledger row and progress update commit together or not
    /// at all. The enrollment is re-read under the write lock, and the
    /// `(enrollment, reward_date)` marker makes a repeat call a no-op.
    pub fn apply_reward(
        &self,
        enrollment_id: EnrollmentId,
        reward_date: NaiveDate,
        wallet_type: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<RewardOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let EnrollmentWithPlan { enrollment, plan } =
            enrollment_with_plan_in(&tx, enrollment_id)?
                .ok_or(RewardError::EnrollmentNotFound { enrollment_id })?;

        if enrollment.status != EnrollmentStatus::Active
            || reward_date < enrollment.start_date
            || reward_date > enrollment.end_date
        {
            return Ok(RewardOutcome::NotEligible);
        }
        if reward_exists_in(&tx, enrollment_id, reward_date)? {
            return Ok(RewardOutcome::AlreadyRewarded);
        }
        let Some(amount) = compute_reward(&plan, &enrollment) else {
            return Ok(RewardOutcome::Saturated);
        };

        let movement = credit_wallet_in(&tx, &enrollment.customer_id, wallet_type, amount, now)?;
        let transaction_id = append_transaction_in(
            &tx,
            &NewWalletTransaction {
                wallet_id:       movement.wallet_id,
                customer_id:     enrollment.customer_id.clone(),
                txn_type:        TxnType::Credit,
                reason:          TxnReason::Reward,
                status:          TxnStatus::Success,
                amount,
                balance_before:  movement.balance_before,
                balance_after:   movement.balance_after,
                subscription_id: Some(enrollment_id),
                reward_date:     Some(reward_date),
                metadata: serde_json::json!({
                    "planId":     plan.id,
                    "rewardDate": format_date(reward_date),
                    "amount":     amount.to_string(),
                }),
            },
            now,
        )?;

        let current_amount = enrollment.current_amount + amount;
        tx.execute(
            "UPDATE enrollment SET current_amount = ?1, updated_at = ?2 WHERE id = ?3",
            params![current_amount.to_string(), format_ts(now), enrollment_id],
        )?;
        tx.commit()?;

        Ok(RewardOutcome::Credited(RewardReceipt {
            enrollment_id,
            transaction_id,
            wallet_id: movement.wallet_id,
            amount,
            balance_before: movement.balance_before,
            balance_after: movement.balance_after,
            current_amount,
        }))
    }
}

fn enrollment_with_plan_in(
    conn: &Connection,
    enrollment_id: EnrollmentId,
) -> RewardResult<Option<EnrollmentWithPlan>> {
    let row = conn
        .query_row(
            &format!("{ENROLLMENT_WITH_PLAN} WHERE e.id = ?1"),
            params![enrollment_id],
            enrollment_with_plan_from_row,
        )
        .optional()?;
    Ok(row)
}

fn reward_exists_in(
    conn: &Connection,
    enrollment_id: EnrollmentId,
    reward_date: NaiveDate,
) -> RewardResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM wallet_transaction
         WHERE subscription_id = ?1 AND reward_date = ?2 AND reason = 'REWARD'",
        params![enrollment_id, format_date(reward_date)],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

fn plan_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<SubscriptionPlan> {
    Ok(SubscriptionPlan {
        id:               row.get(offset)?,
        name:             row.get(offset + 1)?,
        reward_increment: parsed(row, offset + 2)?,
        target_amount:    parsed(row, offset + 3)?,
    })
}

fn enrollment_with_plan_from_row(row: &Row<'_>) -> rusqlite::Result<EnrollmentWithPlan> {
    Ok(EnrollmentWithPlan {
        enrollment: Enrollment {
            id:             row.get(0)?,
            customer_id:    row.get(1)?,
            plan_id:        row.get(2)?,
            status:         parsed(row, 3)?,
            start_date:     parsed(row, 4)?,
            end_date:       parsed(row, 5)?,
            current_amount: parsed(row, 6)?,
        },
        plan: plan_from_row(row, 7)?,
    })
}
