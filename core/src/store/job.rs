use super::{
    format_date, format_ts, is_constraint_violation, json_column_opt, parsed, parsed_opt,
    ClaimOutcome, JobClaim, JobExecution, RewardStore,
};
use crate::{
    error::{RewardError, RewardResult},
    types::{ExecutionId, JobStatus},
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};

const JOB_COLUMNS: &str = "id, job_name, execution_date, attempt, status, started_at,
     completed_at, result, error_message";

/// Error text recorded on attempts recovered by `abandon_stale_executions`.
pub const ABANDONED_MESSAGE: &str = "abandoned: still RUNNING past the stale cutoff";

impl RewardStore {
    // ── Job execution audit ────────────────────────────────────────

    /// The most recent attempt for `job_name` on `date`, if any.
    pub fn latest_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
    ) -> RewardResult<Option<JobExecution>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM job_execution
                     WHERE job_name = ?1 AND execution_date = ?2
                     ORDER BY attempt DESC LIMIT 1"
                ),
                params![job_name, format_date(date)],
                job_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Recent attempts for `job_name`, newest first.
    pub fn job_executions(&self, job_name: &str, limit: usize) -> RewardResult<Vec<JobExecution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM job_execution
             WHERE job_name = ?1
             ORDER BY execution_date DESC, attempt DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![job_name, limit as i64], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn job_execution(&self, execution_id: ExecutionId) -> RewardResult<Option<JobExecution>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM job_execution WHERE id = ?1"),
                params![execution_id],
                job_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a RUNNING attempt for `(job_name, date)`.
    ///
    /// The partial unique index on live/finished attempts is the real guard:
    /// when another attempt already holds the day the insert fails and the
    /// caller gets `AlreadyClaimed` instead of an error.
    pub fn claim_job_execution(
        &self,
        job_name: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> RewardResult<ClaimOutcome> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let date_str = format_date(date);
        let attempt: i64 = tx.query_row(
            "SELECT COALESCE(MAX(attempt), 0) + 1 FROM job_execution
             WHERE job_name = ?1 AND execution_date = ?2",
            params![job_name, date_str],
            |r| r.get(0),
        )?;
        let inserted = tx.execute(
            "INSERT INTO job_execution (job_name, execution_date, attempt, status, started_at)
             VALUES (?1, ?2, ?3, 'RUNNING', ?4)",
            params![job_name, date_str, attempt, format_ts(now)],
        );
        match inserted {
            Ok(_) => {
                let execution_id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(ClaimOutcome::Claimed(JobClaim {
                    execution_id,
                    attempt: attempt as u32,
                }))
            }
            Err(e) if is_constraint_violation(&e) => Ok(ClaimOutcome::AlreadyClaimed),
            Err(e) => Err(e.into()),
        }
    }

    /// Close a RUNNING attempt as SUCCESS or SKIPPED with a summary payload.
    pub fn complete_job_execution(
        &self,
        execution_id: ExecutionId,
        status: JobStatus,
        result: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> RewardResult<()> {
        if !status.closes_day() {
            return Err(RewardError::Other(anyhow::anyhow!(
                "cannot complete execution {execution_id} as {status}"
            )));
        }
        let changed = self.conn.execute(
            "UPDATE job_execution
             SET status = ?1, completed_at = ?2, result = ?3
             WHERE id = ?4 AND status = 'RUNNING'",
            params![
                status.as_str(),
                format_ts(now),
                serde_json::to_string(result)?,
                execution_id
            ],
        )?;
        if changed == 0 {
            return Err(RewardError::ExecutionNotRunning { execution_id });
        }
        Ok(())
    }

    /// Close a RUNNING attempt as FAILED.
    pub fn fail_job_execution(
        &self,
        execution_id: ExecutionId,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> RewardResult<()> {
        let changed = self.conn.execute(
            "UPDATE job_execution
             SET status = 'FAILED', completed_at = ?1, error_message = ?2
             WHERE id = ?3 AND status = 'RUNNING'",
            params![format_ts(now), error_message, execution_id],
        )?;
        if changed == 0 {
            return Err(RewardError::ExecutionNotRunning { execution_id });
        }
        Ok(())
    }

    /// Mark RUNNING attempts of `job_name` that started before `cutoff` as
    /// FAILED. Returns how many were recovered.
    pub fn abandon_stale_executions(
        &self,
        job_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RewardResult<usize> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let running = {
            let mut stmt = tx.prepare(
                "SELECT id, started_at FROM job_execution
                 WHERE job_name = ?1 AND status = 'RUNNING'",
            )?;
            let rows = stmt
                .query_map(params![job_name], |row| {
                    Ok((row.get::<_, i64>(0)?, parsed::<DateTime<Utc>>(row, 1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut recovered = 0;
        for (execution_id, started_at) in running {
            if started_at >= cutoff {
                continue;
            }
            recovered += tx.execute(
                "UPDATE job_execution
                 SET status = 'FAILED', completed_at = ?1, error_message = ?2
                 WHERE id = ?3 AND status = 'RUNNING'",
                params![format_ts(now), ABANDONED_MESSAGE, execution_id],
            )?;
        }
        tx.commit()?;
        Ok(recovered)
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    Ok(JobExecution {
        id:             row.get(0)?,
        job_name:       row.get(1)?,
        execution_date: parsed(row, 2)?,
        attempt:        row.get::<_, i64>(3)? as u32,
        status:         parsed(row, 4)?,
        started_at:     parsed(row, 5)?,
        completed_at:   parsed_opt(row, 6)?,
        result:         json_column_opt(row, 7)?,
        error_message:  row.get(8)?,
    })
}
