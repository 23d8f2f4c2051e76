//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The runner calls store methods (through the repository traits) and
//! never executes SQL directly.
//!
//! Decimals are persisted as TEXT and timestamps as RFC 3339 UTC text.

mod enrollment;
mod job;
mod wallet;

use crate::{
    error::RewardResult,
    types::{
        CustomerId, EnrollmentId, EnrollmentStatus, ExecutionId, JobStatus, PlanId, TxnReason,
        TxnStatus, TxnType, WalletId,
    },
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, Row};
use rust_decimal::Decimal;
use std::{str::FromStr, time::Duration};

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RewardStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl RewardStore {
    pub fn open(path: &str) -> RewardResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> RewardResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> RewardResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Safe to call on every open.
    pub fn migrate(&self) -> RewardResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_enrollment.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_job_execution.sql"))?;
        Ok(())
    }
}

// ── Rows ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub id:               PlanId,
    pub name:             String,
    pub reward_increment: Decimal,
    pub target_amount:    Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id:             EnrollmentId,
    pub customer_id:    CustomerId,
    pub plan_id:        PlanId,
    pub status:         EnrollmentStatus,
    pub start_date:     NaiveDate,
    pub end_date:       NaiveDate,
    pub current_amount: Decimal,
}

/// Input for `insert_enrollment`. New enrollments start at zero progress
/// unless the enrollment flow says otherwise.
#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub customer_id:    CustomerId,
    pub plan_id:        PlanId,
    pub status:         EnrollmentStatus,
    pub start_date:     NaiveDate,
    pub end_date:       NaiveDate,
    pub current_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentWithPlan {
    pub enrollment: Enrollment,
    pub plan:       SubscriptionPlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub id:          WalletId,
    pub customer_id: CustomerId,
    pub wallet_type: String,
    pub balance:     Decimal,
    pub updated_at:  DateTime<Utc>,
}

/// Balance snapshot produced by a single atomic credit or debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletMovement {
    pub wallet_id:      WalletId,
    pub balance_before: Decimal,
    pub balance_after:  Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletTransaction {
    pub id:              String,
    pub wallet_id:       WalletId,
    pub customer_id:     CustomerId,
    pub txn_type:        TxnType,
    pub reason:          TxnReason,
    pub status:          TxnStatus,
    pub amount:          Decimal,
    pub balance_before:  Decimal,
    pub balance_after:   Decimal,
    pub subscription_id: Option<EnrollmentId>,
    pub reward_date:     Option<NaiveDate>,
    pub metadata:        serde_json::Value,
    pub created_at:      DateTime<Utc>,
}

/// A ledger row about to be appended. The id and timestamp are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub wallet_id:       WalletId,
    pub customer_id:     CustomerId,
    pub txn_type:        TxnType,
    pub reason:          TxnReason,
    pub status:          TxnStatus,
    pub amount:          Decimal,
    pub balance_before:  Decimal,
    pub balance_after:   Decimal,
    pub subscription_id: Option<EnrollmentId>,
    pub reward_date:     Option<NaiveDate>,
    pub metadata:        serde_json::Value,
}

/// Result of comparing a wallet's cached balance with its ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletAudit {
    pub wallet_id:      WalletId,
    pub balance:        Decimal,
    pub ledger_balance: Decimal,
    pub entries:        usize,
}

impl WalletAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_balance
    }
}

/// Everything written for one credited enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardReceipt {
    pub enrollment_id:  EnrollmentId,
    pub transaction_id: String,
    pub wallet_id:      WalletId,
    pub amount:         Decimal,
    pub balance_before: Decimal,
    pub balance_after:  Decimal,
    pub current_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewardOutcome {
    Credited(RewardReceipt),
    /// The enrollment has reached its target; nothing written.
    Saturated,
    /// A reward for this enrollment and day already exists; nothing written.
    AlreadyRewarded,
    /// Not ACTIVE or outside its date window at apply time; nothing written.
    NotEligible,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub id:             ExecutionId,
    pub job_name:       String,
    pub execution_date: NaiveDate,
    pub attempt:        u32,
    pub status:         JobStatus,
    pub started_at:     DateTime<Utc>,
    pub completed_at:   Option<DateTime<Utc>>,
    pub result:         Option<serde_json::Value>,
    pub error_message:  Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobClaim {
    pub execution_id: ExecutionId,
    pub attempt:      u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(JobClaim),
    /// Another attempt for the same job and day holds the slot.
    AlreadyClaimed,
}

// ── Column helpers ─────────────────────────────────────────────────

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Read a TEXT column and parse it with `FromStr`, reporting failures as
/// column conversion errors.
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn json_column_opt(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// True when `err` is a UNIQUE / CHECK / FK constraint violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
