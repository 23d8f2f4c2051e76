//! Shared primitive types and the status vocabularies persisted as TEXT.

use std::{fmt, str::FromStr};
use thiserror::Error;

pub type CustomerId = String;
pub type PlanId = i64;
pub type EnrollmentId = i64;
pub type WalletId = i64;
pub type ExecutionId = i64;

/// The wallet partition rewards are credited into unless configured otherwise.
pub const DEFAULT_WALLET_TYPE: &str = "SHOPPING";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind:  &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active    => "ACTIVE",
            Self::Paused    => "PAUSED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE"    => Ok(Self::Active),
            "PAUSED"    => Ok(Self::Paused),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(UnknownVariant { kind: "enrollment status", value: other.into() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    Credit,
    Debit,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "CREDIT",
            Self::Debit  => "DEBIT",
        }
    }
}

impl FromStr for TxnType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDIT" => Ok(Self::Credit),
            "DEBIT"  => Ok(Self::Debit),
            other => Err(UnknownVariant { kind: "transaction type", value: other.into() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnReason {
    Reward,
    Purchase,
    Refund,
    Adjustment,
}

impl TxnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reward     => "REWARD",
            Self::Purchase   => "PURCHASE",
            Self::Refund     => "REFUND",
            Self::Adjustment => "ADJUSTMENT",
        }
    }
}

impl FromStr for TxnReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REWARD"     => Ok(Self::Reward),
            "PURCHASE"   => Ok(Self::Purchase),
            "REFUND"     => Ok(Self::Refund),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            other => Err(UnknownVariant { kind: "transaction reason", value: other.into() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    Success,
}

impl TxnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
        }
    }
}

impl FromStr for TxnStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            other => Err(UnknownVariant { kind: "transaction status", value: other.into() }),
        }
    }
}

/// Lifecycle of one job attempt.
///
/// RUNNING → SUCCESS | FAILED | SKIPPED. SUCCESS and SKIPPED close the day;
/// FAILED leaves it open for a fresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed  => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Whether a row in this status means the day needs no further attempts.
    pub fn closes_day(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED"  => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(UnknownVariant { kind: "job status", value: other.into() }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
