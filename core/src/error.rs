use crate::types::{EnrollmentId, ExecutionId, WalletId};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewardError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid ledger entry: {reason}")]
    InvalidLedgerEntry { reason: String },

    #[error("Wallet not found for customer '{customer_id}' ({wallet_type})")]
    WalletNotFound {
        customer_id: String,
        wallet_type: String,
    },

    #[error("Insufficient funds in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet_id: WalletId,
        balance:   Decimal,
        requested: Decimal,
    },

    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("Invalid enrollment: {reason}")]
    InvalidEnrollment { reason: String },

    #[error("Enrollment {enrollment_id} not found")]
    EnrollmentNotFound { enrollment_id: EnrollmentId },

    #[error("Job execution {execution_id} is not RUNNING")]
    ExecutionNotRunning { execution_id: ExecutionId },

    #[error("Run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type RewardResult<T> = Result<T, RewardError>;
