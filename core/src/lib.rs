//! Subscription reward distribution.
//!
//! A daily batch job that credits each active savings-subscription
//! enrollment a bounded reward into the customer's wallet, writes an
//! immutable ledger row for it, and advances the enrollment toward its
//! plan's target. Runs are idempotent per day and retry-safe per enrollment.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod repository;
pub mod reward;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod types;
