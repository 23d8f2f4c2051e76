use crate::{
    clock::BusinessCalendar,
    scheduler::DailySchedule,
    types::DEFAULT_WALLET_TYPE,
};
use chrono::{DateTime, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

pub const DEFAULT_JOB_NAME: &str = "subscription_reward_distribution";

/// 30 days.
pub const MAX_STALE_AFTER_MINUTES: i64 = 43_200;
/// One day.
pub const MAX_RUN_SECONDS: i64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DistributionConfig {
    /// Name under which runs are recorded in the job audit table.
    pub job_name: String,
    /// Wallet partition rewards are credited into.
    pub wallet_type: String,
    pub processing_days: Vec<Weekday>,
    /// Daily trigger time, UTC.
    pub fire_at: NaiveTime,
    /// A RUNNING attempt older than this is treated as abandoned.
    pub stale_after_minutes: i64,
    /// Upper bound on a single run. None = unbounded.
    pub max_run_seconds: Option<i64>,
    /// Longest single sleep of the scheduler loop.
    pub poll_interval_seconds: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            job_name:              DEFAULT_JOB_NAME.into(),
            wallet_type:           DEFAULT_WALLET_TYPE.into(),
            processing_days:       BusinessCalendar::weekdays().processing_days().to_vec(),
            fire_at:               NaiveTime::MIN,
            stale_after_minutes:   360,
            max_run_seconds:       None,
            poll_interval_seconds: 30,
        }
    }
}

impl DistributionConfig {
    /// Load from a JSON file. Missing keys take their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DistributionConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        Self {
            job_name: "test_reward_distribution".into(),
            stale_after_minutes: 60,
            poll_interval_seconds: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_name.trim().is_empty() {
            anyhow::bail!("job_name must not be empty");
        }
        if self.wallet_type.trim().is_empty() {
            anyhow::bail!("wallet_type must not be empty");
        }
        if self.processing_days.is_empty() {
            anyhow::bail!("processing_days must name at least one weekday");
        }
        if !(1..=MAX_STALE_AFTER_MINUTES).contains(&self.stale_after_minutes) {
            anyhow::bail!(
                "stale_after_minutes must be within 1..={MAX_STALE_AFTER_MINUTES}, got {}",
                self.stale_after_minutes
            );
        }
        if let Some(secs) = self.max_run_seconds {
            if !(1..=MAX_RUN_SECONDS).contains(&secs) {
                anyhow::bail!("max_run_seconds must be within 1..={MAX_RUN_SECONDS} when set, got {secs}");
            }
        }
        if self.poll_interval_seconds == 0 {
            anyhow::bail!("poll_interval_seconds must be positive");
        }
        Ok(())
    }

    pub fn calendar(&self) -> BusinessCalendar {
        BusinessCalendar::new(self.processing_days.clone())
    }

    pub fn schedule(&self) -> DailySchedule {
        DailySchedule::new(self.fire_at, self.calendar())
    }

    /// Start times before this instant mark a RUNNING attempt as abandoned.
    /// Errors instead of overflowing when the config was never validated.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        Duration::try_minutes(self.stale_after_minutes)
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "stale_after_minutes {} is out of range",
                    self.stale_after_minutes
                )
            })
    }

    /// Instant past which a run started at `started_at` stops, if bounded.
    pub fn run_deadline(&self, started_at: DateTime<Utc>) -> anyhow::Result<Option<DateTime<Utc>>> {
        let Some(secs) = self.max_run_seconds else {
            return Ok(None);
        };
        Duration::try_seconds(secs)
            .and_then(|limit| started_at.checked_add_signed(limit))
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("max_run_seconds {secs} is out of range"))
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: DistributionConfig =
            serde_json::from_str(r#"{ "wallet_type": "CASHBACK", "fire_at": "09:30:00" }"#)
                .unwrap();
        assert_eq!(config.wallet_type, "CASHBACK");
        assert_eq!(config.fire_at, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(config.job_name, DEFAULT_JOB_NAME);
        assert_eq!(config.processing_days.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_processing_days_rejected() {
        let config = DistributionConfig {
            processing_days: vec![],
            ..DistributionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_windows_rejected() {
        let stale = DistributionConfig {
            stale_after_minutes: i64::MAX,
            ..DistributionConfig::default()
        };
        assert!(stale.validate().is_err());
        let run = DistributionConfig {
            max_run_seconds: Some(i64::MAX),
            ..DistributionConfig::default()
        };
        assert!(run.validate().is_err());
        let widest = DistributionConfig {
            stale_after_minutes: MAX_STALE_AFTER_MINUTES,
            max_run_seconds: Some(MAX_RUN_SECONDS),
            ..DistributionConfig::default()
        };
        assert!(widest.validate().is_ok());
    }

    #[test]
    fn unvalidated_windows_error_instead_of_overflowing() {
        let now = chrono::NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        let config = DistributionConfig {
            stale_after_minutes: i64::MAX,
            max_run_seconds: Some(i64::MAX),
            ..DistributionConfig::default()
        };
        assert!(config.stale_cutoff(now).is_err());
        assert!(config.run_deadline(now).is_err());

        let sane = DistributionConfig::default_test();
        assert_eq!(sane.stale_cutoff(now).unwrap(), now - Duration::minutes(60));
        assert_eq!(sane.run_deadline(now).unwrap(), None);
    }
}
