//! Cooldown policy for failed upstream calls
//!
//! Distinguishes account-level exhaustion (402 payment required, 429
//! rate-limited) from server-side or repeated failures. Exhaustion gets a
//! long cooldown since it will not self-resolve quickly; a single 5xx or a
//! run of consecutive failures of any kind gets a short backoff. Isolated
//! client-side failures below the threshold cost nothing.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// What a reported failure does to the slot that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// 402/429: account exhausted, long cooldown
    QuotaCooldown,
    /// 5xx or too many consecutive failures, short backoff
    ErrorCooldown,
    /// Tolerated, no cooldown
    Tolerated,
}

/// Cooldown durations and the consecutive-failure threshold.
///
/// Deserializable from gateway configuration; omitted fields take the
/// defaults below.
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownPolicy {
    /// Cooldown after a 402/429, in seconds
    #[serde(default = "default_quota_cooldown_secs")]
    pub quota_cooldown_secs: u64,
    /// Cooldown after a 5xx or after `failure_threshold` consecutive
    /// failures, in seconds
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
    /// Consecutive failures of any kind that trigger the short cooldown
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_quota_cooldown_secs() -> u64 {
    3600
}

fn default_failure_cooldown_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            quota_cooldown_secs: default_quota_cooldown_secs(),
            failure_cooldown_secs: default_failure_cooldown_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl CooldownPolicy {
    /// Validate that all knobs are usable.
    ///
    /// Zero durations would make cooldowns no-ops and a zero threshold would
    /// cool a slot down on its first tolerated failure, so both are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.quota_cooldown_secs == 0 {
            return Err(Error::InvalidPolicy(
                "quota_cooldown_secs must be greater than 0".into(),
            ));
        }
        if self.failure_cooldown_secs == 0 {
            return Err(Error::InvalidPolicy(
                "failure_cooldown_secs must be greater than 0".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(Error::InvalidPolicy(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Classify a failed call by status code and the slot's consecutive-error
    /// count (already including this failure).
    ///
    /// Precedence: quota statuses first, then server errors or the
    /// consecutive-failure threshold, then tolerated.
    pub fn classify(&self, status: u16, consecutive_errors: u32) -> FailureAction {
        match status {
            402 | 429 => FailureAction::QuotaCooldown,
            _ if status >= 500 || consecutive_errors >= self.failure_threshold => {
                FailureAction::ErrorCooldown
            }
            _ => FailureAction::Tolerated,
        }
    }

    /// Cooldown duration for a classified failure, if any.
    pub fn cooldown(&self, action: FailureAction) -> Option<Duration> {
        match action {
            FailureAction::QuotaCooldown => Some(Duration::from_secs(self.quota_cooldown_secs)),
            FailureAction::ErrorCooldown => Some(Duration::from_secs(self.failure_cooldown_secs)),
            FailureAction::Tolerated => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_402_is_quota() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(402, 1), FailureAction::QuotaCooldown);
    }

    #[test]
    fn classify_429_is_quota() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(429, 1), FailureAction::QuotaCooldown);
    }

    #[test]
    fn classify_429_is_quota_even_past_threshold() {
        // Quota statuses take precedence over the consecutive-failure rule
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(429, 5), FailureAction::QuotaCooldown);
    }

    #[test]
    fn classify_500_is_error_cooldown() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(500, 1), FailureAction::ErrorCooldown);
    }

    #[test]
    fn classify_503_is_error_cooldown() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(503, 1), FailureAction::ErrorCooldown);
    }

    #[test]
    fn classify_single_400_is_tolerated() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(400, 1), FailureAction::Tolerated);
        assert_eq!(policy.classify(400, 2), FailureAction::Tolerated);
    }

    #[test]
    fn classify_400_at_threshold_is_error_cooldown() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(400, 3), FailureAction::ErrorCooldown);
        assert_eq!(policy.classify(400, 4), FailureAction::ErrorCooldown);
    }

    #[test]
    fn classify_401_below_threshold_is_tolerated() {
        let policy = CooldownPolicy::default();
        assert_eq!(policy.classify(401, 1), FailureAction::Tolerated);
    }

    #[test]
    fn cooldown_durations_match_knobs() {
        let policy = CooldownPolicy::default();
        assert_eq!(
            policy.cooldown(FailureAction::QuotaCooldown),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(
            policy.cooldown(FailureAction::ErrorCooldown),
            Some(Duration::from_secs(60))
        );
        assert_eq!(policy.cooldown(FailureAction::Tolerated), None);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let policy: CooldownPolicy = toml::from_str("quota_cooldown_secs = 7200").unwrap();
        assert_eq!(policy.quota_cooldown_secs, 7200);
        assert_eq!(policy.failure_cooldown_secs, 60);
        assert_eq!(policy.failure_threshold, 3);
    }

    #[test]
    fn deserialize_empty_is_default() {
        let policy: CooldownPolicy = toml::from_str("").unwrap();
        assert_eq!(policy.quota_cooldown_secs, 3600);
        assert_eq!(policy.failure_cooldown_secs, 60);
        assert_eq!(policy.failure_threshold, 3);
    }

    #[test]
    fn validate_default_is_ok() {
        assert!(CooldownPolicy::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_quota_cooldown() {
        let policy = CooldownPolicy {
            quota_cooldown_secs: 0,
            ..CooldownPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("quota_cooldown_secs"), "got: {err}");
    }

    #[test]
    fn validate_rejects_zero_failure_cooldown() {
        let policy = CooldownPolicy {
            failure_cooldown_secs: 0,
            ..CooldownPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let policy = CooldownPolicy {
            failure_threshold: 0,
            ..CooldownPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"), "got: {err}");
    }
}
