// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Retry schedule used by the event poller

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;

/// How often and how long a confirmation watch queries the ledger.
///
/// An attempt runs, then waits for the next delay; `max_attempts`
/// bounds the total number of attempts, so `delays()` yields
/// `max_attempts - 1` intervals. Intervals are configured as whole
/// seconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_initial_interval")]
    pub initial_interval: Duration,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_interval")]
    pub max_interval: Duration,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_interval: default_initial_interval(),
            multiplier: default_multiplier(),
            max_interval: default_max_interval(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Constant interval between all attempts, mainly for tests
    pub fn flat(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            multiplier: 1.0,
            max_interval: interval,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max-attempts must be at least 1".into());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0".into());
        }
        if self.initial_interval.is_zero() {
            return Err("initial-interval must be positive".into());
        }
        Ok(())
    }

    /// The waits between consecutive attempts
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // current_interval drives the first value returned, so it has
        // to be seeded alongside initial_interval.
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        std::iter::from_fn(move || backoff.next_backoff())
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_count_is_attempts_minus_one() {
        assert_eq!(RetryPolicy::new(10).delays().count(), 9);
        assert_eq!(RetryPolicy::new(1).delays().count(), 0);
    }

    #[test]
    fn test_flat_policy_repeats_interval() {
        let policy = RetryPolicy::flat(4, Duration::from_millis(30));
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(delays, vec![Duration::from_millis(30); 3]);
    }

    #[test]
    fn test_delays_double_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_interval: Duration::from_secs(5),
            multiplier: 2.0,
            max_interval: Duration::from_secs(20),
        };
        let delays: Vec<_> = policy.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(20),
                Duration::from_secs(20),
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(RetryPolicy::new(0).validate().is_err());
        assert!(RetryPolicy::new(3).with_multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::new(3)
            .with_initial_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_serde_round_trip() {
        let policy = RetryPolicy::flat(7, Duration::from_secs(3));
        let yaml = serde_yaml::to_string(&policy).unwrap();
        let back: RetryPolicy = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_serde_fills_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max-attempts: 4").unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_interval, Duration::from_secs(5));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_interval, Duration::from_secs(60));
    }
}
