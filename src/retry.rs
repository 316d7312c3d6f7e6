//! Shared retry policy
//!
//! One parameterized exponential backoff used by the token manager and the
//! download engine, built on the `backoff` crate.

use crate::config::serde_millis;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff parameters with a bounded attempt count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    #[serde(with = "serde_millis")]
    pub initial_interval: Duration,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Upper bound for a single delay
    #[serde(with = "serde_millis")]
    pub max_interval: Duration,

    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Jitter applied to each delay (0.0 = deterministic)
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 1.5,
            max_interval: Duration::from_secs(5),
            max_attempts: 5,
            randomization_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without waiting (tests, local sources)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            max_attempts,
            ..Default::default()
        }
    }

    /// Build the underlying exponential backoff, reset to the initial interval
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_interval)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Start tracking attempts for one operation
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            backoff: self.backoff(),
            attempts: 0,
            max_attempts: self.max_attempts.max(1),
            max_interval: self.max_interval,
        }
    }
}

/// Attempt counter for a single retried operation
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
    attempts: u32,
    max_attempts: u32,
    max_interval: Duration,
}

impl RetrySchedule {
    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return None;
        }
        Some(self.backoff.next_backoff().unwrap_or(self.max_interval))
    }

    /// Failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            ..Default::default()
        };
        let mut schedule = policy.schedule();

        let delays: Vec<Duration> = std::iter::from_fn(|| schedule.next_delay()).collect();

        assert_eq!(delays.len(), 9);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_millis(1500));
        assert!(delays.iter().all(|d| *d >= Duration::from_secs(1)));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_attempt_budget() {
        let mut schedule = RetryPolicy::immediate(3).schedule();

        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_some());
        assert!(schedule.next_delay().is_none());
        assert_eq!(schedule.attempts(), 3);
    }

    #[test]
    fn test_single_attempt_policy_never_retries() {
        let mut schedule = RetryPolicy::immediate(1).schedule();
        assert!(schedule.next_delay().is_none());
    }

    #[test]
    fn test_immediate_policy_has_no_delay() {
        let mut schedule = RetryPolicy::immediate(4).schedule();
        assert_eq!(schedule.next_delay(), Some(Duration::ZERO));
    }
}
