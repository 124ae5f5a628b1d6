//! Backoff scheduling for action retries.
//!
//! Stateless per policy: a `RetrySchedule` is created for one action run and
//! asked, after each failed attempt, how long to wait before the next one.

use std::time::Duration;

use arbor_types::workflow::{RetryPolicy, RetryPolicyType};

/// Retry bookkeeping for a single action run.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    /// Retries left for `FixedCount`; unused by other policies.
    remaining: u32,
    previous_wait: Option<Duration>,
}

impl RetrySchedule {
    pub fn new(policy: Option<&RetryPolicy>) -> Self {
        let policy = policy.cloned().unwrap_or_default();
        Self {
            remaining: policy.max_retry_count,
            policy,
            previous_wait: None,
        }
    }

    /// Wait before the next attempt, or `None` once retries are exhausted.
    ///
    /// Time-based limits are the caller's concern; this only tracks the
    /// policy's own budget.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let min = Duration::from_millis(self.policy.min_backoff_ms);
        let wait = match self.policy.policy_type {
            RetryPolicyType::None => return None,
            RetryPolicyType::FixedInterval => min,
            RetryPolicyType::FixedCount => {
                if self.remaining == 0 {
                    return None;
                }
                self.remaining -= 1;
                min
            }
            RetryPolicyType::ExponentialBackoff => {
                // A cap below the seed would make the seed unreachable.
                let cap = Duration::from_millis(self.policy.max_backoff_ms).max(min);
                match self.previous_wait {
                    None => min,
                    Some(previous) => previous.saturating_mul(2).min(cap),
                }
            }
        };
        self.previous_wait = Some(wait);
        Some(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(policy_type: RetryPolicyType, min: u64, max: u64, count: u32) -> RetryPolicy {
        RetryPolicy {
            policy_type,
            min_backoff_ms: min,
            max_backoff_ms: max,
            max_retry_count: count,
        }
    }

    #[test]
    fn test_no_policy_never_retries() {
        let mut schedule = RetrySchedule::new(None);
        assert_eq!(schedule.next_wait(), None);
    }

    #[test]
    fn test_fixed_count_allows_exactly_n_retries() {
        let mut schedule = RetrySchedule::new(Some(&policy(RetryPolicyType::FixedCount, 10, 0, 2)));
        assert_eq!(schedule.next_wait(), Some(Duration::from_millis(10)));
        assert_eq!(schedule.next_wait(), Some(Duration::from_millis(10)));
        assert_eq!(schedule.next_wait(), None);
    }

    #[test]
    fn test_fixed_interval_is_unbounded() {
        let mut schedule =
            RetrySchedule::new(Some(&policy(RetryPolicyType::FixedInterval, 25, 0, 0)));
        for _ in 0..100 {
            assert_eq!(schedule.next_wait(), Some(Duration::from_millis(25)));
        }
    }

    #[test]
    fn test_exponential_doubles_up_to_cap() {
        let mut schedule = RetrySchedule::new(Some(&policy(
            RetryPolicyType::ExponentialBackoff,
            100,
            500,
            0,
        )));
        let waits: Vec<u64> = (0..5)
            .map(|_| schedule.next_wait().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(waits, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_exponential_cap_below_seed_holds_seed() {
        let mut schedule = RetrySchedule::new(Some(&policy(
            RetryPolicyType::ExponentialBackoff,
            100,
            0,
            0,
        )));
        assert_eq!(schedule.next_wait(), Some(Duration::from_millis(100)));
        assert_eq!(schedule.next_wait(), Some(Duration::from_millis(100)));
    }
}
