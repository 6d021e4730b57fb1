//! Retry policy with exponential backoff
//!
//! Every failed fetch attempt is reported with an [`ErrorClass`]. The policy
//! turns the class and the number of consecutive failures into a decision:
//! wait and retry, or give up on the request.
//!
//! The wait for retry `n` (1-based) is
//! `min(max_wait, initial_wait(class) * backoff_factor^(n-1))`. Once `n`
//! exceeds `max_retries`, or the class is not in the retryable set, the
//! failure is fatal.
//!
//! # Example
//!
//! ```
//! use socialsweep::config::RetryConfig;
//! use socialsweep::retry::{RetryDecision, RetryPolicy};
//! use socialsweep::types::ErrorClass;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(RetryConfig::default());
//! match policy.decide(ErrorClass::RateLimited, 1) {
//!     RetryDecision::Retry { wait, .. } => assert_eq!(wait, Duration::from_secs(900)),
//!     RetryDecision::Fatal(_) => unreachable!(),
//! }
//! ```

use crate::config::RetryConfig;
use crate::types::ErrorClass;
use rand::Rng;
use std::time::Duration;

/// Why a failure ended the request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalReason {
    /// The class is not in the retryable set
    NotRetryable,
    /// `max_retries` retries were already spent
    RetriesExhausted,
}

impl std::fmt::Display for FatalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalReason::NotRetryable => f.write_str("not retryable"),
            FatalReason::RetriesExhausted => f.write_str("retries exhausted"),
        }
    }
}

/// Outcome of consulting the policy after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryDecision {
    /// Sleep `wait`, then make retry number `attempt`
    Retry {
        /// Retry number (1-based)
        attempt: u32,
        /// Backoff before the retry (jitter not included)
        wait: Duration,
    },
    /// Give up; the request fails
    Fatal(FatalReason),
}

/// Backoff and retry limits per error class
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The underlying configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether failures of `class` are retried at all
    pub fn is_retryable(&self, class: ErrorClass) -> bool {
        self.config.retryable.contains(&class)
    }

    /// Backoff before retry `n` (1-based)
    ///
    /// `wait(class, 1)` is the class's initial wait; later retries grow by
    /// `backoff_factor` and never exceed `max_wait`.
    pub fn wait(&self, class: ErrorClass, n: u32) -> Duration {
        let initial = self.config.initial_waits.for_class(class);
        let max_wait = self.config.max_wait;
        let exponent = n.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = initial.as_secs_f64() * self.config.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs >= max_wait.as_secs_f64() {
            return max_wait;
        }
        Duration::from_secs_f64(secs.max(0.0)).min(max_wait)
    }

    /// Decide what to do after the `failures`-th consecutive failure of a window
    pub fn decide(&self, class: ErrorClass, failures: u32) -> RetryDecision {
        if !self.is_retryable(class) {
            return RetryDecision::Fatal(FatalReason::NotRetryable);
        }
        if failures > self.config.max_retries {
            return RetryDecision::Fatal(FatalReason::RetriesExhausted);
        }
        RetryDecision::Retry {
            attempt: failures,
            wait: self.wait(class, failures),
        }
    }

    /// Actual sleep for a computed wait, with jitter when enabled
    pub fn sleep_duration(&self, wait: Duration) -> Duration {
        if self.config.jitter {
            add_jitter(wait).min(self.config.max_wait.max(wait))
        } else {
            wait
        }
    }

    /// Courtesy pause after a successful call
    pub fn success_wait(&self) -> Duration {
        self.config.success_wait
    }
}

/// Map an HTTP status to an error class
///
/// Returns `None` for 2xx.
pub fn classify_status(status: u16) -> Option<ErrorClass> {
    match status {
        200..=299 => None,
        429 => Some(ErrorClass::RateLimited),
        417 => Some(ErrorClass::NoCapacity),
        504 => Some(ErrorClass::GatewayTimeout),
        _ => Some(ErrorClass::ApiError),
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig::default())
    }

    #[test]
    fn first_wait_is_the_initial_wait() {
        let policy = policy();
        for class in ErrorClass::ALL {
            assert_eq!(
                policy.wait(class, 1),
                policy.config().initial_waits.for_class(class),
                "{class}"
            );
        }
    }

    #[test]
    fn waits_are_non_decreasing_and_capped() {
        let policy = policy();
        for class in ErrorClass::ALL {
            let mut previous = Duration::ZERO;
            for n in 1..=64 {
                let wait = policy.wait(class, n);
                assert!(wait >= previous, "{class} retry {n} shrank");
                assert!(wait <= policy.config().max_wait, "{class} retry {n} over cap");
                previous = wait;
            }
            assert_eq!(previous, policy.config().max_wait);
        }
    }

    #[test]
    fn huge_retry_numbers_saturate_at_max_wait() {
        let policy = policy();
        assert_eq!(
            policy.wait(ErrorClass::Network, u32::MAX),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn rate_limited_sequence_then_fatal() {
        let policy = policy();
        let mut waits = Vec::new();
        let mut failures = 0;
        loop {
            failures += 1;
            match policy.decide(ErrorClass::RateLimited, failures) {
                RetryDecision::Retry { attempt, wait } => {
                    assert_eq!(attempt, failures);
                    waits.push(wait.as_secs());
                }
                RetryDecision::Fatal(reason) => {
                    assert_eq!(reason, FatalReason::RetriesExhausted);
                    break;
                }
            }
        }
        assert_eq!(waits, vec![900, 1800, 3600]);
        assert_eq!(failures, 4);
    }

    #[test]
    fn classes_outside_retryable_set_fail_immediately() {
        let policy = RetryPolicy::new(RetryConfig {
            retryable: vec![ErrorClass::Network],
            ..RetryConfig::default()
        });
        assert_eq!(
            policy.decide(ErrorClass::ApiError, 1),
            RetryDecision::Fatal(FatalReason::NotRetryable)
        );
        assert!(matches!(
            policy.decide(ErrorClass::Network, 1),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn zero_max_retries_fails_on_first_error() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        });
        assert_eq!(
            policy.decide(ErrorClass::Network, 1),
            RetryDecision::Fatal(FatalReason::RetriesExhausted)
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: true,
            ..RetryConfig::default()
        });
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let slept = policy.sleep_duration(base);
            assert!(slept >= base);
            assert!(slept <= base * 2);
        }
    }

    #[test]
    fn without_jitter_sleep_equals_wait() {
        let policy = policy();
        assert_eq!(
            policy.sleep_duration(Duration::from_secs(42)),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn http_statuses_map_to_classes() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert_eq!(classify_status(429), Some(ErrorClass::RateLimited));
        assert_eq!(classify_status(417), Some(ErrorClass::NoCapacity));
        assert_eq!(classify_status(504), Some(ErrorClass::GatewayTimeout));
        assert_eq!(classify_status(500), Some(ErrorClass::ApiError));
        assert_eq!(classify_status(404), Some(ErrorClass::ApiError));
    }
}
