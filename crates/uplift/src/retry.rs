//! Reusable retry policy with exponential backoff.
//!
//! One policy object drives every network-bound, idempotent-safe call in the
//! workflow. Local file mutation, git operations, and validation are never
//! retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::Reporter;
use crate::types::{WorkflowError, deserialize_duration, serialize_duration};

/// Backoff policy: max attempts, base delay, multiplier, cap, jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; later delays multiply from here.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,
    /// Exponential growth factor between attempts.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Cap applied after growth.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,
    /// Jitter factor in [0, 1]; 0 keeps delays deterministic.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay: default_max_delay(),
            jitter: 0.0,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl RetryPolicy {
    /// Delay slept after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(16);
        let factor = self.backoff_factor.max(1.0).powi(pow as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).round() as u64;
        let capped = Duration::from_millis(millis).min(self.max_delay);

        if self.jitter > 0.0 {
            apply_jitter(capped, self.jitter)
        } else {
            capped
        }
    }
}

/// Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    let jitter_range = 2.0 * jitter;
    let random_factor = 1.0 - jitter + (rand::random::<f64>() * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Run `op` under the policy, sleeping between attempts.
///
/// Only errors accepted by `retryable` are re-attempted; everything else is
/// surfaced immediately. The final error after exhausting attempts is
/// returned verbatim.
pub fn run_with_retry<T, F, P>(
    policy: &RetryPolicy,
    label: &str,
    reporter: &mut dyn Reporter,
    retryable: P,
    mut op: F,
) -> Result<T, WorkflowError>
where
    F: FnMut() -> Result<T, WorkflowError>,
    P: Fn(&WorkflowError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && retryable(&err) => {
                let delay = policy.delay_for_attempt(attempt);
                reporter.warn(&format!(
                    "{label}: attempt {attempt}/{max_attempts} failed ({err}); retrying in {}",
                    humantime::format_duration(delay)
                ));
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    reporter.error(&format!("{label}: all {attempt} attempts failed"));
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullReporter;

    impl Reporter for NullReporter {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, _msg: &str) {}
        fn error(&mut self, _msg: &str) {}
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        }
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(6),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(6));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(6));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 1.0,
            max_delay: Duration::from_secs(1),
            jitter: 0.5,
        };
        for _ in 0..50 {
            let d = policy.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(50), "delay too low: {d:?}");
            assert!(d <= Duration::from_millis(150), "delay too high: {d:?}");
        }
    }

    #[test]
    fn retries_retryable_errors_then_succeeds() {
        let mut calls = 0;
        let result = run_with_retry(
            &fast_policy(3),
            "upload",
            &mut NullReporter,
            WorkflowError::is_retryable,
            || {
                calls += 1;
                if calls < 3 {
                    Err(WorkflowError::transport("503", true))
                } else {
                    Ok("bs://abc")
                }
            },
        );
        assert_eq!(result.expect("success"), "bs://abc");
        assert_eq!(calls, 3);
    }

    #[test]
    fn does_not_retry_terminal_errors() {
        let mut calls = 0;
        let result: Result<(), _> = run_with_retry(
            &fast_policy(5),
            "upload",
            &mut NullReporter,
            WorkflowError::is_retryable,
            || {
                calls += 1;
                Err(WorkflowError::transport("401 unauthorized", false))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn exhausting_attempts_returns_last_error() {
        let mut calls = 0;
        let result: Result<(), _> = run_with_retry(
            &fast_policy(3),
            "upload",
            &mut NullReporter,
            WorkflowError::is_retryable,
            || {
                calls += 1;
                Err(WorkflowError::transport("503", true))
            },
        );
        assert_eq!(calls, 3);
        let err = result.expect_err("must fail");
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn policy_deserializes_humantime_delays() {
        let policy: RetryPolicy = serde_yaml::from_str(
            "max_attempts: 4\nbase_delay: 500ms\nbackoff_factor: 3.0\nmax_delay: 30s\n",
        )
        .expect("parse");
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.jitter, 0.0);
    }
}
