//! Retry and polling policies.
//
// Two loops exist in the driver: retrying an operation that *failed*, and
// polling an operation until it *observes* something. Both are expressed as a
// small policy value so every loop in the crate shares the same knobs and the
// same exhaustion errors.

use crate::error::SensorError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Ten attempts, half a second apart: the readiness-poll hardening.
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_delay: Duration::from_millis(500),
        }
    }
}

/// Defines a fixed-interval polling loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two polls.
    pub interval: Duration,
    /// Upper bound on polls; `None` polls until the condition is observed.
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1),
            max_polls: None,
        }
    }
}

impl PollPolicy {
    /// Unbounded polling at the given interval.
    pub const fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
        }
    }

    /// Bound the number of polls.
    pub const fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Count one more poll, failing once the budget is spent.
    pub fn tick(&self, polls: &mut u32, waiting_for: &'static str) -> Result<(), SensorError> {
        *polls = polls.saturating_add(1);
        match self.max_polls {
            Some(max) if *polls >= max => Err(SensorError::ProtocolTimeout {
                waiting_for,
                polls: *polls,
            }),
            _ => Ok(()),
        }
    }
}

/// An asynchronous operation that can be retried.
#[async_trait]
pub trait Retryable {
    /// Value produced by a successful attempt.
    type Output: Send;

    /// Run one attempt.
    async fn attempt(&mut self) -> Result<Self::Output, SensorError>;
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// The final failure is wrapped in [`SensorError::RetryExhausted`] together
/// with the number of attempts made.
pub async fn retry<R>(operation: &mut R, policy: &RetryPolicy) -> Result<R::Output, SensorError>
where
    R: Retryable + Send + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation.attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= attempts => {
                return Err(SensorError::RetryExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
            Err(err) => {
                warn!(attempt, max_attempts = attempts, error = %err, "retrying after error");
                sleep(policy.backoff_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockRetryable {
        attempts: u32,
        succeed_on_attempt: u32,
    }

    #[async_trait]
    impl Retryable for MockRetryable {
        type Output = u32;

        async fn attempt(&mut self) -> Result<u32, SensorError> {
            self.attempts += 1;
            if self.attempts >= self.succeed_on_attempt {
                Ok(self.attempts)
            } else {
                Err(SensorError::transport(0x00, anyhow::anyhow!("glitch")))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let mut op = MockRetryable {
            attempts: 0,
            succeed_on_attempt: 2,
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result = retry(&mut op, &policy).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(op.attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_logic_fails() {
        let mut op = MockRetryable {
            attempts: 0,
            succeed_on_attempt: 4,
        };
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(10),
        };
        let result = retry(&mut op, &policy).await;
        match result {
            Err(SensorError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SensorError::Transport { .. }));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(op.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_between_attempts() {
        let mut op = MockRetryable {
            attempts: 0,
            succeed_on_attempt: 3,
        };
        let started = tokio::time::Instant::now();
        retry(&mut op, &RetryPolicy::default()).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let mut op = MockRetryable {
            attempts: 0,
            succeed_on_attempt: 1,
        };
        let policy = RetryPolicy {
            max_attempts: 0,
            backoff_delay: Duration::ZERO,
        };
        assert_eq!(retry(&mut op, &policy).await.unwrap(), 1);
    }

    #[test]
    fn test_poll_policy_budget() {
        let policy = PollPolicy::every(Duration::from_millis(1)).with_max_polls(3);
        let mut polls = 0;
        assert!(policy.tick(&mut polls, "idle").is_ok());
        assert!(policy.tick(&mut polls, "idle").is_ok());
        match policy.tick(&mut polls, "idle") {
            Err(SensorError::ProtocolTimeout { waiting_for, polls }) => {
                assert_eq!(waiting_for, "idle");
                assert_eq!(polls, 3);
            }
            other => panic!("expected ProtocolTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_unbounded_poll_policy_never_exhausts() {
        let policy = PollPolicy::default();
        let mut polls = 0;
        for _ in 0..10_000 {
            policy.tick(&mut polls, "idle").unwrap();
        }
        assert_eq!(polls, 10_000);
    }

    #[test]
    fn test_unbounded_poll_count_saturates() {
        let policy = PollPolicy::default();
        let mut polls = u32::MAX - 1;
        policy.tick(&mut polls, "idle").unwrap();
        policy.tick(&mut polls, "idle").unwrap();
        assert_eq!(polls, u32::MAX);
    }
}
