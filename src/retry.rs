//! Bounded retry with a fixed pause between attempts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// How many times to try, how long to wait between tries and how long a
/// single try may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    /// Pause between attempts.
    pub interval: Duration,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Policy used for token exchange.
    ///
    /// Sign-in runs inside a step, so the worst case stays under the default
    /// scenario deadline.
    pub const TOKEN_EXCHANGE: Self = Self {
        attempts: 5,
        interval: Duration::from_secs(1),
        attempt_timeout: Duration::from_secs(3),
    };

    /// Longest time the policy can spend before giving up.
    #[must_use]
    pub const fn worst_case(&self) -> Duration {
        let attempts = if self.attempts == 0 { 1 } else { self.attempts };
        self.attempt_timeout
            .saturating_mul(attempts)
            .saturating_add(self.interval.saturating_mul(attempts - 1))
    }

    /// A single attempt with no pause.
    #[must_use]
    pub const fn once(attempt_timeout: Duration) -> Self {
        Self {
            attempts: 1,
            interval: Duration::ZERO,
            attempt_timeout,
        }
    }
}

/// Raised when every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{label} failed after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    /// What was being attempted.
    pub label: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Description of the final failure.
    pub last: String,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the one-based attempt number.
///
/// # Errors
///
/// Returns [`RetryExhausted`] describing the last failure once all attempts
/// have failed or timed out.
pub async fn retry_fixed<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => last = err.to_string(),
            Err(_) => last = format!("attempt timed out after {:?}", policy.attempt_timeout),
        }
        tracing::debug!(label, attempt, error = %last, "attempt failed");
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    Err(RetryExhausted {
        label: label.to_owned(),
        attempts,
        last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: RetryPolicy = RetryPolicy {
        attempts: 4,
        interval: Duration::from_secs(1),
        attempt_timeout: Duration::from_secs(5),
    };

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let value = retry_fixed(FAST, "exchange", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(String::from("unavailable"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn reports_the_last_failure_when_exhausted() {
        let err = retry_fixed(FAST, "exchange", |attempt| async move {
            Err::<(), _>(format!("refused #{attempt}"))
        })
        .await
        .expect_err("never succeeds");
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last, "refused #4");
    }

    #[test]
    fn token_exchange_gives_up_before_the_scenario_deadline() {
        let deadline = crate::config::ScenarioConfig::default().timeout();
        assert_eq!(RetryPolicy::TOKEN_EXCHANGE.worst_case(), Duration::from_secs(19));
        assert!(RetryPolicy::TOKEN_EXCHANGE.worst_case() < deadline);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn exhausting_the_policy_takes_its_worst_case() {
        let started = tokio::time::Instant::now();
        let _ = retry_fixed(FAST, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), String>(())
        })
        .await
        .expect_err("every attempt times out");
        assert_eq!(started.elapsed(), FAST.worst_case());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn slow_attempts_count_as_failures() {
        let policy = RetryPolicy::once(Duration::from_millis(50));
        let err = retry_fixed(policy, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), String>(())
        })
        .await
        .expect_err("attempt exceeds its budget");
        assert!(err.last.contains("timed out"), "{err}");
    }
}
