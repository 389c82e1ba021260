//! Bounded retries with exponential backoff and additive jitter.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::provider::UpstreamError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryPolicyError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("jitter must be within [0, 1), got {0}")]
    Jitter(f64),
    #[error("multiplier {multiplier} must exceed 1 + jitter ({jitter})")]
    Multiplier { multiplier: f64, jitter: f64 },
    #[error("base_delay must be non-zero and not above max_delay")]
    Delays,
}

/// How a logical request retries retryable upstream failures.
///
/// The delay before retry `n` is `base * multiplier^(n-1)` plus up to
/// `jitter` of that, raised to any `retry_after` hint and capped at
/// `max_delay`. `multiplier > 1 + jitter` keeps consecutive delays strictly
/// increasing until the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    jitter: f64,
    max_delay: Duration,
    max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        multiplier: f64,
        jitter: f64,
        max_delay: Duration,
        max_elapsed: Duration,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::NoAttempts);
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(RetryPolicyError::Jitter(jitter));
        }
        if multiplier.is_nan() || multiplier <= 1.0 + jitter {
            return Err(RetryPolicyError::Multiplier { multiplier, jitter });
        }
        if base_delay.is_zero() || base_delay > max_delay {
            return Err(RetryPolicyError::Delays);
        }

        Ok(Self {
            max_attempts,
            base_delay,
            multiplier,
            jitter,
            max_delay,
            max_elapsed,
        })
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based), for a jitter sample
    /// `sample` in `[0, 1)`.
    pub fn delay_for(&self, retry: u32, sample: f64, hint: Option<Duration>) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let nominal = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let jittered = nominal * (1.0 + self.jitter * sample.clamp(0.0, 1.0));
        let capped = jittered.min(self.max_delay.as_secs_f64());

        let delay = Duration::from_secs_f64(capped);
        match hint {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempt or elapsed-time budget is spent. The closure receives the
    /// 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<T, UpstreamError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let started = Instant::now();
        let mut number = 1;
        loop {
            let err = match attempt(number).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.retryable || number >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_for(number, rand::random::<f64>(), err.retry_after);
            if started.elapsed() + delay > self.max_elapsed {
                debug!(
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            debug!(
                attempt = number,
                kind = %err.kind,
                delay_ms = delay.as_millis() as u64,
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
            number += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            2.0,
            0.2,
            Duration::from_secs(10),
            Duration::from_secs(60),
        )
        .expect("valid policy")
    }

    #[test]
    fn rejects_multiplier_that_jitter_could_overtake() {
        let err = RetryPolicy::new(
            3,
            Duration::from_millis(100),
            1.1,
            0.2,
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .expect_err("1.1 <= 1.2");
        assert!(matches!(err, RetryPolicyError::Multiplier { .. }));
    }

    #[test]
    fn rejects_zero_attempts_and_bad_jitter() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(1);
        assert_eq!(
            RetryPolicy::new(0, base, 2.0, 0.2, cap, cap),
            Err(RetryPolicyError::NoAttempts)
        );
        assert_eq!(
            RetryPolicy::new(3, base, 2.0, 1.5, cap, cap),
            Err(RetryPolicyError::Jitter(1.5))
        );
    }

    #[test]
    fn delays_increase_even_with_worst_case_jitter() {
        let policy = policy(5);
        let high = policy.delay_for(1, 0.999, None);
        let low = policy.delay_for(2, 0.0, None);
        assert!(low > high, "{low:?} must exceed {high:?}");
    }

    #[test]
    fn delays_are_capped_and_honour_hints() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(20, 0.5, None), Duration::from_secs(10));
        assert_eq!(
            policy.delay_for(1, 0.0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(1, 0.0, Some(Duration::from_secs(60))),
            Duration::from_secs(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_errors_use_all_attempts_with_growing_delays() {
        let stamps = Mutex::new(Vec::new());
        let result: Result<(), _> = policy(4)
            .run(|_| {
                stamps.lock().expect("stamps").push(Instant::now());
                async { Err(UpstreamError::network("connection reset")) }
            })
            .await;

        assert!(result.is_err());
        let stamps = stamps.into_inner().expect("stamps");
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|w| w[1] > w[0]), "{gaps:?}");
        assert!(gaps[0] >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_stop_after_one_attempt() {
        let mut calls = 0;
        let result: Result<(), _> = policy(5)
            .run(|_| {
                calls += 1;
                async { Err(UpstreamError::authentication("bad token")) }
            })
            .await;

        assert_eq!(result.map_err(|e| e.kind), Err(crate::provider::UpstreamErrorKind::Authentication));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let result = policy(3)
            .run(|attempt| async move {
                if attempt < 3 {
                    Err(UpstreamError::timeout("deadline"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_stops_retries() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(400),
            2.0,
            0.2,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .expect("valid policy");

        let mut calls = 0;
        let _ = policy
            .run(|_| {
                calls += 1;
                async { Err::<(), _>(UpstreamError::network("down")) }
            })
            .await;

        // 400ms then ~800ms would overrun the one second budget.
        assert_eq!(calls, 2);
    }
}
