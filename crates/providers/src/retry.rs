//! Retry with jittered exponential back-off over hour-long windows.
//!
//! Wraps any single LLM invocation.  Retryable conditions are transient
//! transport failures and HTTP 408/425/429/500/502/503/504; everything
//! else fails the attempt immediately.  `Retry-After` is honored by
//! taking the larger of the header and the exponential delay, and no
//! delay may overshoot the overall window.

use std::time::Duration;

use fm_domain::cancel::CancelToken;
use fm_domain::config::RetryConfig;
use fm_domain::error::{Error, Result};

/// Compiled retry policy for one session's LLM calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub window: Duration,
    pub max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            window: Duration::from_secs(cfg.window_secs),
            max_attempts: cfg.max_attempts,
        }
    }
}

impl RetryPolicy {
    /// Compute the backoff delay for the given attempt number (1-indexed),
    /// before `Retry-After` and window clamping.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exp_ms = base_ms * 2f64.powi(attempt.saturating_sub(1).min(30) as i32);
        let capped_ms = exp_ms.min(self.max_delay.as_millis() as f64);

        // ~25% jitter to spread retry storms across sessions.
        let jitter = capped_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((capped_ms + jitter) as u64)
    }
}

/// Cheap deterministic "random" fraction [0, 1) based on attempt number.
/// Not cryptographically secure — just enough to avoid thundering herds.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

/// Run `op` under the retry policy.
///
/// `on_retry(attempt, delay_ms, reason)` fires once per scheduled retry so
/// subscribers observe progress.  The sleep is cancellation-aware: a
/// `cancel()` during backoff aborts promptly with no further attempts.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut on_retry: impl FnMut(u32, u64, String),
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = tokio::time::Instant::now();

    for attempt in 1.. {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= policy.max_attempts {
            return Err(err);
        }

        // Larger of the exponential delay and any server-supplied hint.
        let mut delay = policy.delay_for_attempt(attempt);
        if let Some(hint_ms) = err.retry_after_ms() {
            delay = delay.max(Duration::from_millis(hint_ms));
        }

        // Never overshoot the overall window.
        let elapsed = started.elapsed();
        if elapsed >= policy.window {
            return Err(err);
        }
        delay = delay.min(policy.window - elapsed);

        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "LLM attempt failed, scheduling retry"
        );
        on_retry(attempt, delay.as_millis() as u64, err.to_string());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }
    }

    unreachable!("retry loop exits via return");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            window: Duration::from_secs(5),
            max_attempts: 5,
        }
    }

    fn status(code: u16, retry_after_ms: Option<u64>) -> Error {
        Error::Status {
            code,
            message: "err".into(),
            retry_after_ms,
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let p = RetryPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            window: Duration::from_secs(3600),
            max_attempts: 200,
        };
        let d1 = p.delay_for_attempt(1);
        let d4 = p.delay_for_attempt(4);
        assert!(d4 > d1);
        // Attempt 30 would be 2^29 s un-capped; must stay within cap + jitter.
        assert!(p.delay_for_attempt(30) <= Duration::from_millis(75_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let retries = Arc::new(AtomicU32::new(0));
        let retries2 = retries.clone();

        let result = run_with_retry(
            &fast_policy(),
            &CancelToken::new(),
            move |_, _, _| {
                retries2.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(status(503, None))
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let result: Result<u32> = run_with_retry(
            &fast_policy(),
            &CancelToken::new(),
            |_, _, _| {},
            move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(status(401, None))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_delay() {
        let mut observed_delay = 0u64;
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let _ = run_with_retry(
            &fast_policy(),
            &CancelToken::new(),
            |_, delay_ms, _| observed_delay = delay_ms,
            move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(status(429, Some(2_000)))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert!(observed_delay >= 2_000, "got {observed_delay}");
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_cap_exhausts() {
        let result: Result<()> = run_with_retry(
            &RetryPolicy {
                max_attempts: 3,
                ..fast_policy()
            },
            &CancelToken::new(),
            |_, _, _| {},
            || async { Err(status(500, None)) },
        )
        .await;

        match result.unwrap_err() {
            Error::Status { code, .. } => assert_eq!(code, 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_promptly() {
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let handle = tokio::spawn(async move {
            run_with_retry(
                &RetryPolicy {
                    base_delay: Duration::from_secs(60),
                    ..fast_policy()
                },
                &cancel2,
                |_, _, _| {},
                move || {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(status(503, None))
                    }
                },
            )
            .await
        });

        // Let the first attempt fail and the backoff sleep start.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delay_never_overshoots_window() {
        let mut delays: Vec<u64> = Vec::new();
        let result: Result<()> = run_with_retry(
            &RetryPolicy {
                base_delay: Duration::from_secs(30),
                max_delay: Duration::from_secs(60),
                window: Duration::from_secs(100),
                max_attempts: 100,
            },
            &CancelToken::new(),
            |_, delay_ms, _| delays.push(delay_ms),
            || async { Err(status(503, None)) },
        )
        .await;

        assert!(result.is_err());
        let total: u64 = delays.iter().sum();
        // All sleeps together stay within the window (plus one clamped tail).
        assert!(total <= 100_000 + 60_000, "slept {total}ms");
    }
}
