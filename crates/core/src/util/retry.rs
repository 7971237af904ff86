//! Exponential backoff for calls to external HTTP services.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of each delay randomized away, in [0, 1].
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Default::default()
        }
    }

    pub fn no_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Un-jittered delay after the given 1-based failed attempt.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exp);
        Duration::from_millis(ms.min(u64::MAX as f64) as u64).min(self.max_delay)
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 - rand::rng().random_range(0.0..=jitter);
        base.mul_f64(factor)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts are exhausted. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    mut op: F,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < attempts && is_retryable(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(attempt, max_attempts = attempts, ?delay, "operation failed, retrying: {e}");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Request timeout, rate limiting and server errors are worth retrying.
pub fn is_http_retryable(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_until_capped() {
        let config = RetryConfig {
            max_attempts: 6,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_only_shortens_delay() {
        let config = RetryConfig {
            jitter: 0.5,
            ..RetryConfig::new(3, Duration::from_millis(200))
        };
        for _ in 0..20 {
            let d = config.delay_for_attempt(1);
            assert!(d <= Duration::from_millis(200) && d >= Duration::from_millis(100));
        }
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_http_retryable(503));
        assert!(is_http_retryable(429));
        assert!(is_http_retryable(408));
        assert!(!is_http_retryable(400));
        assert!(!is_http_retryable(401));
        assert!(!is_http_retryable(404));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(3, Duration::from_millis(10)).no_jitter();
        let result: Result<u32, String> = retry_with_backoff(
            &config,
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("transient {n}"))
                } else {
                    Ok(n)
                }
            },
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(5, Duration::from_millis(10));
        let result: Result<(), String> = retry_with_backoff(
            &config,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_owned())
            },
            |e: &String| e != "fatal",
        )
        .await;
        assert_eq!(result, Err("fatal".to_owned()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
