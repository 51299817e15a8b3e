//! Wire-level retry policy: exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MIN_BACKOFF: Duration = Duration::from_millis(200);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_JITTER: f64 = 0.2;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Fractional jitter applied to each backoff (0.2 => +/-20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Zero-valued fields fall back to the defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.min_backoff.is_zero() {
            self.min_backoff = DEFAULT_MIN_BACKOFF;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = DEFAULT_MAX_BACKOFF;
        }
        if self.jitter == 0.0 {
            self.jitter = DEFAULT_JITTER;
        }
        self
    }

    /// Backoff before the next attempt, `attempt` counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30);
        let base = (self.min_backoff.as_secs_f64() * f64::from(1u32 << exp))
            .min(self.max_backoff.as_secs_f64());

        let mut rng = rand::thread_rng();
        let jitter = 1.0 + rng.gen_range(-1.0..=1.0) * self.jitter;
        Duration::from_secs_f64(base * jitter.max(0.0))
    }
}

/// HTTP statuses worth retrying at the wire level.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Runs `operation` up to `config.max_attempts` times. The closure reports
/// whether its error is retryable; backoff sleeps race the cancellation
/// token and interruption surfaces as [`ClientError::Interrupted`].
pub(crate) async fn with_retry<T, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, (bool, ClientError)>>,
{
    let mut last_err = None;

    for attempt in 1..=config.max_attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err((retryable, err)) => {
                if !retryable || attempt == config.max_attempts {
                    return Err(err);
                }

                let backoff = config.backoff(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retryable wire error, backing off"
                );
                crate::metrics::record_retry(operation_name);
                last_err = Some(err);

                tokio::select! {
                    _ = cancel.cancelled() => return Err(ClientError::Interrupted),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    Err(last_err.unwrap_or(ClientError::Interrupted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retryable_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [200, 400, 401, 403, 404, 501] {
            assert!(!is_retryable_status(status), "{status} should not be retryable");
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let config = RetryConfig::default();
        for attempt in 1..=10 {
            let wait = config.backoff(attempt);
            // 20% jitter around a base capped at max_backoff.
            assert!(wait <= Duration::from_millis(2400), "attempt {attempt}: {wait:?}");
        }
        let first = config.backoff(1);
        assert!(first >= Duration::from_millis(160), "{first:?}");
    }

    #[test]
    fn test_with_defaults_fills_zeroes() {
        let config = RetryConfig {
            max_attempts: 0,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
        }
        .with_defaults();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.min_backoff, DEFAULT_MIN_BACKOFF);
        assert_eq!(config.max_backoff, DEFAULT_MAX_BACKOFF);
        assert_eq!(config.jitter, DEFAULT_JITTER);
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: 0.1,
        }
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_errors() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = with_retry(&cancel, &fast_config(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err((true, ClientError::HttpStatus(503)))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_fast() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_retry(&cancel, &fast_config(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err((false, ClientError::HttpStatus(404)))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::HttpStatus(404))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<()> = with_retry(&cancel, &fast_config(), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err((true, ClientError::HttpStatus(502)))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::HttpStatus(502))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_cancelled_during_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = with_retry(&cancel, &fast_config(), "test", || async {
            Err((true, ClientError::HttpStatus(503)))
        })
        .await;

        assert!(matches!(result, Err(ClientError::Interrupted)));
    }
}
