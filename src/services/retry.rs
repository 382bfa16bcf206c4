use std::future::Future;
use std::time::Duration;

/// Retry policy with exponential backoff
///
/// `max_attempts` counts every call, including the first one.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Runs `f` until it succeeds or the attempts are exhausted
///
/// Sleeps `initial_backoff`, then `initial_backoff * multiplier`, ... between
/// attempts and returns the last error on terminal failure.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    operation = %operation,
                    attempts = attempt,
                    error = %e,
                    "Giving up after final attempt"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    delay_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = Duration::from_millis(
                    (backoff.as_millis() as f64 * config.backoff_multiplier) as u64,
                );
            }
        }
    }
}
