//! Backoff for generation calls.
//!
//! Transient failures (429, 5xx, 408, network errors) are retried with
//! exponential backoff plus jitter. A 429 carrying `Retry-After` waits at
//! least that long. Client errors (400, 401, 403, 404) fail on the spot.

use anyhow::Result;
use rand::Rng;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for each subsequent delay.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// The base delay that follows `current`, capped at `max_delay`.
    fn grow(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.backoff_factor;
        Duration::from_secs_f64(next.min(self.max_delay.as_secs_f64()))
    }

    /// How long to sleep before the next attempt. A server hint wins over the
    /// base delay but never past `max_delay`.
    fn wait(&self, base: Duration, hint: Option<Duration>, jitter: Duration) -> Duration {
        match hint {
            Some(hint) if hint > base => hint.min(self.max_delay),
            _ => base + jitter,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS          // 429
            | StatusCode::INTERNAL_SERVER_ERROR // 500
            | StatusCode::BAD_GATEWAY           // 502
            | StatusCode::SERVICE_UNAVAILABLE   // 503
            | StatusCode::GATEWAY_TIMEOUT       // 504
            | StatusCode::REQUEST_TIMEOUT // 408
    )
}

/// `Retry-After` in its delta-seconds form. HTTP-date values are ignored.
fn retry_after(response: &Response) -> Option<Duration> {
    parse_retry_after(response.headers().get(RETRY_AFTER)?.to_str().ok()?)
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Run a provider request until it succeeds, fails permanently, or the
/// attempts run out.
///
/// `provider` only labels log lines and errors. The final error carries the
/// last failure seen.
pub async fn with_retry<F, Fut>(config: &RetryConfig, provider: &str, operation: F) -> Result<Response>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Response>>,
{
    let mut delay = config.initial_delay;
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        let mut hint = None;
        match operation().await {
            Ok(response) if response.status().is_success() => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", provider, attempt);
                }
                return Ok(response);
            }
            Ok(response) => {
                let status = response.status();
                hint = retry_after(&response);
                let body = response.text().await.unwrap_or_default();
                if !is_retryable_status(status) {
                    // 4xx other than 408/429: the request itself is wrong
                    anyhow::bail!("{} API Error ({}): {}", provider, status, body);
                }
                tracing::warn!(
                    "{} returned {} on attempt {}/{}: {}",
                    provider,
                    status,
                    attempt,
                    config.max_attempts,
                    body.chars().take(200).collect::<String>()
                );
                last_error = Some(format!("{} ({}): {}", provider, status, body));
            }
            Err(e) => {
                // Timeout, DNS failure, connection refused
                tracing::warn!(
                    "{} network error on attempt {}/{}: {}",
                    provider,
                    attempt,
                    config.max_attempts,
                    e
                );
                last_error = Some(format!("{}: {}", provider, e));
            }
        }

        if attempt == config.max_attempts {
            break;
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
        let sleep_time = config.wait(delay, hint, jitter);
        tracing::info!(
            "{} retrying in {:.1}s (attempt {}/{})",
            provider,
            sleep_time.as_secs_f64(),
            attempt + 1,
            config.max_attempts
        );
        tokio::time::sleep(sleep_time).await;
        delay = config.grow(delay);
    }

    anyhow::bail!(
        "All {} retry attempts exhausted. Last error: {}",
        config.max_attempts,
        last_error.unwrap_or_else(|| "unknown".to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 1.0,
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_delay_grows_up_to_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.grow(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(config.grow(Duration::from_secs(20)), Duration::from_secs(30));
    }

    #[test]
    fn test_server_hint_overrides_short_backoff() {
        let config = RetryConfig::default();
        let jitter = Duration::from_millis(100);
        let base = Duration::from_secs(1);

        assert_eq!(config.wait(base, None, jitter), Duration::from_millis(1100));
        assert_eq!(config.wait(base, Some(Duration::from_secs(7)), jitter), Duration::from_secs(7));
        assert_eq!(config.wait(base, Some(Duration::from_secs(600)), jitter), Duration::from_secs(30));
        // A hint shorter than the backoff is not a reason to hurry
        assert_eq!(config.wait(Duration::from_secs(4), Some(Duration::from_secs(1)), jitter), Duration::from_millis(4100));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after(" 3 "), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_network_errors_exhaust_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "Test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("connection refused")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("exhausted"));
        assert!(err.contains("connection refused"));
    }
}
