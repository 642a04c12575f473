//! Retry with exponential backoff for speech service calls

use std::time::{Duration, SystemTime};

use crate::{Error, Result};

/// Retry policy for speech service calls
///
/// Controls how many times a request is attempted and how long to wait
/// between attempts using exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Determine whether an HTTP status is worth retrying
///
/// Rate limits (429) and server errors (5xx) are transient.
#[must_use]
pub fn is_recoverable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Determine whether a transport-level failure is worth retrying
#[must_use]
pub fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// Parse a `Retry-After` header value given in whole seconds
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Compute the delay before the next retry attempt.
///
/// When `retry_after` is provided (e.g. from a 429 response), that value is
/// used directly but capped at `policy.max_delay`. Otherwise the delay follows
/// exponential backoff: `min(base_delay * 2^attempt + jitter, max_delay)`.
///
/// Jitter is 0-25% of the computed delay, derived from `SystemTime` to avoid
/// pulling in a full random number generator.
#[must_use]
pub fn delay_for_attempt(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(ra) = retry_after {
        return ra.min(policy.max_delay);
    }

    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

/// Send a request, retrying transient failures per `policy`
///
/// `build` is called once per attempt since a sent request cannot be reused.
/// Non-recoverable HTTP errors are returned immediately with the response body.
///
/// # Errors
///
/// Returns the last failure once attempts are exhausted
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    operation: &str,
    build: F,
) -> Result<reqwest::Response>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        tracing::debug!(operation, attempt = attempt + 1, "sending request");

        let (error, retry_after) = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body = response.text().await.unwrap_or_default();
                let error = Error::Network(format!("{operation} failed with {status}: {body}"));

                if !is_recoverable(status.as_u16()) {
                    tracing::error!(operation, status = %status, body = %body, "request rejected");
                    return Err(error);
                }
                (error, retry_after)
            }
            Err(e) if is_transient(&e) => (Error::Http(e), None),
            Err(e) => return Err(Error::Http(e)),
        };

        attempt += 1;
        if attempt >= attempts {
            tracing::error!(operation, attempts, error = %error, "giving up");
            return Err(error);
        }

        let delay = delay_for_attempt(policy, attempt - 1, retry_after);
        tracing::warn!(
            operation,
            error = %error,
            delay_ms = delay.as_millis(),
            "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
