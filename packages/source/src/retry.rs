//! HTTP retry helpers with exponential backoff and jitter.
//!
//! Connectors call [`send_json`] instead of `reqwest::RequestBuilder::send()`
//! directly so every portal request gets the same retry policy: transient
//! failures (connection errors, timeouts, HTTP 429, HTTP 5xx) are retried
//! with exponential backoff plus uniform jitter; any other 4xx is
//! immediately fatal.
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry;
//!
//! let body = retry::send_json(|| client.get(&url)).await?;
//! let body = retry::send_json(|| client.get(&url).header("X-App-Token", token)).await?;
//! ```

use std::time::Duration;

use rand::Rng as _;

use crate::ConnectorError;

/// Retries after the first attempt. Four attempts total.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for the exponential backoff schedule.
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound of the uniform jitter added to every backoff delay.
const MAX_JITTER_MS: u64 = 500;

/// Backoff delay after the given failed attempt (0-based):
/// `base × 2^attempt + uniform(0, 500ms)`.
fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..=MAX_JITTER_MS);
    BASE_DELAY * 2u32.saturating_pow(attempt) + Duration::from_millis(jitter)
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`),
/// so any request shape — headers, query params — can be retried.
///
/// # Errors
///
/// Returns [`ConnectorError`] if the request still fails after
/// [`MAX_RETRIES`] retries, the server returns a non-retryable status code,
/// or the body cannot be parsed as JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, ConnectorError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    for attempt in 0..=MAX_RETRIES {
        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < MAX_RETRIES {
                    log::warn!("  transient error (attempt {attempt}): {e}");
                    tokio::time::sleep(backoff_delay(attempt)).await;
                    continue;
                }
                return Err(ConnectorError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                // 429 Too Many Requests and 5xx — retry
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    if attempt < MAX_RETRIES {
                        log::warn!("  HTTP {status} (attempt {attempt}), backing off");
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(ConnectorError::Portal {
                        message: format!("HTTP {status} after {MAX_RETRIES} retries"),
                    });
                }

                // Other 4xx — permanent, don't retry
                if status.is_client_error() {
                    return Err(ConnectorError::Portal {
                        message: format!("HTTP {status}"),
                    });
                }

                return Ok(response.json().await?);
            }
        }
    }

    // The loop always returns via Ok or Err.
    unreachable!("send_json retry loop exited without returning")
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        for attempt in 0..3 {
            let floor = Duration::from_secs(1 << attempt);
            let ceiling = floor + Duration::from_millis(MAX_JITTER_MS);
            for _ in 0..16 {
                let delay = backoff_delay(attempt);
                assert!(delay >= floor, "attempt {attempt}: {delay:?} below floor");
                assert!(delay <= ceiling, "attempt {attempt}: {delay:?} above ceiling");
            }
        }
    }
}
