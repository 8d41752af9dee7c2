#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding client for permit addresses.
//!
//! Speaks the Nominatim `/search` dialect. The public instances enforce a
//! strict usage policy, so all callers must share one [`Throttle`] — at most
//! one request per 1.1 seconds process-wide, never per source.

pub mod nominatim;

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// A geocoding result with coordinates and the matched display name.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPoint {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lon: f64,
    /// The matched/canonical address returned by the geocoder.
    pub display_name: Option<String>,
}

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded upstream.
    #[error("Rate limit exceeded")]
    RateLimited,
}

impl GeocodeError {
    /// Transient failures must not be written to the persistent cache;
    /// they are retried on the next lookup instead.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::RateLimited)
    }
}

/// Minimum spacing between upstream requests.
const MIN_INTERVAL: Duration = Duration::from_millis(1100);

/// Process-wide request spacing for the geocoding service.
///
/// A single instance is shared by every task that geocodes; per-source
/// throttles would collectively exceed the upstream policy.
#[derive(Debug, Default)]
pub struct Throttle {
    last_request: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Creates an unused throttle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until at least 1.1 seconds have passed since the previous
    /// request, then claims the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < MIN_INTERVAL {
                tokio::time::sleep(MIN_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_requests() {
        let throttle = Throttle::new();
        let start = Instant::now();
        throttle.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        throttle.acquire().await;
        assert!(start.elapsed() >= MIN_INTERVAL);
        throttle.acquire().await;
        assert!(start.elapsed() >= MIN_INTERVAL * 2);
    }
}
