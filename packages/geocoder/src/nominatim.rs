//! Nominatim / OpenStreetMap geocoder client.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use crate::{GeocodeError, GeocodedPoint};

/// Identifies this service to the upstream per its usage policy.
const USER_AGENT: &str = "permit-map/0.1 (https://github.com/permit-map/permit-map)";

/// Full re-attempts after the first failure.
const MAX_RETRIES: u32 = 2;

/// Wait between attempts.
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Geocodes a free-form address query.
///
/// An empty result array means "no result" and returns `Ok(None)` — the
/// caller may cache that. HTTP 429 returns [`GeocodeError::RateLimited`],
/// which must *not* be cached.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the HTTP request or response parsing fails.
pub async fn geocode_freeform(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let url = format!("{}/search", base_url.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .query(&[
            ("q", query),
            ("format", "json"),
            ("addressdetails", "1"),
            ("limit", "1"),
        ])
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.json().await?;
    parse_response(&body)
}

/// [`geocode_freeform`] with the retry budget applied: up to two retries
/// with 3-second waits; after that the error is returned and the caller
/// records absent coordinates.
///
/// # Errors
///
/// Returns the last [`GeocodeError`] once retries are exhausted.
pub async fn geocode_with_retries(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let mut last_error: Option<GeocodeError> = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(RETRY_DELAY).await;
        }
        match geocode_freeform(client, base_url, query).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                log::warn!("Geocode attempt {attempt} failed for '{query}': {e}");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(GeocodeError::RateLimited))
}

/// Parses a Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedPoint>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "geocoder response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing lat in geocoder response".to_string(),
        })?;

    let lon = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing lon in geocoder response".to_string(),
        })?;

    let display_name = first["display_name"].as_str().map(String::from);

    Ok(Some(GeocodedPoint {
        lat,
        lon,
        display_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_geocoder_result() {
        let body = serde_json::json!([{
            "lat": "38.5790",
            "lon": "-121.4944",
            "display_name": "700, H Street, Sacramento, CA, USA"
        }]);
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.lat - 38.5790).abs() < 1e-4);
        assert!((result.lon - -121.4944).abs() < 1e-4);
        assert!(result.display_name.unwrap().contains("Sacramento"));
    }

    #[test]
    fn empty_array_is_no_result() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn non_array_is_a_parse_error() {
        let body = serde_json::json!({"error": "nope"});
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { .. })
        ));
    }
}
