//! Two-tier geocoding: in-memory map over the persistent cache over the
//! network client.
//!
//! Lookups check memory first, then the `geocode_cache` table, then the
//! upstream service. Upstream "no result" answers are cached at both tiers;
//! transient failures (HTTP 429, network errors) are cached at neither and
//! will be retried on the next lookup.

use std::collections::HashMap;
use std::sync::Mutex;

use permit_map_database::geocode_cache::{self, CachedGeocode};
use permit_map_geocoder::{Throttle, nominatim};
use switchy_database::Database;

/// The shared geocoding pipeline. One instance per process — the embedded
/// [`Throttle`] enforces the process-wide request spacing.
pub struct Geocoder {
    base_url: String,
    client: reqwest::Client,
    throttle: Throttle,
    memory: Mutex<HashMap<String, (Option<f64>, Option<f64>)>>,
}

impl Geocoder {
    /// Creates a geocoder against the given base endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            throttle: Throttle::new(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Builds the geocoder from the `GEOCODER_URL` environment variable.
    /// Returns `None` when unset — geocoding is disabled.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("GEOCODER_URL").ok().map(Self::new)
    }

    /// Resolves an address to WGS84 coordinates, or `None` when the address
    /// cannot be resolved.
    pub async fn geocode(&self, db: &dyn Database, address: &str) -> Option<(f64, f64)> {
        let key = cache_key(address);
        if key.is_empty() {
            return None;
        }

        if let Some(&(lat, lon)) = self.memory.lock().expect("geocode cache mutex").get(&key) {
            return lat.zip(lon);
        }

        match geocode_cache::lookup(db, &key).await {
            Ok(Some(hit)) => {
                self.remember(&key, hit.lat, hit.lon);
                return hit.lat.zip(hit.lon);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Geocode cache lookup failed for '{key}': {e}"),
        }

        self.throttle.acquire().await;
        match nominatim::geocode_with_retries(&self.client, &self.base_url, address).await {
            Ok(Some(point)) => {
                self.persist(
                    db,
                    &key,
                    &CachedGeocode {
                        lat: Some(point.lat),
                        lon: Some(point.lon),
                        display_name: point.display_name,
                    },
                )
                .await;
                Some((point.lat, point.lon))
            }
            Ok(None) => {
                // A definitive "no result" is cached so we never re-ask.
                self.persist(
                    db,
                    &key,
                    &CachedGeocode {
                        lat: None,
                        lon: None,
                        display_name: None,
                    },
                )
                .await;
                None
            }
            Err(e) => {
                log::warn!("Geocoding failed for '{address}': {e}");
                None
            }
        }
    }

    fn remember(&self, key: &str, lat: Option<f64>, lon: Option<f64>) {
        self.memory
            .lock()
            .expect("geocode cache mutex")
            .insert(key.to_string(), (lat, lon));
    }

    async fn persist(&self, db: &dyn Database, key: &str, result: &CachedGeocode) {
        self.remember(key, result.lat, result.lon);
        if let Err(e) = geocode_cache::insert(db, key, result).await {
            log::warn!("Failed to write geocode cache entry for '{key}': {e}");
        }
    }
}

/// Normalizes an address into its cache key.
fn cache_key(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_folds_case_and_whitespace() {
        assert_eq!(
            cache_key("  700 H Street, Sacramento, CA  "),
            "700 h street, sacramento, ca"
        );
        assert_eq!(cache_key("   "), "");
    }
}
