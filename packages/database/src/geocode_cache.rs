//! Persistent geocoding cache.
//!
//! Shared across all sources. Caches both successful geocodes (with
//! coordinates) and upstream "no result" answers (null coordinates) so the
//! same addresses are never re-queried. Transient failures are never
//! written here — the caller retries those on the next lookup.

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// A cached geocoding answer. `lat`/`lon` are both absent for a cached
/// "no result".
#[derive(Debug, Clone, PartialEq)]
pub struct CachedGeocode {
    /// Latitude (WGS84).
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lon: Option<f64>,
    /// Canonical display name from the geocoder.
    pub display_name: Option<String>,
}

/// Looks up a cached result for the given address key.
///
/// Returns `None` when the address has never been resolved; a `Some` with
/// absent coordinates is a cached miss.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub async fn lookup(db: &dyn Database, address_key: &str) -> Result<Option<CachedGeocode>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT lat, lon, display_name FROM geocode_cache WHERE address_key = $1",
            &[DatabaseValue::String(address_key.to_string())],
        )
        .await?;

    Ok(rows.first().map(|row| CachedGeocode {
        lat: row.to_value("lat").unwrap_or(None),
        lon: row.to_value("lon").unwrap_or(None),
        display_name: row.to_value("display_name").unwrap_or(None),
    }))
}

/// Writes a geocoding result (hit or known miss) to the cache.
///
/// # Errors
///
/// Returns [`DbError`] if the insert fails.
pub async fn insert(
    db: &dyn Database,
    address_key: &str,
    result: &CachedGeocode,
) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO geocode_cache (address_key, lat, lon, display_name)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (address_key) DO NOTHING",
        &[
            DatabaseValue::String(address_key.to_string()),
            result.lat.map_or(DatabaseValue::Null, DatabaseValue::Real64),
            result.lon.map_or(DatabaseValue::Null, DatabaseValue::Real64),
            result
                .display_name
                .as_deref()
                .map_or(DatabaseValue::Null, |s| {
                    DatabaseValue::String(s.to_string())
                }),
        ],
    )
    .await?;

    Ok(())
}
