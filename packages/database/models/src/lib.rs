#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Database row types and query parameter definitions.
//!
//! These represent the shapes of data as stored in and retrieved from the
//! relational store. They are distinct from the API response types in
//! `permit_map_server_models` and the normalized ingestion types in
//! `permit_map_permit_models`.

use chrono::{DateTime, Utc};
use permit_map_permit_models::{ParsedAddress, Provenance, SourcePlatform};
use serde::{Deserialize, Serialize};

/// A geographic bounding box in WGS84 coordinates (closed intervals).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }
}

/// Maximum rows a single permit listing may return.
pub const MAX_PERMIT_QUERY_LIMIT: u32 = 1000;

/// Parameters for querying permits from the database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermitQuery {
    /// Spatial bounding box filter on `(lat, lon)`.
    pub bbox: Option<BoundingBox>,
    /// Substring filter against the parsed-address city.
    pub city: Option<String>,
    /// Substring filter against the parsed-address state.
    pub state: Option<String>,
    /// Substring filter against the permit type.
    pub permit_type: Option<String>,
    /// Minimum issue date (`YYYY-MM-DD`, inclusive).
    pub date_from: Option<String>,
    /// Maximum issue date (`YYYY-MM-DD`, inclusive).
    pub date_to: Option<String>,
    /// Only return permits the classifier flagged as roofing.
    pub roofing_only: bool,
    /// Maximum number of results (capped at [`MAX_PERMIT_QUERY_LIMIT`]).
    pub limit: u32,
    /// Number of results to skip.
    pub offset: u32,
}

/// A permit row as retrieved from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitRow {
    /// Opaque primary key assigned at insert.
    pub id: String,
    /// Source that provided this permit.
    pub source_id: i32,
    /// Source display name snapshot.
    pub source_name: String,
    /// Platform tag of the source.
    pub platform: SourcePlatform,
    /// The portal's own record identifier.
    pub source_record_id: String,
    /// Permit type string.
    pub permit_type: Option<String>,
    /// Work description.
    pub work_description: Option<String>,
    /// Permit status.
    pub permit_status: Option<String>,
    /// Issue date as `YYYY-MM-DD`.
    pub issue_date: Option<String>,
    /// Raw address string from the portal.
    pub raw_address: Option<String>,
    /// Parsed address components.
    pub address_parsed: ParsedAddress,
    /// Assessor parcel number.
    pub parcel_id: Option<String>,
    /// Property owner name.
    pub owner_name: Option<String>,
    /// Contractor name.
    pub contractor_name: Option<String>,
    /// Declared permit valuation.
    pub permit_value: Option<f64>,
    /// Latitude (WGS84).
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lon: Option<f64>,
    /// The portal's native geometry JSON, verbatim.
    pub geom_json: Option<serde_json::Value>,
    /// SHA-256 dedup fingerprint (unique).
    pub fingerprint: String,
    /// Roofing classifier verdict.
    pub is_roofing: bool,
    /// Audit metadata.
    pub provenance: Provenance,
    /// Optional raw-blob pointer.
    pub raw_ref: Option<String>,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

/// Aggregate permit counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitStats {
    /// Total permits stored.
    pub total: i64,
    /// Permits with both coordinates set.
    pub with_coordinates: i64,
    /// Permits flagged as roofing.
    pub roofing: i64,
}
