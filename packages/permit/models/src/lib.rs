#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical normalized permit record types.
//!
//! Every data portal connector produces [`NormalizedPermit`] records in this
//! shared shape, regardless of the wire protocol it speaks. The storage layer
//! assigns the opaque primary key and insertion timestamp on upsert.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The wire protocol a data portal speaks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SourcePlatform {
    /// Socrata-style JSON dataset API (`$limit`/`$offset`/`$where`).
    JsonDataset,
    /// `ArcGIS` Feature Service REST API.
    FeatureService,
    /// Any platform without a dedicated connector.
    Other,
}

/// A street address split into its components.
///
/// Produced by the intentionally simple comma-split parser — absent pieces
/// are `None`, never empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAddress {
    /// Leading house number (kept as a string, e.g. `"700"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    /// Street name, without the house number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    /// City name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Two-letter state abbreviation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// 5-digit ZIP, optionally with a `-dddd` extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
}

/// Per-record audit metadata.
///
/// `max_record_id` is only populated by the feature-service connector: it is
/// the largest `OBJECTID` observed in the batch this record belonged to, and
/// the orchestrator folds it into the source's resumable cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Copy of the source's platform tag.
    pub platform: String,
    /// The specific URL that produced this record.
    pub url: String,
    /// Wall-clock fetch time.
    pub fetched_at: DateTime<Utc>,
    /// Normalized field name -> portal field name actually used.
    pub fields_map: BTreeMap<String, String>,
    /// Optional content checksum.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Largest record id observed in this record's batch (feature-service).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_record_id: Option<i64>,
}

/// A building permit normalized to the canonical schema.
///
/// The fingerprint is the sole deduplication key: two records with the same
/// fingerprint represent the same permit and are merged on upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPermit {
    /// Database id of the source that produced this record.
    pub source_id: i32,
    /// Snapshot of the source's display name at fetch time.
    pub source_name: String,
    /// Platform tag of the source.
    pub platform: SourcePlatform,
    /// The portal's own record identifier. Unique per source, not globally.
    pub source_record_id: String,
    /// Permit type/classification string from the portal.
    pub permit_type: Option<String>,
    /// Free-text description of the permitted work.
    pub work_description: Option<String>,
    /// Permit status (issued, finaled, etc.).
    pub permit_status: Option<String>,
    /// Issue date as `YYYY-MM-DD`.
    pub issue_date: Option<String>,
    /// The address string exactly as the portal supplied it.
    pub raw_address: Option<String>,
    /// Parsed address components.
    pub address_parsed: ParsedAddress,
    /// Assessor parcel number, if present.
    pub parcel_id: Option<String>,
    /// Property owner name.
    pub owner_name: Option<String>,
    /// Contractor name.
    pub contractor_name: Option<String>,
    /// Declared permit valuation.
    pub permit_value: Option<f64>,
    /// Latitude (WGS84). `None` when the portal lacks coordinates.
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lon: Option<f64>,
    /// The portal's native geometry JSON, preserved verbatim.
    pub geom_json: Option<serde_json::Value>,
    /// SHA-256 hex digest over the normalized dedup tuple.
    pub fingerprint: String,
    /// Whether the roofing classifier flagged this permit.
    pub is_roofing: bool,
    /// Audit metadata.
    pub provenance: Provenance,
    /// Optional pointer to an archived raw blob.
    pub raw_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_screaming_snake_case() {
        assert_eq!(SourcePlatform::JsonDataset.to_string(), "JSON_DATASET");
        assert_eq!(
            "FEATURE_SERVICE".parse::<SourcePlatform>().unwrap(),
            SourcePlatform::FeatureService
        );
    }

    #[test]
    fn parsed_address_skips_absent_fields() {
        let addr = ParsedAddress {
            street: Some("H Street".to_string()),
            ..ParsedAddress::default()
        };
        let json = serde_json::to_value(&addr).unwrap();
        assert_eq!(json, serde_json::json!({"street": "H Street"}));
    }
}
