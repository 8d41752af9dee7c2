#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the permit map server.

use permit_map_database_models::PermitRow;
use serde::{Deserialize, Serialize};

/// `GET /api/health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the database is reachable.
    pub healthy: bool,
    /// Crate version.
    pub version: String,
}

/// Query parameters for `GET /api/permits`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermitQueryParams {
    /// Bounding box as `west,south,east,north` decimal degrees.
    pub bbox: Option<String>,
    /// City substring filter.
    pub city: Option<String>,
    /// State substring filter.
    pub state: Option<String>,
    /// Permit-type substring filter.
    #[serde(rename = "type")]
    pub permit_type: Option<String>,
    /// Minimum issue date (`YYYY-MM-DD`).
    pub date_from: Option<String>,
    /// Maximum issue date (`YYYY-MM-DD`).
    pub date_to: Option<String>,
    /// Only permits flagged as roofing.
    pub roofing_only: Option<bool>,
    /// Page size.
    pub limit: Option<u32>,
    /// Page offset.
    pub offset: Option<u32>,
}

/// Query parameters for `POST /api/sources/{id}/ingest`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestParams {
    /// `backfill` (default), `incremental`, or `deep`.
    pub mode: Option<String>,
}

/// `GET /api/permits` response: one page plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitListResponse {
    /// The page of matching permits.
    pub permits: Vec<PermitRow>,
    /// Total matches across all pages.
    pub total: u64,
}
