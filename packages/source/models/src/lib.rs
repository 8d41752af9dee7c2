#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Source registration, resumable cursor state, and connector configuration
//! types.
//!
//! A *source* is one jurisdiction-and-protocol pair registered by an
//! operator. Its [`SourceStateRecord`] row holds the resumable cursors and
//! last-run statistics the orchestrator reads before each run and writes
//! after.

use chrono::{DateTime, Utc};
use permit_map_permit_models::SourcePlatform;
use serde::{Deserialize, Serialize};

/// A registered data source as stored in the `sources` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Database primary key. Immutable.
    pub id: i32,
    /// Human-readable name (e.g., "Sacramento Building Permits").
    pub name: String,
    /// Which wire protocol this source speaks.
    pub platform: SourcePlatform,
    /// Base endpoint URL.
    pub endpoint_url: String,
    /// Platform-specific configuration (dataset id, layer id, token, ...).
    pub config: serde_json::Value,
    /// Disabling halts scheduling but preserves past records.
    pub enabled: bool,
    /// Maximum rows a single ingestion run may produce.
    pub max_rows_per_run: i64,
    /// Maximum wall-clock minutes a single run may consume.
    pub max_runtime_minutes: i64,
    /// Per-source request budget for the sliding-window rate limiter.
    pub max_requests_per_minute: i64,
    /// When this source was registered.
    pub created_at: DateTime<Utc>,
    /// Last operator or orchestrator update.
    pub updated_at: DateTime<Utc>,
}

/// Payload for registering a new source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    /// Human-readable name.
    pub name: String,
    /// Which wire protocol this source speaks.
    pub platform: SourcePlatform,
    /// Base endpoint URL.
    pub endpoint_url: String,
    /// Platform-specific configuration.
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
    /// Whether to include this source in scheduling.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-run row budget.
    #[serde(default = "default_max_rows_per_run")]
    pub max_rows_per_run: i64,
    /// Per-run runtime budget.
    #[serde(default = "default_max_runtime_minutes")]
    pub max_runtime_minutes: i64,
    /// Request-rate budget.
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: i64,
}

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

const fn default_enabled() -> bool {
    true
}

const fn default_max_rows_per_run() -> i64 {
    1000
}

const fn default_max_runtime_minutes() -> i64 {
    10
}

const fn default_max_requests_per_minute() -> i64 {
    60
}

/// Partial update to a [`SourceRecord`]; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePatch {
    /// New display name.
    pub name: Option<String>,
    /// New endpoint URL.
    pub endpoint_url: Option<String>,
    /// Replacement config object.
    pub config: Option<serde_json::Value>,
    /// Enable or disable scheduling.
    pub enabled: Option<bool>,
    /// New per-run row budget.
    pub max_rows_per_run: Option<i64>,
    /// New per-run runtime budget.
    pub max_runtime_minutes: Option<i64>,
    /// New request-rate budget.
    pub max_requests_per_minute: Option<i64>,
}

/// The single per-source row in the `source_state` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStateRecord {
    /// The source this state belongs to (primary key).
    pub source_id: i32,
    /// Portal-side modification timestamp cursor, when the platform has one.
    pub last_max_timestamp: Option<String>,
    /// Largest integer record id ingested so far (feature-service only).
    pub last_max_record_id: Option<i64>,
    /// Largest issue date (`YYYY-MM-DD`) ingested so far.
    pub last_issue_date: Option<String>,
    /// Opaque validator from the portal, if any.
    pub etag: Option<String>,
    /// Optional content checksum from the last run.
    pub checksum: Option<String>,
    /// Rows the portal returned in the last run.
    pub rows_fetched: i64,
    /// Rows successfully upserted in the last run.
    pub rows_upserted: i64,
    /// Per-record errors counted in the last run.
    pub errors: i64,
    /// Wall-clock duration of the last run, in seconds.
    pub freshness_seconds: Option<i64>,
    /// When the last successful run finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Whether a run is currently in flight (advisory).
    pub is_running: bool,
    /// Human-readable progress/outcome line for operator UIs.
    pub status_message: Option<String>,
    /// Page counter of the in-flight run.
    pub current_page: i32,
    /// Last write to this row.
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by `upsert_source_state`: insert if no row exists
/// for the source, else patch-merge the present fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatePatch {
    /// The source this patch targets.
    pub source_id: i32,
    /// New timestamp cursor.
    pub last_max_timestamp: Option<String>,
    /// New record-id cursor.
    pub last_max_record_id: Option<i64>,
    /// New issue-date cursor.
    pub last_issue_date: Option<String>,
    /// New etag.
    pub etag: Option<String>,
    /// New checksum.
    pub checksum: Option<String>,
    /// Rows fetched this run.
    pub rows_fetched: Option<i64>,
    /// Rows upserted this run.
    pub rows_upserted: Option<i64>,
    /// Errors this run.
    pub errors: Option<i64>,
    /// Run duration in seconds.
    pub freshness_seconds: Option<i64>,
    /// Completion timestamp.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Progress flag.
    pub is_running: Option<bool>,
    /// Progress/outcome message.
    pub status_message: Option<String>,
    /// Page counter.
    pub current_page: Option<i32>,
}

/// Connector configuration: the endpoint plus platform-specific keys from
/// the source's opaque `config` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Base endpoint URL.
    pub endpoint_url: String,
    /// Platform-specific keys (`dataset_id`, `layer_id`, `app_token`,
    /// `default_state`, ...).
    pub options: serde_json::Value,
}

impl ConnectorConfig {
    /// Builds the connector config from a registered source.
    #[must_use]
    pub fn from_source(source: &SourceRecord) -> Self {
        Self {
            endpoint_url: source.endpoint_url.clone(),
            options: source.config.clone(),
        }
    }

    /// Returns a string-valued option, treating empty strings as absent.
    #[must_use]
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Read-only cursor snapshot handed to a connector before a run.
///
/// `db_max_record_id` is the database-derived maximum `source_record_id`
/// (cast to integer); the feature-service connector starts its `OBJECTID`
/// cursor at `max(last_max_record_id, db_max_record_id)`, which repairs
/// state-table drift when records were ingested before the cursor column
/// existed or the state row was wiped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorState {
    /// Portal-side modification timestamp cursor.
    pub last_max_timestamp: Option<String>,
    /// Record-id cursor from the state table.
    pub last_max_record_id: Option<i64>,
    /// Issue-date cursor.
    pub last_issue_date: Option<String>,
    /// Maximum record id already persisted for this source.
    pub db_max_record_id: Option<i64>,
}

impl ConnectorState {
    /// The starting `OBJECTID` cursor: the larger of the state-table cursor
    /// and the database-derived maximum. `None` when neither exists.
    #[must_use]
    pub fn starting_record_id(&self) -> Option<i64> {
        match (self.last_max_record_id, self.db_max_record_id) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_record_id_takes_max_of_both_cursors() {
        let state = ConnectorState {
            last_max_record_id: Some(500),
            db_max_record_id: Some(1200),
            ..ConnectorState::default()
        };
        assert_eq!(state.starting_record_id(), Some(1200));
    }

    #[test]
    fn starting_record_id_falls_back_to_either_side() {
        let from_db = ConnectorState {
            db_max_record_id: Some(42),
            ..ConnectorState::default()
        };
        assert_eq!(from_db.starting_record_id(), Some(42));

        let from_state = ConnectorState {
            last_max_record_id: Some(7),
            ..ConnectorState::default()
        };
        assert_eq!(from_state.starting_record_id(), Some(7));

        assert_eq!(ConnectorState::default().starting_record_id(), None);
    }

    #[test]
    fn opt_str_treats_empty_as_absent() {
        let config = ConnectorConfig {
            endpoint_url: "https://data.example.gov".to_string(),
            options: serde_json::json!({"dataset_id": "abcd-1234", "app_token": ""}),
        };
        assert_eq!(config.opt_str("dataset_id"), Some("abcd-1234"));
        assert_eq!(config.opt_str("app_token"), None);
        assert_eq!(config.opt_str("layer_id"), None);
    }
}
