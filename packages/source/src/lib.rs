#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Permit data connector framework and concrete portal connectors.
//!
//! Each wire protocol implements the [`PermitConnector`] trait to expose a
//! uniform streaming iterator over [`NormalizedPermit`] records. Connectors
//! share the sliding-window [`rate_limit::RateLimiter`] and the
//! [`retry`] backoff helpers, and hand every raw row to the
//! [`normalize`] / [`classify`] pipeline before yielding it.

pub mod arcgis;
pub mod classify;
pub mod normalize;
pub mod parsing;
pub mod rate_limit;
pub mod retry;
pub mod socrata;

use async_trait::async_trait;
use permit_map_permit_models::{NormalizedPermit, SourcePlatform};
use permit_map_source_models::{ConnectorConfig, ConnectorState};
use tokio::sync::mpsc;

/// Rows requested per page from every portal.
pub const PAGE_SIZE: u64 = 1000;

/// Record channel buffer — lets the fetch task stay a fraction of a page
/// ahead of the consumer (orchestrator/upserter).
pub(crate) const RECORD_CHANNEL_BUFFER: usize = 256;

/// Errors that can occur during connector operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Source config is missing required fields or the endpoint probe failed.
    #[error("Invalid connector config: {message}")]
    Config {
        /// Description of what is missing or unreachable.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The portal returned a failure payload or an unexpected shape.
    #[error("Portal error: {message}")]
    Portal {
        /// Description of what the portal sent.
        message: String,
    },

    /// A single row could not be normalized. Never fatal for the run.
    #[error("Row parse error: {message}")]
    Row {
        /// Description of the bad row.
        message: String,
    },
}

/// Per-run context handed to a connector's streaming operations.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Database id of the source being ingested.
    pub source_id: i32,
    /// Display name snapshot for provenance and logs.
    pub source_name: String,
    /// Read-only cursor snapshot resolved by the orchestrator.
    pub state: ConnectorState,
    /// Maximum records this run may produce.
    pub max_rows: u64,
}

/// One streamed item: a normalized record, or a per-row normalization
/// failure the consumer counts and skips.
pub type RecordResult = Result<NormalizedPermit, ConnectorError>;

/// A lazy, finite record sequence plus the fetch task's final result
/// (total rows yielded, or the first fatal error).
///
/// The sequence is not restartable mid-stream; on fault the caller discards
/// the receiver and re-enters from persisted cursors.
pub type PermitStream = (
    mpsc::Receiver<RecordResult>,
    tokio::task::JoinHandle<Result<u64, ConnectorError>>,
);

/// Trait that all permit portal connectors implement.
///
/// Both streaming operations respect the per-source rate limiter and use
/// exponential backoff with jitter for every HTTP call.
#[async_trait]
pub trait PermitConnector: Send + Sync {
    /// The wire protocol this connector speaks.
    fn platform(&self) -> SourcePlatform;

    /// Probes the configured endpoint with a trivial request.
    ///
    /// Missing required config fields are rejected at construction time;
    /// this checks reachability.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] if the endpoint is unreachable.
    async fn validate(&self) -> Result<(), ConnectorError>;

    /// Streams all records from the portal's earliest available row (or the
    /// persisted cursor, for cursor-ordered platforms) forward.
    fn backfill(&self, ctx: &FetchContext) -> PermitStream;

    /// Streams only records newer than the cursors in `ctx.state`.
    fn incremental(&self, ctx: &FetchContext) -> PermitStream;
}

/// Builds the connector for a source's platform.
///
/// # Errors
///
/// Returns [`ConnectorError::Config`] if the platform has no connector or
/// required config fields are absent.
pub fn build_connector(
    platform: SourcePlatform,
    config: &ConnectorConfig,
    max_requests_per_minute: u32,
) -> Result<Box<dyn PermitConnector>, ConnectorError> {
    match platform {
        SourcePlatform::JsonDataset => Ok(Box::new(socrata::JsonDatasetConnector::from_config(
            config,
            max_requests_per_minute,
        )?)),
        SourcePlatform::FeatureService => Ok(Box::new(
            arcgis::FeatureServiceConnector::from_config(config, max_requests_per_minute)?,
        )),
        SourcePlatform::Other => Err(ConnectorError::Config {
            message: format!("no connector implemented for platform {platform}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(options: serde_json::Value) -> ConnectorConfig {
        ConnectorConfig {
            endpoint_url: "https://data.example.gov".to_string(),
            options,
        }
    }

    #[test]
    fn builds_json_dataset_connector() {
        let connector = build_connector(
            SourcePlatform::JsonDataset,
            &config(serde_json::json!({"dataset_id": "abcd-1234"})),
            60,
        )
        .unwrap();
        assert_eq!(connector.platform(), SourcePlatform::JsonDataset);
    }

    #[test]
    fn builds_feature_service_connector() {
        let connector = build_connector(
            SourcePlatform::FeatureService,
            &config(serde_json::json!({"layer_id": "0"})),
            60,
        )
        .unwrap();
        assert_eq!(connector.platform(), SourcePlatform::FeatureService);
    }

    #[test]
    fn rejects_unsupported_platform() {
        let err = build_connector(SourcePlatform::Other, &config(serde_json::json!({})), 60)
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Config { .. }));
    }

    #[test]
    fn rejects_missing_required_keys() {
        assert!(
            build_connector(
                SourcePlatform::JsonDataset,
                &config(serde_json::json!({})),
                60
            )
            .is_err()
        );
        assert!(
            build_connector(
                SourcePlatform::FeatureService,
                &config(serde_json::json!({})),
                60
            )
            .is_err()
        );
    }
}
