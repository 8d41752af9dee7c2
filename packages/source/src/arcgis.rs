//! `ArcGIS` Feature Service connector.
//!
//! Queries `{endpoint}/FeatureServer/{layer_id}/query` with deterministic
//! `OBJECTID` ordering. The resumable cursor starts at the larger of the
//! state-table cursor and the database-derived maximum record id, and each
//! record carries the largest `OBJECTID` observed in its batch inside its
//! provenance so the orchestrator can advance the cursor.
//!
//! No server-side roofing filter is applied — portal schemas vary and
//! source-side filters are unreliable, so every row is fetched and
//! classification happens in the normalizer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permit_map_permit_models::{Provenance, SourcePlatform};
use permit_map_source_models::ConnectorConfig;
use tokio::sync::mpsc;

use crate::normalize::{self, RawFields};
use crate::parsing::{probe_date, probe_f64, probe_string, value_to_f64, value_to_i64};
use crate::rate_limit::RateLimiter;
use crate::{
    ConnectorError, FetchContext, PAGE_SIZE, PermitConnector, PermitStream,
    RECORD_CHANNEL_BUFFER, retry,
};

const RECORD_ID_FIELDS: &[&str] = &["OBJECTID", "ObjectId", "objectid", "FID", "EsriOID"];
const PERMIT_TYPE_FIELDS: &[&str] = &[
    "PermitType",
    "PERMIT_TYPE",
    "permit_type",
    "Permit_Type",
    "PermitTypeDesc",
    "PermitClass",
    "ActiveBuilding_ExcelToTable_PermitType",
    "ActiveBuilding_ExcelToTable_Permit_Type",
];
const WORK_DESC_FIELDS: &[&str] = &[
    "Description",
    "WorkDescription",
    "WORK_DESC",
    "ProjectDescription",
    "ScopeOfWork",
    "ActiveBuilding_ExcelToTable_Description",
];
const STATUS_FIELDS: &[&str] = &[
    "Status",
    "PermitStatus",
    "STATUS",
    "CurrentStatus",
    "ActiveBuilding_ExcelToTable_Status",
];
const ISSUE_DATE_FIELDS: &[&str] = &[
    "IssueDate",
    "ISSUE_DATE",
    "IssuedDate",
    "DateIssued",
    "Issue_Date",
    "ActiveBuilding_ExcelToTable_IssueDate",
];
const ADDRESS_FIELDS: &[&str] = &[
    "Address",
    "FullAddress",
    "SiteAddress",
    "ADDRESS",
    "Location",
    "OriginalAddress",
    "ActiveBuilding_ExcelToTable_Address",
];
const PARCEL_FIELDS: &[&str] = &[
    "ParcelNumber",
    "APN",
    "PARCEL_ID",
    "ParcelID",
    "Parcel",
    "ActiveBuilding_ExcelToTable_Parcel",
];
const OWNER_FIELDS: &[&str] = &[
    "Owner",
    "OwnerName",
    "OWNER_NAME",
    "ActiveBuilding_ExcelToTable_Owner",
];
const CONTRACTOR_FIELDS: &[&str] = &[
    "Contractor",
    "ContractorName",
    "CONTRACTOR",
    "ActiveBuilding_ExcelToTable_Contractor",
];
const VALUE_FIELDS: &[&str] = &[
    "Valuation",
    "PermitValue",
    "JobValue",
    "EstimatedCost",
    "ActiveBuilding_ExcelToTable_Valuation",
];

/// Connector for `ArcGIS` Feature Service layers.
#[derive(Clone)]
pub struct FeatureServiceConnector {
    endpoint_url: String,
    layer_id: String,
    default_state: Option<String>,
    limiter: Arc<RateLimiter>,
    client: reqwest::Client,
}

impl FeatureServiceConnector {
    /// Builds the connector, rejecting configs without a `layer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] when required fields are absent.
    pub fn from_config(
        config: &ConnectorConfig,
        max_requests_per_minute: u32,
    ) -> Result<Self, ConnectorError> {
        if config.endpoint_url.trim().is_empty() {
            return Err(ConnectorError::Config {
                message: "endpoint_url is required".to_string(),
            });
        }
        let layer_id = config
            .opt_str("layer_id")
            .ok_or_else(|| ConnectorError::Config {
                message: "layer_id is required for feature service sources".to_string(),
            })?
            .to_string();

        Ok(Self {
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            layer_id,
            default_state: config.opt_str("default_state").map(String::from),
            limiter: Arc::new(RateLimiter::new(max_requests_per_minute)),
            client: reqwest::Client::new(),
        })
    }

    fn query_url(&self, offset: u64, count: u64, where_clause: &str) -> String {
        format!(
            "{}/FeatureServer/{}/query?outFields=*&f=json&outSR=4326&orderByFields=OBJECTID&resultOffset={offset}&resultRecordCount={count}&where={where_clause}",
            self.endpoint_url, self.layer_id
        )
    }

    /// The `where` clause for this run: `OBJECTID > cursor` when any cursor
    /// exists; in incremental mode a timestamp clause when only a timestamp
    /// cursor is available; otherwise everything (`1=1`).
    fn where_clause(ctx: &FetchContext, incremental: bool) -> String {
        if let Some(cursor) = ctx.state.starting_record_id() {
            return format!("OBJECTID > {cursor}");
        }
        if incremental && let Some(ts) = ctx.state.last_max_timestamp.as_deref() {
            return format!("lastEditDate > '{ts}'");
        }
        "1=1".to_string()
    }

    fn stream(&self, ctx: &FetchContext, where_clause: String) -> PermitStream {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_BUFFER);
        let connector = self.clone();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            connector.fetch_into(&ctx, &where_clause, &tx).await
        });
        (rx, handle)
    }

    async fn fetch_into(
        &self,
        ctx: &FetchContext,
        where_clause: &str,
        tx: &mpsc::Sender<crate::RecordResult>,
    ) -> Result<u64, ConnectorError> {
        let mut offset: u64 = 0;
        let mut total: u64 = 0;

        loop {
            let remaining = ctx.max_rows.saturating_sub(total);
            if remaining == 0 {
                break;
            }
            let page_limit = remaining.min(PAGE_SIZE);
            let url = self.query_url(offset, page_limit, where_clause);

            self.limiter.acquire().await;
            log::info!("{}: offset={offset}, limit={page_limit}", ctx.source_name);

            let body = retry::send_json(|| self.client.get(&url)).await?;

            // Feature services report failures in a 200 body.
            if let Some(error) = body.get("error") {
                return Err(ConnectorError::Portal {
                    message: format!("feature service error: {error}"),
                });
            }

            let features = body
                .get("features")
                .and_then(serde_json::Value::as_array)
                .ok_or_else(|| ConnectorError::Portal {
                    message: "response has no features array".to_string(),
                })?;

            if features.is_empty() {
                break;
            }

            // The largest OBJECTID in this batch rides along in every
            // record's provenance; the orchestrator keeps the run-wide max.
            let batch_max_record_id = features
                .iter()
                .filter_map(|f| {
                    let attrs = f.get("attributes")?;
                    RECORD_ID_FIELDS
                        .iter()
                        .find_map(|field| attrs.get(*field).and_then(value_to_i64))
                })
                .max();

            let fetched_at = Utc::now();
            for feature in features {
                let result =
                    self.normalize_feature(ctx, feature, &url, fetched_at, batch_max_record_id);
                total += 1;
                if tx.send(result).await.is_err() {
                    return Ok(total);
                }
                if total >= ctx.max_rows {
                    break;
                }
            }

            let count = features.len() as u64;
            offset += count;
            if count < page_limit {
                break;
            }
        }

        log::info!("{}: fetch complete — {total} records", ctx.source_name);
        Ok(total)
    }

    fn normalize_feature(
        &self,
        ctx: &FetchContext,
        feature: &serde_json::Value,
        url: &str,
        fetched_at: DateTime<Utc>,
        batch_max_record_id: Option<i64>,
    ) -> crate::RecordResult {
        let attrs = feature
            .get("attributes")
            .filter(|a| a.is_object())
            .ok_or_else(|| ConnectorError::Row {
                message: "feature has no attributes object".to_string(),
            })?;

        let mut fields_map: BTreeMap<String, String> = BTreeMap::new();
        let mut track = |name: &str, field: &str| {
            fields_map.insert(name.to_string(), field.to_string());
        };

        let source_record_id = probe_string(attrs, RECORD_ID_FIELDS)
            .map(|(field, value)| {
                track("source_record_id", field);
                value
            })
            .ok_or_else(|| ConnectorError::Row {
                message: "feature has no OBJECTID".to_string(),
            })?;

        let permit_type = probe_string(attrs, PERMIT_TYPE_FIELDS).map(|(field, value)| {
            track("permit_type", field);
            value
        });
        let work_description = probe_string(attrs, WORK_DESC_FIELDS).map(|(field, value)| {
            track("work_description", field);
            value
        });
        let permit_status = probe_string(attrs, STATUS_FIELDS).map(|(field, value)| {
            track("permit_status", field);
            value
        });
        let issue_date = probe_date(attrs, ISSUE_DATE_FIELDS).map(|(field, value)| {
            track("issue_date", field);
            value
        });
        let raw_address = probe_string(attrs, ADDRESS_FIELDS).map(|(field, value)| {
            track("raw_address", field);
            value
        });
        let parcel_id = probe_string(attrs, PARCEL_FIELDS).map(|(field, value)| {
            track("parcel_id", field);
            value
        });
        let owner_name = probe_string(attrs, OWNER_FIELDS).map(|(field, value)| {
            track("owner_name", field);
            value
        });
        let contractor_name = probe_string(attrs, CONTRACTOR_FIELDS).map(|(field, value)| {
            track("contractor_name", field);
            value
        });
        let permit_value = probe_f64(attrs, VALUE_FIELDS).map(|(field, value)| {
            track("permit_value", field);
            value
        });

        let geometry = feature.get("geometry").filter(|g| !g.is_null());
        let (lat, lon) = geometry.map_or((None, None), extract_point);

        let provenance = Provenance {
            platform: SourcePlatform::FeatureService.to_string(),
            url: url.to_string(),
            fetched_at,
            fields_map,
            checksum: None,
            max_record_id: batch_max_record_id,
        };

        Ok(normalize::build_permit(
            ctx.source_id,
            &ctx.source_name,
            SourcePlatform::FeatureService,
            RawFields {
                source_record_id,
                permit_type,
                work_description,
                permit_status,
                issue_date,
                raw_address,
                parcel_id,
                owner_name,
                contractor_name,
                permit_value,
                lat,
                lon,
                geom_json: geometry.cloned(),
            },
            self.default_state.as_deref(),
            provenance,
        ))
    }
}

/// Extracts a WGS84 point from either geometry shape: `{x, y}` or
/// `{coordinates: [lon, lat]}`.
fn extract_point(geometry: &serde_json::Value) -> (Option<f64>, Option<f64>) {
    if let Some(coords) = geometry
        .get("coordinates")
        .and_then(serde_json::Value::as_array)
    {
        let lon = coords.first().and_then(value_to_f64);
        let lat = coords.get(1).and_then(value_to_f64);
        return (lat, lon);
    }
    let lon = geometry.get("x").and_then(value_to_f64);
    let lat = geometry.get("y").and_then(value_to_f64);
    (lat, lon)
}

#[async_trait]
impl PermitConnector for FeatureServiceConnector {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::FeatureService
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        let url = format!(
            "{}/FeatureServer/{}?f=json",
            self.endpoint_url, self.layer_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Config {
                message: format!("endpoint unreachable: {e}"),
            })?;
        if !response.status().is_success() {
            return Err(ConnectorError::Config {
                message: format!("endpoint probe returned HTTP {}", response.status()),
            });
        }
        let body: serde_json::Value =
            response.json().await.map_err(|e| ConnectorError::Config {
                message: format!("endpoint probe returned invalid JSON: {e}"),
            })?;
        if let Some(error) = body.get("error") {
            return Err(ConnectorError::Config {
                message: format!("endpoint probe failed: {error}"),
            });
        }
        Ok(())
    }

    fn backfill(&self, ctx: &FetchContext) -> PermitStream {
        self.stream(ctx, Self::where_clause(ctx, false))
    }

    fn incremental(&self, ctx: &FetchContext) -> PermitStream {
        self.stream(ctx, Self::where_clause(ctx, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permit_map_source_models::ConnectorState;

    fn connector() -> FeatureServiceConnector {
        FeatureServiceConnector::from_config(
            &ConnectorConfig {
                endpoint_url: "https://gis.example.gov/arcgis/rest/services/Permits".to_string(),
                options: serde_json::json!({"layer_id": "0"}),
            },
            60,
        )
        .unwrap()
    }

    fn ctx(state: ConnectorState) -> FetchContext {
        FetchContext {
            source_id: 2,
            source_name: "County GIS".to_string(),
            state,
            max_rows: 1000,
        }
    }

    #[test]
    fn builds_query_url() {
        let url = connector().query_url(0, 1000, "1=1");
        assert_eq!(
            url,
            "https://gis.example.gov/arcgis/rest/services/Permits/FeatureServer/0/query?outFields=*&f=json&outSR=4326&orderByFields=OBJECTID&resultOffset=0&resultRecordCount=1000&where=1=1"
        );
    }

    #[test]
    fn cursor_starts_at_max_of_state_and_db() {
        let c = ctx(ConnectorState {
            last_max_record_id: Some(500),
            db_max_record_id: Some(1000),
            ..ConnectorState::default()
        });
        assert_eq!(
            FeatureServiceConnector::where_clause(&c, false),
            "OBJECTID > 1000"
        );
    }

    #[test]
    fn no_cursor_fetches_everything() {
        let c = ctx(ConnectorState::default());
        assert_eq!(FeatureServiceConnector::where_clause(&c, false), "1=1");
    }

    #[test]
    fn incremental_without_cursor_uses_timestamp() {
        let c = ctx(ConnectorState {
            last_max_timestamp: Some("2024-06-01T00:00:00".to_string()),
            ..ConnectorState::default()
        });
        assert_eq!(
            FeatureServiceConnector::where_clause(&c, true),
            "lastEditDate > '2024-06-01T00:00:00'"
        );
        // Backfill ignores the timestamp cursor.
        assert_eq!(FeatureServiceConnector::where_clause(&c, false), "1=1");
    }

    #[test]
    fn normalizes_a_feature_with_xy_geometry() {
        let feature = serde_json::json!({
            "attributes": {
                "OBJECTID": 42,
                "PermitType": "Re-Roof",
                "Description": "Remove and replace shingles",
                "IssueDate": 1_705_329_000_000_i64,
                "Address": "700 H Street, Sacramento, CA 95814",
                "Valuation": 12000.0
            },
            "geometry": {"x": -121.4944, "y": 38.5790}
        });
        let permit = connector()
            .normalize_feature(&ctx(ConnectorState::default()), &feature, "https://u", Utc::now(), Some(1000))
            .unwrap();
        assert_eq!(permit.source_record_id, "42");
        assert_eq!(permit.issue_date.as_deref(), Some("2024-01-15"));
        assert!((permit.lat.unwrap() - 38.5790).abs() < 1e-9);
        assert!((permit.lon.unwrap() - -121.4944).abs() < 1e-9);
        assert_eq!(permit.provenance.max_record_id, Some(1000));
        assert!(permit.is_roofing);
        assert!(permit.geom_json.is_some());
    }

    #[test]
    fn normalizes_coordinates_array_geometry() {
        let feature = serde_json::json!({
            "attributes": {"OBJECTID": 7},
            "geometry": {"coordinates": [-121.5, 38.6]}
        });
        let permit = connector()
            .normalize_feature(&ctx(ConnectorState::default()), &feature, "https://u", Utc::now(), None)
            .unwrap();
        assert!((permit.lat.unwrap() - 38.6).abs() < 1e-9);
        assert!((permit.lon.unwrap() - -121.5).abs() < 1e-9);
    }

    #[test]
    fn jurisdiction_specific_field_names_are_probed() {
        let feature = serde_json::json!({
            "attributes": {
                "OBJECTID": 9,
                "ActiveBuilding_ExcelToTable_PermitType": "Roofing",
                "ActiveBuilding_ExcelToTable_Description": "reroof house",
                "ActiveBuilding_ExcelToTable_Address": "1 Main St"
            }
        });
        let permit = connector()
            .normalize_feature(&ctx(ConnectorState::default()), &feature, "https://u", Utc::now(), None)
            .unwrap();
        assert_eq!(permit.permit_type.as_deref(), Some("Roofing"));
        assert_eq!(
            permit.provenance.fields_map.get("permit_type").unwrap(),
            "ActiveBuilding_ExcelToTable_PermitType"
        );
    }

    #[test]
    fn feature_without_attributes_is_a_row_error() {
        let feature = serde_json::json!({"geometry": {"x": 0.0, "y": 0.0}});
        let err = connector()
            .normalize_feature(&ctx(ConnectorState::default()), &feature, "https://u", Utc::now(), None)
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Row { .. }));
    }
}
