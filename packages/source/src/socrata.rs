//! Socrata-style JSON dataset connector.
//!
//! Speaks the `$limit`/`$offset`/`$where` pagination dialect against
//! `{endpoint}/resource/{dataset_id}.json`. Field names vary per
//! jurisdiction, so each normalized field is probed against a small ordered
//! list of alternates; the address may arrive as a plain string, a location
//! object with a `human_address` sub-field, or a JSON-encoded string.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use permit_map_permit_models::{Provenance, SourcePlatform};
use permit_map_source_models::ConnectorConfig;
use tokio::sync::mpsc;

use crate::normalize::{self, RawFields};
use crate::parsing::{probe_date, probe_f64, probe_string, value_to_f64};
use crate::rate_limit::RateLimiter;
use crate::{
    ConnectorError, FetchContext, PermitConnector, PermitStream, RECORD_CHANNEL_BUFFER, retry,
    PAGE_SIZE,
};

const RECORD_ID_FIELDS: &[&str] = &["id", "_id"];
const PERMIT_TYPE_FIELDS: &[&str] = &[
    "permit_type",
    "permittype",
    "type",
    "permit_type_desc",
    "permit_type_description",
];
const WORK_DESC_FIELDS: &[&str] = &[
    "work_description",
    "description",
    "work_desc",
    "scope_of_work",
    "proposed_use",
];
const STATUS_FIELDS: &[&str] = &["permit_status", "status", "status_current", "currentstatus"];
const ISSUE_DATE_FIELDS: &[&str] = &[
    "issue_date",
    "issued_date",
    "issueddate",
    "issuedate",
    "date_issued",
];
const ADDRESS_FIELDS: &[&str] = &[
    "address",
    "original_address1",
    "location_address",
    "site_address",
    "full_address",
    "location",
];
const PARCEL_FIELDS: &[&str] = &["parcel_id", "parcel", "apn", "parcel_number", "pin"];
const OWNER_FIELDS: &[&str] = &["owner_name", "owner", "applicant", "applicant_name"];
const CONTRACTOR_FIELDS: &[&str] = &["contractor_name", "contractor", "contractor_company_name"];
const VALUE_FIELDS: &[&str] = &[
    "permit_value",
    "valuation",
    "estimated_cost",
    "est_project_cost",
    "job_value",
];
const LAT_FIELDS: &[&str] = &["latitude", "lat", "y"];
const LON_FIELDS: &[&str] = &["longitude", "lon", "lng", "x"];

/// Connector for Socrata-style JSON dataset APIs.
#[derive(Clone)]
pub struct JsonDatasetConnector {
    endpoint_url: String,
    dataset_id: String,
    app_token: Option<String>,
    default_state: Option<String>,
    limiter: Arc<RateLimiter>,
    client: reqwest::Client,
}

impl JsonDatasetConnector {
    /// Builds the connector, rejecting configs without a `dataset_id`.
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
        let dataset_id = config
            .opt_str("dataset_id")
            .ok_or_else(|| ConnectorError::Config {
                message: "dataset_id is required for JSON dataset sources".to_string(),
            })?
            .to_string();

        Ok(Self {
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            dataset_id,
            app_token: config.opt_str("app_token").map(String::from),
            default_state: config.opt_str("default_state").map(String::from),
            limiter: Arc::new(RateLimiter::new(max_requests_per_minute)),
            client: reqwest::Client::new(),
        })
    }

    fn page_url(&self, limit: u64, offset: u64, where_clause: Option<&str>) -> String {
        let mut url = format!(
            "{}/resource/{}.json?$limit={limit}&$offset={offset}",
            self.endpoint_url, self.dataset_id
        );
        if let Some(clause) = where_clause {
            url.push_str("&$where=");
            url.push_str(clause);
        }
        url
    }

    /// Builds the incremental `$where` filter from the newest cursor the
    /// state carries: portal modification timestamp first, issue date next,
    /// otherwise no filter.
    fn incremental_where(ctx: &FetchContext) -> Option<String> {
        if let Some(ts) = ctx.state.last_max_timestamp.as_deref() {
            return Some(format!("data_loaded_at > '{ts}'"));
        }
        if let Some(date) = ctx.state.last_issue_date.as_deref() {
            return Some(format!("issue_date > '{date}'"));
        }
        None
    }

    fn stream(&self, ctx: &FetchContext, where_clause: Option<String>) -> PermitStream {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_BUFFER);
        let connector = self.clone();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move {
            connector
                .fetch_into(&ctx, where_clause.as_deref(), &tx)
                .await
        });
        (rx, handle)
    }

    async fn fetch_into(
        &self,
        ctx: &FetchContext,
        where_clause: Option<&str>,
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
            let url = self.page_url(page_limit, offset, where_clause);

            self.limiter.acquire().await;
            log::info!("{}: offset={offset}, limit={page_limit}", ctx.source_name);

            let body = retry::send_json(|| {
                let mut request = self.client.get(&url);
                if let Some(token) = &self.app_token {
                    request = request.header("X-App-Token", token);
                }
                request
            })
            .await?;

            let records = body.as_array().ok_or_else(|| ConnectorError::Portal {
                message: "expected a JSON array response".to_string(),
            })?;

            if records.is_empty() {
                break;
            }

            let fetched_at = Utc::now();
            for record in records {
                let result = self.normalize_record(ctx, record, &url, fetched_at);
                total += 1;
                if tx.send(result).await.is_err() {
                    // Consumer hung up; the run is over.
                    return Ok(total);
                }
                if total >= ctx.max_rows {
                    break;
                }
            }

            let count = records.len() as u64;
            offset += count;
            if count < page_limit {
                break;
            }
        }

        log::info!("{}: fetch complete — {total} records", ctx.source_name);
        Ok(total)
    }

    fn normalize_record(
        &self,
        ctx: &FetchContext,
        record: &serde_json::Value,
        url: &str,
        fetched_at: DateTime<Utc>,
    ) -> crate::RecordResult {
        if !record.is_object() {
            return Err(ConnectorError::Row {
                message: "record is not a JSON object".to_string(),
            });
        }

        let mut fields_map: BTreeMap<String, String> = BTreeMap::new();

        let (raw_address, mut lat, mut lon) = extract_address(record, &mut fields_map);

        let mut track = |name: &str, field: &str| {
            fields_map.insert(name.to_string(), field.to_string());
        };

        let source_record_id = probe_string(record, RECORD_ID_FIELDS).map_or_else(
            || uuid::Uuid::new_v4().to_string(),
            |(field, value)| {
                track("source_record_id", field);
                value
            },
        );

        let permit_type = probe_string(record, PERMIT_TYPE_FIELDS).map(|(field, value)| {
            track("permit_type", field);
            value
        });
        let work_description = probe_string(record, WORK_DESC_FIELDS).map(|(field, value)| {
            track("work_description", field);
            value
        });
        let permit_status = probe_string(record, STATUS_FIELDS).map(|(field, value)| {
            track("permit_status", field);
            value
        });
        let issue_date = probe_date(record, ISSUE_DATE_FIELDS).map(|(field, value)| {
            track("issue_date", field);
            value
        });
        let parcel_id = probe_string(record, PARCEL_FIELDS).map(|(field, value)| {
            track("parcel_id", field);
            value
        });
        let owner_name = probe_string(record, OWNER_FIELDS).map(|(field, value)| {
            track("owner_name", field);
            value
        });
        let contractor_name = probe_string(record, CONTRACTOR_FIELDS).map(|(field, value)| {
            track("contractor_name", field);
            value
        });
        let permit_value = probe_f64(record, VALUE_FIELDS).map(|(field, value)| {
            track("permit_value", field);
            value
        });

        // Coordinates may also live at the top level.
        if lat.is_none() {
            lat = probe_f64(record, LAT_FIELDS).map(|(field, value)| {
                track("lat", field);
                value
            });
        }
        if lon.is_none() {
            lon = probe_f64(record, LON_FIELDS).map(|(field, value)| {
                track("lon", field);
                value
            });
        }

        let provenance = Provenance {
            platform: SourcePlatform::JsonDataset.to_string(),
            url: url.to_string(),
            fetched_at,
            fields_map,
            checksum: None,
            max_record_id: None,
        };

        Ok(normalize::build_permit(
            ctx.source_id,
            &ctx.source_name,
            SourcePlatform::JsonDataset,
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
                geom_json: None,
            },
            self.default_state.as_deref(),
            provenance,
        ))
    }
}

/// Extracts the raw address string and any embedded coordinates.
///
/// Handles all three shapes portals send: a plain string, an object with a
/// `human_address` sub-field (itself possibly JSON-encoded), and a string
/// that is itself JSON.
fn extract_address(
    record: &serde_json::Value,
    fields_map: &mut BTreeMap<String, String>,
) -> (Option<String>, Option<f64>, Option<f64>) {
    for field in ADDRESS_FIELDS {
        let Some(value) = record.get(*field) else {
            continue;
        };
        let (raw, lat, lon) = address_from_value(value);
        if raw.is_some() || lat.is_some() {
            fields_map.insert("raw_address".to_string(), (*field).to_string());
            return (raw, lat, lon);
        }
    }
    (None, None, None)
}

fn address_from_value(value: &serde_json::Value) -> (Option<String>, Option<f64>, Option<f64>) {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return (None, None, None);
            }
            // A string of JSON is unwrapped and handled as an object.
            if trimmed.starts_with('{')
                && let Ok(inner) = serde_json::from_str::<serde_json::Value>(trimmed)
                && inner.is_object()
            {
                return address_from_value(&inner);
            }
            (Some(trimmed.to_string()), None, None)
        }
        serde_json::Value::Object(obj) => {
            let lat = obj.get("latitude").and_then(value_to_f64);
            let lon = obj.get("longitude").and_then(value_to_f64);

            let raw = obj.get("human_address").map_or_else(
                || compose_address(value),
                |human| match human {
                    serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                        .ok()
                        .and_then(|inner| compose_address(&inner))
                        .or_else(|| Some(s.trim().to_string()).filter(|s| !s.is_empty())),
                    other => compose_address(other),
                },
            );

            (raw, lat, lon)
        }
        _ => (None, None, None),
    }
}

/// Rebuilds a one-line address from a Socrata `human_address` object
/// (`{"address": ..., "city": ..., "state": ..., "zip": ...}`).
fn compose_address(obj: &serde_json::Value) -> Option<String> {
    let street = obj.get("address").and_then(serde_json::Value::as_str);
    let city = obj.get("city").and_then(serde_json::Value::as_str);
    let state = obj.get("state").and_then(serde_json::Value::as_str);
    let zip = obj.get("zip").and_then(serde_json::Value::as_str);

    let mut parts: Vec<String> = Vec::new();
    if let Some(s) = street.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(s.to_string());
    }
    if let Some(c) = city.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(c.to_string());
    }
    let tail = match (
        state.map(str::trim).filter(|s| !s.is_empty()),
        zip.map(str::trim).filter(|s| !s.is_empty()),
    ) {
        (Some(st), Some(z)) => Some(format!("{st} {z}")),
        (Some(st), None) => Some(st.to_string()),
        (None, Some(z)) => Some(z.to_string()),
        (None, None) => None,
    };
    if let Some(t) = tail {
        parts.push(t);
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

#[async_trait]
impl PermitConnector for JsonDatasetConnector {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::JsonDataset
    }

    async fn validate(&self) -> Result<(), ConnectorError> {
        let url = self.page_url(1, 0, None);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Config {
                message: format!("endpoint unreachable: {e}"),
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Config {
                message: format!("endpoint probe returned HTTP {}", response.status()),
            })
        }
    }

    fn backfill(&self, ctx: &FetchContext) -> PermitStream {
        self.stream(ctx, None)
    }

    fn incremental(&self, ctx: &FetchContext) -> PermitStream {
        let where_clause = Self::incremental_where(ctx);
        self.stream(ctx, where_clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use permit_map_source_models::ConnectorState;

    fn connector() -> JsonDatasetConnector {
        JsonDatasetConnector::from_config(
            &ConnectorConfig {
                endpoint_url: "https://data.sacgov.org/".to_string(),
                options: serde_json::json!({"dataset_id": "abcd-1234"}),
            },
            60,
        )
        .unwrap()
    }

    fn ctx() -> FetchContext {
        FetchContext {
            source_id: 1,
            source_name: "Sacramento".to_string(),
            state: ConnectorState::default(),
            max_rows: 1000,
        }
    }

    #[test]
    fn builds_page_url_with_where_clause() {
        let url = connector().page_url(1000, 2000, Some("issue_date > '2024-01-01'"));
        assert_eq!(
            url,
            "https://data.sacgov.org/resource/abcd-1234.json?$limit=1000&$offset=2000&$where=issue_date > '2024-01-01'"
        );
    }

    #[test]
    fn incremental_prefers_timestamp_cursor() {
        let mut c = ctx();
        c.state.last_max_timestamp = Some("2024-06-01T00:00:00".to_string());
        c.state.last_issue_date = Some("2024-05-01".to_string());
        assert_eq!(
            JsonDatasetConnector::incremental_where(&c).unwrap(),
            "data_loaded_at > '2024-06-01T00:00:00'"
        );
    }

    #[test]
    fn incremental_falls_back_to_issue_date() {
        let mut c = ctx();
        c.state.last_issue_date = Some("2024-05-01".to_string());
        assert_eq!(
            JsonDatasetConnector::incremental_where(&c).unwrap(),
            "issue_date > '2024-05-01'"
        );
        assert_eq!(JsonDatasetConnector::incremental_where(&ctx()), None);
    }

    #[test]
    fn normalizes_a_typical_row() {
        let record = serde_json::json!({
            "id": "PER-2024-001",
            "permit_type": "Re-Roof",
            "description": "Tear off and reroof",
            "issue_date": "2024-10-15T00:00:00.000",
            "address": "700 H Street, Sacramento, CA 95814",
            "valuation": "15000.50",
        });
        let permit = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert_eq!(permit.source_record_id, "PER-2024-001");
        assert_eq!(permit.permit_type.as_deref(), Some("Re-Roof"));
        assert_eq!(permit.issue_date.as_deref(), Some("2024-10-15"));
        assert_eq!(permit.address_parsed.city.as_deref(), Some("Sacramento"));
        assert!((permit.permit_value.unwrap() - 15000.50).abs() < f64::EPSILON);
        assert!(permit.is_roofing);
        assert_eq!(permit.provenance.platform, "JSON_DATASET");
        assert_eq!(
            permit.provenance.fields_map.get("permit_type").unwrap(),
            "permit_type"
        );
    }

    #[test]
    fn address_object_with_embedded_coordinates() {
        let record = serde_json::json!({
            "id": "1",
            "location": {
                "human_address": "{\"address\": \"700 H Street\", \"city\": \"Sacramento\", \"state\": \"CA\", \"zip\": \"95814\"}",
                "latitude": "38.5790",
                "longitude": "-121.4944"
            }
        });
        let permit = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert_eq!(
            permit.raw_address.as_deref(),
            Some("700 H Street, Sacramento, CA 95814")
        );
        assert!((permit.lat.unwrap() - 38.5790).abs() < 1e-9);
        assert!((permit.lon.unwrap() - -121.4944).abs() < 1e-9);
    }

    #[test]
    fn address_as_json_string() {
        let record = serde_json::json!({
            "id": "1",
            "address": "{\"address\": \"1 Main St\", \"city\": \"Davis\"}"
        });
        let permit = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert_eq!(permit.raw_address.as_deref(), Some("1 Main St, Davis"));
    }

    #[test]
    fn top_level_coordinates_are_probed() {
        let record = serde_json::json!({
            "id": "1",
            "address": "700 H Street",
            "latitude": "38.5790",
            "longitude": "-121.4944"
        });
        let permit = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert!((permit.lat.unwrap() - 38.5790).abs() < 1e-9);
        assert!((permit.lon.unwrap() - -121.4944).abs() < 1e-9);
    }

    #[test]
    fn malformed_value_becomes_absent() {
        let record = serde_json::json!({
            "id": "1",
            "valuation": "a lot of money"
        });
        let permit = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert_eq!(permit.permit_value, None);
    }

    #[test]
    fn missing_id_gets_random_record_id() {
        let record = serde_json::json!({"permit_type": "Fence"});
        let a = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        let b = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .unwrap();
        assert!(!a.source_record_id.is_empty());
        assert_ne!(a.source_record_id, b.source_record_id);
        // Dedup still works: identical content fingerprints are equal.
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn non_object_row_is_a_row_error() {
        let record = serde_json::json!("not an object");
        let err = connector()
            .normalize_record(&ctx(), &record, "https://u", Utc::now())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Row { .. }));
    }
}
