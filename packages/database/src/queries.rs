//! The storage adapter: every query the orchestrator and API depend on.
//!
//! Non-trivial filters are assembled dynamically with positional `$n`
//! parameters. Permit rows are deduplicated exclusively by the unique
//! `fingerprint` index — `upsert_permit` merges on conflict, overwriting
//! stored fields only with non-null new values.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use permit_map_database_models::{MAX_PERMIT_QUERY_LIMIT, PermitQuery, PermitRow, PermitStats};
use permit_map_permit_models::{
    NormalizedPermit, ParsedAddress, Provenance, SourcePlatform,
};
use permit_map_source_models::{
    NewSource, SourcePatch, SourceRecord, SourceStatePatch, SourceStateRecord,
};
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

fn opt_string(value: Option<&str>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, |s| DatabaseValue::String(s.to_string()))
}

fn opt_i64(value: Option<i64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Int64)
}

fn opt_f64(value: Option<f64>) -> DatabaseValue {
    value.map_or(DatabaseValue::Null, DatabaseValue::Real64)
}

// ── Sources ──────────────────────────────────────────────────────────────

fn row_to_source(row: &Row) -> Result<SourceRecord, DbError> {
    let platform_str: String = row.to_value("platform").unwrap_or_default();
    let platform = platform_str
        .parse::<SourcePlatform>()
        .unwrap_or(SourcePlatform::Other);

    let config_str: String = row.to_value("config").unwrap_or_default();
    let config = serde_json::from_str(&config_str)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

    let created_at: NaiveDateTime = row.to_value("created_at").unwrap_or_default();
    let updated_at: NaiveDateTime = row.to_value("updated_at").unwrap_or_default();

    Ok(SourceRecord {
        id: row.to_value("id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse source id: {e}"),
        })?,
        name: row.to_value("name").unwrap_or_default(),
        platform,
        endpoint_url: row.to_value("endpoint_url").unwrap_or_default(),
        config,
        enabled: row.to_value("enabled").unwrap_or(false),
        max_rows_per_run: row.to_value("max_rows_per_run").unwrap_or(1000),
        max_runtime_minutes: row.to_value("max_runtime_minutes").unwrap_or(10),
        max_requests_per_minute: row.to_value("max_requests_per_minute").unwrap_or(60),
        created_at: utc(created_at),
        updated_at: utc(updated_at),
    })
}

/// Returns all registered sources in registration order.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_sources(db: &dyn Database) -> Result<Vec<SourceRecord>, DbError> {
    let rows = db
        .query_raw_params("SELECT * FROM sources ORDER BY id", &[])
        .await?;
    rows.iter().map(row_to_source).collect()
}

/// Returns a single source by id.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_source(db: &dyn Database, id: i32) -> Result<Option<SourceRecord>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT * FROM sources WHERE id = $1",
            &[DatabaseValue::Int32(id)],
        )
        .await?;
    rows.first().map(row_to_source).transpose()
}

/// Registers a new source and returns it.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn create_source(db: &dyn Database, source: &NewSource) -> Result<SourceRecord, DbError> {
    let config_str = source.config.to_string();
    let rows = db
        .query_raw_params(
            "INSERT INTO sources (
                name, platform, endpoint_url, config, enabled,
                max_rows_per_run, max_runtime_minutes, max_requests_per_minute
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *",
            &[
                DatabaseValue::String(source.name.clone()),
                DatabaseValue::String(source.platform.to_string()),
                DatabaseValue::String(source.endpoint_url.clone()),
                DatabaseValue::String(config_str),
                DatabaseValue::Bool(source.enabled),
                DatabaseValue::Int64(source.max_rows_per_run),
                DatabaseValue::Int64(source.max_runtime_minutes),
                DatabaseValue::Int64(source.max_requests_per_minute),
            ],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "Insert returned no source row".to_string(),
    })?;
    row_to_source(row)
}

/// Applies a partial update; absent patch fields keep their stored value.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn update_source(
    db: &dyn Database,
    id: i32,
    patch: &SourcePatch,
) -> Result<Option<SourceRecord>, DbError> {
    let config_str = patch.config.as_ref().map(std::string::ToString::to_string);
    let rows = db
        .query_raw_params(
            "UPDATE sources SET
                name = COALESCE($2, name),
                endpoint_url = COALESCE($3, endpoint_url),
                config = COALESCE($4, config),
                enabled = COALESCE($5, enabled),
                max_rows_per_run = COALESCE($6, max_rows_per_run),
                max_runtime_minutes = COALESCE($7, max_runtime_minutes),
                max_requests_per_minute = COALESCE($8, max_requests_per_minute),
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
            &[
                DatabaseValue::Int32(id),
                opt_string(patch.name.as_deref()),
                opt_string(patch.endpoint_url.as_deref()),
                opt_string(config_str.as_deref()),
                patch.enabled.map_or(DatabaseValue::Null, DatabaseValue::Bool),
                opt_i64(patch.max_rows_per_run),
                opt_i64(patch.max_runtime_minutes),
                opt_i64(patch.max_requests_per_minute),
            ],
        )
        .await?;
    rows.first().map(row_to_source).transpose()
}

// ── Source state ─────────────────────────────────────────────────────────

fn row_to_state(row: &Row) -> Result<SourceStateRecord, DbError> {
    let last_sync_at: Option<NaiveDateTime> = row.to_value("last_sync_at").unwrap_or(None);
    let updated_at: NaiveDateTime = row.to_value("updated_at").unwrap_or_default();

    Ok(SourceStateRecord {
        source_id: row.to_value("source_id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse state source_id: {e}"),
        })?,
        last_max_timestamp: row.to_value("last_max_timestamp").unwrap_or(None),
        last_max_record_id: row.to_value("last_max_record_id").unwrap_or(None),
        last_issue_date: row.to_value("last_issue_date").unwrap_or(None),
        etag: row.to_value("etag").unwrap_or(None),
        checksum: row.to_value("checksum").unwrap_or(None),
        rows_fetched: row.to_value("rows_fetched").unwrap_or(0),
        rows_upserted: row.to_value("rows_upserted").unwrap_or(0),
        errors: row.to_value("errors").unwrap_or(0),
        freshness_seconds: row.to_value("freshness_seconds").unwrap_or(None),
        last_sync_at: last_sync_at.map(utc),
        is_running: row.to_value("is_running").unwrap_or(false),
        status_message: row.to_value("status_message").unwrap_or(None),
        current_page: row.to_value("current_page").unwrap_or(0),
        updated_at: utc(updated_at),
    })
}

/// Returns the state row for a source, if one exists.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_source_state(
    db: &dyn Database,
    source_id: i32,
) -> Result<Option<SourceStateRecord>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT * FROM source_state WHERE source_id = $1",
            &[DatabaseValue::Int32(source_id)],
        )
        .await?;
    rows.first().map(row_to_state).transpose()
}

/// Returns every state row (for progress UIs).
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_all_source_states(db: &dyn Database) -> Result<Vec<SourceStateRecord>, DbError> {
    let rows = db
        .query_raw_params("SELECT * FROM source_state ORDER BY source_id", &[])
        .await?;
    rows.iter().map(row_to_state).collect()
}

/// Inserts the state row if none exists for the source, else patch-merges
/// the present fields into the existing row and bumps `updated_at`.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn upsert_source_state(
    db: &dyn Database,
    patch: &SourceStatePatch,
) -> Result<(), DbError> {
    let last_sync_at = patch
        .last_sync_at
        .map_or(DatabaseValue::Null, |dt| DatabaseValue::DateTime(dt.naive_utc()));

    db.exec_raw_params(
        "INSERT INTO source_state (
            source_id, last_max_timestamp, last_max_record_id, last_issue_date,
            etag, checksum, rows_fetched, rows_upserted, errors,
            freshness_seconds, last_sync_at, is_running, status_message,
            current_page, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6,
            COALESCE($7, 0), COALESCE($8, 0), COALESCE($9, 0),
            $10, $11, COALESCE($12, FALSE), $13, COALESCE($14, 0), NOW()
        )
        ON CONFLICT (source_id) DO UPDATE SET
            last_max_timestamp = COALESCE(EXCLUDED.last_max_timestamp, source_state.last_max_timestamp),
            last_max_record_id = COALESCE(EXCLUDED.last_max_record_id, source_state.last_max_record_id),
            last_issue_date = COALESCE(EXCLUDED.last_issue_date, source_state.last_issue_date),
            etag = COALESCE(EXCLUDED.etag, source_state.etag),
            checksum = COALESCE(EXCLUDED.checksum, source_state.checksum),
            rows_fetched = COALESCE($7, source_state.rows_fetched),
            rows_upserted = COALESCE($8, source_state.rows_upserted),
            errors = COALESCE($9, source_state.errors),
            freshness_seconds = COALESCE(EXCLUDED.freshness_seconds, source_state.freshness_seconds),
            last_sync_at = COALESCE(EXCLUDED.last_sync_at, source_state.last_sync_at),
            is_running = COALESCE($12, source_state.is_running),
            status_message = COALESCE(EXCLUDED.status_message, source_state.status_message),
            current_page = COALESCE($14, source_state.current_page),
            updated_at = NOW()",
        &[
            DatabaseValue::Int32(patch.source_id),
            opt_string(patch.last_max_timestamp.as_deref()),
            opt_i64(patch.last_max_record_id),
            opt_string(patch.last_issue_date.as_deref()),
            opt_string(patch.etag.as_deref()),
            opt_string(patch.checksum.as_deref()),
            opt_i64(patch.rows_fetched),
            opt_i64(patch.rows_upserted),
            opt_i64(patch.errors),
            opt_i64(patch.freshness_seconds),
            last_sync_at,
            patch.is_running.map_or(DatabaseValue::Null, DatabaseValue::Bool),
            opt_string(patch.status_message.as_deref()),
            patch
                .current_page
                .map_or(DatabaseValue::Null, DatabaseValue::Int32),
        ],
    )
    .await?;

    Ok(())
}

// ── Permits ──────────────────────────────────────────────────────────────

fn row_to_permit(row: &Row) -> Result<PermitRow, DbError> {
    let platform_str: String = row.to_value("platform").unwrap_or_default();
    let platform = platform_str
        .parse::<SourcePlatform>()
        .unwrap_or(SourcePlatform::Other);

    let address_str: String = row.to_value("address_parsed").unwrap_or_default();
    let address_parsed: ParsedAddress = serde_json::from_str(&address_str).unwrap_or_default();

    let provenance_str: String = row.to_value("provenance").unwrap_or_default();
    let provenance: Provenance =
        serde_json::from_str(&provenance_str).map_err(|e| DbError::Conversion {
            message: format!("Failed to parse permit provenance: {e}"),
        })?;

    let geom_str: Option<String> = row.to_value("geom_json").unwrap_or(None);
    let geom_json = geom_str.and_then(|s| serde_json::from_str(&s).ok());

    let created_at: NaiveDateTime = row.to_value("created_at").unwrap_or_default();

    Ok(PermitRow {
        id: row.to_value("id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse permit id: {e}"),
        })?,
        source_id: row.to_value("source_id").unwrap_or(0),
        source_name: row.to_value("source_name").unwrap_or_default(),
        platform,
        source_record_id: row.to_value("source_record_id").unwrap_or_default(),
        permit_type: row.to_value("permit_type").unwrap_or(None),
        work_description: row.to_value("work_description").unwrap_or(None),
        permit_status: row.to_value("permit_status").unwrap_or(None),
        issue_date: row.to_value("issue_date").unwrap_or(None),
        raw_address: row.to_value("raw_address").unwrap_or(None),
        address_parsed,
        parcel_id: row.to_value("parcel_id").unwrap_or(None),
        owner_name: row.to_value("owner_name").unwrap_or(None),
        contractor_name: row.to_value("contractor_name").unwrap_or(None),
        permit_value: row.to_value("permit_value").unwrap_or(None),
        lat: row.to_value("lat").unwrap_or(None),
        lon: row.to_value("lon").unwrap_or(None),
        geom_json,
        fingerprint: row.to_value("fingerprint").unwrap_or_default(),
        is_roofing: row.to_value("is_roofing").unwrap_or(false),
        provenance,
        raw_ref: row.to_value("raw_ref").unwrap_or(None),
        created_at: utc(created_at),
    })
}

/// Returns a single permit by its opaque id.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_permit(db: &dyn Database, id: &str) -> Result<Option<PermitRow>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT * FROM permits WHERE id = $1",
            &[DatabaseValue::String(id.to_string())],
        )
        .await?;
    rows.first().map(row_to_permit).transpose()
}

/// Returns the permit with the given fingerprint, if any.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_permit_by_fingerprint(
    db: &dyn Database,
    fingerprint: &str,
) -> Result<Option<PermitRow>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT * FROM permits WHERE fingerprint = $1",
            &[DatabaseValue::String(fingerprint.to_string())],
        )
        .await?;
    rows.first().map(row_to_permit).transpose()
}

/// Inserts a permit, or — when a permit with the same fingerprint already
/// exists — merges into it, overwriting stored fields only with non-null
/// new values. Returns the permit's opaque id.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails or the permit's
/// JSON payloads cannot be serialized.
pub async fn upsert_permit(db: &dyn Database, permit: &NormalizedPermit) -> Result<String, DbError> {
    let address_str =
        serde_json::to_string(&permit.address_parsed).map_err(|e| DbError::Conversion {
            message: format!("Failed to serialize address: {e}"),
        })?;
    let provenance_str =
        serde_json::to_string(&permit.provenance).map_err(|e| DbError::Conversion {
            message: format!("Failed to serialize provenance: {e}"),
        })?;
    let geom_str = permit.geom_json.as_ref().map(std::string::ToString::to_string);

    let rows = db
        .query_raw_params(
            "INSERT INTO permits (
                id, source_id, source_name, platform, source_record_id,
                permit_type, work_description, permit_status, issue_date,
                raw_address, address_parsed, parcel_id, owner_name,
                contractor_name, permit_value, lat, lon, geom_json,
                fingerprint, is_roofing, provenance, raw_ref
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            ON CONFLICT (fingerprint) DO UPDATE SET
                source_id = EXCLUDED.source_id,
                source_name = EXCLUDED.source_name,
                platform = EXCLUDED.platform,
                source_record_id = EXCLUDED.source_record_id,
                permit_type = COALESCE(EXCLUDED.permit_type, permits.permit_type),
                work_description = COALESCE(EXCLUDED.work_description, permits.work_description),
                permit_status = COALESCE(EXCLUDED.permit_status, permits.permit_status),
                issue_date = COALESCE(EXCLUDED.issue_date, permits.issue_date),
                raw_address = COALESCE(EXCLUDED.raw_address, permits.raw_address),
                address_parsed = EXCLUDED.address_parsed,
                parcel_id = COALESCE(EXCLUDED.parcel_id, permits.parcel_id),
                owner_name = COALESCE(EXCLUDED.owner_name, permits.owner_name),
                contractor_name = COALESCE(EXCLUDED.contractor_name, permits.contractor_name),
                permit_value = COALESCE(EXCLUDED.permit_value, permits.permit_value),
                lat = COALESCE(EXCLUDED.lat, permits.lat),
                lon = COALESCE(EXCLUDED.lon, permits.lon),
                geom_json = COALESCE(EXCLUDED.geom_json, permits.geom_json),
                is_roofing = EXCLUDED.is_roofing,
                provenance = EXCLUDED.provenance,
                raw_ref = COALESCE(EXCLUDED.raw_ref, permits.raw_ref)
            RETURNING id",
            &[
                DatabaseValue::String(uuid::Uuid::new_v4().to_string()),
                DatabaseValue::Int32(permit.source_id),
                DatabaseValue::String(permit.source_name.clone()),
                DatabaseValue::String(permit.platform.to_string()),
                DatabaseValue::String(permit.source_record_id.clone()),
                opt_string(permit.permit_type.as_deref()),
                opt_string(permit.work_description.as_deref()),
                opt_string(permit.permit_status.as_deref()),
                opt_string(permit.issue_date.as_deref()),
                opt_string(permit.raw_address.as_deref()),
                DatabaseValue::String(address_str),
                opt_string(permit.parcel_id.as_deref()),
                opt_string(permit.owner_name.as_deref()),
                opt_string(permit.contractor_name.as_deref()),
                opt_f64(permit.permit_value),
                opt_f64(permit.lat),
                opt_f64(permit.lon),
                opt_string(geom_str.as_deref()),
                DatabaseValue::String(permit.fingerprint.clone()),
                DatabaseValue::Bool(permit.is_roofing),
                DatabaseValue::String(provenance_str),
                opt_string(permit.raw_ref.as_deref()),
            ],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "Permit upsert returned no id".to_string(),
    })?;
    row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse upserted permit id: {e}"),
    })
}

/// Builds the WHERE clause and parameters shared by the listing and count
/// queries. Returns `(conditions, params)`.
fn permit_filters(query: &PermitQuery) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params: Vec<DatabaseValue> = Vec::new();
    let mut idx = 1u32;

    if let Some(bbox) = &query.bbox {
        write!(
            sql,
            " AND lat BETWEEN ${} AND ${} AND lon BETWEEN ${} AND ${}",
            idx,
            idx + 1,
            idx + 2,
            idx + 3,
        )
        .unwrap();
        params.push(DatabaseValue::Real64(bbox.south));
        params.push(DatabaseValue::Real64(bbox.north));
        params.push(DatabaseValue::Real64(bbox.west));
        params.push(DatabaseValue::Real64(bbox.east));
        idx += 4;
    }

    if let Some(city) = &query.city {
        write!(
            sql,
            " AND (address_parsed::json->>'city') ILIKE '%' || ${idx} || '%'"
        )
        .unwrap();
        params.push(DatabaseValue::String(city.clone()));
        idx += 1;
    }

    if let Some(state) = &query.state {
        write!(
            sql,
            " AND (address_parsed::json->>'state') ILIKE '%' || ${idx} || '%'"
        )
        .unwrap();
        params.push(DatabaseValue::String(state.clone()));
        idx += 1;
    }

    if let Some(permit_type) = &query.permit_type {
        write!(sql, " AND permit_type ILIKE '%' || ${idx} || '%'").unwrap();
        params.push(DatabaseValue::String(permit_type.clone()));
        idx += 1;
    }

    if let Some(from) = &query.date_from {
        write!(sql, " AND issue_date >= ${idx}").unwrap();
        params.push(DatabaseValue::String(from.clone()));
        idx += 1;
    }

    if let Some(to) = &query.date_to {
        write!(sql, " AND issue_date <= ${idx}").unwrap();
        params.push(DatabaseValue::String(to.clone()));
        idx += 1;
    }

    if query.roofing_only {
        sql.push_str(" AND is_roofing = TRUE");
    }

    let _ = idx;
    (sql, params)
}

/// Queries permits with the given filters. Returns the matching page and
/// the total count across all pages.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_permits(
    db: &dyn Database,
    query: &PermitQuery,
) -> Result<(Vec<PermitRow>, u64), DbError> {
    let (filters, params) = permit_filters(query);

    let count_sql = format!("SELECT COUNT(*) AS cnt FROM permits{filters}");
    let count_rows = db.query_raw_params(&count_sql, &params).await?;
    let total: i64 = count_rows
        .first()
        .and_then(|row| row.to_value("cnt").ok())
        .unwrap_or(0);

    let limit = query.limit.clamp(1, MAX_PERMIT_QUERY_LIMIT);
    let mut list_sql = format!("SELECT * FROM permits{filters} ORDER BY created_at DESC");
    let mut list_params = params;
    write!(list_sql, " LIMIT ${}", list_params.len() + 1).unwrap();
    list_params.push(DatabaseValue::Int64(i64::from(limit)));
    write!(list_sql, " OFFSET ${}", list_params.len() + 1).unwrap();
    list_params.push(DatabaseValue::Int64(i64::from(query.offset)));

    let rows = db.query_raw_params(&list_sql, &list_params).await?;
    let permits = rows
        .iter()
        .map(row_to_permit)
        .collect::<Result<Vec<_>, _>>()?;

    #[allow(clippy::cast_sign_loss)]
    Ok((permits, total.max(0) as u64))
}

/// Aggregate permit counts: total, with coordinates, flagged roofing.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_permit_stats(db: &dyn Database) -> Result<PermitStats, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE lat IS NOT NULL AND lon IS NOT NULL) AS with_coordinates,
                    COUNT(*) FILTER (WHERE is_roofing) AS roofing
             FROM permits",
            &[],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(PermitStats::default());
    };

    Ok(PermitStats {
        total: row.to_value("total").unwrap_or(0),
        with_coordinates: row.to_value("with_coordinates").unwrap_or(0),
        roofing: row.to_value("roofing").unwrap_or(0),
    })
}

/// Number of permits stored for a source.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_source_permit_count(db: &dyn Database, source_id: i32) -> Result<i64, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS cnt FROM permits WHERE source_id = $1",
            &[DatabaseValue::Int32(source_id)],
        )
        .await?;
    Ok(rows
        .first()
        .and_then(|row| row.to_value("cnt").ok())
        .unwrap_or(0))
}

/// The maximum `source_record_id` for a source, cast to integer before
/// taking the max — a lexicographic sort would mis-order `"999"` against
/// `"1000"`. Records with non-integer identifiers are skipped.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_max_source_record_id(
    db: &dyn Database,
    source_id: i32,
) -> Result<Option<i64>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT MAX(CAST(source_record_id AS BIGINT)) AS max_id
             FROM permits
             WHERE source_id = $1 AND source_record_id ~ '^[0-9]+$'",
            &[DatabaseValue::Int32(source_id)],
        )
        .await?;
    Ok(rows
        .first()
        .and_then(|row| row.to_value("max_id").ok())
        .unwrap_or(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use permit_map_database_models::BoundingBox;

    #[test]
    fn permit_filters_empty_query_is_unfiltered() {
        let (sql, params) = permit_filters(&PermitQuery::default());
        assert_eq!(sql, " WHERE 1=1");
        assert!(params.is_empty());
    }

    #[test]
    fn permit_filters_bbox_uses_closed_intervals() {
        let query = PermitQuery {
            bbox: Some(BoundingBox::new(-122.0, 38.0, -121.0, 39.0)),
            ..PermitQuery::default()
        };
        let (sql, params) = permit_filters(&query);
        assert!(sql.contains("lat BETWEEN $1 AND $2"));
        assert!(sql.contains("lon BETWEEN $3 AND $4"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn permit_filters_combine_in_order() {
        let query = PermitQuery {
            city: Some("Sacramento".to_string()),
            permit_type: Some("roof".to_string()),
            date_from: Some("2024-01-01".to_string()),
            roofing_only: true,
            ..PermitQuery::default()
        };
        let (sql, params) = permit_filters(&query);
        assert!(sql.contains("->>'city') ILIKE '%' || $1 || '%'"));
        assert!(sql.contains("permit_type ILIKE '%' || $2 || '%'"));
        assert!(sql.contains("issue_date >= $3"));
        assert!(sql.contains("is_roofing = TRUE"));
        assert_eq!(params.len(), 3);
    }
}
