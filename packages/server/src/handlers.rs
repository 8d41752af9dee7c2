//! HTTP handler functions for the permit map API.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use permit_map_database::queries;
use permit_map_database_models::{BoundingBox, PermitQuery};
use permit_map_ingest::{IngestMode, run_deep_ingestion, run_ingestion};
use permit_map_server_models::{ApiHealth, IngestParams, PermitListResponse, PermitQueryParams};
use permit_map_source_models::{NewSource, SourcePatch};

use crate::AppState;

/// `GET /api/health`
///
/// Liveness probe; reflects database reachability.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.db.query_raw_params("SELECT 1 AS ok", &[]).await {
        Ok(_) => HttpResponse::Ok().json(ApiHealth {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        Err(e) => {
            log::error!("Health check failed: {e}");
            HttpResponse::InternalServerError().json(ApiHealth {
                healthy: false,
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }
    }
}

/// `GET /api/sources`
pub async fn sources(state: web::Data<AppState>) -> HttpResponse {
    match queries::get_sources(state.db.as_ref()).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            log::error!("Failed to query sources: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query sources"
            }))
        }
    }
}

/// `POST /api/sources`
///
/// Registers a new source.
pub async fn create_source(
    state: web::Data<AppState>,
    payload: web::Json<NewSource>,
) -> HttpResponse {
    let payload = payload.into_inner();
    match queries::create_source(state.db.as_ref(), &payload).await {
        Ok(source) => HttpResponse::Created().json(source),
        Err(e) => {
            log::error!("Failed to create source: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to create source"
            }))
        }
    }
}

/// `PATCH /api/sources/{id}`
///
/// Partial update; operators change `enabled` and the budgets here.
pub async fn update_source(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    payload: web::Json<SourcePatch>,
) -> HttpResponse {
    let id = path.into_inner();
    let payload = payload.into_inner();
    match queries::update_source(state.db.as_ref(), id, &payload).await {
        Ok(Some(source)) => HttpResponse::Ok().json(source),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Source {id} not found")
        })),
        Err(e) => {
            log::error!("Failed to update source {id}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to update source"
            }))
        }
    }
}

/// `GET /api/sources/state`
///
/// All per-source progress rows, for operator UIs.
pub async fn source_states(state: web::Data<AppState>) -> HttpResponse {
    match queries::get_all_source_states(state.db.as_ref()).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => {
            log::error!("Failed to query source state: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query source state"
            }))
        }
    }
}

/// `POST /api/sources/{id}/ingest?mode=backfill|incremental|deep`
///
/// Kicks off a background ingestion task and returns 202 immediately.
pub async fn trigger_ingest(
    state: web::Data<AppState>,
    path: web::Path<i32>,
    params: web::Query<IngestParams>,
) -> HttpResponse {
    let source_id = path.into_inner();
    let mode = params.mode.as_deref().unwrap_or("backfill").to_string();

    let parsed_mode = match mode.as_str() {
        "backfill" | "deep" => IngestMode::Backfill,
        "incremental" => IngestMode::Incremental,
        other => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("Unknown ingest mode '{other}'")
            }));
        }
    };

    let db = Arc::clone(&state.db);
    let geocoder = state.geocoder.clone();
    let deep = mode == "deep";

    tokio::spawn(async move {
        let result = if deep {
            run_deep_ingestion(db.as_ref(), geocoder.as_deref(), source_id).await
        } else {
            run_ingestion(db.as_ref(), geocoder.as_deref(), source_id, parsed_mode).await
        };
        match result {
            Ok(summary) => log::info!(
                "Triggered ingestion for source {source_id} finished: {} saved, {} errors",
                summary.rows_upserted,
                summary.errors
            ),
            Err(e) => log::error!("Triggered ingestion for source {source_id} failed: {e}"),
        }
    });

    HttpResponse::Accepted().json(serde_json::json!({
        "status": "accepted",
        "sourceId": source_id,
        "mode": mode,
    }))
}

/// `GET /api/permits`
///
/// Filtered listing ordered by insertion time, newest first.
pub async fn permits(
    state: web::Data<AppState>,
    params: web::Query<PermitQueryParams>,
) -> HttpResponse {
    let query = PermitQuery {
        bbox: params.bbox.as_deref().and_then(parse_bbox),
        city: params.city.clone(),
        state: params.state.clone(),
        permit_type: params.permit_type.clone(),
        date_from: params.date_from.clone(),
        date_to: params.date_to.clone(),
        roofing_only: params.roofing_only.unwrap_or(false),
        limit: params.limit.unwrap_or(100),
        offset: params.offset.unwrap_or(0),
    };

    match queries::get_permits(state.db.as_ref(), &query).await {
        Ok((permits, total)) => {
            HttpResponse::Ok().json(PermitListResponse { permits, total })
        }
        Err(e) => {
            log::error!("Failed to query permits: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query permits"
            }))
        }
    }
}

/// `GET /api/permits/stats`
pub async fn permit_stats(state: web::Data<AppState>) -> HttpResponse {
    match queries::get_permit_stats(state.db.as_ref()).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            log::error!("Failed to query permit stats: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query permit stats"
            }))
        }
    }
}

/// `GET /api/permits/{id}`
pub async fn permit(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();
    match queries::get_permit(state.db.as_ref(), &id).await {
        Ok(Some(row)) => HttpResponse::Ok().json(row),
        Ok(None) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Permit {id} not found")
        })),
        Err(e) => {
            log::error!("Failed to query permit {id}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query permit"
            }))
        }
    }
}

/// Parses a `west,south,east,north` bounding box parameter.
fn parse_bbox(s: &str) -> Option<BoundingBox> {
    let parts: Vec<f64> = s
        .split(',')
        .map(str::trim)
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() == 4 {
        Some(BoundingBox::new(parts[0], parts[1], parts[2], parts[3]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bbox() {
        let bbox = parse_bbox("-122.0,38.0,-121.0,39.0").unwrap();
        assert!((bbox.west - -122.0).abs() < f64::EPSILON);
        assert!((bbox.south - 38.0).abs() < f64::EPSILON);
        assert!((bbox.east - -121.0).abs() < f64::EPSILON);
        assert!((bbox.north - 39.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_malformed_bbox() {
        assert!(parse_bbox("").is_none());
        assert!(parse_bbox("1,2,3").is_none());
        assert!(parse_bbox("a,b,c,d").is_none());
    }
}
