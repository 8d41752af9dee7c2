#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion orchestrator.
//!
//! Resolves per-source cursor state from both the state table and the
//! database-derived maximum record id, runs the source's connector,
//! persists records as they stream, and keeps the per-source progress row
//! current. [`run_deep_ingestion`] repeats backfills until a source stops
//! producing full batches; the continuous [`sweep`] drives every enabled
//! source the same way in the background.

pub mod geocode;
pub mod sweep;

use std::time::{Duration, Instant};

use chrono::Utc;
use permit_map_database::{DbError, queries};
use permit_map_permit_models::SourcePlatform;
use permit_map_source_models::{
    ConnectorConfig, ConnectorState, SourceRecord, SourceStatePatch,
};
use permit_map_source::{ConnectorError, FetchContext, build_connector};
use switchy_database::Database;

use crate::geocode::Geocoder;

/// Pause between deep-ingestion rounds, to be polite to upstream.
const DEEP_ROUND_DELAY: Duration = Duration::from_secs(1);

/// How often the in-flight status message is refreshed, in records.
const STATUS_REFRESH_EVERY: u64 = 10;

/// Errors from orchestrator operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Storage operation failed.
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// Connector construction or fetch failed.
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// No source registered under the given id.
    #[error("Source {source_id} not found")]
    SourceNotFound {
        /// The id that was requested.
        source_id: i32,
    },
}

/// Which ingestion mode to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Start from the portal's earliest record (or the persisted cursor).
    Backfill,
    /// Restrict to records newer than the persisted cursors.
    Incremental,
}

/// Counters from one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records the connector yielded (including unparseable rows).
    pub rows_fetched: u64,
    /// Records successfully upserted.
    pub rows_upserted: u64,
    /// Per-record failures (parse or upsert).
    pub errors: u64,
}

/// Resolves the cursor snapshot for a run: the state-table cursors merged
/// with the database-derived maximum record id (feature-service only).
async fn resolve_connector_state(
    db: &dyn Database,
    source: &SourceRecord,
) -> Result<ConnectorState, DbError> {
    let prev = queries::get_source_state(db, source.id).await?;

    let db_max_record_id = if source.platform == SourcePlatform::FeatureService {
        queries::get_max_source_record_id(db, source.id).await?
    } else {
        None
    };

    Ok(prev.map_or_else(
        || ConnectorState {
            db_max_record_id,
            ..ConnectorState::default()
        },
        |state| ConnectorState {
            last_max_timestamp: state.last_max_timestamp,
            last_max_record_id: state.last_max_record_id,
            last_issue_date: state.last_issue_date,
            db_max_record_id,
        },
    ))
}

/// Runs one ingestion pass for a source.
///
/// Streams records from the connector, upserts each as it arrives, keeps
/// the progress row current, and writes the final cursors and counters.
/// Per-record failures are counted and skipped; a connector-level failure
/// marks the state row and is returned to the caller.
///
/// # Errors
///
/// Returns [`IngestError`] if the source is unknown, the connector cannot
/// be built, the stream fails fatally, or state writes fail.
#[allow(clippy::too_many_lines)]
pub async fn run_ingestion(
    db: &dyn Database,
    geocoder: Option<&Geocoder>,
    source_id: i32,
    mode: IngestMode,
) -> Result<RunSummary, IngestError> {
    let start = Instant::now();

    let source = queries::get_source(db, source_id)
        .await?
        .ok_or(IngestError::SourceNotFound { source_id })?;
    let state = resolve_connector_state(db, &source).await?;

    let prior_record_cursor = state.last_max_record_id;
    let prior_issue_cursor = state.last_issue_date.clone();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let connector = build_connector(
        source.platform,
        &ConnectorConfig::from_source(&source),
        source.max_requests_per_minute.clamp(1, i64::from(u32::MAX)) as u32,
    )?;

    let mode_label = match mode {
        IngestMode::Backfill => "backfill",
        IngestMode::Incremental => "incremental",
    };
    log::info!("Starting {mode_label} for {} ({source_id})", source.name);

    queries::upsert_source_state(
        db,
        &SourceStatePatch {
            source_id,
            is_running: Some(true),
            status_message: Some(format!("Starting {mode_label}...")),
            current_page: Some(0),
            ..SourceStatePatch::default()
        },
    )
    .await?;

    #[allow(clippy::cast_sign_loss)]
    let max_rows = if source.max_rows_per_run > 0 {
        source.max_rows_per_run as u64
    } else {
        1000
    };
    let runtime_budget = Duration::from_secs(
        u64::try_from(source.max_runtime_minutes.max(1)).unwrap_or(10) * 60,
    );

    let ctx = FetchContext {
        source_id,
        source_name: source.name.clone(),
        state,
        max_rows,
    };

    let (mut rx, handle) = match mode {
        IngestMode::Backfill => connector.backfill(&ctx),
        IngestMode::Incremental => connector.incremental(&ctx),
    };

    let mut summary = RunSummary::default();
    let mut max_issue_date: Option<String> = None;
    let mut max_record_id: Option<i64> = None;

    while let Some(result) = rx.recv().await {
        summary.rows_fetched += 1;

        match result {
            Ok(mut permit) => {
                if let Some(geocoder) = geocoder
                    && permit.lat.is_none()
                    && let Some(address) = permit.raw_address.clone()
                {
                    if let Some((lat, lon)) = geocoder.geocode(db, &address).await {
                        permit.lat = Some(lat);
                        permit.lon = Some(lon);
                    }
                }

                if let Some(batch_max) = permit.provenance.max_record_id {
                    max_record_id = Some(max_record_id.map_or(batch_max, |m| m.max(batch_max)));
                }
                if let Some(issue_date) = permit.issue_date.clone() {
                    max_issue_date = Some(max_issue_date.map_or(issue_date.clone(), |m| {
                        if issue_date > m { issue_date } else { m }
                    }));
                }

                match queries::upsert_permit(db, &permit).await {
                    Ok(_) => summary.rows_upserted += 1,
                    Err(e) => {
                        summary.errors += 1;
                        log::error!(
                            "{}: failed to upsert record {}: {e}",
                            source.name,
                            permit.source_record_id
                        );
                    }
                }
            }
            Err(e) => {
                summary.errors += 1;
                log::warn!("{}: skipping unparseable row: {e}", source.name);
            }
        }

        if summary.rows_fetched % STATUS_REFRESH_EVERY == 0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let progress = SourceStatePatch {
                source_id,
                status_message: Some(format!(
                    "Running {mode_label}: {} fetched, {} saved, {} errors",
                    summary.rows_fetched, summary.rows_upserted, summary.errors
                )),
                current_page: Some((summary.rows_fetched / permit_map_source::PAGE_SIZE) as i32 + 1),
                ..SourceStatePatch::default()
            };
            if let Err(e) = queries::upsert_source_state(db, &progress).await {
                log::warn!("{}: failed to refresh progress: {e}", source.name);
            }
        }

        if start.elapsed() >= runtime_budget {
            log::warn!(
                "{}: runtime budget of {} minute(s) exhausted, stopping run",
                source.name,
                source.max_runtime_minutes
            );
            break;
        }
    }

    // Stop the producer before collecting its result.
    drop(rx);
    let fetch_result = match handle.await {
        Ok(result) => result,
        Err(join_err) => Err(ConnectorError::Portal {
            message: format!("fetch task aborted: {join_err}"),
        }),
    };

    if let Err(e) = fetch_result {
        let failure = SourceStatePatch {
            source_id,
            is_running: Some(false),
            status_message: Some(format!("✗ Failed: {e}")),
            rows_fetched: i64::try_from(summary.rows_fetched).ok(),
            rows_upserted: i64::try_from(summary.rows_upserted).ok(),
            errors: i64::try_from(summary.errors).ok(),
            ..SourceStatePatch::default()
        };
        if let Err(write_err) = queries::upsert_source_state(db, &failure).await {
            log::error!("{}: failed to record failure state: {write_err}", source.name);
        }
        return Err(e.into());
    }

    // The portal modification timestamp has no per-run observation on any
    // current platform and is carried forward unchanged.
    let new_record_cursor = advance_record_cursor(prior_record_cursor, max_record_id);
    let new_issue_cursor = advance_issue_cursor(prior_issue_cursor, max_issue_date);

    let elapsed = start.elapsed();
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let final_patch = SourceStatePatch {
        source_id,
        last_max_record_id: new_record_cursor,
        last_issue_date: new_issue_cursor,
        rows_fetched: i64::try_from(summary.rows_fetched).ok(),
        rows_upserted: i64::try_from(summary.rows_upserted).ok(),
        errors: i64::try_from(summary.errors).ok(),
        freshness_seconds: i64::try_from(elapsed.as_secs()).ok(),
        last_sync_at: Some(Utc::now()),
        is_running: Some(false),
        status_message: Some(format!(
            "✓ Complete: {} saved, {} errors ({} fetched)",
            summary.rows_upserted, summary.errors, summary.rows_fetched
        )),
        current_page: Some((summary.rows_fetched / permit_map_source::PAGE_SIZE) as i32),
        ..SourceStatePatch::default()
    };
    queries::upsert_source_state(db, &final_patch).await?;

    log::info!(
        "{}: {mode_label} complete — {} fetched, {} saved, {} errors in {:.1}s",
        source.name,
        summary.rows_fetched,
        summary.rows_upserted,
        summary.errors,
        elapsed.as_secs_f64()
    );

    Ok(summary)
}

/// Cursors advance monotonically; ties and regressions keep the prior
/// value. `None` leaves the stored cursor untouched (the state upsert
/// patch-merges).
const fn advance_record_cursor(prior: Option<i64>, observed: Option<i64>) -> Option<i64> {
    match (prior, observed) {
        (Some(p), Some(o)) => Some(if o > p { o } else { p }),
        (_, Some(o)) => Some(o),
        (_, None) => None,
    }
}

/// String cursors (`YYYY-MM-DD`) compare lexicographically, which matches
/// chronological order for this shape.
fn advance_issue_cursor(prior: Option<String>, observed: Option<String>) -> Option<String> {
    match (prior, observed) {
        (Some(p), Some(o)) => Some(if o > p { o } else { p }),
        (_, observed @ Some(_)) => observed,
        (_, None) => None,
    }
}

/// Repeats backfill runs until one writes strictly fewer new permits than
/// the source's per-run row budget, sleeping one second between rounds.
///
/// # Errors
///
/// Returns [`IngestError`] if any round fails.
pub async fn run_deep_ingestion(
    db: &dyn Database,
    geocoder: Option<&Geocoder>,
    source_id: i32,
) -> Result<RunSummary, IngestError> {
    let source = queries::get_source(db, source_id)
        .await?
        .ok_or(IngestError::SourceNotFound { source_id })?;
    #[allow(clippy::cast_sign_loss)]
    let max_rows = if source.max_rows_per_run > 0 {
        source.max_rows_per_run as u64
    } else {
        1000
    };

    let mut aggregate = RunSummary::default();
    loop {
        let round = run_ingestion(db, geocoder, source_id, IngestMode::Backfill).await?;
        aggregate.rows_fetched += round.rows_fetched;
        aggregate.rows_upserted += round.rows_upserted;
        aggregate.errors += round.errors;

        if round.rows_upserted < max_rows {
            break;
        }
        tokio::time::sleep(DEEP_ROUND_DELAY).await;
    }

    log::info!(
        "Deep ingestion complete for source {source_id}: {} saved total",
        aggregate.rows_upserted
    );
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_cursor_never_regresses() {
        assert_eq!(advance_record_cursor(Some(1000), Some(500)), Some(1000));
        assert_eq!(advance_record_cursor(Some(500), Some(1000)), Some(1000));
        assert_eq!(advance_record_cursor(Some(1000), Some(1000)), Some(1000));
        assert_eq!(advance_record_cursor(None, Some(42)), Some(42));
        assert_eq!(advance_record_cursor(Some(42), None), None);
        assert_eq!(advance_record_cursor(None, None), None);
    }

    #[test]
    fn issue_cursor_takes_lexicographic_max() {
        assert_eq!(
            advance_issue_cursor(Some("2024-05-01".to_string()), Some("2024-10-15".to_string())),
            Some("2024-10-15".to_string())
        );
        assert_eq!(
            advance_issue_cursor(Some("2024-10-15".to_string()), Some("2024-05-01".to_string())),
            Some("2024-10-15".to_string())
        );
        assert_eq!(
            advance_issue_cursor(None, Some("2024-01-01".to_string())),
            Some("2024-01-01".to_string())
        );
        assert_eq!(advance_issue_cursor(Some("2024-01-01".to_string()), None), None);
    }
}
