//! Continuous ingestion sweep.
//!
//! Started once at server startup, the sweep visits every enabled source in
//! registration order and backfills it in a tight batch loop until the
//! source is exhausted, then sleeps five minutes and starts over. Every
//! sleep is a plain `tokio::time::sleep`, so shutdown cancellation is
//! prompt at any point.

use std::sync::Arc;
use std::time::Duration;

use permit_map_database::queries;
use permit_map_source_models::SourceRecord;
use switchy_database::Database;

use crate::geocode::Geocoder;
use crate::{IngestError, IngestMode, run_ingestion};

/// Delay between successful batches within one source.
const BATCH_DELAY: Duration = Duration::from_secs(1);

/// Pause before retrying a source after a failed batch.
const FAILURE_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Sleep between full sweep passes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Pause after a top-level sweep failure.
const SWEEP_FAILURE_DELAY: Duration = Duration::from_secs(60);

/// Consecutive all-duplicate batches that mark a source exhausted.
const MAX_ZERO_SAVE_BATCHES: u32 = 3;

/// Updates the consecutive zero-save streak after a batch.
///
/// A "zero-save batch" is one where the portal still returned a full page
/// but nothing new was persisted — everything was already ingested.
pub(crate) const fn update_zero_save_streak(
    streak: u32,
    permits_added: i64,
    rows_fetched: i64,
    max_rows: i64,
) -> u32 {
    if permits_added == 0 && rows_fetched >= max_rows {
        streak + 1
    } else {
        0
    }
}

/// The tri-state exhaustion rule: a source is done when the portal returned
/// a short page, or enough consecutive full pages saved nothing new.
pub(crate) const fn source_exhausted(
    rows_fetched: i64,
    max_rows: i64,
    zero_save_streak: u32,
) -> bool {
    rows_fetched < max_rows || zero_save_streak >= MAX_ZERO_SAVE_BATCHES
}

/// Runs the sweep forever. Spawn exactly once from server startup.
pub async fn run_sweep_loop(db: Arc<dyn Database>, geocoder: Option<Arc<Geocoder>>) {
    log::info!("Continuous ingestion sweep started");
    loop {
        match sweep_once(db.as_ref(), geocoder.as_deref()).await {
            Ok(visited) => {
                log::info!("Sweep pass complete ({visited} source(s)); sleeping 5 minutes");
                tokio::time::sleep(SWEEP_INTERVAL).await;
            }
            Err(e) => {
                log::error!("Sweep pass failed: {e}; retrying in 60s");
                tokio::time::sleep(SWEEP_FAILURE_DELAY).await;
            }
        }
    }
}

/// One full pass over all enabled sources, in registration order.
async fn sweep_once(
    db: &dyn Database,
    geocoder: Option<&Geocoder>,
) -> Result<usize, IngestError> {
    let sources: Vec<SourceRecord> = queries::get_sources(db)
        .await?
        .into_iter()
        .filter(|s| s.enabled)
        .collect();

    for source in &sources {
        sweep_source(db, geocoder, source).await;
    }

    Ok(sources.len())
}

/// Backfills one source until the exhaustion rule fires. Batch failures
/// pause 30 seconds and retry the same source without advancing.
async fn sweep_source(db: &dyn Database, geocoder: Option<&Geocoder>, source: &SourceRecord) {
    let max_rows = source.max_rows_per_run.max(1);
    let mut zero_save_streak = 0u32;

    loop {
        let batch = run_sweep_batch(db, geocoder, source).await;

        let (permits_added, rows_fetched) = match batch {
            Ok(counts) => counts,
            Err(e) => {
                log::error!("{}: sweep batch failed: {e}; retrying in 30s", source.name);
                tokio::time::sleep(FAILURE_RETRY_DELAY).await;
                continue;
            }
        };

        zero_save_streak =
            update_zero_save_streak(zero_save_streak, permits_added, rows_fetched, max_rows);

        if source_exhausted(rows_fetched, max_rows, zero_save_streak) {
            log::info!(
                "{}: exhausted (fetched {rows_fetched}/{max_rows}, zero-save streak {zero_save_streak})",
                source.name
            );
            break;
        }

        tokio::time::sleep(BATCH_DELAY).await;
    }
}

/// Runs one backfill batch and measures its effect: the permit-count delta
/// around the run and the row count the portal actually returned.
async fn run_sweep_batch(
    db: &dyn Database,
    geocoder: Option<&Geocoder>,
    source: &SourceRecord,
) -> Result<(i64, i64), IngestError> {
    let before = queries::get_source_permit_count(db, source.id).await?;
    run_ingestion(db, geocoder, source.id, IngestMode::Backfill).await?;
    let after = queries::get_source_permit_count(db, source.id).await?;

    let rows_fetched = queries::get_source_state(db, source.id)
        .await?
        .map_or(0, |state| state.rows_fetched);

    Ok((after - before, rows_fetched))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_page_means_exhausted() {
        assert!(source_exhausted(500, 1000, 0));
        assert!(source_exhausted(0, 1000, 0));
    }

    #[test]
    fn full_page_with_new_rows_keeps_going() {
        assert!(!source_exhausted(1000, 1000, 0));
        assert!(!source_exhausted(1000, 1000, 2));
    }

    #[test]
    fn three_zero_save_batches_mean_exhausted() {
        assert!(source_exhausted(1000, 1000, 3));
        assert!(source_exhausted(1000, 1000, 4));
    }

    #[test]
    fn streak_counts_only_full_duplicate_batches() {
        // Full page, nothing saved: streak grows.
        assert_eq!(update_zero_save_streak(0, 0, 1000, 1000), 1);
        assert_eq!(update_zero_save_streak(1, 0, 1000, 1000), 2);
        // New rows reset the streak.
        assert_eq!(update_zero_save_streak(2, 5, 1000, 1000), 0);
        // Short page with nothing saved is not a zero-save batch (the
        // short-page arm of the rule handles it).
        assert_eq!(update_zero_save_streak(2, 0, 400, 1000), 0);
    }

    #[test]
    fn exhaustion_scenario_three_full_batches_then_short() {
        // 2500 records at max_rows=1000: 1000, 1000, 500, 0.
        let max_rows = 1000;
        let batches = [(1000, 1000), (1000, 1000), (500, 500), (0, 0)];
        let mut streak = 0;
        let mut stopped_at = None;
        for (i, (added, fetched)) in batches.into_iter().enumerate() {
            streak = update_zero_save_streak(streak, added, fetched, max_rows);
            if source_exhausted(fetched, max_rows, streak) {
                stopped_at = Some(i);
                break;
            }
        }
        // The third batch (index 2) is already short, so the sweep stops
        // there; a standalone fourth invocation would also stop.
        assert_eq!(stopped_at, Some(2));
    }
}
