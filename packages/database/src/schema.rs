//! Idempotent schema bootstrap.
//!
//! Creates the three core tables (`sources`, `source_state`, `permits`),
//! the geocode cache, and the indexes the query surface relies on. Every
//! statement is `IF NOT EXISTS`, so the bootstrap is safe to run on every
//! startup.

use switchy_database::Database;

use crate::DbError;

/// DDL statements executed in order at startup.
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sources (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        platform TEXT NOT NULL DEFAULT 'OTHER',
        endpoint_url TEXT NOT NULL,
        config TEXT NOT NULL DEFAULT '{}',
        enabled BOOLEAN NOT NULL DEFAULT TRUE,
        max_rows_per_run BIGINT NOT NULL DEFAULT 1000,
        max_runtime_minutes BIGINT NOT NULL DEFAULT 10,
        max_requests_per_minute BIGINT NOT NULL DEFAULT 60,
        created_at TIMESTAMP NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS source_state (
        source_id INTEGER PRIMARY KEY,
        last_max_timestamp TEXT,
        last_max_record_id BIGINT,
        last_issue_date TEXT,
        etag TEXT,
        checksum TEXT,
        rows_fetched BIGINT NOT NULL DEFAULT 0,
        rows_upserted BIGINT NOT NULL DEFAULT 0,
        errors BIGINT NOT NULL DEFAULT 0,
        freshness_seconds BIGINT,
        last_sync_at TIMESTAMP,
        is_running BOOLEAN NOT NULL DEFAULT FALSE,
        status_message TEXT,
        current_page INTEGER NOT NULL DEFAULT 0,
        updated_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS permits (
        id TEXT PRIMARY KEY,
        source_id INTEGER NOT NULL,
        source_name TEXT NOT NULL,
        platform TEXT NOT NULL,
        source_record_id TEXT NOT NULL,
        permit_type TEXT,
        work_description TEXT,
        permit_status TEXT,
        issue_date TEXT,
        raw_address TEXT,
        address_parsed TEXT NOT NULL DEFAULT '{}',
        parcel_id TEXT,
        owner_name TEXT,
        contractor_name TEXT,
        permit_value DOUBLE PRECISION,
        lat DOUBLE PRECISION,
        lon DOUBLE PRECISION,
        geom_json TEXT,
        fingerprint TEXT NOT NULL,
        is_roofing BOOLEAN NOT NULL DEFAULT FALSE,
        provenance TEXT NOT NULL DEFAULT '{}',
        raw_ref TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_permits_fingerprint ON permits (fingerprint)",
    "CREATE INDEX IF NOT EXISTS idx_permits_lat_lon ON permits (lat, lon)
        WHERE lat IS NOT NULL AND lon IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_permits_issue_date ON permits (issue_date)",
    "CREATE INDEX IF NOT EXISTS idx_permits_is_roofing ON permits (is_roofing)
        WHERE is_roofing",
    "CREATE INDEX IF NOT EXISTS idx_permits_source_id ON permits (source_id)",
    "CREATE TABLE IF NOT EXISTS geocode_cache (
        address_key TEXT PRIMARY KEY,
        lat DOUBLE PRECISION,
        lon DOUBLE PRECISION,
        display_name TEXT,
        fetched_at TIMESTAMP NOT NULL DEFAULT NOW()
    )",
];

/// Creates all tables and indexes that do not exist yet.
///
/// # Errors
///
/// Returns [`DbError`] if any DDL statement fails.
pub async fn ensure_schema(db: &dyn Database) -> Result<(), DbError> {
    for statement in SCHEMA_STATEMENTS {
        db.exec_raw(statement).await?;
    }
    log::info!("Database schema ready");
    Ok(())
}
