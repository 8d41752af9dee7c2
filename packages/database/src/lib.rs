#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database connection, schema bootstrap, and the storage adapter surface.
//!
//! Uses `switchy_database` for Postgres access; all queries go through
//! `query_raw_params()` / `exec_raw_params()` with positional parameters.
//! The schema is bootstrapped with idempotent DDL at startup.

pub mod db;
pub mod geocode_cache;
pub mod queries;
pub mod schema;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
