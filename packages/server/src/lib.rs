#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the permit map application.
//!
//! Serves the REST surface the orchestrator and operator UIs depend on:
//! source registration and budgets, ingestion triggers, per-source progress
//! rows, and filtered permit listings. The continuous ingestion sweep is
//! spawned exactly once at startup.

mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use permit_map_database::{db, schema};
use permit_map_ingest::geocode::Geocoder;
use switchy_database::Database;

/// Shared application state.
pub struct AppState {
    /// Postgres connection shared by handlers and background tasks.
    pub db: Arc<dyn Database>,
    /// Shared geocoding pipeline; `None` when `GEOCODER_URL` is unset.
    pub geocoder: Option<Arc<Geocoder>>,
}

/// Starts the permit map API server and the background sweep.
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
///
/// # Panics
///
/// Panics if the database cannot be reached or the schema bootstrap fails.
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env()
        .await
        .expect("Failed to connect to database");

    log::info!("Bootstrapping schema...");
    schema::ensure_schema(db_conn.as_ref())
        .await
        .expect("Failed to bootstrap database schema");

    let db: Arc<dyn Database> = Arc::from(db_conn);

    let geocoder = Geocoder::from_env().map(Arc::new);
    if geocoder.is_none() {
        log::info!("GEOCODER_URL not set; geocoding disabled");
    }

    // One sweep for the whole process, never one per request.
    tokio::spawn(permit_map_ingest::sweep::run_sweep_loop(
        Arc::clone(&db),
        geocoder.clone(),
    ));

    let state = web::Data::new(AppState {
        db,
        geocoder,
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/sources", web::get().to(handlers::sources))
                    .route("/sources", web::post().to(handlers::create_source))
                    .route("/sources/state", web::get().to(handlers::source_states))
                    .route("/sources/{id}", web::patch().to(handlers::update_source))
                    .route(
                        "/sources/{id}/ingest",
                        web::post().to(handlers::trigger_ingest),
                    )
                    .route("/permits", web::get().to(handlers::permits))
                    .route("/permits/stats", web::get().to(handlers::permit_stats))
                    .route("/permits/{id}", web::get().to(handlers::permit)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
