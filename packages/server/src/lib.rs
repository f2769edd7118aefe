#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for roadwatch.
//!
//! Serves the REST API a map client uses to submit safety reports and to
//! fetch the alerts around a point or along a route. Accepted reports are
//! appended to a JSON-lines file and reloaded on startup, and a background
//! task sweeps expired reports once a minute.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use roadwatch_engine::ReportEngine;
use roadwatch_engine::broadcast::LogBroadcaster;
use roadwatch_engine::persistence::JsonLinesPersistence;
use roadwatch_engine::scheduler::SweepScheduler;

/// Persistence file used when `ROADWATCH_DATA` is unset.
pub const DEFAULT_DATA_PATH: &str = "data/reports.jsonl";

/// Shared application state.
pub struct AppState {
    /// The report cache and its collaborators.
    pub engine: Arc<ReportEngine>,
}

/// Registers the `/api` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health))
            .route("/kinds", web::get().to(handlers::kinds))
            .route("/reports", web::post().to(handlers::submit_report))
            .route("/reports/nearby", web::get().to(handlers::nearby))
            .route("/reports/route", web::post().to(handlers::route))
            .route("/reports/{id}", web::get().to(handlers::get_report)),
    );
}

/// Starts the roadwatch API server.
///
/// Loads still-active reports from the persistence file, starts the sweep
/// scheduler, and runs the Actix-Web HTTP server until it is stopped. This
/// is a regular async function; the caller provides the async runtime (e.g.
/// via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let data_path = std::env::var("ROADWATCH_DATA")
        .map_or_else(|_| PathBuf::from(DEFAULT_DATA_PATH), PathBuf::from);

    log::info!("Opening report store at {}...", data_path.display());
    let persistence = Arc::new(JsonLinesPersistence::spawn(data_path));

    let engine = Arc::new(
        ReportEngine::new()
            .with_persistence(persistence.clone())
            .with_broadcaster(Arc::new(LogBroadcaster)),
    );

    if let Err(e) = engine.seed_from(persistence.as_ref()) {
        log::error!("Failed to load persisted reports, starting empty: {e}");
    }

    log::info!("Starting sweep scheduler...");
    let scheduler = SweepScheduler::new(engine.clone()).spawn();

    let state = web::Data::new(AppState { engine });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await;

    log::info!("Server stopped, flushing reports...");
    scheduler.shutdown().await;
    persistence.flush().await;

    result
}
