//! alertad — neighborhood alert server.
//!
//! WebSocket fan-out (identify → room binding → broadcast) plus the REST
//! alarm-activation endpoint, backed by Postgres.

mod alarm;
mod config;
mod db;
mod dispatch;
mod error;
mod registry;
mod rooms;
mod state;
mod types;
mod ws;

use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    // Load .env if present (local dev).
    let _ = dotenvy::dotenv();

    let config = config::Config::from_env();

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(true)
        .init();

    info!("alertad starting");
    info!(listen = %config.listen_addr);

    // ── Postgres ────────────────────────────────────────────
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to Postgres");

    // Run migration.
    info!("running migrations");
    sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
        .execute(&pool)
        .await
        .unwrap_or_else(|e| {
            // Migration may fail if tables exist — that's fine on restart.
            info!("migration note (may already exist): {e}");
            Default::default()
        });

    info!("database ready");

    // ── Shared state ────────────────────────────────────────
    let state = state::AppState::new(pool, config.clone());

    // ── Routes ──────────────────────────────────────────────
    let app = Router::new()
        // WebSocket endpoint.
        .route("/ws", get(ws::ws_handler))
        // Alarm activation (REST trigger for the fan-out).
        .route("/api/alarmas/activar", post(alarm::activar_alarma_handler))
        // Health check.
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // ── Bind & serve ────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");

    info!(addr = %config.listen_addr, "alertad listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}
