//! HTTP trigger for the installations sync.
//!
//! The scheduler (or an operator) calls `POST /api/sync-installations`; the
//! body is always `{message, error?}`, with per-sector summaries on success.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::errors::SyncError;
use crate::sync::service::{SectorReport, SyncService};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: Arc<SyncService>,
}

pub type SharedState = Arc<AppState>;

/// Configuration for the trigger server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
    /// Run the sync on this period in-process as well. `None` disables.
    pub interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            cors_permissive: false,
            interval: None,
        }
    }
}

// ── Response body ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sectors: Vec<SectorReport>,
}

// ── Error handling ────────────────────────────────────────────────────

pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SyncError::AlreadyRunning => StatusCode::CONFLICT,
            SyncError::Credential(_) | SyncError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = SyncResponse {
            message: "Installations sync failed".to_string(),
            error: Some(self.0.to_string()),
            sectors: Vec::new(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/api/sync-installations",
            get(trigger_sync).post(trigger_sync),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn trigger_sync(State(state): State<SharedState>) -> Result<Json<SyncResponse>, ApiError> {
    let report = state.service.try_run_all().await.map_err(|e| {
        error!(error = %e, "installations sync aborted");
        ApiError::from(e)
    })?;
    Ok(Json(SyncResponse {
        message: report.summary(),
        error: None,
        sectors: report.sectors,
    }))
}

/// Run the sync every `period` until the process stops. Overlapping ticks
/// are skipped.
pub fn spawn_schedule(service: Arc<SyncService>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match service.try_run_all().await {
                Ok(report) => info!(summary = %report.summary(), "scheduled sync done"),
                Err(SyncError::AlreadyRunning) => warn!("previous sync still running, tick skipped"),
                Err(e) => error!(error = %e, "scheduled sync failed"),
            }
        }
    })
}

/// Start the trigger server.
pub async fn start_server(config: ServerConfig, service: Arc<SyncService>) -> Result<()> {
    let schedule = config
        .interval
        .map(|period| spawn_schedule(service.clone(), period));

    let state = Arc::new(AppState { service });
    let mut app = build_router(state);
    if config.cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %listener.local_addr()?, "installsync trigger listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = schedule {
        handle.abort();
    }
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
