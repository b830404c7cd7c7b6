//! Sync commands: `installsync serve` and `installsync sync`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use installsync::config::SyncConfig;
use installsync::server::{ServerConfig, SyncResponse, start_server};
use installsync::sheets::GoogleSheetsClient;
use installsync::store::SqliteStore;
use installsync::sync::SyncService;
use tracing::warn;

/// Wire the store, the Sheets client and the sector table from config.
fn build_service(config: &SyncConfig) -> Result<SyncService> {
    for warning in config.validate() {
        warn!("{}", warning);
    }

    let store = SqliteStore::open(&config.store.db_path).with_context(|| {
        format!(
            "Failed to open portal database at {}",
            config.store.db_path.display()
        )
    })?;

    let sheets = GoogleSheetsClient::new(
        config.google.client_id.clone().unwrap_or_default(),
        config.google.client_secret.clone().unwrap_or_default(),
        Duration::from_secs(config.google.timeout_secs),
    )?
    .with_endpoints(&config.google.token_url, &config.google.sheets_base_url);

    Ok(
        SyncService::new(Arc::new(store), Arc::new(sheets), config.sectors.to_sources())
            .with_batch_limit(config.sync.batch_limit),
    )
}

/// Longest accepted schedule period: one year.
const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// In-process schedule period. Zero minutes disables it.
fn schedule_interval(minutes: u64) -> Result<Option<Duration>> {
    if minutes == 0 {
        return Ok(None);
    }
    let secs = minutes
        .checked_mul(60)
        .filter(|_| minutes <= MAX_INTERVAL_MINUTES)
        .with_context(|| format!("Sync interval of {} minutes is too large", minutes))?;
    Ok(Some(Duration::from_secs(secs)))
}

pub async fn cmd_serve(config: SyncConfig, port: Option<u16>, every: Option<u64>) -> Result<()> {
    let interval = schedule_interval(every.unwrap_or(config.sync.interval_minutes))?;
    let service = Arc::new(build_service(&config)?);

    start_server(
        ServerConfig {
            host: config.server.host.clone(),
            port: port.unwrap_or(config.server.port),
            cors_permissive: config.server.cors_permissive,
            interval,
        },
        service,
    )
    .await
}

/// Run once and print the trigger body. Returns `false` on a fatal failure.
pub async fn cmd_sync(mut config: SyncConfig, batch_limit: Option<usize>) -> Result<bool> {
    if let Some(limit) = batch_limit {
        config.sync.batch_limit = limit;
    }
    let service = build_service(&config)?;

    let (body, ok) = match service.run_all().await {
        Ok(report) => (
            SyncResponse {
                message: report.summary(),
                error: None,
                sectors: report.sectors,
            },
            true,
        ),
        Err(e) => (
            SyncResponse {
                message: "Installations sync failed".to_string(),
                error: Some(e.to_string()),
                sectors: Vec::new(),
            },
            false,
        ),
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(ok)
}
