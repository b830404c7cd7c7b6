//! Configuration for the installations sync.
//!
//! Settings are layered: `installsync.toml` → environment (a `.env` file is
//! loaded first) → CLI flags applied by the binary.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8787
//!
//! [store]
//! db_path = ".installsync/portal.db"
//!
//! [google]
//! client_id = "..."
//! client_secret = "..."
//! timeout_secs = 30
//!
//! [sync]
//! batch_limit = 490
//! interval_minutes = 0
//!
//! [sectors]
//! chr = "1AbC..."
//! haccp = "1DeF..."
//! tabac = "1GhI..."
//! kezia = "1JkL..."
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::sheets::{GOOGLE_TOKEN_URL, SHEETS_BASE_URL};
use crate::sync::model::Sector;
use crate::sync::reconcile::{DEFAULT_BATCH_LIMIT, STORE_BATCH_LIMIT};
use crate::sync::service::SectorSources;

pub const CONFIG_FILE_NAME: &str = "installsync.toml";

/// HTTP trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS, for calling the trigger from a local portal build.
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".installsync/portal.db")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// OAuth client used for the refresh-token exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleSection {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_sheets_base_url")]
    pub sheets_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_sheets_base_url() -> String {
    SHEETS_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for GoogleSection {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_url: default_token_url(),
            sheets_base_url: default_sheets_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    /// Max write ops committed per sector batch.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Minutes between scheduled runs while serving. 0 disables the schedule.
    #[serde(default)]
    pub interval_minutes: u64,
}

fn default_batch_limit() -> usize {
    DEFAULT_BATCH_LIMIT
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            interval_minutes: 0,
        }
    }
}

/// Spreadsheet id per sector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorsSection {
    #[serde(default)]
    pub chr: Option<String>,
    #[serde(default)]
    pub haccp: Option<String>,
    #[serde(default)]
    pub tabac: Option<String>,
    #[serde(default)]
    pub kezia: Option<String>,
}

impl SectorsSection {
    pub fn get(&self, sector: Sector) -> Option<&str> {
        let id = match sector {
            Sector::Chr => &self.chr,
            Sector::Haccp => &self.haccp,
            Sector::Tabac => &self.tabac,
            Sector::Kezia => &self.kezia,
        };
        id.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn slot(&mut self, sector: Sector) -> &mut Option<String> {
        match sector {
            Sector::Chr => &mut self.chr,
            Sector::Haccp => &mut self.haccp,
            Sector::Tabac => &mut self.tabac,
            Sector::Kezia => &mut self.kezia,
        }
    }

    pub fn to_sources(&self) -> SectorSources {
        Sector::ALL
            .into_iter()
            .fold(SectorSources::new(), |sources, sector| match self.get(sector) {
                Some(id) => sources.with(sector, id),
                None => sources,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write daily-rolling log files here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// The complete installsync.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub google: GoogleSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub sectors: SectorsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse installsync.toml")
    }

    /// Resolve the config file, apply environment overrides and return the
    /// result. An explicit path must exist; otherwise the working directory
    /// and then the platform config directory are searched, falling back to
    /// defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();

        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::discover() {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("installsync").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("INSTALLSYNC_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("INSTALLSYNC_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(id) = lookup("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(id);
        }
        if let Some(secret) = lookup("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(secret);
        }
        for sector in Sector::ALL {
            let key = format!("SHEET_ID_{}", sector.as_str().to_uppercase());
            if let Some(id) = lookup(&key) {
                *self.sectors.slot(sector) = Some(id);
            }
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize installsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.sync.batch_limit == 0 || self.sync.batch_limit > STORE_BATCH_LIMIT {
            warnings.push(format!(
                "Invalid batch_limit {}: must be between 1 and {}",
                self.sync.batch_limit, STORE_BATCH_LIMIT
            ));
        }

        for sector in Sector::ALL {
            if self.sectors.get(sector).is_none() {
                warnings.push(format!(
                    "No spreadsheet id for sector '{}': it will be skipped",
                    sector
                ));
            }
        }

        if self.google.client_id.is_none() || self.google.client_secret.is_none() {
            warnings.push(
                "Google client_id/client_secret not set: sheet fetches will fail".to_string(),
            );
        }

        warnings
    }
}
