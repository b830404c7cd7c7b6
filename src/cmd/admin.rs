//! Database commands: `installsync init-db` and `installsync add-user`.

use std::str::FromStr;

use anyhow::{Context, Result};
use installsync::config::SyncConfig;
use installsync::store::SqliteStore;
use installsync::sync::model::Role;

pub fn cmd_init_db(config: &SyncConfig) -> Result<()> {
    SqliteStore::open(&config.store.db_path)?;
    println!(
        "Portal database initialized at {}",
        config.store.db_path.display()
    );
    Ok(())
}

pub async fn cmd_add_user(
    config: &SyncConfig,
    email: &str,
    role: &str,
    refresh_token: Option<&str>,
) -> Result<()> {
    let role = Role::from_str(role).map_err(anyhow::Error::msg)?;
    let store = SqliteStore::open(&config.store.db_path)?;

    let email = email.to_string();
    let token = refresh_token.map(str::to_string);
    let id = store
        .handle()
        .call(move |db| db.upsert_user(&email, role, token.as_deref()))
        .await
        .context("Failed to save user")?;

    println!("User {} saved as {}", id, role.as_str());
    Ok(())
}
