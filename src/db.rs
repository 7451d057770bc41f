use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::{Config, StorageKind};

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    match (config.storage.kind, &config.storage.db_path) {
        (StorageKind::Sqlite, Some(db_path)) => {
            // Ensure parent directory exists
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let options =
                SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;
            Ok(pool)
        }
        (StorageKind::Sqlite, None) => anyhow::bail!("storage.db_path is not set"),
        (StorageKind::Inmemory, _) => connect_memory().await,
    }
}

/// A private in-memory database. Each connection would see its own
/// database, so the pool holds exactly one that never expires.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}
