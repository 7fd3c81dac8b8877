use std::{path::Path, str::FromStr};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::info;

/// Open (creating if needed) the database file and bring the schema up to date.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.to_string_lossy()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let database = SqlitePoolOptions::new().connect_with(options).await?;
    migrate(&database).await?;
    info!("database ready at {}", path.display());
    Ok(database)
}

pub async fn migrate(database: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(database).await?;
    Ok(())
}

/// Single-connection in-memory database, every connection to `:memory:` is a new database.
pub async fn connect_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let database = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&database).await?;
    Ok(database)
}
