//! Opening the queue database
//!
//! Connection pragmas are set through `SqliteConnectOptions` so they apply
//! to every pooled connection, not just the first one.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_POOL_SIZE: u32 = 5;

/// Open the database at `db_path`, creating file and parent directories on
/// first use, and migrate it to the current schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let existed = db_path.exists();

    // WAL: readers see the last committed queue while a shift is in progress
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(FILE_POOL_SIZE)
        .connect_with(options)
        .await?;

    info!(
        "{} queue database at {}",
        if existed { "Opened" } else { "Created" },
        db_path.display()
    );

    crate::db::migrations::run_migrations(&pool).await?;
    Ok(pool)
}

/// Open a private, fully migrated in-memory database
///
/// Each in-memory connection is a separate database, so the pool holds
/// exactly one connection for its whole life.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    crate::db::migrations::run_migrations(&pool).await?;
    Ok(pool)
}
