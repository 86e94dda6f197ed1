//! Schema migrations
//!
//! Each step runs in its own transaction together with the row recording
//! its version, so a crash leaves the database at a whole version. Steps
//! are append-only: a released step is never edited, a new one is added.

use crate::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

/// `(version, description)` of every step, in order
const MIGRATIONS: &[(i32, &str)] = &[(1, "create queue_entries")];

/// Highest version this build knows how to produce
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Version recorded in the database; 0 for a fresh file
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    ensure_version_table(pool).await?;

    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

/// Bring the schema up to [`CURRENT_SCHEMA_VERSION`]; safe on every open
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let found = get_schema_version(pool).await?;

    if found > CURRENT_SCHEMA_VERSION {
        warn!(
            "Queue database is at schema v{}, newer than this build (v{}); leaving it untouched",
            found, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    let pending: Vec<(i32, &str)> = MIGRATIONS
        .iter()
        .copied()
        .filter(|&(version, _)| version > found)
        .collect();
    if pending.is_empty() {
        debug!("Queue schema current at v{}", found);
        return Ok(());
    }

    for (version, description) in pending {
        let mut tx = pool.begin().await?;
        apply_step(version, &mut *tx).await?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied schema v{}: {}", version, description);
    }

    Ok(())
}

async fn apply_step(version: i32, conn: &mut SqliteConnection) -> Result<()> {
    match version {
        1 => create_queue_entries(conn).await,
        other => Err(Error::Schema(format!("no migration step for v{}", other))),
    }
}

async fn ensure_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

// The queue_index index is non-unique: a batch reindex passes through
// duplicate indices inside its transaction
async fn create_queue_entries(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            blob BLOB,
            queue_index INTEGER NOT NULL CHECK (queue_index >= 0),
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_entries_index ON queue_entries(queue_index)")
        .execute(&mut *conn)
        .await?;

    Ok(())
}
