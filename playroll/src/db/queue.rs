//! Ordered queue store
//!
//! Durable, ordered collection of queue entries keyed by an auto-assigned id
//! with a secondary `queue_index` position. Every operation touching more
//! than one row runs in a single transaction, so readers never observe two
//! entries sharing an index or a hole left by a half-applied shift.

use crate::error::{Error, Result};
use chrono::NaiveDateTime;
use playroll_common::db::QueueEntryRow;
use playroll_common::Metadata;
use serde_json::Value;
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use tracing::debug;

const ENTRY_COLUMNS: &str = "id, blob, queue_index, metadata, created_at, updated_at";

/// Queue entry with decoded metadata
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Store-assigned id, stable for the entry's lifetime
    pub id: i64,

    /// Raw media payload (None when the blob was never stored)
    pub blob: Option<Vec<u8>>,

    /// Position in the queue
    pub queue_index: i64,

    pub metadata: Metadata,

    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

impl QueueEntry {
    fn from_row(row: QueueEntryRow) -> Result<Self> {
        let metadata = Metadata::from_json(&row.metadata)?;

        Ok(Self {
            id: row.id,
            blob: row.blob,
            queue_index: row.queue_index,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    /// True when there is something to hand to the sink
    pub fn has_payload(&self) -> bool {
        self.blob.as_ref().is_some_and(|b| !b.is_empty())
    }
}

/// SQLite-backed ordered queue
#[derive(Debug, Clone)]
pub struct OrderedStore {
    db: Pool<Sqlite>,
}

impl OrderedStore {
    /// Wrap an already-initialized pool
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let db = playroll_common::db::init_database(path).await?;
        Ok(Self::new(db))
    }

    /// Open a private in-memory store
    pub async fn open_in_memory() -> Result<Self> {
        let db = playroll_common::db::init_memory_database().await?;
        Ok(Self::new(db))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.db
    }

    /// Close the underlying pool; further operations fail
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Insert an entry
    ///
    /// Without `insert_index` the entry is appended. With one, the index is
    /// clamped to `[0, count]`; landing in front of existing entries shifts
    /// every entry at or after it up by one in the same transaction.
    ///
    /// Returns the new entry's id.
    pub async fn add(
        &self,
        blob: Option<&[u8]>,
        metadata: &Metadata,
        insert_index: Option<i64>,
    ) -> Result<i64> {
        let metadata_json = metadata.to_json()?;
        let mut tx = self.db.begin().await?;

        let (count, max_index): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MAX(queue_index) FROM queue_entries")
                .fetch_one(&mut *tx)
                .await?;

        // Sparse indices (left by explicit placements) must not make an
        // append collide with an existing row
        let append_index = max_index.map_or(0, |max| (max + 1).max(count));

        let target_index = match insert_index {
            None => append_index,
            Some(requested) => {
                let clamped = requested.clamp(0, count);
                if clamped >= count {
                    append_index
                } else {
                    shift_range(&mut tx, clamped, 1).await?;
                    clamped
                }
            }
        };

        let id = sqlx::query(
            r#"
            INSERT INTO queue_entries (blob, queue_index, metadata, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(blob)
        .bind(target_index)
        .bind(metadata_json)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        debug!("Added queue entry {} at index {}", id, target_index);
        Ok(id)
    }

    /// Remove an entry and close the gap it leaves
    pub async fn remove(&self, id: i64) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let removed_index: i64 =
            sqlx::query_scalar("SELECT queue_index FROM queue_entries WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Queue entry not found: {}", id)))?;

        sqlx::query("DELETE FROM queue_entries WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        shift_range(&mut tx, removed_index + 1, -1).await?;

        tx.commit().await?;

        debug!("Removed queue entry {} from index {}", id, removed_index);
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<QueueEntry>> {
        let sql = format!("SELECT {} FROM queue_entries WHERE id = ?", ENTRY_COLUMNS);
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(QueueEntry::from_row).transpose()
    }

    /// All entries, ascending by `queue_index` (ties broken by id)
    pub async fn get_all(&self) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {} FROM queue_entries ORDER BY queue_index ASC, id ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .fetch_all(&self.db)
            .await?;

        rows.into_iter().map(QueueEntry::from_row).collect()
    }

    /// Entry currently holding `queue_index`, if any
    pub async fn get_by_index(&self, queue_index: i64) -> Result<Option<QueueEntry>> {
        let sql = format!(
            "SELECT {} FROM queue_entries WHERE queue_index = ? ORDER BY id ASC LIMIT 1",
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, QueueEntryRow>(&sql)
            .bind(queue_index)
            .fetch_optional(&self.db)
            .await?;

        row.map(QueueEntry::from_row).transpose()
    }

    /// First entry, in queue order, whose metadata carries every pair
    pub async fn find_by_metadata(&self, pairs: &[(String, Value)]) -> Result<Option<QueueEntry>> {
        let entries = self.get_all().await?;

        Ok(entries.into_iter().find(|entry| {
            entry
                .metadata
                .matches_all(pairs.iter().map(|(field, value)| (field.as_str(), value)))
        }))
    }

    pub async fn length(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries")
            .fetch_one(&self.db)
            .await?;

        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.length().await? == 0)
    }

    /// Delete every entry
    ///
    /// Ids are never reused, even after a clear.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM queue_entries")
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Shallow-merge `metadata` into the entry's metadata
    pub async fn update_metadata(&self, id: i64, metadata: &Metadata) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let current: String = sqlx::query_scalar("SELECT metadata FROM queue_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Queue entry not found: {}", id)))?;

        let mut merged = Metadata::from_json(&current)?;
        merged.merge(metadata);

        sqlx::query(
            "UPDATE queue_entries SET metadata = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(merged.to_json()?)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Overwrite blob, metadata and index of `entry.id`
    ///
    /// Other entries are not shifted; callers changing `queue_index` are
    /// responsible for keeping the indices coherent.
    pub async fn update_item(&self, entry: &QueueEntry) -> Result<()> {
        validate_index(entry.queue_index)?;

        let result = sqlx::query(
            r#"
            UPDATE queue_entries
            SET blob = ?, queue_index = ?, metadata = ?, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
        )
        .bind(entry.blob.as_deref())
        .bind(entry.queue_index)
        .bind(entry.metadata.to_json()?)
        .bind(entry.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Queue entry not found: {}", entry.id)));
        }

        Ok(())
    }

    /// Set one entry's index without shifting others
    pub async fn update_queue_index(&self, id: i64, queue_index: i64) -> Result<()> {
        validate_index(queue_index)?;

        let result = sqlx::query(
            "UPDATE queue_entries SET queue_index = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(queue_index)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Queue entry not found: {}", id)));
        }

        Ok(())
    }

    /// Apply a precomputed id -> index assignment in one transaction
    ///
    /// Uniqueness of the target indices is the caller's contract. Any
    /// unknown id aborts the whole batch.
    pub async fn batch_update_queue_indices(&self, assignments: &[(i64, i64)]) -> Result<()> {
        for (_, queue_index) in assignments {
            validate_index(*queue_index)?;
        }

        let mut tx = self.db.begin().await?;

        for (id, queue_index) in assignments {
            let result = sqlx::query(
                "UPDATE queue_entries SET queue_index = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            )
            .bind(queue_index)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Dropping tx rolls back the updates already applied
                return Err(Error::NotFound(format!("Queue entry not found: {}", id)));
            }
        }

        tx.commit().await?;

        debug!("Batch-updated {} queue indices", assignments.len());
        Ok(())
    }

    /// Swap the indices of the entries at two positions of the sorted queue
    pub async fn reorder(&self, from_position: usize, to_position: usize) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let order: Vec<(i64, i64)> =
            sqlx::query_as("SELECT id, queue_index FROM queue_entries ORDER BY queue_index ASC, id ASC")
                .fetch_all(&mut *tx)
                .await?;

        for position in [from_position, to_position] {
            if position >= order.len() {
                return Err(Error::InvalidArgument(format!(
                    "Invalid position: {} (queue has {} entries)",
                    position,
                    order.len()
                )));
            }
        }

        if from_position == to_position {
            return Ok(());
        }

        let (from_id, from_index) = order[from_position];
        let (to_id, to_index) = order[to_position];

        sqlx::query("UPDATE queue_entries SET queue_index = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(to_index)
            .bind(from_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE queue_entries SET queue_index = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
            .bind(from_index)
            .bind(to_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            "Swapped positions {} and {} (entries {} and {})",
            from_position, to_position, from_id, to_id
        );
        Ok(())
    }
}

/// Move every entry with `queue_index >= from_index` by `delta`
///
/// The only multi-row index rewrite outside of explicit batches; `add` and
/// `remove` call it inside their own transaction.
async fn shift_range(conn: &mut SqliteConnection, from_index: i64, delta: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE queue_entries SET queue_index = queue_index + ? WHERE queue_index >= ?",
    )
    .bind(delta)
    .bind(from_index)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

fn validate_index(queue_index: i64) -> Result<()> {
    if queue_index < 0 {
        return Err(Error::InvalidArgument(format!(
            "queue_index must be non-negative, got {}",
            queue_index
        )));
    }
    Ok(())
}
