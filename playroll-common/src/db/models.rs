//! Database models

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Raw `queue_entries` row
///
/// Metadata is still JSON text here; the queue store decodes it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntryRow {
    pub id: i64,
    pub blob: Option<Vec<u8>>,
    pub queue_index: i64,
    pub metadata: String,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}
