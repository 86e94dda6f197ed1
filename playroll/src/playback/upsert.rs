//! Insert-or-update of queue entries
//!
//! Resolution order for the target row:
//! 1. the supplied id, when it exists
//! 2. the first entry (in queue order) whose metadata matches every pair of
//!    the match predicate
//! 3. otherwise a new entry is inserted

use crate::db::queue::{OrderedStore, QueueEntry};
use crate::error::{Error, Result};
use playroll_common::metadata::FILENAME_KEY;
use playroll_common::Metadata;
use serde_json::Value;
use tracing::debug;

/// Field/value pairs an existing entry's metadata must all carry
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPredicate {
    pairs: Vec<(String, Value)>,
}

impl MatchPredicate {
    /// Pair up field names with values; both lists must have equal, non-zero length
    pub fn new(fields: Vec<String>, values: Vec<Value>) -> Result<Self> {
        if fields.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "match predicate has {} fields but {} values",
                fields.len(),
                values.len()
            )));
        }
        if fields.is_empty() {
            return Err(Error::InvalidArgument("match predicate is empty".to_string()));
        }

        Ok(Self {
            pairs: fields.into_iter().zip(values).collect(),
        })
    }

    /// Match on a single field
    pub fn field(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            pairs: vec![(field.into(), value.into())],
        }
    }

    /// Take the values for `fields` from the incoming metadata
    pub fn from_metadata(fields: &[&str], metadata: &Metadata) -> Result<Self> {
        let values = fields
            .iter()
            .map(|field| {
                metadata.get(field).cloned().ok_or_else(|| {
                    Error::InvalidArgument(format!("match field '{}' missing from metadata", field))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(fields.iter().map(|f| f.to_string()).collect(), values)
    }

    pub fn pairs(&self) -> &[(String, Value)] {
        &self.pairs
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        metadata.matches_all(self.pairs.iter().map(|(field, value)| (field.as_str(), value)))
    }
}

/// How an upsert treats the row it lands on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpsertOptions {
    /// Explicit placement; on update the index changes only when set
    pub queue_index: Option<i64>,

    /// Replace the stored blob on update
    pub update_blob: bool,

    /// Shallow-merge metadata on update instead of replacing it
    pub merge_metadata: bool,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            queue_index: None,
            update_blob: true,
            merge_metadata: true,
        }
    }
}

/// One insert-or-update request
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertRequest {
    pub blob: Option<Vec<u8>>,
    pub metadata: Metadata,
    pub id: Option<i64>,
    pub match_by: Option<MatchPredicate>,
    pub options: UpsertOptions,
}

impl UpsertRequest {
    pub fn new(blob: Option<Vec<u8>>, metadata: Metadata) -> Self {
        Self {
            blob,
            metadata,
            id: None,
            match_by: None,
            options: UpsertOptions::default(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn match_by(mut self, predicate: MatchPredicate) -> Self {
        self.match_by = Some(predicate);
        self
    }

    pub fn with_options(mut self, options: UpsertOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
}

/// Result of one upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Id of the row now holding the data
    pub id: i64,
    pub action: UpsertAction,
    /// Existing row that was updated
    pub matched_id: Option<i64>,
}

/// Request matching an entry by its `filename` metadata
pub fn by_filename(
    blob: Option<Vec<u8>>,
    filename: &str,
    mut metadata: Metadata,
    options: UpsertOptions,
) -> UpsertRequest {
    metadata.set_filename(filename);
    UpsertRequest::new(blob, metadata)
        .match_by(MatchPredicate::field(FILENAME_KEY, filename))
        .with_options(options)
}

async fn resolve_target(store: &OrderedStore, request: &UpsertRequest) -> Result<Option<QueueEntry>> {
    if let Some(id) = request.id {
        if let Some(entry) = store.get(id).await? {
            return Ok(Some(entry));
        }
        debug!("Upsert id {} not present, falling back to predicate", id);
    }

    match &request.match_by {
        Some(predicate) => store.find_by_metadata(predicate.pairs()).await,
        None => Ok(None),
    }
}

/// Insert or update one entry
///
/// A request without a blob never clears the stored blob on update.
pub async fn upsert(store: &OrderedStore, request: &UpsertRequest) -> Result<UpsertOutcome> {
    if let Some(index) = request.options.queue_index {
        if index < 0 {
            return Err(Error::InvalidArgument(format!(
                "queue_index must be non-negative, got {}",
                index
            )));
        }
    }

    match resolve_target(store, request).await? {
        Some(mut entry) => {
            if request.options.update_blob {
                if let Some(blob) = &request.blob {
                    entry.blob = Some(blob.clone());
                }
            }

            if request.options.merge_metadata {
                entry.metadata.merge(&request.metadata);
            } else {
                entry.metadata = request.metadata.clone();
            }

            if let Some(index) = request.options.queue_index {
                entry.queue_index = index;
            }

            store.update_item(&entry).await?;
            debug!("Upsert updated entry {}", entry.id);

            Ok(UpsertOutcome {
                id: entry.id,
                action: UpsertAction::Updated,
                matched_id: Some(entry.id),
            })
        }
        None => {
            let id = store
                .add(
                    request.blob.as_deref(),
                    &request.metadata,
                    request.options.queue_index,
                )
                .await?;
            debug!("Upsert inserted entry {}", id);

            Ok(UpsertOutcome {
                id,
                action: UpsertAction::Inserted,
                matched_id: None,
            })
        }
    }
}
