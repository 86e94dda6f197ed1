//! Ordering reconciliation
//!
//! Computes a full id -> index assignment from an external ordering source.
//! Entries match a source row by their `filename` metadata, or failing that
//! by `originalIndex` against the row's position in the source list.
//! Matched entries take indices `0..k` sorted by the requested order;
//! unmatched entries follow in their existing relative order.
//!
//! When an entry carries both keys and they disagree, `filename` wins. This
//! is a fixed policy, not something derived from the data.

use crate::db::queue::QueueEntry;
use crate::error::{Error, Result};
use playroll_common::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One row of the desired canonical ordering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingSourceEntry {
    pub file: String,
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl OrderingSourceEntry {
    pub fn new(file: impl Into<String>, order: i64) -> Self {
        Self {
            file: file.into(),
            order,
            metadata: None,
        }
    }
}

/// Index assignment computed for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingPlan {
    /// `(id, new queue_index)` for every entry in the store
    pub assignments: Vec<(i64, i64)>,

    /// Number of entries that had a resolvable desired order
    pub matched: usize,

    /// Ids that matched nothing, in their current order
    pub unmatched_ids: Vec<i64>,

    /// Source files no entry refers to
    pub missing_files: Vec<String>,
}

/// Entry in a current-ordering snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderingSnapshotEntry {
    pub id: i64,
    pub queue_index: i64,
    pub filename: Option<String>,
}

/// Entry whose index would change under a reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderingMismatch {
    pub id: i64,
    pub filename: Option<String>,
    pub current_index: i64,
    pub desired_index: i64,
}

/// Difference between the store and an ordering source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderingComparison {
    /// True when reconciling would not move any entry
    pub consistent: bool,
    pub matched: usize,
    pub mismatches: Vec<OrderingMismatch>,
    pub missing_files: Vec<String>,
}

/// Plan a reconciliation of `entries` (in queue order) against `source`
///
/// Fails with `InvalidArgument` when the source is malformed: a negative
/// order or the same file listed twice.
pub fn plan_ordering(entries: &[QueueEntry], source: &[OrderingSourceEntry]) -> Result<OrderingPlan> {
    let mut by_file: HashMap<&str, i64> = HashMap::new();
    let mut by_position: HashMap<u64, i64> = HashMap::new();

    for (position, row) in source.iter().enumerate() {
        if row.order < 0 {
            return Err(Error::InvalidArgument(format!(
                "ordering source row {} ('{}') has negative order {}",
                position, row.file, row.order
            )));
        }
        if !row.file.is_empty() && by_file.insert(row.file.as_str(), row.order).is_some() {
            return Err(Error::InvalidArgument(format!(
                "ordering source lists '{}' more than once",
                row.file
            )));
        }
        by_position.insert(position as u64, row.order);
    }

    // (desired order, current position, id)
    let mut matched: Vec<(i64, usize, i64)> = Vec::new();
    let mut unmatched_ids = Vec::new();

    for (position, entry) in entries.iter().enumerate() {
        let desired = entry
            .metadata
            .filename()
            .and_then(|file| by_file.get(file).copied())
            .or_else(|| {
                entry
                    .metadata
                    .original_index()
                    .and_then(|index| by_position.get(&index).copied())
            });

        match desired {
            Some(order) => matched.push((order, position, entry.id)),
            None => unmatched_ids.push(entry.id),
        }
    }

    // Ties on order keep current relative order
    matched.sort_by_key(|&(order, position, _)| (order, position));

    let assignments: Vec<(i64, i64)> = matched
        .iter()
        .map(|&(_, _, id)| id)
        .chain(unmatched_ids.iter().copied())
        .enumerate()
        .map(|(index, id)| (id, index as i64))
        .collect();

    let known_files: HashSet<&str> = entries.iter().filter_map(|e| e.metadata.filename()).collect();
    let missing_files = source
        .iter()
        .filter(|row| !row.file.is_empty() && !known_files.contains(row.file.as_str()))
        .map(|row| row.file.clone())
        .collect();

    Ok(OrderingPlan {
        assignments,
        matched: matched.len(),
        unmatched_ids,
        missing_files,
    })
}

/// Compare the current indices of `entries` with a plan's assignment
pub fn compare_with_plan(entries: &[QueueEntry], plan: &OrderingPlan) -> OrderingComparison {
    let desired: HashMap<i64, i64> = plan.assignments.iter().copied().collect();

    let mismatches: Vec<OrderingMismatch> = entries
        .iter()
        .filter_map(|entry| {
            let desired_index = *desired.get(&entry.id)?;
            (desired_index != entry.queue_index).then(|| OrderingMismatch {
                id: entry.id,
                filename: entry.metadata.filename().map(str::to_string),
                current_index: entry.queue_index,
                desired_index,
            })
        })
        .collect();

    OrderingComparison {
        consistent: mismatches.is_empty(),
        matched: plan.matched,
        mismatches,
        missing_files: plan.missing_files.clone(),
    }
}

pub fn snapshot(entries: &[QueueEntry]) -> Vec<OrderingSnapshotEntry> {
    entries
        .iter()
        .map(|entry| OrderingSnapshotEntry {
            id: entry.id,
            queue_index: entry.queue_index,
            filename: entry.metadata.filename().map(str::to_string),
        })
        .collect()
}
