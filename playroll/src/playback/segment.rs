//! Segments: the transient delivery unit built from a queue entry

use crate::db::queue::QueueEntry;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Stream tag used when an entry does not name one
pub const DEFAULT_STREAM_TAG: &str = "default";

/// One unit handed to the stream sink
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Identifier used for completion tracking
    pub id: u64,

    pub payload: Vec<u8>,

    /// Logical sub-stream this segment belongs to
    pub stream_tag: String,

    /// Header bytes the sink needs once per stream tag before any payload
    pub init_payload: Option<Vec<u8>>,
}

impl Segment {
    /// Build a segment from a queue entry
    ///
    /// `init_payloads` maps stream tags to their initialization headers.
    /// Fails with `MissingPayload` when the entry has no blob.
    pub fn from_entry(entry: &QueueEntry, init_payloads: &HashMap<String, Vec<u8>>) -> Result<Self> {
        let payload = match &entry.blob {
            Some(blob) if !blob.is_empty() => blob.clone(),
            _ => return Err(Error::MissingPayload(entry.id)),
        };

        let stream_tag = resolve_stream_tag(entry);
        let init_payload = init_payloads.get(&stream_tag).cloned();

        Ok(Self {
            id: resolve_segment_id(entry),
            payload,
            stream_tag,
            init_payload,
        })
    }
}

/// Segment id: `originalIndex` metadata, else the queue index, else the
/// entry id, else 0
pub fn resolve_segment_id(entry: &QueueEntry) -> u64 {
    entry
        .metadata
        .original_index()
        .or_else(|| u64::try_from(entry.queue_index).ok())
        .or_else(|| u64::try_from(entry.id).ok())
        .unwrap_or(0)
}

pub fn resolve_stream_tag(entry: &QueueEntry) -> String {
    entry
        .metadata
        .stream_id()
        .filter(|tag| !tag.is_empty())
        .unwrap_or(DEFAULT_STREAM_TAG)
        .to_string()
}
