//! Stream sink
//!
//! Serializes appends and trims against a sink backend that can run only one
//! operation at a time and reports completion asynchronously.
//!
//! Flush policy, run on every `enqueue`/`trim` and whenever the backend
//! signals it is ready again:
//! 1. Backend busy: do nothing.
//! 2. A trim is queued: run exactly one trim and stop.
//! 3. Otherwise drain appends in FIFO order until the backend goes busy or
//!    rejects one; a rejected append goes back to the front and is retried
//!    on the next ready signal.

use super::segment::Segment;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

/// Why the backend refused an operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkRejection {
    #[error("sink is busy")]
    Busy,

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("sink is closed")]
    Closed,
}

impl From<SinkRejection> for crate::error::Error {
    fn from(rejection: SinkRejection) -> Self {
        crate::error::Error::TransientSinkRejection(rejection.to_string())
    }
}

/// What a chunk handed to the backend carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Initialization header for its stream tag
    Init,
    /// Media payload
    Media,
}

/// Bytes handed to the backend in one append
#[derive(Debug, Clone, Copy)]
pub struct SinkChunk<'a> {
    pub stream_tag: &'a str,
    pub bytes: &'a [u8],
    pub kind: ChunkKind,
}

/// Single-consumer streaming buffer the sink writes into
///
/// `append` and `remove` start an operation that keeps the backend busy
/// until the driver reports completion through [`StreamSink::on_ready`].
pub trait SinkBackend: Send {
    fn is_busy(&self) -> bool;

    fn is_open(&self) -> bool;

    /// Declare a stream tag before its first chunk
    fn add_stream(&mut self, stream_tag: &str) -> Result<(), SinkRejection>;

    fn append(&mut self, chunk: SinkChunk<'_>) -> Result<(), SinkRejection>;

    /// Remove the buffered half-open range `[start, end)`, in seconds
    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkRejection>;

    fn end_of_stream(&mut self) -> Result<(), SinkRejection>;

    /// Release any resource handle owned by the backend
    fn release(&mut self);
}

/// Snapshot of the sink's queues for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferState {
    /// Appends waiting to be submitted (init chunks included)
    pub queue_length: usize,
    /// Id of the last media segment accepted by the backend
    pub last_segment_id: Option<u64>,
    pub pending_trims: usize,
}

#[derive(Debug)]
struct PendingAppend {
    segment_id: u64,
    stream_tag: String,
    bytes: Vec<u8>,
    kind: ChunkKind,
}

#[derive(Debug, Clone, Copy)]
struct TrimRange {
    start: f64,
    end: f64,
}

/// Serializing adapter over a [`SinkBackend`]
pub struct StreamSink {
    backend: Option<Box<dyn SinkBackend>>,
    appends: VecDeque<PendingAppend>,
    trims: VecDeque<TrimRange>,
    declared_tags: HashSet<String>,
    initialized_tags: HashSet<String>,
    last_segment_id: Option<u64>,
}

impl StreamSink {
    pub fn new(backend: Box<dyn SinkBackend>) -> Self {
        Self {
            backend: Some(backend),
            appends: VecDeque::new(),
            trims: VecDeque::new(),
            declared_tags: HashSet::new(),
            initialized_tags: HashSet::new(),
            last_segment_id: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    /// Queue a segment for appending
    ///
    /// The first segment seen for a stream tag that carries an init payload
    /// queues that payload ahead of its own data.
    pub fn enqueue(&mut self, segment: Segment) {
        let Some(backend) = self.backend.as_mut() else {
            warn!("Dropping segment {}: sink is closed", segment.id);
            return;
        };

        if !self.declared_tags.contains(&segment.stream_tag) {
            match backend.add_stream(&segment.stream_tag) {
                Ok(()) => {
                    debug!("Declared stream '{}'", segment.stream_tag);
                    self.declared_tags.insert(segment.stream_tag.clone());
                }
                // Chunks for an undeclared tag would only be refused
                Err(e) => {
                    warn!(
                        "Dropping segment {}: failed to declare stream '{}': {}",
                        segment.id, segment.stream_tag, e
                    );
                    return;
                }
            }
        }

        if let Some(init_payload) = segment.init_payload {
            if self.initialized_tags.insert(segment.stream_tag.clone()) {
                self.appends.push_back(PendingAppend {
                    segment_id: segment.id,
                    stream_tag: segment.stream_tag.clone(),
                    bytes: init_payload,
                    kind: ChunkKind::Init,
                });
            }
        }

        self.appends.push_back(PendingAppend {
            segment_id: segment.id,
            stream_tag: segment.stream_tag,
            bytes: segment.payload,
            kind: ChunkKind::Media,
        });

        self.flush();
    }

    /// Queue removal of `[start, end)`; invalid ranges are ignored
    pub fn trim(&mut self, start: f64, end: f64) {
        let valid = start.is_finite() && end.is_finite() && start >= 0.0 && end > start;
        if !valid {
            debug!("Ignoring trim request [{}, {})", start, end);
            return;
        }
        if self.backend.is_none() {
            return;
        }

        self.trims.push_back(TrimRange { start, end });
        self.flush();
    }

    /// Backend finished its outstanding operation
    pub fn on_ready(&mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        if backend.is_busy() {
            return;
        }

        if let Some(range) = self.trims.pop_front() {
            match backend.remove(range.start, range.end) {
                Ok(()) => {
                    debug!("Trimming buffered range [{:.3}, {:.3})", range.start, range.end);
                    return;
                }
                Err(SinkRejection::Busy) => {
                    self.trims.push_front(range);
                    return;
                }
                // Nothing is in flight after an outright failure, so no
                // ready signal is coming: carry on with the appends
                Err(e) => warn!(
                    "Discarding trim [{:.3}, {:.3}): {}",
                    range.start, range.end, e
                ),
            }
        }

        while let Some(pending) = self.appends.pop_front() {
            if backend.is_busy() {
                self.appends.push_front(pending);
                break;
            }

            let chunk = SinkChunk {
                stream_tag: &pending.stream_tag,
                bytes: &pending.bytes,
                kind: pending.kind,
            };

            match backend.append(chunk) {
                Ok(()) => {
                    if pending.kind == ChunkKind::Media {
                        self.last_segment_id = Some(pending.segment_id);
                    }
                    debug!(
                        "Appended {:?} chunk for segment {} ({} bytes, stream '{}')",
                        pending.kind,
                        pending.segment_id,
                        pending.bytes.len(),
                        pending.stream_tag
                    );
                }
                Err(e) => {
                    debug!(
                        "Append of segment {} rejected ({}); retrying on next ready signal",
                        pending.segment_id, e
                    );
                    self.appends.push_front(pending);
                    break;
                }
            }
        }
    }

    /// Detach from the backend, signalling end-of-stream if it is still open
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if backend.is_open() {
                if let Err(e) = backend.end_of_stream() {
                    warn!("Failed to signal end of stream: {}", e);
                }
            }
            backend.release();
            debug!(
                "Stream sink closed ({} appends, {} trims discarded)",
                self.appends.len(),
                self.trims.len()
            );
        }

        self.appends.clear();
        self.trims.clear();
        self.declared_tags.clear();
        self.initialized_tags.clear();
    }

    pub fn get_buffer_state(&self) -> BufferState {
        BufferState {
            queue_length: self.appends.len(),
            last_segment_id: self.last_segment_id,
            pending_trims: self.trims.len(),
        }
    }
}

impl Drop for StreamSink {
    fn drop(&mut self) {
        self.close();
    }
}
