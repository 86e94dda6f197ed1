//! Buffer scheduler ("roll")
//!
//! Decides when to pull the next queue entry into the stream sink, when to
//! trim material playback has already consumed, and when a pass through the
//! queue or the stream itself has ended.
//!
//! Per attach session the scheduler moves between:
//! - **Detached** - no feedback source; events are ignored
//! - **Attached-Idle** - waiting for the buffer to drain below the threshold
//! - **Segment-In-Flight** - a segment was pushed while earlier material was
//!   still buffered; no further push happens until playback crosses the
//!   previous buffered end and that range has been trimmed
//!
//! Delivery walks a monotonically increasing cursor; the entry delivered is
//! `entries[(cursor + skipped) % count]`, where entries without a payload
//! are passed over without advancing the cursor. With a cycle-end callback registered, delivery
//! stops after each full pass until [`Roll::reset_cursor`]; without one the
//! cursor wraps forever.

use super::feedback::{sanitize_time, FeedbackEvent, PlaybackFeedback};
use super::ordering::{self, OrderingComparison, OrderingSnapshotEntry, OrderingSourceEntry};
use super::segment::Segment;
use super::sink::{BufferState, StreamSink};
use super::upsert::{self, UpsertOptions, UpsertOutcome, UpsertRequest};
use crate::config::{RollConfig, DEFAULT_END_EPSILON_SECONDS, DEFAULT_THRESHOLD_SECONDS};
use crate::db::queue::OrderedStore;
use crate::error::Result;
use playroll_common::Metadata;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Callback fired on cycle end or stream end
pub type RollCallback = Box<dyn FnMut() + Send>;

/// Observable scheduler state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerState {
    /// Monotonic delivery cursor
    pub buffered_queue_index: u64,

    /// Buffered end recorded before the last push, awaiting trim
    pub pending_trim_boundary: Option<f64>,

    pub segment_in_flight: bool,

    /// Queue length sampled at the last delivery
    pub total_items: usize,

    /// Entries passed over for lack of payload; shifts the read position
    /// without counting toward the pass
    pub skip_offset: u64,
}

/// Per-session options for [`Roll::attach_buffer`]
#[derive(Debug, Clone, PartialEq)]
pub struct AttachOptions {
    /// Push the next segment once this many seconds or fewer remain buffered
    pub threshold_seconds: f64,

    /// Slack when deciding playback has caught up with the buffered end
    pub end_epsilon_seconds: f64,

    /// Initialization header per stream tag
    pub init_payloads: HashMap<String, Vec<u8>>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            threshold_seconds: DEFAULT_THRESHOLD_SECONDS,
            end_epsilon_seconds: DEFAULT_END_EPSILON_SECONDS,
            init_payloads: HashMap::new(),
        }
    }
}

impl AttachOptions {
    pub fn from_config(config: &RollConfig) -> Self {
        Self {
            threshold_seconds: config.threshold_seconds,
            end_epsilon_seconds: config.end_epsilon_seconds,
            init_payloads: HashMap::new(),
        }
    }

    pub fn with_threshold(mut self, threshold_seconds: f64) -> Self {
        self.threshold_seconds = threshold_seconds;
        self
    }

    pub fn with_init_payload(mut self, stream_tag: impl Into<String>, payload: Vec<u8>) -> Self {
        self.init_payloads.insert(stream_tag.into(), payload);
        self
    }
}

/// What one delivery attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Segment handed to the sink
    Delivered,
    /// Entry had no payload; passed over without advancing the cursor
    Skipped,
    /// Nothing more to deliver in this pass (or the queue is empty)
    Exhausted,
    /// A segment is already in flight
    Gated,
    /// Store read failed; retried on a later tick
    Failed,
    Detached,
}

struct Session {
    id: Uuid,
    sink: StreamSink,
    feedback: Box<dyn PlaybackFeedback>,
    options: AttachOptions,
    trimmed_until: f64,
    stream_end_fired: bool,
}

/// Push threshold test: something is buffered and at most `threshold`
/// seconds of it remain ahead of the playback position
pub fn should_prefetch(buffered_end: f64, position: f64, threshold: f64) -> bool {
    buffered_end > 0.0 && buffered_end - position <= threshold
}

/// The buffer scheduler
pub struct Roll {
    store: OrderedStore,
    session: Option<Session>,
    state: SchedulerState,
    on_cycle_end: Option<RollCallback>,
    on_stream_end: Option<RollCallback>,
}

impl Roll {
    pub fn new(store: OrderedStore) -> Self {
        Self {
            store,
            session: None,
            state: SchedulerState::default(),
            on_cycle_end: None,
            on_stream_end: None,
        }
    }

    /// Open the configured store and build a scheduler over it
    pub async fn init(config: &RollConfig) -> Result<Self> {
        let store = OrderedStore::open(&config.db_path).await?;
        info!("Roll initialized on {}", config.db_path.display());
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &OrderedStore {
        &self.store
    }

    pub fn state(&self) -> SchedulerState {
        self.state.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn sink_state(&self) -> Option<BufferState> {
        self.session.as_ref().map(|s| s.sink.get_buffer_state())
    }

    /// Register the end-of-pass callback, switching to single-pass delivery
    pub fn set_on_cycle_end<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_cycle_end = Some(Box::new(callback));
    }

    /// Remove the end-of-pass callback, returning to infinite looping
    pub fn clear_on_cycle_end(&mut self) {
        self.on_cycle_end = None;
    }

    pub fn set_on_stream_end<F>(&mut self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.on_stream_end = Some(Box::new(callback));
    }

    /// Rewind the delivery cursor to the start of the queue
    ///
    /// Re-arms delivery after a completed pass and re-arms the end-of-stream
    /// notification.
    pub fn reset_cursor(&mut self) {
        self.state.buffered_queue_index = 0;
        self.state.skip_offset = 0;
        if let Some(session) = self.session.as_mut() {
            session.stream_end_fired = false;
        }
        debug!("Roll cursor reset");
    }

    /// Hook up a sink and feedback source and start a fresh session
    ///
    /// Any previous session is detached first (its sink is closed). The
    /// first deliverable entry is pushed immediately when the queue is not
    /// empty. Fails only when the store cannot be read.
    pub async fn attach_buffer<F>(
        &mut self,
        sink: StreamSink,
        feedback: F,
        options: AttachOptions,
    ) -> Result<()>
    where
        F: PlaybackFeedback + 'static,
    {
        if let Some(mut previous) = self.detach_buffer() {
            previous.close();
        }

        let total_items = self.store.length().await?;

        let session = Session {
            id: Uuid::new_v4(),
            sink,
            feedback: Box::new(feedback),
            options,
            trimmed_until: 0.0,
            stream_end_fired: false,
        };
        info!(
            session = %session.id,
            "Attached buffer (threshold {:.2}s, {} queued)",
            session.options.threshold_seconds, total_items
        );

        self.state = SchedulerState {
            total_items,
            ..SchedulerState::default()
        };
        self.session = Some(session);

        if total_items == 0 {
            warn!("Attached to an empty queue; waiting for entries");
            return Ok(());
        }

        self.deliver_skipping_empty().await;
        Ok(())
    }

    /// Deliver the next entry that has a payload, passing over at most one
    /// queue's worth of empty entries
    async fn deliver_skipping_empty(&mut self) -> Delivery {
        let mut outcome = self.deliver_next().await;
        let mut attempts = 1;
        while outcome == Delivery::Skipped && attempts < self.state.total_items {
            outcome = self.deliver_next().await;
            attempts += 1;
        }
        outcome
    }

    /// Stop reacting to feedback and reset scheduler state
    ///
    /// Returns the session's sink so the caller can keep or close it; safe
    /// to call when already detached. A pending trim gate is discarded.
    pub fn detach_buffer(&mut self) -> Option<StreamSink> {
        let session = self.session.take()?;
        self.state = SchedulerState::default();
        info!(session = %session.id, "Detached buffer");
        Some(session.sink)
    }

    /// Detach, close the sink and close the store
    pub async fn close(&mut self) {
        if let Some(mut sink) = self.detach_buffer() {
            sink.close();
        }
        self.store.close().await;
        info!("Roll closed");
    }

    /// React to one feedback event
    ///
    /// Returns false once the event stream should stop (playback ended or no
    /// session attached).
    pub async fn handle_event(&mut self, event: FeedbackEvent) -> bool {
        if self.session.is_none() {
            return false;
        }

        match event {
            FeedbackEvent::Tick => {
                self.tick().await;
                true
            }
            FeedbackEvent::SinkReady => {
                if let Some(session) = self.session.as_mut() {
                    session.sink.on_ready();
                }
                true
            }
            FeedbackEvent::Ended => {
                self.on_playback_ended();
                false
            }
        }
    }

    /// Consume feedback events until playback ends, the channel closes or
    /// the scheduler is detached
    pub async fn run(&mut self, mut events: mpsc::Receiver<FeedbackEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        debug!("Feedback loop finished");
    }

    /// One feedback tick: trim if the boundary was crossed, then push or
    /// detect end of stream
    pub async fn tick(&mut self) {
        let (position, buffered_end, threshold, epsilon) = {
            let Some(session) = self.session.as_mut() else {
                return;
            };

            let position = sanitize_time(session.feedback.position());
            let buffered_end = sanitize_time(session.feedback.buffered_end());

            if let Some(boundary) = self.state.pending_trim_boundary {
                if position >= boundary {
                    let start = session.trimmed_until;
                    session.sink.trim(start, boundary);
                    session.trimmed_until = start.max(boundary);
                    self.state.pending_trim_boundary = None;
                    self.state.segment_in_flight = false;
                    debug!(
                        session = %session.id,
                        "Position {:.3}s crossed {:.3}s; trimmed consumed range",
                        position, boundary
                    );
                }
            }

            (
                position,
                buffered_end,
                session.options.threshold_seconds,
                session.options.end_epsilon_seconds,
            )
        };

        if self.state.segment_in_flight {
            return;
        }

        // An empty queue is re-sampled so entries added after attach get
        // picked up; the threshold still gates the push unless nothing is
        // buffered at all
        let refill = if self.state.total_items == 0 {
            buffered_end == 0.0 || should_prefetch(buffered_end, position, threshold)
        } else {
            self.has_more() && should_prefetch(buffered_end, position, threshold)
        };
        if refill {
            match self.deliver_skipping_empty().await {
                Delivery::Exhausted => {}
                _ => return,
            }
        }

        if !self.has_more() && buffered_end > 0.0 && position + epsilon >= buffered_end {
            self.fire_stream_end();
        }
    }

    /// Whether another delivery is allowed in the current pass
    pub fn has_more(&self) -> bool {
        let total = self.state.total_items as u64;
        if total == 0 {
            return false;
        }
        if self.on_cycle_end.is_none() {
            return true;
        }

        let cursor = self.state.buffered_queue_index;
        cursor == 0 || cursor % total != 0
    }

    /// Push the entry under the cursor into the sink
    pub async fn deliver_next(&mut self) -> Delivery {
        if self.session.is_none() {
            return Delivery::Detached;
        }
        if self.state.segment_in_flight {
            return Delivery::Gated;
        }
        self.state.segment_in_flight = true;

        let entries = match self.store.get_all().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Delivery failed this tick, store read error: {}", e);
                self.state.segment_in_flight = false;
                return Delivery::Failed;
            }
        };

        // Cycle boundaries follow the length sampled here
        self.state.total_items = entries.len();
        if !self.has_more() {
            self.state.segment_in_flight = false;
            return Delivery::Exhausted;
        }

        let read_index = self.state.buffered_queue_index + self.state.skip_offset;
        let position = (read_index % entries.len() as u64) as usize;
        let entry = &entries[position];

        let outcome = {
            let Some(session) = self.session.as_mut() else {
                self.state.segment_in_flight = false;
                return Delivery::Detached;
            };

            match Segment::from_entry(entry, &session.options.init_payloads) {
                Ok(segment) => {
                    let buffered_before = sanitize_time(session.feedback.buffered_end());
                    debug!(
                        session = %session.id,
                        "Delivering entry {} as segment {} (cursor {})",
                        entry.id, segment.id, self.state.buffered_queue_index
                    );
                    session.sink.enqueue(segment);
                    Ok(buffered_before)
                }
                Err(e) => {
                    warn!(session = %session.id, "Skipping entry {}: {}", entry.id, e);
                    Err(())
                }
            }
        };

        let Ok(buffered_before) = outcome else {
            self.state.skip_offset += 1;
            self.state.segment_in_flight = false;
            return Delivery::Skipped;
        };

        self.advance_cursor();

        if buffered_before > 0.0 {
            self.state.pending_trim_boundary = Some(buffered_before);
        } else {
            self.state.segment_in_flight = false;
        }
        Delivery::Delivered
    }

    fn advance_cursor(&mut self) {
        self.state.buffered_queue_index += 1;

        let total = self.state.total_items as u64;
        if total > 0 && self.state.buffered_queue_index % total == 0 {
            if let Some(callback) = self.on_cycle_end.as_mut() {
                info!(
                    "Completed pass over {} entries (cursor {})",
                    total, self.state.buffered_queue_index
                );
                callback();
            }
        }
    }

    fn on_playback_ended(&mut self) {
        info!("Playback ended");
        if !self.has_more() {
            self.fire_stream_end();
        }
    }

    fn fire_stream_end(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.stream_end_fired {
            return;
        }
        session.stream_end_fired = true;

        info!(session = %session.id, "End of stream reached");
        if let Some(callback) = self.on_stream_end.as_mut() {
            callback();
        }
    }

    /// Insert or update one entry
    pub async fn upsert_item(&self, request: &UpsertRequest) -> Result<UpsertOutcome> {
        upsert::upsert(&self.store, request).await
    }

    /// Upsert a batch in order, stopping at the first failure
    pub async fn upsert_items(&self, requests: &[UpsertRequest]) -> Result<Vec<UpsertOutcome>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(upsert::upsert(&self.store, request).await?);
        }
        Ok(outcomes)
    }

    /// Upsert matching on the `filename` metadata key
    pub async fn upsert_item_by_filename(
        &self,
        blob: Option<Vec<u8>>,
        filename: &str,
        metadata: Metadata,
        options: UpsertOptions,
    ) -> Result<UpsertOutcome> {
        let request = upsert::by_filename(blob, filename, metadata, options);
        upsert::upsert(&self.store, &request).await
    }

    /// Reassign queue indices from an external ordering source
    ///
    /// Returns how many entries had a resolvable desired order. The batch
    /// write is issued even when nothing moves.
    pub async fn update_ordering(&self, source: &[OrderingSourceEntry]) -> Result<usize> {
        let entries = self.store.get_all().await?;

        let plan = ordering::plan_ordering(&entries, source).map_err(|e| {
            error!("Rejected ordering source: {}", e);
            e
        })?;

        if !plan.missing_files.is_empty() {
            debug!("Ordering source files not in queue: {:?}", plan.missing_files);
        }

        self.store
            .batch_update_queue_indices(&plan.assignments)
            .await
            .map_err(|e| {
                error!("Failed to apply ordering: {}", e);
                e
            })?;

        info!(
            "Applied ordering: {} matched, {} unmatched",
            plan.matched,
            plan.unmatched_ids.len()
        );
        Ok(plan.matched)
    }

    pub async fn get_current_ordering(&self) -> Result<Vec<OrderingSnapshotEntry>> {
        let entries = self.store.get_all().await?;
        Ok(ordering::snapshot(&entries))
    }

    /// Report how the store differs from `source` without writing
    pub async fn compare_ordering(&self, source: &[OrderingSourceEntry]) -> Result<OrderingComparison> {
        let entries = self.store.get_all().await?;
        let plan = ordering::plan_ordering(&entries, source).map_err(|e| {
            error!("Rejected ordering source: {}", e);
            e
        })?;
        Ok(ordering::compare_with_plan(&entries, &plan))
    }
}
