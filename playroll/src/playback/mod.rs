//! Playout scheduling
//!
//! The roll pulls queue entries from the store, turns them into segments and
//! hands them to the stream sink as playback-position feedback arrives.

pub mod feedback;
pub mod ordering;
pub mod roll;
pub mod segment;
pub mod sim;
pub mod sink;
pub mod upsert;

pub use feedback::{FeedbackEvent, PlaybackFeedback};
pub use ordering::{OrderingComparison, OrderingSourceEntry};
pub use roll::{should_prefetch, AttachOptions, Delivery, Roll, SchedulerState};
pub use segment::Segment;
pub use sink::{BufferState, SinkBackend, SinkChunk, SinkRejection, StreamSink};
pub use upsert::{MatchPredicate, UpsertAction, UpsertOptions, UpsertOutcome, UpsertRequest};
