//! # Playroll
//!
//! Gapless, queue-driven playout: a persistent ordered queue of media
//! segments and a scheduler ("roll") that feeds them just-in-time into a
//! bounded streaming sink.
//!
//! **Architecture:**
//! - [`db::queue::OrderedStore`] - SQLite-backed queue with index-shift semantics
//! - [`playback::sink::StreamSink`] - serializes appends and trims against a sink backend
//! - [`playback::roll::Roll`] - position-driven delivery, trimming, cycle and
//!   end-of-stream detection, ordering reconciliation and upserts

pub mod config;
pub mod db;
pub mod error;
pub mod playback;

pub use config::RollConfig;
pub use db::queue::{OrderedStore, QueueEntry};
pub use error::{Error, Result};
pub use playback::roll::{AttachOptions, Roll, SchedulerState};
pub use playback::sink::{SinkBackend, StreamSink};
pub use playroll_common::Metadata;
