//! Database access layer
//!
//! Provides the persistent ordered queue.

pub mod queue;
