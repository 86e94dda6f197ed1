//! Playback-position feedback
//!
//! The roll never subscribes to a concrete notification mechanism. The
//! driver reads position and buffered extent through [`PlaybackFeedback`]
//! and forwards notifications as [`FeedbackEvent`]s, either one at a time
//! (`Roll::handle_event`) or over a channel (`Roll::run`).

/// Source of playback position and buffered extent, in seconds
pub trait PlaybackFeedback: Send {
    /// Current playback position
    fn position(&self) -> f64;

    /// End of the contiguous buffered range
    fn buffered_end(&self) -> f64;
}

/// Notifications driving the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackEvent {
    /// Periodic or position-change tick
    Tick,

    /// The sink finished its outstanding operation and is ready
    SinkReady,

    /// Playback reached its terminal end
    Ended,
}

/// Clamp a reported time to a finite, non-negative value
pub(crate) fn sanitize_time(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
