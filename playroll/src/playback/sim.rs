//! In-process simulated sink and playback clock
//!
//! Models a media-source-like buffer: each media chunk extends the buffered
//! extent by a fixed duration, the clock advances through it and stalls at
//! its end, and every append or removal keeps the sink busy until
//! [`SimulatedPlayout::complete_pending`] is called. Used by the `simulate`
//! command and by tests.

use super::feedback::PlaybackFeedback;
use super::sink::{ChunkKind, SinkBackend, SinkChunk, SinkRejection};
use std::sync::{Arc, Mutex, MutexGuard};

/// Operation observed by the simulated sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    AddStream(String),
    Append {
        stream_tag: String,
        bytes: Vec<u8>,
        kind: ChunkKind,
    },
    Rejected {
        stream_tag: String,
    },
    Remove {
        start: f64,
        end: f64,
    },
    EndOfStream,
    Release,
}

#[derive(Debug)]
struct SimState {
    segment_seconds: f64,
    busy: bool,
    open: bool,
    ended: bool,
    released: bool,
    position: f64,
    buffered_end: f64,
    trimmed_until: f64,
    rejections_left: usize,
    stream_rejections_left: usize,
    calls: Vec<SinkCall>,
}

/// Shared handle to one simulated playout
#[derive(Debug, Clone)]
pub struct SimulatedPlayout {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedPlayout {
    /// Each media chunk adds `segment_seconds` to the buffered extent
    pub fn new(segment_seconds: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                segment_seconds,
                busy: false,
                open: true,
                ended: false,
                released: false,
                position: 0.0,
                buffered_end: 0.0,
                trimmed_until: 0.0,
                rejections_left: 0,
                stream_rejections_left: 0,
                calls: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the state from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sink(&self) -> SimulatedSink {
        SimulatedSink {
            playout: self.clone(),
        }
    }

    pub fn clock(&self) -> SimulatedClock {
        SimulatedClock {
            playout: self.clone(),
        }
    }

    /// Finish the outstanding operation; returns whether one was pending
    pub fn complete_pending(&self) -> bool {
        let mut state = self.state();
        std::mem::replace(&mut state.busy, false)
    }

    /// Play forward, stalling at the buffered end
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state();
        state.position = (state.position + seconds).min(state.buffered_end);
    }

    pub fn set_position(&self, position: f64) {
        self.state().position = position;
    }

    pub fn set_buffered_end(&self, buffered_end: f64) {
        self.state().buffered_end = buffered_end;
    }

    pub fn set_busy(&self, busy: bool) {
        self.state().busy = busy;
    }

    /// Reject the next `count` appends as malformed
    pub fn reject_next_appends(&self, count: usize) {
        self.state().rejections_left = count;
    }

    /// Refuse the next `count` stream declarations
    pub fn reject_next_stream_declarations(&self, count: usize) {
        self.state().stream_rejections_left = count;
    }

    pub fn position(&self) -> f64 {
        self.state().position
    }

    pub fn buffered_end(&self) -> f64 {
        self.state().buffered_end
    }

    /// Start of the range still held after trims
    pub fn trimmed_until(&self) -> f64 {
        self.state().trimmed_until
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub fn is_ended(&self) -> bool {
        self.state().ended
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.state().calls.clone()
    }

    /// Media payloads accepted so far, in order
    pub fn media_payloads(&self) -> Vec<Vec<u8>> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Append {
                    bytes,
                    kind: ChunkKind::Media,
                    ..
                } => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn removals(&self) -> Vec<(f64, f64)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                SinkCall::Remove { start, end } => Some((*start, *end)),
                _ => None,
            })
            .collect()
    }
}

/// [`SinkBackend`] half of a simulated playout
#[derive(Debug)]
pub struct SimulatedSink {
    playout: SimulatedPlayout,
}

impl SinkBackend for SimulatedSink {
    fn is_busy(&self) -> bool {
        self.playout.state().busy
    }

    fn is_open(&self) -> bool {
        self.playout.state().open
    }

    fn add_stream(&mut self, stream_tag: &str) -> Result<(), SinkRejection> {
        let mut state = self.playout.state();
        if !state.open {
            return Err(SinkRejection::Closed);
        }
        if state.stream_rejections_left > 0 {
            state.stream_rejections_left -= 1;
            return Err(SinkRejection::Malformed(format!("unsupported stream '{}'", stream_tag)));
        }
        state.calls.push(SinkCall::AddStream(stream_tag.to_string()));
        Ok(())
    }

    fn append(&mut self, chunk: SinkChunk<'_>) -> Result<(), SinkRejection> {
        let mut state = self.playout.state();
        if !state.open {
            return Err(SinkRejection::Closed);
        }
        if state.busy {
            return Err(SinkRejection::Busy);
        }
        if state.rejections_left > 0 {
            state.rejections_left -= 1;
            state.calls.push(SinkCall::Rejected {
                stream_tag: chunk.stream_tag.to_string(),
            });
            return Err(SinkRejection::Malformed("simulated rejection".to_string()));
        }

        if chunk.kind == ChunkKind::Media {
            state.buffered_end += state.segment_seconds;
        }
        state.busy = true;
        state.calls.push(SinkCall::Append {
            stream_tag: chunk.stream_tag.to_string(),
            bytes: chunk.bytes.to_vec(),
            kind: chunk.kind,
        });
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkRejection> {
        let mut state = self.playout.state();
        if !state.open {
            return Err(SinkRejection::Closed);
        }
        if state.busy {
            return Err(SinkRejection::Busy);
        }

        if start <= state.trimmed_until {
            state.trimmed_until = state.trimmed_until.max(end.min(state.buffered_end));
        }
        state.busy = true;
        state.calls.push(SinkCall::Remove { start, end });
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), SinkRejection> {
        let mut state = self.playout.state();
        state.open = false;
        state.ended = true;
        state.calls.push(SinkCall::EndOfStream);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.playout.state();
        state.released = true;
        state.calls.push(SinkCall::Release);
    }
}

/// [`PlaybackFeedback`] half of a simulated playout
#[derive(Debug)]
pub struct SimulatedClock {
    playout: SimulatedPlayout,
}

impl PlaybackFeedback for SimulatedClock {
    fn position(&self) -> f64 {
        self.playout.position()
    }

    fn buffered_end(&self) -> f64 {
        self.playout.buffered_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_extends_buffer_and_clock_stalls() {
        let playout = SimulatedPlayout::new(2.0);
        let mut sink = playout.sink();

        sink.append(SinkChunk {
            stream_tag: "a",
            bytes: b"hdr",
            kind: ChunkKind::Init,
        })
        .unwrap();
        assert_eq!(playout.buffered_end(), 0.0);
        assert_eq!(sink.append(SinkChunk {
            stream_tag: "a",
            bytes: b"x",
            kind: ChunkKind::Media,
        }), Err(SinkRejection::Busy));

        playout.complete_pending();
        sink.append(SinkChunk {
            stream_tag: "a",
            bytes: b"x",
            kind: ChunkKind::Media,
        })
        .unwrap();
        assert_eq!(playout.buffered_end(), 2.0);

        playout.advance(5.0);
        assert_eq!(playout.position(), 2.0);
        assert_eq!(playout.clock().position(), 2.0);
    }

    #[test]
    fn test_remove_advances_trim_point() {
        let playout = SimulatedPlayout::new(2.0);
        playout.set_buffered_end(6.0);
        let mut sink = playout.sink();

        sink.remove(0.0, 4.0).unwrap();
        assert_eq!(playout.trimmed_until(), 4.0);
        assert!(playout.is_busy());
        assert_eq!(playout.removals(), vec![(0.0, 4.0)]);
    }
}
