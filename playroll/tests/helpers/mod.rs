//! Shared fixtures for playroll integration tests
//!
//! - `seeded_store`: in-memory store holding `seg{i}` payloads named `f{i}.m4s`
//! - `StillClock`: feedback source pinned at zero, so only explicit
//!   `deliver_next` calls push segments
//! - `step`: one simulated driver iteration (complete, ready, advance, tick)

#![allow(dead_code)]

use playroll::playback::sim::SimulatedPlayout;
use playroll::playback::{FeedbackEvent, PlaybackFeedback};
use playroll::{AttachOptions, Metadata, OrderedStore, Roll, StreamSink};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SEGMENT_SECONDS: f64 = 2.0;

pub fn payload(i: usize) -> Vec<u8> {
    format!("seg{}", i).into_bytes()
}

pub fn filename(i: usize) -> String {
    format!("f{}.m4s", i)
}

pub async fn seeded_store(count: usize) -> OrderedStore {
    let store = OrderedStore::open_in_memory().await.unwrap();
    for i in 0..count {
        store
            .add(Some(payload(i).as_slice()), &Metadata::with_filename(filename(i)), None)
            .await
            .unwrap();
    }
    store
}

/// Ids in queue order
pub async fn ids_in_order(store: &OrderedStore) -> Vec<i64> {
    store.get_all().await.unwrap().iter().map(|e| e.id).collect()
}

/// Asserts indices are exactly `0..count` in order
pub async fn assert_dense(store: &OrderedStore) {
    let indices: Vec<i64> = store
        .get_all()
        .await
        .unwrap()
        .iter()
        .map(|e| e.queue_index)
        .collect();
    let expected: Vec<i64> = (0..indices.len() as i64).collect();
    assert_eq!(indices, expected, "queue indices not dense");
}

#[derive(Debug, Clone, Copy)]
pub struct StillClock;

impl PlaybackFeedback for StillClock {
    fn position(&self) -> f64 {
        0.0
    }

    fn buffered_end(&self) -> f64 {
        0.0
    }
}

/// Counts callback invocations
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn callback(&self) -> impl FnMut() + Send + 'static {
        let inner = Arc::clone(&self.0);
        move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Roll attached to a simulated sink and clock
pub async fn attach_simulated(
    store: OrderedStore,
    threshold_seconds: f64,
    configure: impl FnOnce(&mut Roll),
) -> (Roll, SimulatedPlayout) {
    let playout = SimulatedPlayout::new(SEGMENT_SECONDS);
    let mut roll = Roll::new(store);
    configure(&mut roll);
    roll.attach_buffer(
        StreamSink::new(Box::new(playout.sink())),
        playout.clock(),
        AttachOptions::default().with_threshold(threshold_seconds),
    )
    .await
    .unwrap();
    (roll, playout)
}

/// Roll attached to a simulated sink but a frozen clock
pub async fn attach_still(store: OrderedStore, configure: impl FnOnce(&mut Roll)) -> (Roll, SimulatedPlayout) {
    let playout = SimulatedPlayout::new(SEGMENT_SECONDS);
    let mut roll = Roll::new(store);
    configure(&mut roll);
    roll.attach_buffer(
        StreamSink::new(Box::new(playout.sink())),
        StillClock,
        AttachOptions::default(),
    )
    .await
    .unwrap();
    (roll, playout)
}

/// Let the sink finish its outstanding operation and report readiness
pub async fn settle(roll: &mut Roll, playout: &SimulatedPlayout) {
    if playout.complete_pending() {
        roll.handle_event(FeedbackEvent::SinkReady).await;
    }
}

/// One driver iteration: settle the sink, play `seconds`, then tick
pub async fn step(roll: &mut Roll, playout: &SimulatedPlayout, seconds: f64) {
    settle(roll, playout).await;
    playout.advance(seconds);
    roll.handle_event(FeedbackEvent::Tick).await;
}
