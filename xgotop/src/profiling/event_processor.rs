//! # Event Processing
//!
//! The reader loop decodes ring buffer records onto a bounded channel;
//! `--process-workers` threads drain it through an [`EventProcessor`].
//!
//! ## Per-event work
//!
//! - Fold into the shared [`Tracker`] (live view, summary)
//! - Append to the session store when recording
//! - Print one line in headless, non-silent mode
//!
//! Workers exit once the channel is closed and empty, so dropping the sender
//! drains everything already read.
//!
//! The reader never blocks on the channel: a record that finds it full is
//! counted as dropped, and at most [`DRAIN_BATCH`] records are taken from the
//! ring buffer before the reader yields back to its timers and stop checks.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, warn};
use tokio::sync::broadcast;
use xgotop_common::GoRuntimeEvent;

use super::event_display::format_event;
use super::metrics::PipelineCounters;
use crate::storage::EventStore;
use crate::tracker::Tracker;

/// Capacity of the reader → worker channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1_000_000;

/// Ring buffer records handled per reader wakeup
pub const DRAIN_BATCH: usize = 4096;

/// What happened to one ring buffer record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forwarded {
    Queued,
    /// Shorter than one event
    Short,
    /// Channel full
    Dropped,
    /// Every worker is gone
    Disconnected,
}

/// Decode one ring buffer record and hand it to the workers without blocking
pub fn forward_record(
    bytes: &[u8],
    tx: &Sender<GoRuntimeEvent>,
    counters: &PipelineCounters,
) -> Forwarded {
    counters.record_read();
    let Some(event) = GoRuntimeEvent::from_bytes(bytes) else {
        counters.record_short();
        return Forwarded::Short;
    };
    match tx.try_send(event) {
        Ok(()) => Forwarded::Queued,
        Err(TrySendError::Full(_)) => {
            counters.record_dropped();
            Forwarded::Dropped
        }
        Err(TrySendError::Disconnected(_)) => Forwarded::Disconnected,
    }
}

/// Per-event processing shared by all workers
#[derive(Clone)]
pub struct EventProcessor {
    tracker: Arc<Mutex<Tracker>>,
    counters: Arc<PipelineCounters>,
    store: Option<Arc<dyn EventStore>>,
    live: Option<broadcast::Sender<GoRuntimeEvent>>,
    log_events: bool,
}

impl EventProcessor {
    #[must_use]
    pub fn new(tracker: Arc<Mutex<Tracker>>, counters: Arc<PipelineCounters>) -> Self {
        Self { tracker, counters, store: None, live: None, log_events: false }
    }

    /// Also persist every event to `store`
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish every processed event to live stream subscribers
    #[must_use]
    pub fn with_live_stream(mut self, live: broadcast::Sender<GoRuntimeEvent>) -> Self {
        self.live = Some(live);
        self
    }

    /// Print one line per event to stdout
    #[must_use]
    pub fn with_event_log(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Process a single event
    pub fn process(&self, worker: usize, event: &GoRuntimeEvent) {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner).apply(event);

        if let Some(store) = &self.store {
            if let Err(e) = store.write_event(event) {
                // Only the first failure is worth a line; the rest show in the summary
                if self.counters.record_store_error() == 1 {
                    warn!("[PW-{worker}] Failed to write event to storage: {e}");
                }
            }
        }

        if let Some(live) = &self.live {
            // No subscribers is not an error
            let _ = live.send(*event);
        }

        if self.log_events {
            println!("{}", format_event(worker, event));
        }

        self.counters.record_processed(event.handler_duration_ns);
    }
}

/// Spawn `count` processing workers draining `rx`
///
/// # Errors
/// Thread creation failure
pub fn spawn_workers(
    processor: &EventProcessor,
    rx: &Receiver<GoRuntimeEvent>,
    count: u32,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    (0..count as usize)
        .map(|id| {
            let processor = processor.clone();
            let rx = rx.clone();
            std::thread::Builder::new().name(format!("xgotop-pw-{id}")).spawn(move || {
                debug!("[PW-{id}] started");
                for event in &rx {
                    processor.process(id, &event);
                }
                debug!("[PW-{id}] channel drained");
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EventFilter, JsonlStore, Session};
    use crossbeam_channel::bounded;
    use xgotop_common::EventType;

    fn alloc(g: u64, size: u64) -> GoRuntimeEvent {
        GoRuntimeEvent::stamped(EventType::AllocateObject, 0, 40, g, 1, [size, 25, 0, 0, 0])
    }

    #[test]
    fn test_workers_drain_closed_channel() {
        let tracker = Arc::new(Mutex::new(Tracker::new()));
        let counters = Arc::new(PipelineCounters::default());
        let processor = EventProcessor::new(Arc::clone(&tracker), Arc::clone(&counters));

        let (tx, rx) = bounded(16);
        let workers = spawn_workers(&processor, &rx, 3).unwrap();
        drop(rx);
        for g in 1..=10 {
            counters.record_read();
            tx.send(alloc(g, 8)).unwrap();
        }
        drop(tx);
        for handle in workers {
            handle.join().unwrap();
        }

        assert_eq!(counters.processed(), 10);
        assert_eq!(counters.waiting(), 0);
        assert_eq!(counters.mean_latency_ns(), Some(40));
        let tracker = tracker.lock().unwrap();
        assert_eq!(tracker.total_allocated().bytes, 80);
        assert_eq!(tracker.top_goroutines(100).len(), 10);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let counters = PipelineCounters::default();
        let (tx, rx) = bounded(2);

        for g in 1..=5 {
            let outcome = forward_record(&alloc(g, 8).to_bytes(), &tx, &counters);
            let expected = if g <= 2 { Forwarded::Queued } else { Forwarded::Dropped };
            assert_eq!(outcome, expected, "record {g}");
        }
        assert_eq!(counters.read(), 5);
        assert_eq!(counters.dropped(), 3);
        assert_eq!(counters.waiting(), 2);
        assert_eq!(rx.try_iter().map(|e| e.goroutine).collect::<Vec<_>>(), vec![1, 2]);

        assert_eq!(forward_record(&alloc(6, 8).to_bytes(), &tx, &counters), Forwarded::Queued);
    }

    #[test]
    fn test_short_and_orphaned_records() {
        let counters = PipelineCounters::default();
        let (tx, rx) = bounded(4);

        assert_eq!(forward_record(&[0u8; 10], &tx, &counters), Forwarded::Short);
        assert_eq!(counters.short_records(), 1);
        assert_eq!(counters.waiting(), 0);

        drop(rx);
        let outcome = forward_record(&alloc(1, 8).to_bytes(), &tx, &counters);
        assert_eq!(outcome, Forwarded::Disconnected);
        assert_eq!(counters.dropped(), 0);
    }

    #[test]
    fn test_processed_events_reach_live_subscribers() {
        let (live, mut sub) = broadcast::channel(8);
        let processor = EventProcessor::new(
            Arc::new(Mutex::new(Tracker::new())),
            Arc::new(PipelineCounters::default()),
        )
        .with_live_stream(live);

        processor.process(0, &alloc(9, 48));
        assert_eq!(sub.try_recv().unwrap(), alloc(9, 48));
    }

    #[test]
    fn test_events_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn EventStore> =
            Arc::new(JsonlStore::create(dir.path(), Session::new(None, "app")).unwrap());
        let processor = EventProcessor::new(
            Arc::new(Mutex::new(Tracker::new())),
            Arc::new(PipelineCounters::default()),
        )
        .with_store(Arc::clone(&store));

        processor.process(0, &alloc(3, 16));
        processor.process(0, &alloc(4, 32));

        let stored = store.read_events(&EventFilter::default()).unwrap();
        assert_eq!(stored, vec![alloc(3, 16), alloc(4, 32)]);
        assert_eq!(store.session().event_count, 2);
    }
}
