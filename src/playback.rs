//! Gapless playback scheduling.
//!
//! Inbound synthesized audio renders back-to-back in arrival order. Each
//! entry is scheduled at `max(next_start, now)` against the monotonic clock:
//! when delivery keeps up, entries butt up against each other with no gap and
//! never overlap; when delivery stalls, the next entry starts at "now",
//! opening an audible gap instead of a start in the past.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until};

use crate::audio::PlaybackSink;
use crate::codec;

pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    /// End instant of the last scheduled entry; `None` schedules at "now".
    next_start: Option<Instant>,
    /// Outstanding entries, so cancellation can force-stop every one of
    /// them. Entries remove themselves on natural completion; a `None` slot
    /// is an entry whose task has been spawned but not yet registered.
    entries: Arc<Mutex<HashMap<u64, Option<AbortHandle>>>>,
    next_entry_id: u64,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            next_start: None,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_entry_id: 0,
        }
    }

    /// Decode one inbound audio part and schedule it, returning its start
    /// instant. A malformed payload is logged and dropped without touching
    /// the schedule; the session continues. A zero sample rate is malformed
    /// the same way, since no duration can be derived from it.
    pub fn enqueue(&mut self, payload: &str, sample_rate: u32) -> Option<Instant> {
        if sample_rate == 0 {
            log::warn!("Dropping inbound audio part: sample rate 0");
            return None;
        }
        let samples = match codec::decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                log::warn!("Dropping inbound audio part: {}", e);
                return None;
            }
        };
        if samples.is_empty() {
            return None;
        }

        let duration = codec::duration_of(samples.len(), sample_rate);
        let now = Instant::now();
        let start = match self.next_start {
            Some(t) if t > now => t,
            _ => now,
        };
        self.next_start = Some(start + duration);

        let id = self.next_entry_id;
        self.next_entry_id += 1;
        let sink = self.sink.clone();
        let entries = self.entries.clone();

        // Reserve the slot first; the task removes it on completion, so a
        // vacant slot afterwards means the entry already finished and there
        // is no handle to keep.
        self.entries.lock().unwrap().insert(id, None);
        let task = tokio::spawn(async move {
            sleep_until(start).await;
            sink.render(samples, sample_rate);
            entries.lock().unwrap().remove(&id);
        });
        if let Some(slot) = self.entries.lock().unwrap().get_mut(&id) {
            *slot = Some(task.abort_handle());
        }

        Some(start)
    }

    /// Entries scheduled but not yet naturally completed.
    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Immediately halt in-flight audio, abort every queued entry, and reset
    /// the schedule so the next entry starts at "now". Used on stop and when
    /// the peer signals an interruption.
    pub fn cancel(&mut self) {
        let mut registry = self.entries.lock().unwrap();
        for (_, handle) in registry.drain() {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        drop(registry);
        self.sink.halt();
        self.next_start = None;
    }
}
