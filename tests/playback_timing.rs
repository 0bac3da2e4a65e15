//! Scheduling behavior of the playback queue, driven on tokio's paused clock
//! so timing assertions are exact.

use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant, advance, sleep};

use voice_intake_rs::audio::PlaybackSink;
use voice_intake_rs::codec;
use voice_intake_rs::playback::PlaybackScheduler;

const RATE: u32 = 24_000;

#[derive(Default)]
struct RecordingSink {
    rendered: Mutex<Vec<(Instant, usize)>>,
    halts: Mutex<usize>,
}

impl PlaybackSink for RecordingSink {
    fn render(&self, samples: Vec<f32>, _sample_rate: u32) {
        self.rendered
            .lock()
            .unwrap()
            .push((Instant::now(), samples.len()));
    }

    fn halt(&self) {
        *self.halts.lock().unwrap() += 1;
    }

    fn close(&self) {}
}

impl RecordingSink {
    fn rendered(&self) -> Vec<(Instant, usize)> {
        self.rendered.lock().unwrap().clone()
    }

    fn halts(&self) -> usize {
        *self.halts.lock().unwrap()
    }
}

/// One synthesized part of the given length in seconds.
fn part(seconds: f64) -> String {
    let samples = vec![0.25f32; (seconds * RATE as f64) as usize];
    codec::encode(&samples)
}

#[tokio::test(start_paused = true)]
async fn back_to_back_parts_schedule_gapless() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());
    let t0 = Instant::now();

    let s1 = scheduler.enqueue(&part(0.5), RATE).unwrap();
    let s2 = scheduler.enqueue(&part(0.3), RATE).unwrap();
    let s3 = scheduler.enqueue(&part(0.2), RATE).unwrap();

    assert_eq!(s1, t0);
    assert_eq!(s2, t0 + Duration::from_millis(500));
    assert_eq!(s3, t0 + Duration::from_millis(800));
    assert_eq!(scheduler.pending(), 3);

    sleep(Duration::from_millis(1100)).await;

    let rendered = sink.rendered();
    assert_eq!(rendered.len(), 3);
    assert_eq!(rendered[0], (t0, 12_000));
    assert_eq!(rendered[1], (t0 + Duration::from_millis(500), 7_200));
    assert_eq!(rendered[2], (t0 + Duration::from_millis(800), 4_800));
    assert_eq!(scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_delivery_schedules_at_arrival() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());
    let t0 = Instant::now();

    scheduler.enqueue(&part(0.5), RATE).unwrap();
    // The peer stalls well past the end of the first part.
    sleep(Duration::from_millis(1500)).await;

    let s2 = scheduler.enqueue(&part(0.3), RATE).unwrap();
    let s3 = scheduler.enqueue(&part(0.2), RATE).unwrap();
    assert_eq!(s2, t0 + Duration::from_millis(1500));
    assert_eq!(s3, t0 + Duration::from_millis(1800));

    sleep(Duration::from_millis(600)).await;
    let rendered = sink.rendered();
    assert_eq!(rendered.len(), 3);
    assert_eq!(rendered[1].0, t0 + Duration::from_millis(1500));
    assert_eq!(rendered[2].0, t0 + Duration::from_millis(1800));
}

#[tokio::test(start_paused = true)]
async fn cancel_clears_entries_and_resets_schedule() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    scheduler.enqueue(&part(0.5), RATE).unwrap();
    scheduler.enqueue(&part(0.5), RATE).unwrap();
    assert_eq!(scheduler.pending(), 2);

    scheduler.cancel();
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(sink.halts(), 1);

    // Give the aborted tasks a chance to run if they were going to.
    advance(Duration::from_millis(2000)).await;
    assert!(sink.rendered().is_empty());

    // The schedule restarts at "now", not after the cancelled tail.
    let restart = scheduler.enqueue(&part(0.1), RATE).unwrap();
    assert_eq!(restart, Instant::now());
}

#[tokio::test(start_paused = true)]
async fn zero_sample_rate_part_is_dropped_in_isolation() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());
    let t0 = Instant::now();

    // A rate of zero has no derivable duration; the part is dropped like any
    // other malformed payload and must not take the scheduler down.
    assert!(scheduler.enqueue(&part(0.5), 0).is_none());
    assert_eq!(scheduler.pending(), 0);

    let start = scheduler.enqueue(&part(0.1), RATE).unwrap();
    assert_eq!(start, t0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.rendered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn instantly_due_entries_never_linger_in_the_registry() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());

    // A one-sample part is due immediately and completes on the first poll.
    let tiny = codec::encode(&[0.5f32]);
    scheduler.enqueue(&tiny, RATE).unwrap();
    scheduler.enqueue(&tiny, RATE).unwrap();

    sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.rendered().len(), 2);
    assert_eq!(scheduler.pending(), 0);

    // Cancelling after natural completion has nothing left to abort.
    scheduler.cancel();
    assert_eq!(sink.rendered().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_part_is_dropped_in_isolation() {
    let sink = Arc::new(RecordingSink::default());
    let mut scheduler = PlaybackScheduler::new(sink.clone());
    let t0 = Instant::now();

    // Valid base64, but an odd byte count cannot be PCM16.
    assert!(scheduler.enqueue("AA==", RATE).is_none());
    assert!(scheduler.enqueue("not base64!!!", RATE).is_none());
    assert_eq!(scheduler.pending(), 0);

    let start = scheduler.enqueue(&part(0.1), RATE).unwrap();
    assert_eq!(start, t0);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.rendered().len(), 1);
}
