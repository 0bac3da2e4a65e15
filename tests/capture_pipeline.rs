//! Chunking and shutdown behavior of the microphone capture pipeline,
//! against scripted in-memory input devices.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use voice_intake_rs::audio::InputDevice;
use voice_intake_rs::capture::CapturePipeline;
use voice_intake_rs::codec;
use voice_intake_rs::error::EngineError;
use voice_intake_rs::protocol::OutboundAudioFrame;

const RATE: u32 = 16_000;
const CHUNK: usize = 4096;

/// Serves a fixed script of read sizes, then reports end of stream.
struct ScriptedMic {
    reads: Vec<usize>,
    cursor: usize,
}

impl ScriptedMic {
    fn new(reads: &[usize]) -> Self {
        Self {
            reads: reads.to_vec(),
            cursor: 0,
        }
    }
}

impl InputDevice for ScriptedMic {
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, EngineError> {
        let Some(&n) = self.reads.get(self.cursor) else {
            return Ok(0);
        };
        self.cursor += 1;
        let n = n.min(buf.len());
        for slot in &mut buf[..n] {
            *slot = 0.5;
        }
        Ok(n)
    }
}

async fn collect_frames(mut rx: mpsc::Receiver<OutboundAudioFrame>) -> Vec<OutboundAudioFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

#[tokio::test(flavor = "multi_thread")]
async fn chunks_are_fixed_size_with_short_trailing_frame() {
    let (tx, rx) = mpsc::channel(1);
    let mut pipeline = CapturePipeline::start(
        Box::new(ScriptedMic::new(&[4096, 4096, 1000])),
        CHUNK,
        RATE,
        tx,
    )
    .unwrap();

    let frames = collect_frames(rx).await;
    pipeline.stop();

    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| codec::decode(&f.data).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![4096, 4096, 1000]);
    assert!(frames.iter().all(|f| f.sample_rate == RATE));
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_reads_accumulate_into_full_chunks() {
    let (tx, rx) = mpsc::channel(1);
    let mut pipeline = CapturePipeline::start(
        Box::new(ScriptedMic::new(&[1000, 3096, 4000, 96, 904])),
        CHUNK,
        RATE,
        tx,
    )
    .unwrap();

    let frames = collect_frames(rx).await;
    pipeline.stop();

    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| codec::decode(&f.data).unwrap().len())
        .collect();
    assert_eq!(sizes, vec![4096, 4096, 904]);
}

/// Keeps serving audio until told to stop, and records its release.
struct TrackedMic {
    released: Arc<AtomicUsize>,
}

impl InputDevice for TrackedMic {
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, EngineError> {
        std::thread::sleep(Duration::from_millis(2));
        let n = 600.min(buf.len());
        for slot in &mut buf[..n] {
            *slot = 0.1;
        }
        Ok(n)
    }
}

impl Drop for TrackedMic {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_releases_device_and_flushes_partial_chunk() {
    let released = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel(1);
    let mut pipeline = CapturePipeline::start(
        Box::new(TrackedMic {
            released: released.clone(),
        }),
        CHUNK,
        RATE,
        tx,
    )
    .unwrap();

    // Drain concurrently so the pipeline is never wedged on a full channel.
    let drain = tokio::spawn(collect_frames(rx));
    tokio::time::sleep(Duration::from_millis(60)).await;

    pipeline.stop();
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let frames = drain.await.unwrap();
    assert!(!frames.is_empty());
    let sizes: Vec<usize> = frames
        .iter()
        .map(|f| codec::decode(&f.data).unwrap().len())
        .collect();
    // Every frame but the flushed tail is exactly one chunk.
    for &size in &sizes[..sizes.len() - 1] {
        assert_eq!(size, CHUNK);
    }
    let tail = *sizes.last().unwrap();
    assert!(tail >= 1 && tail <= CHUNK, "tail frame was {} samples", tail);
}
