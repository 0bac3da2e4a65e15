//! Microphone capture pipeline.
//!
//! Uses a dedicated OS thread (NOT a tokio task) for real-time device reads,
//! so capture is never starved by async network work. The thread reads the
//! exclusively-owned input device in fixed-size chunks, encodes each chunk,
//! and pushes it into the transport's outbound channel. That channel is
//! bounded to one in-flight chunk, which is the pipeline's whole
//! back-pressure story.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::audio::InputDevice;
use crate::codec;
use crate::protocol::OutboundAudioFrame;

pub struct CapturePipeline {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start capturing. The pipeline owns `device` until the thread exits and
    /// drops it there, so the device is released even mid-chunk.
    pub fn start(
        device: Box<dyn InputDevice>,
        chunk_samples: usize,
        sample_rate: u32,
        tx: mpsc::Sender<OutboundAudioFrame>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || capture_thread(device, chunk_samples, sample_rate, tx, &running))?
        };
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Ask the capture thread to wind down without waiting for it.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Signal the thread and wait until the device has been released. The
    /// frame receiver must be closed, dropped or draining or the flush can
    /// block.
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    mut device: Box<dyn InputDevice>,
    chunk_samples: usize,
    sample_rate: u32,
    tx: mpsc::Sender<OutboundAudioFrame>,
    running: &AtomicBool,
) {
    let mut accum: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
    let mut read_buf = vec![0f32; chunk_samples];

    log::info!("Capture started: rate={}, chunk={}", sample_rate, chunk_samples);

    while running.load(Ordering::Relaxed) {
        match device.read(&mut read_buf) {
            Ok(0) => break, // end of stream
            Ok(n) => {
                accum.extend_from_slice(&read_buf[..n]);
                while accum.len() >= chunk_samples {
                    let frame = OutboundAudioFrame {
                        data: codec::encode(&accum[..chunk_samples]),
                        sample_rate,
                    };
                    if tx.blocking_send(frame).is_err() {
                        log::warn!("Outbound frame receiver dropped, stopping capture");
                        return;
                    }
                    accum.drain(..chunk_samples);
                }
            }
            Err(e) => {
                log::error!("Capture device error: {}", e);
                break;
            }
        }
    }

    // The trailing partial chunk goes out as-is, unpadded; short frames are
    // the peer's problem.
    if !accum.is_empty() {
        let frame = OutboundAudioFrame {
            data: codec::encode(&accum),
            sample_rate,
        };
        let _ = tx.blocking_send(frame);
    }

    log::info!("Capture stopped");
}
