//! ALSA-backed implementations of the device seams.
//!
//! Playback rendering runs on a dedicated OS thread (NOT a tokio task) fed
//! by a channel, so the async scheduler never blocks on device writes.

use std::sync::{Arc, Mutex};
use std::thread;

use alsa::pcm::PCM;
use tokio::sync::mpsc;

use super::alsa_device;
use super::{AudioBackend, InputDevice, PlaybackSink};
use crate::error::EngineError;

/// Opens the configured ALSA devices, one pair per session.
pub struct AlsaBackend {
    capture_device: String,
    playback_device: String,
}

impl AlsaBackend {
    pub fn new(capture_device: impl Into<String>, playback_device: impl Into<String>) -> Self {
        Self {
            capture_device: capture_device.into(),
            playback_device: playback_device.into(),
        }
    }
}

impl AudioBackend for AlsaBackend {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputDevice>, EngineError> {
        let (pcm, params) = alsa_device::open_capture(&self.capture_device, sample_rate)
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
        // The wire rate is fixed; there is no resampler in this pipeline.
        if params.sample_rate != sample_rate {
            return Err(EngineError::DeviceUnavailable(format!(
                "capture device '{}' negotiated {} Hz, need {} Hz",
                self.capture_device, params.sample_rate, sample_rate
            )));
        }
        Ok(Box::new(AlsaInput {
            pcm,
            scratch: Vec::new(),
        }))
    }

    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn PlaybackSink>, EngineError> {
        let (pcm, params) =
            alsa_device::open_playback(&self.playback_device, sample_rate, Some(1024))
                .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
        if params.sample_rate != sample_rate {
            return Err(EngineError::DeviceUnavailable(format!(
                "playback device '{}' negotiated {} Hz, need {} Hz",
                self.playback_device, params.sample_rate, sample_rate
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name("audio-render".into())
            .spawn(move || render_thread(pcm, rx))
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        Ok(Arc::new(AlsaSink {
            tx,
            handle: Mutex::new(Some(handle)),
        }))
    }
}

// ======================== Capture ========================

struct AlsaInput {
    pcm: PCM,
    scratch: Vec<i16>,
}

impl InputDevice for AlsaInput {
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, EngineError> {
        self.scratch.resize(buf.len(), 0);
        let frames = {
            let io = self
                .pcm
                .io_i16()
                .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;
            match io.readi(&mut self.scratch) {
                Ok(frames) => frames,
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    self.pcm
                        .prepare()
                        .map_err(|e2| EngineError::DeviceUnavailable(e2.to_string()))?;
                    io.readi(&mut self.scratch)
                        .map_err(|e2| EngineError::DeviceUnavailable(e2.to_string()))?
                }
            }
        };
        for (slot, &sample) in buf.iter_mut().zip(&self.scratch[..frames]) {
            *slot = sample as f32 / 32768.0;
        }
        Ok(frames)
    }
}

// ======================== Playback ========================

enum RenderCommand {
    Pcm(Vec<i16>),
    Halt,
    Shutdown,
}

struct AlsaSink {
    tx: mpsc::UnboundedSender<RenderCommand>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PlaybackSink for AlsaSink {
    fn render(&self, samples: Vec<f32>, _sample_rate: u32) {
        let pcm: Vec<i16> = samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        if self.tx.send(RenderCommand::Pcm(pcm)).is_err() {
            log::warn!("Render thread gone, dropping playback buffer");
        }
    }

    fn halt(&self) {
        let _ = self.tx.send(RenderCommand::Halt);
    }

    fn close(&self) {
        let _ = self.tx.send(RenderCommand::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn render_thread(pcm: PCM, mut rx: mpsc::UnboundedReceiver<RenderCommand>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            RenderCommand::Shutdown => break,
            RenderCommand::Halt => {
                // snd_pcm_drop discards whatever the device has buffered
                if let Err(e) = pcm.drop() {
                    log::warn!("ALSA drop failed: {}", e);
                }
                if let Err(e) = pcm.prepare() {
                    log::error!("Failed to recover PCM playback: {}", e);
                    break;
                }
                // Buffers queued behind the halt belong to cancelled entries
                while rx.try_recv().is_ok() {}
            }
            RenderCommand::Pcm(data) => {
                let io = match pcm.io_i16() {
                    Ok(io) => io,
                    Err(e) => {
                        log::error!("ALSA playback io error: {}", e);
                        break;
                    }
                };
                // Retry loop handles short writes and XRUN recovery without
                // losing frames.
                let mut written = 0;
                while written < data.len() {
                    match io.writei(&data[written..]) {
                        Ok(frames) => written += frames,
                        Err(e) => {
                            log::warn!("ALSA playback error: {}, recovering...", e);
                            if let Err(e2) = pcm.prepare() {
                                log::error!("Failed to recover PCM playback: {}", e2);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
    log::info!("Playback render thread exiting");
}
