//! audio - device seams and the ALSA implementation.
//!
//! Device access sits behind traits so each session owns its devices
//! exclusively for its lifetime and tests can run several engine instances
//! against fake hardware.

mod alsa_backend;
mod alsa_device;

pub use alsa_backend::AlsaBackend;

use std::sync::Arc;

use crate::error::EngineError;

/// Exclusive handle to an open capture device.
pub trait InputDevice: Send {
    /// Read up to `buf.len()` mono samples in [-1, 1]. `Ok(0)` means end of
    /// stream; the capture pipeline flushes its partial chunk and exits.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize, EngineError>;
}

/// Renders decoded buffers. The playback scheduler calls `render` at each
/// entry's scheduled start instant, never earlier.
pub trait PlaybackSink: Send + Sync {
    /// Queue one decoded buffer for immediate rendering.
    fn render(&self, samples: Vec<f32>, sample_rate: u32);
    /// Stop whatever is rendering right now and discard queued audio.
    fn halt(&self);
    /// Release the output device, blocking until it is free. Session
    /// teardown calls this last, after `halt`; `render` after `close` is a
    /// no-op.
    fn close(&self);
}

/// Opens the capture and playback devices for one session.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, sample_rate: u32) -> Result<Box<dyn InputDevice>, EngineError>;
    fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn PlaybackSink>, EngineError>;
}
