//! Engine error taxonomy.

use thiserror::Error;

/// Errors produced by the voice engine.
///
/// Only `DeviceUnavailable` and `Transport` ever escape to the caller; the
/// remaining variants are resolved inside the session (logged, or reported
/// back to the remote peer on the wire).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The capture or playback device could not be acquired. Fatal to `start()`.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The duplex connection dropped or refused the handshake. Terminal for
    /// the session; a fresh `start()` is the only recovery.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single inbound audio frame could not be decoded. The frame is
    /// dropped, the session continues.
    #[error("malformed audio payload: {0}")]
    MalformedPayload(String),

    /// Tool arguments failed schema validation. Reported to the remote peer
    /// as a response, never fatal.
    #[error("tool arguments rejected: {0}")]
    ValidationFailed(String),

    /// `start()` was called while a session is already live.
    #[error("a session is already active")]
    SessionActive,
}
