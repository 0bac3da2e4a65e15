//! Duplex voice-interaction engine.
//!
//! Streams microphone audio to a remote conversational agent over a single
//! duplex session, plays the agent's synthesized replies gaplessly, and
//! dispatches the agent's structured tool invocations into a host-provided
//! commit sink. One session at a time; the session controller in
//! [`session`] owns the lifecycle end to end.

pub mod audio;
pub mod capture;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod net_link;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::EngineError;
pub use session::{SessionState, VoiceEngine};
