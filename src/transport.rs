//! Session transport seam.
//!
//! The remote conversational agent is reachable only through this seam: a
//! factory opens one duplex session and hands back a write half plus a
//! single-consumer ordered event channel. An explicit channel replaces
//! callback reentrancy, so delivery order is exactly the order the peer sent.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::protocol::{InboundMessage, OutboundAudioFrame, ToolDeclaration, ToolInvocationResponse};

/// Everything the factory needs to open one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system_prompt: String,
    /// Declared once at open so the peer knows what it may call.
    pub tools: Vec<ToolDeclaration>,
    /// Microphone rate on the wire (Hz).
    pub audio_in_rate: u32,
    /// Synthesized-speech rate on the wire (Hz).
    pub audio_out_rate: u32,
}

/// Events read off the open session.
#[derive(Debug)]
pub enum TransportEvent {
    Message(InboundMessage),
    /// The peer ended the session cleanly.
    Closed { reason: String },
    /// The connection dropped. Terminal; no automatic reconnect.
    Failed(String),
}

/// Write half of an open session.
#[async_trait]
pub trait SessionTransport: Send {
    async fn send_audio(&mut self, frame: OutboundAudioFrame) -> Result<(), EngineError>;
    async fn send_tool_response(
        &mut self,
        response: ToolInvocationResponse,
    ) -> Result<(), EngineError>;
    async fn close(&mut self) -> Result<(), EngineError>;
}

/// Opens duplex sessions against the remote agent.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        config: SessionConfig,
    ) -> Result<(Box<dyn SessionTransport>, mpsc::Receiver<TransportEvent>), EngineError>;
}
