//! Message and wire-framing types for the duplex session.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One encoded microphone chunk headed for the remote peer. Immutable once
/// built, not retained after send.
#[derive(Debug, Clone)]
pub struct OutboundAudioFrame {
    /// Base64 PCM16 payload.
    pub data: String,
    pub sample_rate: u32,
}

/// Structured request from the remote agent to run a named tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocationRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Exactly one of these goes back on the wire per request id.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocationResponse {
    pub id: String,
    pub name: String,
    pub result: String,
}

impl ToolInvocationResponse {
    pub fn ok(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            result: "ok".to_string(),
        }
    }

    pub fn error(id: &str, name: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            result: format!("error: {}", reason),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result == "ok"
    }
}

/// Messages the remote peer sends while the session is open, in the exact
/// order it sent them.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Synthesized speech, base64 PCM16 at `sample_rate`.
    Audio { data: String, sample_rate: u32 },
    /// Agent response text, appended to the transcript.
    Text { text: String },
    ToolCall(ToolInvocationRequest),
}

// ======================== JSON wire framing ========================

/// Envelope for everything the server sends on the text channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: Option<String>,
    pub sample_rate: Option<u32>,
    pub text: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<Value>,
    pub reason: Option<String>,
}

/// Audio parameters declared in the hello message.
#[derive(Debug, Clone, Serialize)]
pub struct AudioParams {
    pub format: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u8,
}

/// One callable tool, declared once at session open.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterDeclaration>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Hello message, sent first on every fresh connection to initialize the
/// session: system prompt, tool schema, and the fixed audio rates.
#[derive(Serialize)]
pub struct HelloMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u8,
    pub system_instruction: String,
    pub tools: Vec<ToolDeclaration>,
    pub audio_params: AudioParams,
}

#[derive(Serialize)]
pub struct ClientAudioMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'a str,
    pub data: &'a str,
    pub sample_rate: u32,
}

#[derive(Serialize)]
pub struct ClientToolResponseMessage<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'a str,
    pub id: &'a str,
    pub name: &'a str,
    pub result: &'a str,
}
