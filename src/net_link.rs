//! WebSocket implementation of the session transport.
//!
//! One connection per session. The upgrade request carries the bearer token
//! and a stable client id; the first frame out is the hello message that
//! declares the system prompt, the tool schema, and the audio rates. A read
//! task translates server frames into ordered [`TransportEvent`]s.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::{Request, generate_key};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::Config;
use crate::error::EngineError;
use crate::protocol::{
    AudioParams, ClientAudioMessage, ClientToolResponseMessage, HelloMessage, InboundMessage,
    OutboundAudioFrame, ServerMessage, ToolInvocationRequest, ToolInvocationResponse,
};
use crate::transport::{SessionConfig, SessionFactory, SessionTransport, TransportEvent};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct WsSessionFactory {
    ws_url: String,
    ws_token: String,
    client_id: String,
}

impl WsSessionFactory {
    pub fn new(config: &Config) -> Self {
        let client_id = if config.client_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.client_id.clone()
        };
        Self {
            ws_url: config.ws_url.clone(),
            ws_token: config.ws_token.clone(),
            client_id,
        }
    }

    fn build_request(&self) -> Result<Request, EngineError> {
        let url =
            Url::parse(&self.ws_url).map_err(|e| EngineError::Transport(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| EngineError::Transport(format!("no host in url: {}", self.ws_url)))?
            .to_string();

        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let headers = request.headers_mut();
        let mut insert = |name: &'static str, value: String| -> Result<(), EngineError> {
            let value = value
                .parse()
                .map_err(|_| EngineError::Transport(format!("bad header value for {}", name)))?;
            headers.insert(name, value);
            Ok(())
        };
        insert("Host", host)?;
        insert("Connection", "Upgrade".to_string())?;
        insert("Upgrade", "websocket".to_string())?;
        insert("Sec-WebSocket-Version", "13".to_string())?;
        insert("Sec-WebSocket-Key", generate_key())?;
        if !self.ws_token.is_empty() {
            insert("Authorization", format!("Bearer {}", self.ws_token))?;
        }
        insert("Client-Id", self.client_id.clone())?;
        insert("Protocol-Version", "1".to_string())?;
        Ok(request)
    }
}

#[async_trait]
impl SessionFactory for WsSessionFactory {
    async fn open(
        &self,
        config: SessionConfig,
    ) -> Result<(Box<dyn SessionTransport>, mpsc::Receiver<TransportEvent>), EngineError> {
        let request = self.build_request()?;
        log::info!("Connecting to {}", self.ws_url);
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let (mut write, read) = stream.split();

        let hello = HelloMessage {
            msg_type: "hello".to_string(),
            version: 1,
            system_instruction: config.system_prompt,
            tools: config.tools,
            audio_params: AudioParams {
                format: "pcm16".to_string(),
                input_sample_rate: config.audio_in_rate,
                output_sample_rate: config.audio_out_rate,
                channels: 1,
            },
        };
        let payload = serde_json::to_string(&hello)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        log::info!("Session opened, hello sent");

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(read_loop(read, event_tx));

        Ok((Box::new(WsTransport { write }), event_rx))
    }
}

struct WsTransport {
    write: WsWrite,
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn send_audio(&mut self, frame: OutboundAudioFrame) -> Result<(), EngineError> {
        let message = ClientAudioMessage {
            msg_type: "audio",
            data: &frame.data,
            sample_rate: frame.sample_rate,
        };
        let payload = serde_json::to_string(&message)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        self.write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    async fn send_tool_response(
        &mut self,
        response: ToolInvocationResponse,
    ) -> Result<(), EngineError> {
        let message = ClientToolResponseMessage {
            msg_type: "tool_response",
            id: &response.id,
            name: &response.name,
            result: &response.result,
        };
        let payload = serde_json::to_string(&message)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        self.write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))
    }
}

async fn read_loop(mut read: WsRead, events: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match parse_server_text(&text) {
                Some(event) => event,
                None => continue,
            },
            Ok(Message::Close(_)) => TransportEvent::Closed {
                reason: "close frame".to_string(),
            },
            Ok(_) => continue, // ping/pong and binary frames
            Err(e) => TransportEvent::Failed(e.to_string()),
        };
        let terminal = !matches!(event, TransportEvent::Message(_));
        if events.send(event).await.is_err() || terminal {
            return;
        }
    }
    let _ = events
        .send(TransportEvent::Failed("connection closed".to_string()))
        .await;
}

/// Map one server text frame to an event. Unknown message types and frames
/// missing their payload are skipped with a warning, not treated as fatal.
fn parse_server_text(text: &str) -> Option<TransportEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Unparseable server frame: {}", e);
            return None;
        }
    };
    match message.msg_type.as_str() {
        "audio" => {
            let data = message.data?;
            Some(TransportEvent::Message(InboundMessage::Audio {
                data,
                sample_rate: message.sample_rate.unwrap_or(24_000),
            }))
        }
        "text" => {
            let text = message.text?;
            Some(TransportEvent::Message(InboundMessage::Text { text }))
        }
        "tool_call" => {
            let (Some(id), Some(name)) = (message.id, message.name) else {
                log::warn!("tool_call frame missing id or name");
                return None;
            };
            let arguments = message
                .arguments
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            Some(TransportEvent::Message(InboundMessage::ToolCall(
                ToolInvocationRequest {
                    id,
                    name,
                    arguments,
                },
            )))
        }
        "goodbye" => Some(TransportEvent::Closed {
            reason: message.reason.unwrap_or_else(|| "goodbye".to_string()),
        }),
        other => {
            log::warn!("Ignoring server message type '{}'", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frame_defaults_to_24k() {
        let event = parse_server_text(r#"{"type":"audio","data":"AAA="}"#).unwrap();
        match event {
            TransportEvent::Message(InboundMessage::Audio { data, sample_rate }) => {
                assert_eq!(data, "AAA=");
                assert_eq!(sample_rate, 24_000);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn tool_call_without_arguments_gets_an_empty_map() {
        let event =
            parse_server_text(r#"{"type":"tool_call","id":"c1","name":"addItem"}"#).unwrap();
        match event {
            TransportEvent::Message(InboundMessage::ToolCall(request)) => {
                assert_eq!(request.id, "c1");
                assert_eq!(request.name, "addItem");
                assert!(request.arguments.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn goodbye_maps_to_a_clean_close() {
        let event = parse_server_text(r#"{"type":"goodbye","reason":"done"}"#).unwrap();
        match event {
            TransportEvent::Closed { reason } => assert_eq!(reason, "done"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unknown_types_and_garbage_are_skipped() {
        assert!(parse_server_text(r#"{"type":"telemetry"}"#).is_none());
        assert!(parse_server_text("not json").is_none());
        assert!(parse_server_text(r#"{"type":"audio"}"#).is_none());
    }
}
