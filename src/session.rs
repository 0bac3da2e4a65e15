//! Session controller.
//!
//! Owns the whole lifecycle of one duplex voice session: acquires both audio
//! devices, opens the transport, wires capture output into the outbound side,
//! demultiplexes inbound events to the playback scheduler / transcript / tool
//! dispatcher, and performs deterministic teardown on stop or failure.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{AudioBackend, PlaybackSink};
use crate::capture::CapturePipeline;
use crate::config::Config;
use crate::dispatch::{CommitSink, ToolDispatcher, ToolSchema};
use crate::error::EngineError;
use crate::playback::PlaybackScheduler;
use crate::protocol::{
    InboundMessage, OutboundAudioFrame, ToolInvocationRequest, ToolInvocationResponse,
};
use crate::transport::{SessionConfig, SessionFactory, SessionTransport, TransportEvent};

/// Session lifecycle. `Failed` is terminal until the next `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
}

struct ActiveSession {
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    driver: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// The engine. At most one live session at a time; the input and output
/// devices and the transport are owned exclusively for the session's
/// lifetime, never shared process-wide.
pub struct VoiceEngine {
    config: Config,
    schemas: Vec<ToolSchema>,
    factory: Arc<dyn SessionFactory>,
    backend: Arc<dyn AudioBackend>,
    commit_sink: Arc<dyn CommitSink>,
    state: Arc<Mutex<SessionState>>,
    transcript: Arc<Mutex<String>>,
    last_error: Arc<Mutex<Option<String>>>,
    active: Option<ActiveSession>,
}

impl VoiceEngine {
    pub fn new(
        config: Config,
        schemas: Vec<ToolSchema>,
        factory: Arc<dyn SessionFactory>,
        backend: Arc<dyn AudioBackend>,
        commit_sink: Arc<dyn CommitSink>,
    ) -> Self {
        Self {
            config,
            schemas,
            factory,
            backend,
            commit_sink,
            state: Arc::new(Mutex::new(SessionState::Closed)),
            transcript: Arc::new(Mutex::new(String::new())),
            last_error: Arc::new(Mutex::new(None)),
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Agent response text accumulated since the last `start()`.
    pub fn response_text(&self) -> String {
        self.transcript.lock().unwrap().clone()
    }

    /// The error that moved the session to `Failed`, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Acquire both devices, open the transport, and begin streaming.
    /// Rejected while a session is live; a `Failed` session is torn down
    /// first, so reconnection is always an explicit fresh start.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        match self.state() {
            // A Closed engine can still hold the remains of a session the
            // peer ended; a Failed one always does. Either way the leftovers
            // go first.
            SessionState::Closed | SessionState::Failed => self.finalize().await,
            _ => return Err(EngineError::SessionActive),
        }

        self.set_state(SessionState::Opening);
        self.transcript.lock().unwrap().clear();
        self.last_error.lock().unwrap().take();

        match self.open_session().await {
            Ok(active) => {
                self.active = Some(active);
                self.set_state(SessionState::Open);
                Ok(())
            }
            Err(e) => {
                // Nothing partially acquired survives open_session, so a
                // failed start settles straight back to Closed.
                self.set_state(SessionState::Closed);
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<ActiveSession, EngineError> {
        let sink = self.backend.open_output(self.config.playback_sample_rate)?;
        let input = self.backend.open_input(self.config.capture_sample_rate)?;

        let session_config = SessionConfig {
            system_prompt: self.config.system_prompt.clone(),
            tools: self.schemas.iter().map(|s| s.declaration()).collect(),
            audio_in_rate: self.config.capture_sample_rate,
            audio_out_rate: self.config.playback_sample_rate,
        };
        let (transport, events) = self.factory.open(session_config).await?;

        // Capacity 1: one in-flight chunk bounds capture back-pressure.
        let (audio_tx, audio_rx) = mpsc::channel(1);
        let capture = CapturePipeline::start(
            input,
            self.config.chunk_samples,
            self.config.capture_sample_rate,
            audio_tx,
        )
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(sink.clone())));
        let (stop_tx, stop_rx) = watch::channel(false);

        // Tool calls run on their own ordered queue so a slow commit sink
        // delays only its own acknowledgment, never audio or text.
        let (tool_tx, tool_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::channel(8);
        let dispatcher = ToolDispatcher::new(self.schemas.clone(), self.commit_sink.clone());
        tokio::spawn(run_dispatcher(dispatcher, tool_rx, resp_tx));

        let driver = tokio::spawn(run_driver(Driver {
            transport,
            events,
            audio_rx,
            resp_rx,
            tool_tx,
            capture,
            sink,
            scheduler: scheduler.clone(),
            transcript: self.transcript.clone(),
            state: self.state.clone(),
            last_error: self.last_error.clone(),
            stop_rx,
        }));

        Ok(ActiveSession {
            scheduler,
            driver,
            stop_tx,
        })
    }

    /// Tear the session down. Safe to call in any state; when a session is
    /// live, both devices are released and every pending playback entry
    /// cancelled before this returns.
    pub async fn stop(&mut self) {
        match self.state() {
            SessionState::Open | SessionState::Opening => {}
            _ => return,
        }
        self.set_state(SessionState::Closing);
        self.finalize().await;
        self.set_state(SessionState::Closed);
    }

    async fn finalize(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        // Silence playback immediately, then let the driver run its full
        // teardown; both devices are released by the time it returns.
        active.scheduler.lock().unwrap().cancel();
        let _ = active.stop_tx.send(true);
        let _ = active.driver.await;
    }
}

struct Driver {
    transport: Box<dyn SessionTransport>,
    events: mpsc::Receiver<TransportEvent>,
    audio_rx: mpsc::Receiver<OutboundAudioFrame>,
    resp_rx: mpsc::Receiver<ToolInvocationResponse>,
    tool_tx: mpsc::UnboundedSender<ToolInvocationRequest>,
    capture: CapturePipeline,
    sink: Arc<dyn PlaybackSink>,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    transcript: Arc<Mutex<String>>,
    state: Arc<Mutex<SessionState>>,
    last_error: Arc<Mutex<Option<String>>>,
    stop_rx: watch::Receiver<bool>,
}

enum Exit {
    Stopped,
    RemoteClosed,
    Failed(String),
}

async fn run_driver(mut driver: Driver) {
    let exit = drive(&mut driver).await;

    driver.capture.signal_stop();
    driver.scheduler.lock().unwrap().cancel();
    let _ = driver.transport.close().await;

    // Closing the frame channel wakes a capture thread blocked on a full
    // send; both device joins block, so they run off the async scheduler.
    // Every exit path releases both devices before the terminal state is
    // published, so a caller seeing Closed or Failed can start() again
    // without racing the old session's hardware.
    driver.audio_rx.close();
    let mut capture = driver.capture;
    let sink = driver.sink;
    let _ = tokio::task::spawn_blocking(move || {
        capture.stop();
        sink.close();
    })
    .await;

    match exit {
        Exit::Stopped => {} // stop() settles the state itself
        Exit::RemoteClosed => *driver.state.lock().unwrap() = SessionState::Closed,
        Exit::Failed(reason) => {
            log::error!("Session failed: {}", reason);
            *driver.last_error.lock().unwrap() = Some(reason);
            *driver.state.lock().unwrap() = SessionState::Failed;
        }
    }
}

async fn drive(driver: &mut Driver) -> Exit {
    loop {
        tokio::select! {
            _ = driver.stop_rx.changed() => return Exit::Stopped,

            Some(frame) = driver.audio_rx.recv() => {
                if let Err(e) = driver.transport.send_audio(frame).await {
                    return Exit::Failed(e.to_string());
                }
            }

            Some(response) = driver.resp_rx.recv() => {
                if let Err(e) = driver.transport.send_tool_response(response).await {
                    return Exit::Failed(e.to_string());
                }
            }

            event = driver.events.recv() => match event {
                Some(TransportEvent::Message(message)) => handle_message(driver, message),
                Some(TransportEvent::Closed { reason }) => {
                    log::info!("Session closed by peer: {}", reason);
                    return Exit::RemoteClosed;
                }
                Some(TransportEvent::Failed(reason)) => return Exit::Failed(reason),
                None => return Exit::Failed("transport event channel closed".to_string()),
            },
        }
    }
}

fn handle_message(driver: &mut Driver, message: InboundMessage) {
    match message {
        InboundMessage::Audio { data, sample_rate } => {
            driver.scheduler.lock().unwrap().enqueue(&data, sample_rate);
        }
        InboundMessage::Text { text } => {
            driver.transcript.lock().unwrap().push_str(&text);
        }
        InboundMessage::ToolCall(request) => {
            if driver.tool_tx.send(request).is_err() {
                log::warn!("Tool dispatcher gone, dropping invocation");
            }
        }
    }
}

async fn run_dispatcher(
    mut dispatcher: ToolDispatcher,
    mut requests: mpsc::UnboundedReceiver<ToolInvocationRequest>,
    responses: mpsc::Sender<ToolInvocationResponse>,
) {
    // Single consumer: acknowledgments keep the order requests arrived in.
    while let Some(request) = requests.recv().await {
        let response = dispatcher.dispatch(request).await;
        if responses.send(response).await.is_err() {
            break;
        }
    }
}
