//! Wake-word detector: owns the listening session and its state machine.
//!
//! [`WakewordDetector`] wires one [`AudioSource`] to one [`AsrClient`],
//! matches every transcript against the configured wake-words and, on a
//! match, switches the chat into immersive mode and raises a transient
//! "detected" flag.
//!
//! # Event flow
//!
//! ```text
//! DetectorCommand (mpsc) ─┐
//! ClientEvent (session) ──┼─▶ WakewordDetector::run()  ← async tokio task
//! DetectionExpired ───────┘        │
//!                                  ├─ Start  → Connecting → Listening
//!                                  ├─ PARTIAL_OUTPUT / FINAL_OUTPUT → match
//!                                  │     └─ hit → Detected ─(hold)─▶ Listening
//!                                  └─ Stop / ERROR / socket error → Idle
//! ```
//!
//! All transitions run on the detector task.  The audio thread only touches
//! the session's [`AsrSender`](crate::asr::AsrSender); every UI-visible field
//! goes through [`StateSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::asr::{AsrClient, AsrClientFactory, ClientEvent, InboundAction, OutboundAction};
use crate::audio::{AudioSource, AudioSourceFactory, CaptureError, CaptureParams, ChunkSink};
use crate::catalog::{
    merge_settings, CatalogError, EngineCatalog, EngineDescriptor, EngineParamDescriptor,
    EngineSettings, ParamValue,
};
use crate::config::AppConfig;

use super::matcher::WakewordList;
use super::notify::{ErrorKind, Notice, Notifier};
use super::state::{ChatMode, DetectorState, ParamSchema, StateSink};

/// Engine parameter that, when present, receives the wake-word list.
pub const WAKEWORDS_PARAM: &str = "wakewords";

// ---------------------------------------------------------------------------
// DetectorError
// ---------------------------------------------------------------------------

/// Everything that can go wrong in the detector.  Each variant is reported
/// to the [`Notifier`] before it is returned.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("wake-word listening is disabled")]
    Disabled,

    #[error("select an ASR engine first")]
    NoEngineSelected,

    #[error("unknown ASR engine `{0}`")]
    UnknownEngine(String),

    #[error("engine `{engine}` has no parameter `{param}`")]
    UnknownParam { engine: String, param: String },

    #[error("already listening")]
    AlreadyListening,

    #[error("stop listening before {0}")]
    Busy(&'static str),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("microphone unavailable: {0}")]
    Capture(#[from] CaptureError),

    /// Backend error text, shown verbatim.
    #[error("{0}")]
    Protocol(String),

    #[error("transcript is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl DetectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectorError::Disabled
            | DetectorError::NoEngineSelected
            | DetectorError::UnknownEngine(_)
            | DetectorError::UnknownParam { .. }
            | DetectorError::AlreadyListening
            | DetectorError::Busy(_) => ErrorKind::Validation,
            DetectorError::Connection(_) | DetectorError::Catalog(_) => ErrorKind::Connection,
            DetectorError::Capture(_) => ErrorKind::Capture,
            DetectorError::Protocol(_) | DetectorError::Decode(_) => ErrorKind::Protocol,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands / events
// ---------------------------------------------------------------------------

/// Requests from the UI (or console).
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorCommand {
    Enable(bool),
    RefreshEngines,
    SelectEngine(String),
    SetWakewords(String),
    SetEngineParam(String, ParamValue),
    Start,
    Stop,
    Toggle,
}

/// Internal events, tagged with the session they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    Client { session: u64, event: ClientEvent },
    DetectionExpired { session: u64, detection: u64 },
}

// ---------------------------------------------------------------------------
// Session / phase
// ---------------------------------------------------------------------------

struct ListeningSession {
    id: u64,
    client: Box<dyn AsrClient>,
    capture: Option<Box<dyn AudioSource>>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    /// A detection already fired for the current utterance.
    fired: bool,
    /// Bumped on each Listening → Detected transition.
    detection: u64,
}

enum Phase {
    Idle,
    Connecting(ListeningSession),
    Listening(ListeningSession),
    Detected(ListeningSession),
}

impl Phase {
    fn state(&self) -> DetectorState {
        match self {
            Phase::Idle => DetectorState::Idle,
            Phase::Connecting(_) => DetectorState::Connecting,
            Phase::Listening(_) => DetectorState::Listening,
            Phase::Detected(_) => DetectorState::Detected,
        }
    }

    fn session(&self) -> Option<&ListeningSession> {
        match self {
            Phase::Idle => None,
            Phase::Connecting(s) | Phase::Listening(s) | Phase::Detected(s) => Some(s),
        }
    }

    fn session_mut(&mut self) -> Option<&mut ListeningSession> {
        match self {
            Phase::Idle => None,
            Phase::Connecting(s) | Phase::Listening(s) | Phase::Detected(s) => Some(s),
        }
    }

    fn take(&mut self) -> Option<ListeningSession> {
        match std::mem::replace(self, Phase::Idle) {
            Phase::Idle => None,
            Phase::Connecting(s) | Phase::Listening(s) | Phase::Detected(s) => Some(s),
        }
    }
}

async fn next_client_event(phase: &mut Phase) -> Option<DetectorEvent> {
    let Some(session) = phase.session_mut() else {
        return std::future::pending().await;
    };
    let event = session.events.recv().await?;
    Some(DetectorEvent::Client {
        session: session.id,
        event,
    })
}

// ---------------------------------------------------------------------------
// WakewordDetector
// ---------------------------------------------------------------------------

/// The wake-word listening state machine.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use sentio_wakeword::asr::AsrStreamClientFactory;
/// use sentio_wakeword::audio::MicrophoneCaptureFactory;
/// use sentio_wakeword::catalog::HttpEngineCatalog;
/// use sentio_wakeword::config::AppConfig;
/// use sentio_wakeword::wakeword::{ConsoleNotifier, DetectorCommand, SettingsStore, WakewordDetector};
///
/// # async fn example() {
/// let config = AppConfig::default();
/// let detector = WakewordDetector::new(
///     Arc::new(HttpEngineCatalog::from_config(&config.server)),
///     Arc::new(AsrStreamClientFactory::new(config.server.ws_url(), None)),
///     Arc::new(MicrophoneCaptureFactory),
///     Arc::new(SettingsStore::in_memory(config.clone())),
///     Arc::new(ConsoleNotifier),
/// )
/// .with_config(&config);
///
/// let (tx, rx) = tokio::sync::mpsc::channel(16);
/// tx.send(DetectorCommand::RefreshEngines).await.unwrap();
/// tx.send(DetectorCommand::Start).await.unwrap();
/// detector.run(rx).await;
/// # }
/// ```
pub struct WakewordDetector {
    catalog: Arc<dyn EngineCatalog>,
    clients: Arc<dyn AsrClientFactory>,
    audio: Arc<dyn AudioSourceFactory>,
    sink: Arc<dyn StateSink>,
    notifier: Arc<dyn Notifier>,

    capture_params: CaptureParams,
    hold: Duration,

    engines: HashMap<String, EngineDescriptor>,
    schema: Vec<EngineParamDescriptor>,

    phase: Phase,
    next_session: u64,
    events_tx: mpsc::UnboundedSender<DetectorEvent>,
    events_rx: mpsc::UnboundedReceiver<DetectorEvent>,
}

impl WakewordDetector {
    pub fn new(
        catalog: Arc<dyn EngineCatalog>,
        clients: Arc<dyn AsrClientFactory>,
        audio: Arc<dyn AudioSourceFactory>,
        sink: Arc<dyn StateSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            catalog,
            clients,
            audio,
            sink,
            notifier,
            capture_params: CaptureParams::default(),
            hold: Duration::from_millis(3_000),
            engines: HashMap::new(),
            schema: Vec::new(),
            phase: Phase::Idle,
            next_session: 1,
            events_tx,
            events_rx,
        }
    }

    /// Take capture parameters and the detection hold from `config`.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.capture_params = CaptureParams::from(&config.audio);
        self.hold = Duration::from_millis(config.detection.hold_ms);
        self
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn state(&self) -> DetectorState {
        self.phase.state()
    }

    pub fn is_listening(&self) -> bool {
        self.phase.state().is_listening()
    }

    /// Streaming engines from the last refresh, keyed by name.
    pub fn engines(&self) -> &HashMap<String, EngineDescriptor> {
        &self.engines
    }

    /// Parameter schema of the selected engine.
    pub fn param_schema(&self) -> &[EngineParamDescriptor] {
        &self.schema
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `commands` is closed, then tear the session down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<DetectorCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = next_client_event(&mut self.phase) => self.handle_event(event),
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        log::info!("wakeword: command channel closed, detector shutting down");
        self.stop_listening();
    }

    pub async fn handle_command(&mut self, command: DetectorCommand) {
        log::debug!("wakeword: command {command:?}");
        let result = match command {
            DetectorCommand::Enable(enabled) => {
                self.set_enabled(enabled);
                if enabled && self.engines.is_empty() {
                    self.refresh_engines().await
                } else {
                    Ok(())
                }
            }
            DetectorCommand::RefreshEngines => self.refresh_engines().await,
            DetectorCommand::SelectEngine(name) => self.select_engine(&name).await,
            DetectorCommand::SetWakewords(raw) => self.set_wakewords(&raw),
            DetectorCommand::SetEngineParam(name, value) => self.set_engine_param(&name, value),
            DetectorCommand::Start => self.start_listening().await,
            DetectorCommand::Stop => {
                self.stop_listening();
                Ok(())
            }
            DetectorCommand::Toggle => self.toggle_listening().await,
        };
        if let Err(e) = result {
            log::debug!("wakeword: command failed: {e}");
        }
    }

    /// Handle every event already queued, without waiting.  Returns how
    /// many were handled.
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let client_event = self.phase.session_mut().and_then(|s| {
                let id = s.id;
                s.events
                    .try_recv()
                    .ok()
                    .map(|event| DetectorEvent::Client { session: id, event })
            });
            let event = match client_event {
                Some(event) => event,
                None => match self.events_rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_event(&mut self, event: DetectorEvent) {
        match event {
            DetectorEvent::Client { session, event } => {
                if self.phase.session().map(|s| s.id) != Some(session) {
                    log::debug!("wakeword: dropping event of ended session {session}");
                    return;
                }
                self.on_client_event(event);
            }
            DetectorEvent::DetectionExpired { session, detection } => {
                self.on_detection_expired(session, detection);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Panel settings
    // -----------------------------------------------------------------------

    /// Flip the master switch.  Disabling stops an active session.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.sink.set_enabled(enabled);
        if !enabled && self.phase.state().is_active() {
            log::info!("wakeword: disabled while listening, stopping");
            self.stop_listening();
        }
    }

    /// Fetch the engine list and load the schema of the selected engine,
    /// falling back to the first streaming engine.
    pub async fn refresh_engines(&mut self) -> Result<(), DetectorError> {
        if self.phase.state().is_active() {
            return self.reject(DetectorError::Busy("refreshing engines"));
        }

        let engines = match self.catalog.list_engines().await {
            Ok(engines) => engines,
            Err(e) => return self.reject(e.into()),
        };

        let streaming: Vec<EngineDescriptor> =
            engines.iter().filter(|e| e.is_streaming()).cloned().collect();
        let names: Vec<String> = streaming.iter().map(|e| e.name.clone()).collect();
        self.engines = crate::catalog::streaming_engines(engines);
        log::info!("wakeword: {} streaming engine(s) available", names.len());
        self.sink.set_engines(streaming);

        match self.sink.engine() {
            Some(current) if self.engines.contains_key(&current) => {
                self.schema.clear();
                self.sink.set_param_schema(ParamSchema::Loading);
                self.load_params(&current).await
            }
            _ => match names.first() {
                Some(first) => self.select_engine(first).await,
                None => {
                    log::warn!("wakeword: backend offers no streaming engine");
                    Ok(())
                }
            },
        }
    }

    /// Switch to `name` and reconcile its schema with persisted settings.
    pub async fn select_engine(&mut self, name: &str) -> Result<(), DetectorError> {
        if self.phase.state().is_active() {
            return self.reject(DetectorError::Busy("switching engine"));
        }
        if !self.engines.contains_key(name) {
            return self.reject(DetectorError::UnknownEngine(name.to_owned()));
        }

        log::info!("wakeword: engine → {name}");
        self.schema.clear();
        self.sink.set_param_schema(ParamSchema::Loading);
        self.sink.set_engine(Some(name));
        self.load_params(name).await
    }

    async fn load_params(&mut self, engine: &str) -> Result<(), DetectorError> {
        let schema = match self.catalog.engine_params(engine).await {
            Ok(schema) => schema,
            Err(e) => {
                self.sink.set_param_schema(ParamSchema::Empty);
                return self.reject(e.into());
            }
        };

        let merged = merge_settings(&schema, &self.sink.engine_settings());
        log::debug!("wakeword: {engine} settings {merged:?}");
        self.sink.set_engine_settings(&merged);
        self.sink.set_param_schema(ParamSchema::Ready(schema.clone()));
        self.schema = schema;
        Ok(())
    }

    /// Replace the comma-separated wake-word list.
    pub fn set_wakewords(&mut self, raw: &str) -> Result<(), DetectorError> {
        if self.phase.state().is_active() {
            return self.reject(DetectorError::Busy("editing wake-words"));
        }
        self.sink.set_wakewords(raw);
        Ok(())
    }

    /// Override one parameter of the selected engine.
    pub fn set_engine_param(&mut self, name: &str, value: ParamValue) -> Result<(), DetectorError> {
        if self.phase.state().is_active() {
            return self.reject(DetectorError::Busy("changing engine settings"));
        }
        if !self.schema.is_empty() && !self.schema.iter().any(|p| p.name == name) {
            let engine = self.sink.engine().unwrap_or_default();
            return self.reject(DetectorError::UnknownParam {
                engine,
                param: name.to_owned(),
            });
        }
        let mut settings = self.sink.engine_settings();
        settings.insert(name.to_owned(), value);
        self.sink.set_engine_settings(&settings);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Open the socket and the microphone.  `Idle → Connecting → Listening`.
    pub async fn start_listening(&mut self) -> Result<(), DetectorError> {
        if !self.sink.enabled() {
            return self.reject(DetectorError::Disabled);
        }
        if self.phase.state().is_active() {
            return self.reject(DetectorError::AlreadyListening);
        }
        let Some(engine) = self.sink.engine() else {
            return self.reject(DetectorError::NoEngineSelected);
        };
        if !self.engines.contains_key(&engine) {
            return self.reject(DetectorError::UnknownEngine(engine));
        }

        let id = self.next_session;
        self.next_session += 1;
        let config = self.session_config();
        log::info!("wakeword: starting session {id} on {engine}");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut client = self.clients.create(&engine, &config, events_tx);
        client.connect();
        let sender = client.sender();

        self.enter(Phase::Connecting(ListeningSession {
            id,
            client,
            capture: None,
            events: events_rx,
            fired: false,
            detection: 0,
        }));

        let chunks: ChunkSink = Box::new(move |chunk: Vec<u8>| {
            sender.send(OutboundAction::PartialAudioInput(chunk));
        });
        let mut capture = self.audio.create(self.capture_params, chunks);
        if let Err(e) = capture.start().await {
            log::error!("wakeword: capture failed to start: {e}");
            capture.stop();
            self.stop_listening();
            return self.reject(e.into());
        }

        let phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting(mut session) => {
                session.capture = Some(capture);
                Phase::Listening(session)
            }
            other => other,
        };
        self.enter(phase);
        self.sink.set_listening(true);
        Ok(())
    }

    /// Tear the session down.  Safe to call in any state; a no-op when idle.
    pub fn stop_listening(&mut self) {
        let Some(mut session) = self.phase.take() else {
            return;
        };
        log::info!("wakeword: stopping session {}", session.id);

        // Capture first so no audio follows ENGINE_STOP.
        if let Some(mut capture) = session.capture.take() {
            capture.stop();
        }
        if session.client.is_open() {
            session.client.send_message(OutboundAction::Stop);
        }
        session.client.disconnect();
        drop(session);

        self.sink.set_partial_text("");
        self.sink.set_listening(false);
        self.sink.set_state(DetectorState::Idle);
    }

    pub async fn toggle_listening(&mut self) -> Result<(), DetectorError> {
        if self.phase.state().is_active() {
            self.stop_listening();
            Ok(())
        } else {
            self.start_listening().await
        }
    }

    /// Persisted engine settings, plus the wake-word list when the engine
    /// takes one.
    fn session_config(&self) -> EngineSettings {
        let mut config = self.sink.engine_settings();
        if self.schema.iter().any(|p| p.name == WAKEWORDS_PARAM) {
            config.insert(
                WAKEWORDS_PARAM.to_owned(),
                ParamValue::Text(self.sink.wakewords()),
            );
        }
        config
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_client_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Open => log::info!("wakeword: stream open"),
            ClientEvent::Message(action) => self.on_action(action),
            ClientEvent::Closed => {
                log::warn!("wakeword: stream closed");
                self.stop_listening();
            }
            ClientEvent::Error(e) => self.fail(DetectorError::Connection(e)),
        }
    }

    fn on_action(&mut self, action: InboundAction) {
        match action {
            InboundAction::PartialOutput(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    log::debug!("wakeword: partial {text:?}");
                    self.sink.set_partial_text(&text);
                    self.check_transcript(&text);
                }
                Err(e) => self.fail(e.into()),
            },
            InboundAction::FinalOutput(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    log::debug!("wakeword: final {text:?}");
                    self.sink.set_last_detected_text(&text);
                    self.sink.set_partial_text("");
                    self.check_transcript(&text);
                    if let Some(session) = self.phase.session_mut() {
                        session.fired = false;
                    }
                }
                Err(e) => self.fail(e.into()),
            },
            InboundAction::Error(bytes) => {
                let message = String::from_utf8_lossy(&bytes).into_owned();
                self.fail(DetectorError::Protocol(message));
            }
            InboundAction::WakewordDetected(bytes) => {
                // Matching is done locally against the transcripts.
                log::debug!("wakeword: backend hit {}", String::from_utf8_lossy(&bytes));
            }
            InboundAction::EngineInitializing
            | InboundAction::EngineStarting
            | InboundAction::EngineStarted => {
                log::info!("wakeword: backend {}", action.name());
            }
            InboundAction::EngineStopped => log::info!("wakeword: backend engine stopped"),
            InboundAction::Pong => {}
        }
    }

    /// Fire a detection if `text` contains a wake-word and nothing fired yet
    /// for this utterance.
    fn check_transcript(&mut self, text: &str) {
        let wakewords = WakewordList::parse(&self.sink.wakewords());
        let Some(word) = wakewords.first_match(text) else {
            return;
        };
        let Some(session) = self.phase.session_mut() else {
            return;
        };
        if session.fired {
            return;
        }
        session.fired = true;
        log::info!("wakeword: detected `{word}` in {text:?}");

        let session_id = session.id;
        let expiry = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Listening(mut session) => {
                session.detection += 1;
                let detection = session.detection;
                self.phase = Phase::Detected(session);
                Some(detection)
            }
            // Already detected: the running hold is not extended.
            other => {
                self.phase = other;
                None
            }
        };
        self.sink.set_state(self.phase.state());
        self.sink.set_wakeword_detected(true);
        self.sink.set_last_detected_text(text);
        if self.sink.chat_mode() != ChatMode::Immersive {
            log::info!("wakeword: switching chat to immersive");
            self.sink.set_chat_mode(ChatMode::Immersive);
        }

        if let Some(detection) = expiry {
            self.schedule_expiry(session_id, detection);
        }
    }

    fn schedule_expiry(&mut self, session: u64, detection: u64) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!("wakeword: no async runtime, clearing detection immediately");
                return self.on_detection_expired(session, detection);
            }
        };
        let tx = self.events_tx.clone();
        let hold = self.hold;
        handle.spawn(async move {
            tokio::time::sleep(hold).await;
            let _ = tx.send(DetectorEvent::DetectionExpired { session, detection });
        });
    }

    fn on_detection_expired(&mut self, session: u64, detection: u64) {
        let current = match &self.phase {
            Phase::Detected(s) => Some((s.id, s.detection)),
            _ => None,
        };
        match current {
            Some(ids) if ids == (session, detection) => {
                let phase = match std::mem::replace(&mut self.phase, Phase::Idle) {
                    Phase::Detected(s) => Phase::Listening(s),
                    other => other,
                };
                self.enter(phase);
                self.sink.set_wakeword_detected(false);
            }
            Some(_) => log::debug!("wakeword: ignoring stale detection timer"),
            // Session ended or restarted: only the display flag is left.
            None => self.sink.set_wakeword_detected(false),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.sink.set_state(self.phase.state());
    }

    fn notify(&self, err: &DetectorError) {
        self.notifier.notify(Notice::new(err.kind(), err.to_string()));
    }

    /// Report `err` and leave state untouched.
    fn reject(&self, err: DetectorError) -> Result<(), DetectorError> {
        log::warn!("wakeword: {err}");
        self.notify(&err);
        Err(err)
    }

    /// Report `err` and force the session back to idle.
    fn fail(&mut self, err: DetectorError) {
        log::error!("wakeword: {err}");
        self.notify(&err);
        self.stop_listening();
    }
}

impl Drop for WakewordDetector {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
