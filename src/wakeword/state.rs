//! Detector state labels and the UI-facing state sink.
//!
//! The detector never owns UI state.  It reports every transition through the
//! [`StateSink`] trait; [`SettingsStore`] is the stock implementation and
//! writes the persisted fields back to `settings.toml` from a background
//! writer thread, so the detector loop never waits on the disk.

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::catalog::{EngineDescriptor, EngineParamDescriptor, EngineSettings};
use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// DetectorState
// ---------------------------------------------------------------------------

/// Externally visible phase of the wake-word detector.
///
/// ```text
/// Idle ──start──▶ Connecting ──capture ok──▶ Listening ──match──▶ Detected
///  ▲                  │                          │  ▲               │
///  └──── stop/error ──┴──────────────────────────┘  └── hold expired┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Connecting,
    Listening,
    /// Transient overlay on `Listening` after a wake-word match.
    Detected,
}

impl DetectorState {
    /// `true` while a session holds the microphone and the socket.
    ///
    /// ```
    /// use sentio_wakeword::wakeword::DetectorState;
    ///
    /// assert!(!DetectorState::Idle.is_listening());
    /// assert!(!DetectorState::Connecting.is_listening());
    /// assert!(DetectorState::Listening.is_listening());
    /// assert!(DetectorState::Detected.is_listening());
    /// ```
    pub fn is_listening(&self) -> bool {
        matches!(self, DetectorState::Listening | DetectorState::Detected)
    }

    /// `true` whenever a session exists, including while it is starting.
    pub fn is_active(&self) -> bool {
        !matches!(self, DetectorState::Idle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetectorState::Idle => "Idle",
            DetectorState::Connecting => "Connecting",
            DetectorState::Listening => "Listening",
            DetectorState::Detected => "Detected",
        }
    }
}

// ---------------------------------------------------------------------------
// ChatMode
// ---------------------------------------------------------------------------

/// Conversation mode of the chat UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Normal,
    /// Active voice conversation, entered on wake-word detection.
    Immersive,
}

impl ChatMode {
    pub fn label(&self) -> &'static str {
        match self {
            ChatMode::Normal => "normal",
            ChatMode::Immersive => "immersive",
        }
    }
}

// ---------------------------------------------------------------------------
// ParamSchema
// ---------------------------------------------------------------------------

/// Parameter schema of the selected engine, as shown to the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParamSchema {
    #[default]
    Empty,
    Loading,
    Ready(Vec<EngineParamDescriptor>),
}

// ---------------------------------------------------------------------------
// StateSink
// ---------------------------------------------------------------------------

/// Get/set pairs the detector calls on every transition.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// detector loop.
pub trait StateSink: Send + Sync {
    fn set_state(&self, state: DetectorState);

    fn set_listening(&self, listening: bool);

    fn set_partial_text(&self, text: &str);

    fn set_last_detected_text(&self, text: &str);

    fn set_wakeword_detected(&self, detected: bool);

    fn chat_mode(&self) -> ChatMode;
    fn set_chat_mode(&self, mode: ChatMode);

    fn enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);

    fn engine(&self) -> Option<String>;
    fn set_engine(&self, engine: Option<&str>);

    /// Streaming engines on offer, in catalog order.
    fn set_engines(&self, engines: Vec<EngineDescriptor>);

    fn set_param_schema(&self, schema: ParamSchema);

    fn engine_settings(&self) -> EngineSettings;
    fn set_engine_settings(&self, settings: &EngineSettings);

    fn wakewords(&self) -> String;
    fn set_wakewords(&self, wakewords: &str);
}

// ---------------------------------------------------------------------------
// UiState
// ---------------------------------------------------------------------------

/// Everything the wake-word panel displays.
#[derive(Debug, Clone, Default)]
pub struct UiState {
    pub state: DetectorState,
    pub listening: bool,
    pub partial_text: String,
    pub wakeword_detected: bool,
    pub engines: Vec<EngineDescriptor>,
    pub param_schema: ParamSchema,

    // Persisted.
    pub enabled: bool,
    pub engine: Option<String>,
    pub engine_settings: EngineSettings,
    pub wakewords: String,
    pub last_detected_text: Option<String>,
    pub chat_mode: ChatMode,
}

impl UiState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            enabled: config.wakeword.enabled,
            engine: config.wakeword.engine.clone(),
            engine_settings: config.wakeword.engine_settings.clone(),
            wakewords: config.wakeword.wakewords.clone(),
            last_detected_text: config.wakeword.last_detected_text.clone(),
            chat_mode: config.chat.mode,
            ..Self::default()
        }
    }

    /// Copy the persisted fields into `config`.
    fn write_into(&self, config: &mut AppConfig) {
        config.wakeword.enabled = self.enabled;
        config.wakeword.engine = self.engine.clone();
        config.wakeword.engine_settings = self.engine_settings.clone();
        config.wakeword.wakewords = self.wakewords.clone();
        config.wakeword.last_detected_text = self.last_detected_text.clone();
        config.chat.mode = self.chat_mode;
    }
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

struct Inner {
    config: AppConfig,
    ui: UiState,
    writer: Option<mpsc::Sender<WriteRequest>>,
}

enum WriteRequest {
    Save(Box<AppConfig>),
    Flush(mpsc::Sender<()>),
}

/// Mutex-backed [`StateSink`] that persists through [`AppConfig`].
pub struct SettingsStore {
    inner: Mutex<Inner>,
    writer_thread: Option<JoinHandle<()>>,
}

impl SettingsStore {
    /// Store that saves persisted fields to `path` on every change.
    /// Writes happen on a `settings-writer` thread.
    pub fn new(config: AppConfig, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let (tx, rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("settings-writer".into())
            .spawn(move || write_loop(&path, rx))?;
        Ok(Self::build(config, Some(tx), Some(thread)))
    }

    /// Store that never touches disk.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::build(config, None, None)
    }

    fn build(
        config: AppConfig,
        writer: Option<mpsc::Sender<WriteRequest>>,
        writer_thread: Option<JoinHandle<()>>,
    ) -> Self {
        let ui = UiState::from_config(&config);
        Self {
            inner: Mutex::new(Inner { config, ui, writer }),
            writer_thread,
        }
    }

    /// Copy of the current UI state.
    pub fn snapshot(&self) -> UiState {
        self.lock().ui.clone()
    }

    /// Copy of the configuration including the latest persisted fields.
    pub fn config(&self) -> AppConfig {
        let inner = self.lock();
        let mut config = inner.config.clone();
        inner.ui.write_into(&mut config);
        config
    }

    /// Block until every change made so far has been written.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        let queued = match &self.lock().writer {
            Some(writer) => writer.send(WriteRequest::Flush(ack_tx)).is_ok(),
            None => false,
        };
        if queued {
            let _ = ack_rx.recv();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut UiState)) {
        f(&mut self.lock().ui);
    }

    /// Apply `f` and queue the result for writing.
    fn update_persisted(&self, f: impl FnOnce(&mut UiState)) {
        let mut inner = self.lock();
        f(&mut inner.ui);
        let mut config = inner.config.clone();
        inner.ui.write_into(&mut config);
        inner.config = config.clone();
        // Sent under the lock so writes reach the thread in update order.
        if let Some(writer) = &inner.writer {
            if writer.send(WriteRequest::Save(Box::new(config))).is_err() {
                log::warn!("settings: writer thread is gone, change not saved");
            }
        }
    }
}

impl Drop for SettingsStore {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish the queue and exit.
        self.lock().writer.take();
        if let Some(thread) = self.writer_thread.take() {
            if thread.join().is_err() {
                log::warn!("settings: writer thread panicked");
            }
        }
    }
}

/// Write queued snapshots to `path`, coalescing bursts to the latest one.
fn write_loop(path: &Path, rx: mpsc::Receiver<WriteRequest>) {
    while let Ok(first) = rx.recv() {
        let mut latest = None;
        let mut acks = Vec::new();
        let mut next = Some(first);
        while let Some(request) = next {
            match request {
                WriteRequest::Save(config) => latest = Some(config),
                WriteRequest::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }

        if let Some(config) = latest {
            if let Err(e) = config.save_to(path) {
                log::warn!("settings: failed to save {}: {e:#}", path.display());
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
    log::debug!("settings: writer stopped");
}

impl StateSink for SettingsStore {
    fn set_state(&self, state: DetectorState) {
        self.update(|ui| ui.state = state);
    }

    fn set_listening(&self, listening: bool) {
        self.update(|ui| ui.listening = listening);
    }

    fn set_partial_text(&self, text: &str) {
        self.update(|ui| ui.partial_text = text.to_owned());
    }

    fn set_last_detected_text(&self, text: &str) {
        self.update_persisted(|ui| ui.last_detected_text = Some(text.to_owned()));
    }

    fn set_wakeword_detected(&self, detected: bool) {
        self.update(|ui| ui.wakeword_detected = detected);
    }

    fn chat_mode(&self) -> ChatMode {
        self.lock().ui.chat_mode
    }

    fn set_chat_mode(&self, mode: ChatMode) {
        self.update_persisted(|ui| ui.chat_mode = mode);
    }

    fn enabled(&self) -> bool {
        self.lock().ui.enabled
    }

    fn set_enabled(&self, enabled: bool) {
        self.update_persisted(|ui| ui.enabled = enabled);
    }

    fn engine(&self) -> Option<String> {
        self.lock().ui.engine.clone()
    }

    fn set_engine(&self, engine: Option<&str>) {
        self.update_persisted(|ui| ui.engine = engine.map(str::to_owned));
    }

    fn set_engines(&self, engines: Vec<EngineDescriptor>) {
        self.update(|ui| ui.engines = engines);
    }

    fn set_param_schema(&self, schema: ParamSchema) {
        self.update(|ui| ui.param_schema = schema);
    }

    fn engine_settings(&self) -> EngineSettings {
        self.lock().ui.engine_settings.clone()
    }

    fn set_engine_settings(&self, settings: &EngineSettings) {
        self.update_persisted(|ui| ui.engine_settings = settings.clone());
    }

    fn wakewords(&self) -> String {
        self.lock().ui.wakewords.clone()
    }

    fn set_wakewords(&self, wakewords: &str) {
        self.update_persisted(|ui| ui.wakewords = wakewords.to_owned());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
