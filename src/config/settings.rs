//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::catalog::EngineSettings;
use crate::wakeword::ChatMode;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Where the engine catalog and the ASR stream endpoint live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP base URL of the backend, e.g. `http://localhost:8880`.
    pub base_url: String,
    /// Path listing the ASR engines.  `{engine_list_path}/{name}` returns the
    /// parameter schema of one engine.
    pub engine_list_path: String,
    /// Path (or absolute `ws://` / `wss://` URL) of the streaming endpoint.
    pub stream_path: String,
    /// Per-request timeout for catalog calls.
    pub timeout_secs: u64,
    /// Keep-alive `PING` interval on the stream socket.  `None` disables it.
    pub ping_interval_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8880".into(),
            engine_list_path: "/adh/asr/v0/engine".into(),
            stream_path: "/adh/asr/v0/engine/stream".into(),
            timeout_secs: 10,
            ping_interval_secs: Some(20),
        }
    }
}

impl ServerConfig {
    /// WebSocket URL of the streaming endpoint.
    ///
    /// ```
    /// use sentio_wakeword::config::ServerConfig;
    ///
    /// let mut server = ServerConfig::default();
    /// server.base_url = "https://example.com".into();
    /// assert_eq!(server.ws_url(), "wss://example.com/adh/asr/v0/engine/stream");
    /// ```
    pub fn ws_url(&self) -> String {
        if self.stream_path.starts_with("ws://") || self.stream_path.starts_with("wss://") {
            return self.stream_path.clone();
        }
        let base = self.base_url.trim_end_matches('/');
        let host = if let Some(rest) = base.strip_prefix("https") {
            format!("wss{rest}")
        } else if let Some(rest) = base.strip_prefix("http") {
            format!("ws{rest}")
        } else {
            base.to_string()
        };
        format!("{host}{}", self.stream_path)
    }

    /// Absolute URL of the engine list endpoint.
    pub fn engine_list_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.engine_list_path
        )
    }
}

// ---------------------------------------------------------------------------
// WakewordConfig
// ---------------------------------------------------------------------------

/// Persisted wake-word panel state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WakewordConfig {
    /// Master switch of the wake-word panel.
    pub enabled: bool,
    /// Name of the selected streaming engine.
    pub engine: Option<String>,
    /// Comma-separated wake-word list.
    pub wakewords: String,
    /// Last finalized (or detected) transcript.
    pub last_detected_text: Option<String>,
    /// Current values of the selected engine's parameters.
    pub engine_settings: EngineSettings,
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Fixed capture parameters handed to the microphone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count (only mono is supported).
    pub channels: u16,
    /// Samples per frame sent upstream.
    pub frame_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_size: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// DetectionConfig
// ---------------------------------------------------------------------------

/// Timing of the transient "detected" overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// How long the detected flag stays raised after a match.
    pub hold_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { hold_ms: 3_000 }
    }
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

/// Persisted chat-mode state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub mode: ChatMode,
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use sentio_wakeword::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub wakeword: WakewordConfig,
    pub audio: AudioConfig,
    pub detection: DetectionConfig,
    pub chat: ChatConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ParamValue;
    use tempfile::tempdir;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");

        assert!(!config.wakeword.enabled);
        assert!(config.wakeword.engine.is_none());
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.chat.mode, ChatMode::Normal);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.server.base_url, "http://localhost:8880");
        assert_eq!(cfg.server.timeout_secs, 10);
        assert_eq!(cfg.audio.sample_rate, 16_000);
        assert_eq!(cfg.audio.channels, 1);
        assert_eq!(cfg.audio.frame_size, 1024);
        assert_eq!(cfg.detection.hold_ms, 3_000);
        assert!(cfg.wakeword.wakewords.is_empty());
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.wakeword.enabled = true;
        cfg.wakeword.engine = Some("funasrStreaming".into());
        cfg.wakeword.wakewords = "hello, sentio".into();
        cfg.wakeword
            .engine_settings
            .insert("rate".into(), ParamValue::Int(5));
        cfg.wakeword
            .engine_settings
            .insert("lang".into(), ParamValue::Text("en".into()));
        cfg.wakeword
            .engine_settings
            .insert("itn".into(), ParamValue::Bool(true));
        cfg.chat.mode = ChatMode::Immersive;
        cfg.server.ping_interval_secs = None;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert!(loaded.wakeword.enabled);
        assert_eq!(loaded.wakeword.engine.as_deref(), Some("funasrStreaming"));
        assert_eq!(loaded.wakeword.wakewords, "hello, sentio");
        assert_eq!(loaded.wakeword.engine_settings, cfg.wakeword.engine_settings);
        assert_eq!(loaded.chat.mode, ChatMode::Immersive);
        assert_eq!(loaded.server.ping_interval_secs, None);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[wakeword]\nwakewords = \"hey\"\n").expect("write");

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.wakeword.wakewords, "hey");
        assert_eq!(loaded.detection.hold_ms, 3_000);
        assert_eq!(loaded.server.stream_path, "/adh/asr/v0/engine/stream");
    }

    #[test]
    fn ws_url_maps_scheme() {
        let server = ServerConfig::default();
        assert_eq!(server.ws_url(), "ws://localhost:8880/adh/asr/v0/engine/stream");

        let absolute = ServerConfig {
            stream_path: "wss://asr.example.com/stream".into(),
            ..ServerConfig::default()
        };
        assert_eq!(absolute.ws_url(), "wss://asr.example.com/stream");
    }

    #[test]
    fn engine_list_url_trims_trailing_slash() {
        let server = ServerConfig {
            base_url: "http://10.0.0.2:8880/".into(),
            ..ServerConfig::default()
        };
        assert_eq!(server.engine_list_url(), "http://10.0.0.2:8880/adh/asr/v0/engine");
    }
}
