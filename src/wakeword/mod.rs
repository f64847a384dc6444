//! Wake-word detection: matching, the listening state machine and the
//! UI-facing state it drives.
//!
//! * [`matcher`]: [`WakewordList`] parsing and substring matching.
//! * [`detector`]: [`WakewordDetector`], the session owner and its command loop.
//! * [`state`]: [`DetectorState`], [`ChatMode`], the [`StateSink`] seam and
//!   the persisted [`SettingsStore`].
//! * [`notify`]: user-facing [`Notice`]s.

pub mod detector;
pub mod matcher;
pub mod notify;
pub mod state;

pub use detector::{DetectorCommand, DetectorError, DetectorEvent, WakewordDetector, WAKEWORDS_PARAM};
pub use matcher::{matches, WakewordList};
pub use notify::{ConsoleNotifier, ErrorKind, Notice, Notifier};
pub use state::{ChatMode, DetectorState, ParamSchema, SettingsStore, StateSink, UiState};
