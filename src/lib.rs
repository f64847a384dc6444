//! Sentio wake-word listener.
//!
//! Streams microphone audio to a speech-recognition backend, watches the
//! transcripts for configured wake-words and switches the chat into
//! immersive mode when one is heard.
//!
//! ```text
//! audio ──PCM16 frames──▶ asr ──transcripts──▶ wakeword ──▶ StateSink
//!                          ▲                       │
//!                 catalog (engines, params) ◀──────┘
//! ```

pub mod asr;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod console;
pub mod wakeword;
