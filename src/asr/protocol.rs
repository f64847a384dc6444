//! Action-tagged frame codec for the ASR stream socket.
//!
//! Every binary WebSocket message is one frame:
//!
//! ```text
//! ┌────────────────────────┬──────────────────┬─────────────────┐
//! │ action (18 B, ASCII,   │ payload length   │ payload         │
//! │ right-padded w/ ' ')   │ (u32, big-endian)│ (length bytes)  │
//! └────────────────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! Payloads are opaque bytes here.  Transcript and error payloads are UTF-8
//! text, but decoding them is left to the consumer.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::EngineSettings;

/// Width of the action name field.
pub const ACTION_FIELD_LEN: usize = 18;
/// Width of the payload length field.
pub const LENGTH_FIELD_LEN: usize = 4;
/// Total header size.
pub const HEADER_LEN: usize = ACTION_FIELD_LEN + LENGTH_FIELD_LEN;

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("payload length mismatch: header says {declared}, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("action name is not ASCII")]
    InvalidActionName,

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("text frames are not part of the protocol")]
    UnexpectedText,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Body of the `ENGINE_START` handshake.
#[derive(Debug, Clone, Serialize)]
pub struct StartRequest<'a> {
    pub engine: &'a str,
    pub config: &'a EngineSettings,
}

/// Frames the client sends to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    /// Keep-alive; answered with `PONG`.
    Ping,
    /// Session handshake; JSON [`StartRequest`] payload.
    EngineStart(Vec<u8>),
    /// One chunk of PCM16 audio.
    PartialAudioInput(Vec<u8>),
    /// Last chunk of an utterance.
    FinalAudioInput(Vec<u8>),
    /// End of session.
    Stop,
}

impl OutboundAction {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundAction::Ping => "PING",
            OutboundAction::EngineStart(_) => "ENGINE_START",
            OutboundAction::PartialAudioInput(_) => "PARTIAL_INPUT",
            OutboundAction::FinalAudioInput(_) => "FINAL_INPUT",
            OutboundAction::Stop => "ENGINE_STOP",
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            OutboundAction::EngineStart(p)
            | OutboundAction::PartialAudioInput(p)
            | OutboundAction::FinalAudioInput(p) => p,
            OutboundAction::Ping | OutboundAction::Stop => &[],
        }
    }

    /// Build the `ENGINE_START` handshake for `engine` with `config`.
    pub fn engine_start(engine: &str, config: &EngineSettings) -> Self {
        let body = serde_json::to_vec(&StartRequest { engine, config })
            .unwrap_or_else(|_| b"{}".to_vec());
        OutboundAction::EngineStart(body)
    }

    /// Serialise into one wire frame.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.name(), self.payload())
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Frames the backend sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundAction {
    Pong,
    /// Backend is loading the engine.  The wire name keeps the backend's
    /// spelling, `ENGINE_INITIALZING`.
    EngineInitializing,
    EngineStarting,
    EngineStarted,
    /// Interim transcript (UTF-8 bytes).
    PartialOutput(Vec<u8>),
    /// Finalized transcript (UTF-8 bytes).
    FinalOutput(Vec<u8>),
    EngineStopped,
    /// Error message (UTF-8 bytes).
    Error(Vec<u8>),
    /// Server-side wake-word hit; JSON `{"text", "wakeword"}` payload.
    WakewordDetected(Vec<u8>),
}

impl InboundAction {
    pub fn name(&self) -> &'static str {
        match self {
            InboundAction::Pong => "PONG",
            InboundAction::EngineInitializing => "ENGINE_INITIALZING",
            InboundAction::EngineStarting => "ENGINE_STARTING",
            InboundAction::EngineStarted => "ENGINE_STARTED",
            InboundAction::PartialOutput(_) => "PARTIAL_OUTPUT",
            InboundAction::FinalOutput(_) => "FINAL_OUTPUT",
            InboundAction::EngineStopped => "ENGINE_STOPPED",
            InboundAction::Error(_) => "ERROR",
            InboundAction::WakewordDetected(_) => "WAKEWORD_DETECTED",
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            InboundAction::PartialOutput(p)
            | InboundAction::FinalOutput(p)
            | InboundAction::Error(p)
            | InboundAction::WakewordDetected(p) => p,
            _ => &[],
        }
    }

    /// Serialise into one wire frame.  The client never sends these; servers
    /// and tests do.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.name(), self.payload())
    }

    /// Parse one wire frame.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (name, payload) = split_frame(frame)?;
        let payload = payload.to_vec();
        match name {
            "PONG" => Ok(InboundAction::Pong),
            "ENGINE_INITIALZING" => Ok(InboundAction::EngineInitializing),
            "ENGINE_STARTING" => Ok(InboundAction::EngineStarting),
            "ENGINE_STARTED" => Ok(InboundAction::EngineStarted),
            "PARTIAL_OUTPUT" => Ok(InboundAction::PartialOutput(payload)),
            "FINAL_OUTPUT" => Ok(InboundAction::FinalOutput(payload)),
            "ENGINE_STOPPED" => Ok(InboundAction::EngineStopped),
            "ERROR" => Ok(InboundAction::Error(payload)),
            "WAKEWORD_DETECTED" => Ok(InboundAction::WakewordDetected(payload)),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn encode_frame(name: &str, payload: &[u8]) -> Vec<u8> {
    debug_assert!(name.len() <= ACTION_FIELD_LEN);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(format!("{:<width$}", name, width = ACTION_FIELD_LEN).as_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a frame into its trimmed action name and payload.
pub fn split_frame(frame: &[u8]) -> Result<(&str, &[u8]), ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated(frame.len()));
    }

    let (name_field, rest) = frame.split_at(ACTION_FIELD_LEN);
    let (len_field, payload) = rest.split_at(LENGTH_FIELD_LEN);

    if !name_field.is_ascii() {
        return Err(ProtocolError::InvalidActionName);
    }
    let name = std::str::from_utf8(name_field)
        .map_err(|_| ProtocolError::InvalidActionName)?
        .trim_end_matches([' ', '\0']);

    let declared = u32::from_be_bytes([len_field[0], len_field[1], len_field[2], len_field[3]]) as usize;
    if declared != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok((name, payload))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ParamValue;

    #[test]
    fn header_is_padded_action_then_length() {
        let frame = OutboundAction::PartialAudioInput(vec![1, 2, 3]).encode();
        assert_eq!(frame.len(), HEADER_LEN + 3);
        assert_eq!(&frame[..ACTION_FIELD_LEN], b"PARTIAL_INPUT     ");
        assert_eq!(&frame[ACTION_FIELD_LEN..HEADER_LEN], &[0, 0, 0, 3]);
        assert_eq!(&frame[HEADER_LEN..], &[1, 2, 3]);
    }

    #[test]
    fn stop_has_empty_payload() {
        let frame = OutboundAction::Stop.encode();
        let (name, payload) = split_frame(&frame).unwrap();
        assert_eq!(name, "ENGINE_STOP");
        assert!(payload.is_empty());
    }

    #[test]
    fn engine_start_carries_engine_and_config_json() {
        let mut config = EngineSettings::new();
        config.insert("mode".into(), ParamValue::Text("2pass".into()));
        config.insert("chunk".into(), ParamValue::Int(10));

        let frame = OutboundAction::engine_start("wakeword", &config).encode();
        let (name, payload) = split_frame(&frame).unwrap();
        assert_eq!(name, "ENGINE_START");

        let json: serde_json::Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(json["engine"], "wakeword");
        assert_eq!(json["config"]["mode"], "2pass");
        assert_eq!(json["config"]["chunk"], 10);
    }

    #[test]
    fn decodes_transcript_frames() {
        let partial = InboundAction::PartialOutput("say hello".as_bytes().to_vec());
        assert_eq!(InboundAction::decode(&partial.encode()).unwrap(), partial);

        let error = InboundAction::Error("engine crashed".as_bytes().to_vec());
        assert_eq!(InboundAction::decode(&error.encode()).unwrap(), error);
    }

    #[test]
    fn decodes_backend_status_and_wakeword_frames() {
        let mut frame = b"ENGINE_INITIALZING".to_vec();
        frame.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(
            InboundAction::decode(&frame).unwrap(),
            InboundAction::EngineInitializing
        );

        let hit = InboundAction::WakewordDetected(br#"{"text":"hello","wakeword":true}"#.to_vec());
        let frame = hit.encode();
        assert_eq!(&frame[..ACTION_FIELD_LEN], b"WAKEWORD_DETECTED ");
        assert_eq!(InboundAction::decode(&frame).unwrap(), hit);
    }

    #[test]
    fn decodes_header_only_frame() {
        let frame = InboundAction::EngineStopped.encode();
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(InboundAction::decode(&frame).unwrap(), InboundAction::EngineStopped);
    }

    #[test]
    fn nul_padding_is_accepted() {
        let mut frame = b"PONG".to_vec();
        frame.resize(ACTION_FIELD_LEN, 0);
        frame.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(InboundAction::decode(&frame).unwrap(), InboundAction::Pong);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        assert_eq!(
            InboundAction::decode(b"PONG"),
            Err(ProtocolError::Truncated(4))
        );
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut frame = InboundAction::FinalOutput(b"abc".to_vec()).encode();
        frame.pop();
        assert_eq!(
            InboundAction::decode(&frame),
            Err(ProtocolError::LengthMismatch {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let frame = encode_frame("WAKEWORD_DETECTED", b"{}");
        assert_eq!(
            InboundAction::decode(&frame),
            Err(ProtocolError::UnknownAction("WAKEWORD_DETECTED".into()))
        );
    }
}
