//! Streaming ASR client.
//!
//! # Architecture
//!
//! ```text
//! AudioCapture chunk ──▶ AsrSender::send(PartialAudioInput)
//!                              │
//!                              ▼
//!                     AsrStreamClient pump task ◀──▶ backend socket
//!                              │
//!                              ▼
//!                 ClientEvent (mpsc) ──▶ WakewordDetector
//! ```
//!
//! * [`protocol`]: the action-tagged binary frame codec.
//! * [`client`]: connection lifecycle and the [`AsrClient`] seam used by
//!   the detector (and by test doubles).

pub mod client;
pub mod protocol;

pub use client::{
    AsrClient, AsrClientFactory, AsrSender, AsrStreamClient, AsrStreamClientFactory, ClientEvent,
    ConnectionState,
};
pub use protocol::{InboundAction, OutboundAction, ProtocolError};
