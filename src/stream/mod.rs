//! # Audio Stream Protocol
//!
//! The connection-scoped protocol that gates and persists an audio stream.
//!
//! ## Key Components:
//! - **Sink**: append-only destination for audio bytes
//! - **Session**: lock state and token issuance
//! - **Codec**: control-vs-audio classification and response serialization
//! - **Dispatcher**: one response per inbound unit
//!
//! The WebSocket actor that drives a dispatcher lives in `src/websocket.rs`.

pub mod codec;      // Frame classification and response encoding
pub mod dispatcher; // Per-connection request handling
pub mod session;    // Lock state machine
pub mod sink;       // Audio persistence
