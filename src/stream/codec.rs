//! # Message Codec
//!
//! Classifies inbound WebSocket frames and serializes outbound responses.
//!
//! ## Classification:
//! - A payload that parses as a JSON object with a string `type` field is a
//!   **control message**.
//! - A JSON object without a string `type` is rejected as malformed.
//! - Anything else (parse failure, or JSON that is not an object) is a
//!   **raw audio chunk** and is not validated further.
//!
//! ## Binary tag:
//! With `binary_frames_are_audio` enabled, the frame opcode acts as an
//! out-of-band tag: binary frames are always audio and never JSON-parsed, so
//! audio bytes that happen to form valid JSON cannot be taken for control.
//! Text frames are always classified by content.
//!
//! ## Wire Format:
//! - **Client → Server**: `{"type": "...", "token": "..."}` or raw bytes
//! - **Server → Client**: `{"type": "...", "data": "..."}`

use crate::error::ProtocolError;
use actix_web::web::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WebSocket opcode the payload arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Declared `type` of a control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    Ping,
    Lock,
    Unlock,
    Send,
    /// Any other string; kept for logging
    Unknown(String),
}

impl ControlKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "PING" => ControlKind::Ping,
            "AUDIOSTREAMINGSERVICE_LOCK" => ControlKind::Lock,
            "AUDIOSTREAMINGSERVICE_UNLOCK" => ControlKind::Unlock,
            "AUDIOSTREAMINGSERVICE_SEND" => ControlKind::Send,
            other => ControlKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlKind::Ping => "PING",
            ControlKind::Lock => "AUDIOSTREAMINGSERVICE_LOCK",
            ControlKind::Unlock => "AUDIOSTREAMINGSERVICE_UNLOCK",
            ControlKind::Send => "AUDIOSTREAMINGSERVICE_SEND",
            ControlKind::Unknown(kind) => kind,
        }
    }
}

/// A parsed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub kind: ControlKind,
    /// `token` field when it is a JSON string; any other value counts as absent
    pub token: Option<String>,
}

/// One classified inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundUnit {
    Control(ControlMessage),
    RawAudio(Bytes),
}

/// Response types sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "PONG")]
    Pong,
    #[serde(rename = "AUDIOSTREAMINGSERVICE_LOCKED")]
    Locked,
    #[serde(rename = "AUDIOSTREAMINGSERVICE_UNLOCKED")]
    Unlocked,
    #[serde(rename = "AUDIOSTREAMINGSERVICE_RECEIVED")]
    SendReceived,
    #[serde(rename = "AUDIOSTREAM_RECEIVED")]
    AudioReceived,
    #[serde(rename = "ERROR")]
    Error,
}

/// `{"type": ..., "data": ...}` reply, one per inbound unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundResponse {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub data: String,
}

impl OutboundResponse {
    pub fn new(kind: ResponseType, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self::new(ResponseType::Error, data)
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&ProtocolError> for OutboundResponse {
    fn from(err: &ProtocolError) -> Self {
        OutboundResponse::error(err.wire_message())
    }
}

/// Frame classifier configured with the framing mode.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    binary_frames_are_audio: bool,
}

impl MessageCodec {
    pub fn new(binary_frames_are_audio: bool) -> Self {
        Self {
            binary_frames_are_audio,
        }
    }

    pub fn decode(&self, frame: FrameKind, payload: Bytes) -> Result<InboundUnit, ProtocolError> {
        if frame == FrameKind::Binary && self.binary_frames_are_audio {
            return Ok(InboundUnit::RawAudio(payload));
        }
        classify(payload)
    }
}

/// Content-based classification of one payload.
pub fn classify(payload: Bytes) -> Result<InboundUnit, ProtocolError> {
    let fields = match serde_json::from_slice::<Value>(&payload) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => return Ok(InboundUnit::RawAudio(payload)),
    };

    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .map(ControlKind::parse)
        .ok_or(ProtocolError::MalformedControl)?;

    let token = fields.get("token").and_then(Value::as_str).map(str::to_owned);

    Ok(InboundUnit::Control(ControlMessage { kind, token }))
}
