//! # Protocol Dispatcher
//!
//! Turns each inbound unit into exactly one outbound response.
//!
//! | inbound | effect | reply |
//! |---|---|---|
//! | `PING` | none | `PONG` |
//! | `AUDIOSTREAMINGSERVICE_LOCK` | lock, issue token | `AUDIOSTREAMINGSERVICE_LOCKED` (token) |
//! | `AUDIOSTREAMINGSERVICE_UNLOCK` | unlock on token match | `AUDIOSTREAMINGSERVICE_UNLOCKED` |
//! | `AUDIOSTREAMINGSERVICE_SEND` | token check only | `AUDIOSTREAMINGSERVICE_RECEIVED` |
//! | raw audio | append to sink | `AUDIOSTREAM_RECEIVED` |
//! | anything else | none | `ERROR` |
//!
//! SEND is an acknowledgment gate; raw audio units are the only path that
//! writes to the sink. Protocol errors become `ERROR` replies and keep the
//! connection open. A sink failure replies `ERROR` and asks the caller to
//! close the connection.

use crate::error::ProtocolError;
use crate::state::StreamMetrics;
use crate::stream::codec::{
    ControlKind, ControlMessage, FrameKind, InboundUnit, MessageCodec, OutboundResponse, ResponseType,
};
use crate::stream::session::SessionHandle;
use crate::stream::sink::AudioSink;
use actix_web::web::Bytes;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const SINK_FAILURE_MESSAGE: &str = "Failed to persist audio data.";

/// Result of dispatching one inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub response: OutboundResponse,
    /// The connection must be closed after `response` is written
    pub close: bool,
}

impl Dispatch {
    fn reply(response: OutboundResponse) -> Self {
        Self {
            response,
            close: false,
        }
    }
}

/// Per-connection protocol handler.
pub struct Dispatcher {
    connection_id: Uuid,
    session: SessionHandle,
    sink: Arc<dyn AudioSink>,
    codec: MessageCodec,
    metrics: Arc<StreamMetrics>,
}

impl Dispatcher {
    pub fn new(
        connection_id: Uuid,
        session: SessionHandle,
        sink: Arc<dyn AudioSink>,
        binary_frames_are_audio: bool,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            connection_id,
            session,
            sink,
            codec: MessageCodec::new(binary_frames_are_audio),
            metrics,
        }
    }

    #[cfg(test)]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[cfg(test)]
    pub fn session_mut(&mut self) -> &mut SessionHandle {
        &mut self.session
    }

    /// Handle one frame and produce its reply.
    pub fn dispatch(&mut self, frame: FrameKind, payload: Bytes) -> Dispatch {
        match self.codec.decode(frame, payload) {
            Ok(InboundUnit::RawAudio(chunk)) => self.handle_audio(&chunk),
            Ok(InboundUnit::Control(message)) => self.handle_control(message),
            Err(err) => self.reject(err),
        }
    }

    /// Connection teardown: drop the lock this connection holds.
    pub fn close(&mut self) {
        if let Some(token) = self.session.release() {
            info!(connection_id = %self.connection_id, token = %token, "Lock released on disconnect");
        }
    }

    fn handle_control(&mut self, message: ControlMessage) -> Dispatch {
        debug!(
            connection_id = %self.connection_id,
            kind = message.kind.as_str(),
            locked = self.session.is_locked(),
            "Control message"
        );
        let token = message.token.as_deref();

        let result = match message.kind {
            ControlKind::Ping => Ok(OutboundResponse::new(ResponseType::Pong, "PONG")),
            ControlKind::Lock => self.session.lock().map(|token| {
                self.metrics.record_lock();
                info!(connection_id = %self.connection_id, token = %token, "Audio streaming service locked");
                OutboundResponse::new(ResponseType::Locked, token.as_str())
            }),
            ControlKind::Unlock => self.session.unlock(token).map(|()| {
                info!(connection_id = %self.connection_id, "Audio streaming service unlocked");
                OutboundResponse::new(ResponseType::Unlocked, "Successfully unlocked the server.")
            }),
            ControlKind::Send => self
                .session
                .authorize_send(token)
                .map(|()| OutboundResponse::new(ResponseType::SendReceived, "Data streaming success.")),
            ControlKind::Unknown(kind) => Err(ProtocolError::UnknownMessageType(kind)),
        };

        match result {
            Ok(response) => Dispatch::reply(response),
            Err(err) => self.reject(err),
        }
    }

    fn handle_audio(&mut self, chunk: &[u8]) -> Dispatch {
        match self.sink.append(chunk) {
            Ok(()) => {
                self.metrics.record_audio(chunk.len());
                debug!(connection_id = %self.connection_id, bytes = chunk.len(), "Audio chunk persisted");
                Dispatch::reply(OutboundResponse::new(ResponseType::AudioReceived, "Audio buffer received"))
            }
            Err(err) => {
                self.metrics.record_sink_failure();
                error!(
                    connection_id = %self.connection_id,
                    sink = %self.sink.describe(),
                    error = %err,
                    "Failed to append audio chunk, closing connection"
                );
                Dispatch {
                    response: OutboundResponse::error(SINK_FAILURE_MESSAGE),
                    close: true,
                }
            }
        }
    }

    fn reject(&self, err: ProtocolError) -> Dispatch {
        self.metrics.record_protocol_error();
        warn!(connection_id = %self.connection_id, error = %err, "Rejected request");
        Dispatch::reply(OutboundResponse::from(&err))
    }
}
