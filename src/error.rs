//! # Error Handling
//!
//! Error types for the streaming protocol and the audio sink.
//!
//! ## Error Categories:
//! - **ProtocolError**: A client request that cannot be honoured. These are
//!   recovered at the dispatcher and turned into an `ERROR` response on the
//!   same connection. They never close the connection.
//! - **SinkError**: The audio sink could not persist a chunk. This is fatal
//!   to the connection that triggered it (ERROR response, then close).
//!
//! Transport failures (WebSocket protocol errors, disconnects) are not modeled
//! here; the connection actor stops on them without retry.

use std::fmt;
use std::io;

/// The operation a token was presented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOperation {
    Unlock,
    Send,
}

/// Protocol-level failures produced while handling a control message.
///
/// ## Wire mapping:
/// Every variant has a fixed human-readable string returned to the client as
/// the `data` field of an `ERROR` response (see [`ProtocolError::wire_message`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// LOCK while the session already holds a token
    AlreadyLocked,

    /// UNLOCK or SEND with a missing or mismatched token
    InvalidToken(TokenOperation),

    /// UNLOCK or SEND while the session was never locked
    UnreachableState,

    /// Control message with a `type` the server does not know
    UnknownMessageType(String),

    /// JSON object without a string `type` field
    MalformedControl,
}

impl ProtocolError {
    /// The `data` string sent to the client in the `ERROR` response.
    pub fn wire_message(&self) -> &'static str {
        match self {
            ProtocolError::AlreadyLocked => "Another client has already locked the server.",
            ProtocolError::InvalidToken(TokenOperation::Unlock) => {
                "Invalid token, could not unlock the audio streaming service."
            }
            ProtocolError::InvalidToken(TokenOperation::Send) => {
                "Invalid token, server could not handle the audio data."
            }
            ProtocolError::UnreachableState => {
                "Server is currently not locked. This should be unreachable."
            }
            ProtocolError::UnknownMessageType(_) => "Unknown message type.",
            ProtocolError::MalformedControl => "Control message is missing a string `type` field.",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::AlreadyLocked => write!(f, "session is already locked"),
            ProtocolError::InvalidToken(op) => write!(f, "invalid token presented for {:?}", op),
            ProtocolError::UnreachableState => write!(f, "session is not locked"),
            ProtocolError::UnknownMessageType(kind) => write!(f, "unknown message type: {}", kind),
            ProtocolError::MalformedControl => write!(f, "control message has no string `type` field"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Failures while appending to the audio sink.
#[derive(Debug)]
pub enum SinkError {
    /// The underlying writer failed (disk full, file removed, ...)
    Io(io::Error),

    /// Another writer panicked while holding the sink lock
    Poisoned,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Io(err) => write!(f, "Sink I/O error: {}", err),
            SinkError::Poisoned => write!(f, "Sink lock poisoned"),
        }
    }
}

impl std::error::Error for SinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SinkError::Io(err) => Some(err),
            SinkError::Poisoned => None,
        }
    }
}

impl From<io::Error> for SinkError {
    fn from(err: io::Error) -> Self {
        SinkError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_messages() {
        assert_eq!(
            ProtocolError::UnknownMessageType("FOO".to_string()).wire_message(),
            "Unknown message type."
        );
        assert_eq!(
            ProtocolError::AlreadyLocked.wire_message(),
            "Another client has already locked the server."
        );
        assert!(ProtocolError::InvalidToken(TokenOperation::Unlock)
            .wire_message()
            .starts_with("Invalid token"));
        assert!(ProtocolError::InvalidToken(TokenOperation::Send)
            .wire_message()
            .starts_with("Invalid token"));
    }

    #[test]
    fn test_sink_error_from_io() {
        let err: SinkError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert!(err.to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
