//! Protocol error types.
//!
//! Errors split into two severities, and connection loops key their behavior
//! off [`ProtocolError::is_connection_fatal`]:
//!
//! - **Connection-fatal**: the byte stream itself can no longer be trusted
//!   (oversized or empty frame declarations, truncation, timeouts, socket
//!   errors). The connection is closed without attempting a response.
//! - **Request-fatal**: the frame arrived intact but its payload was not a
//!   valid message. The request is answered with an error response and the
//!   connection survives.

use std::time::Duration;

/// Hard ceiling on a single frame's declared payload length (100 MiB).
///
/// Checked against the length prefix before any payload is buffered, so a
/// hostile or corrupted peer cannot make the daemon allocate the claimed
/// size.
pub const MAX_FRAME_SIZE: u32 = 100 * 1024 * 1024;

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced by the framing and message layers.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Peer declared a frame longer than [`MAX_FRAME_SIZE`].
    #[error("declared frame length {declared} exceeds maximum of {MAX_FRAME_SIZE} bytes")]
    FrameTooLarge {
        /// The length the peer claimed.
        declared: u64,
    },

    /// Peer declared a zero-length frame.
    #[error("declared frame length is zero")]
    EmptyFrame,

    /// The stream ended partway through a frame body or header.
    #[error("connection closed mid-frame")]
    Truncated,

    /// A socket read or write exceeded its deadline.
    ///
    /// Reported distinctly from [`ProtocolError::Io`] so callers can log a
    /// stalled peer differently from a reset one; both close the connection.
    #[error("socket {operation} timed out after {timeout:?}")]
    Timeout {
        /// Which operation stalled (`"read"` or `"write"`).
        operation: &'static str,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Frame payload was not valid UTF-8 JSON of the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Underlying socket error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` if the connection cannot continue after this error.
    ///
    /// Only [`ProtocolError::MalformedPayload`] leaves the framing layer
    /// intact; everything else means the stream state is unknown.
    #[must_use]
    pub const fn is_connection_fatal(&self) -> bool {
        !matches!(self, Self::MalformedPayload(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_payload_is_not_connection_fatal() {
        let err = ProtocolError::MalformedPayload("bad json".to_string());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_framing_errors_are_connection_fatal() {
        assert!(ProtocolError::FrameTooLarge { declared: 1 << 30 }.is_connection_fatal());
        assert!(ProtocolError::EmptyFrame.is_connection_fatal());
        assert!(ProtocolError::Truncated.is_connection_fatal());
        assert!(
            ProtocolError::Timeout {
                operation: "read",
                timeout: Duration::from_secs(120),
            }
            .is_connection_fatal()
        );
    }

    #[test]
    fn test_error_messages_name_the_limit() {
        let err = ProtocolError::FrameTooLarge {
            declared: 101 * 1024 * 1024,
        };
        assert!(err.to_string().contains("104857600"));
    }
}
