//! Error kinds used by the connection state machine.
//!
//! The engine never throws across the actor boundary: a decode error becomes
//! an [`Action::CloseSocket`](crate::Action::CloseSocket) returned from
//! whatever call observed it, not a panic or an `Err` that unwinds out of
//! the connection.

use thiserror::Error;

/// Errors the core can observe while driving a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// A malformed frame, out-of-range request number, or other structural
    /// violation of the wire protocol. The connection closes
    /// with an "unexpected condition" code and `on_close` reports
    /// `CloseKind::Exception`.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An `ErrorType` response carrying `Error-Domain`/`Error-Code`
    /// properties, surfaced to the requester as its response's
    /// `get_error()`.
    #[error("peer error [{domain}/{code}]: {message}")]
    PeerError {
        /// The `Error-Domain` property value.
        domain: String,
        /// The `Error-Code` property value.
        code: i32,
        /// Human-readable message, if the peer supplied one as the body.
        message: String,
    },

    /// An error propagated verbatim from the underlying `WebSocket`
    /// capability.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection closed or was terminated before this operation
    /// completed.
    #[error("cancelled: connection closed")]
    Cancelled,
}

impl From<blip_proto::FrameError> for ConnectionError {
    fn from(err: blip_proto::FrameError) -> Self {
        Self::ProtocolViolation(err.to_string())
    }
}

impl ConnectionError {
    /// Whether this error should be reported to the close delegate as
    /// `CloseKind::Exception` rather than a normal shutdown.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_are_exceptions() {
        assert!(ConnectionError::ProtocolViolation("bad varint".into()).is_exception());
        assert!(!ConnectionError::Cancelled.is_exception());
        assert!(
            !ConnectionError::PeerError { domain: "HTTP".into(), code: 404, message: String::new() }
                .is_exception()
        );
        assert!(!ConnectionError::Transport("socket reset".into()).is_exception());
    }

    #[test]
    fn frame_error_converts_to_protocol_violation() {
        let err: ConnectionError = blip_proto::FrameError::ChecksumMismatch.into();
        assert!(matches!(err, ConnectionError::ProtocolViolation(_)));
    }
}
