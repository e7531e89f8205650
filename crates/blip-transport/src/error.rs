//! Transport-level errors.

use thiserror::Error;

/// Errors raised while dialing, accepting, or driving a `BLIP_3` WebSocket.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The WebSocket handshake (dial or accept) failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A send or receive on an established socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The peer did not negotiate the `BLIP_3` subprotocol.
    #[error("peer did not negotiate the BLIP_3 subprotocol")]
    SubprotocolMismatch,

    /// The listener's bind address could not be parsed or bound.
    #[error("bind failed: {0}")]
    Bind(String),
}

impl From<TransportError> for blip_core::ConnectionError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}
