//! The `WebSocket` capability a [`crate::connection::Connection`] rides on
//! top of.
//!
//! `blip-core` only defines the trait. `blip-transport` provides the
//! production `tokio-tungstenite`-backed implementation; `blip-harness`
//! provides a deterministic in-memory one for simulation. The connection
//! itself never holds one directly — it is a pure state machine that emits
//! [`crate::connection::Action::Send`] bytes for a driver to hand to
//! whichever `WebSocket` it owns.

use async_trait::async_trait;

use crate::error::ConnectionError;

/// A single WebSocket connection negotiated with the `BLIP_3` subprotocol.
#[async_trait]
pub trait WebSocket: Send + Sync {
    /// Sends one binary message (one BLIP frame).
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Transport`] if the underlying socket failed.
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), ConnectionError>;

    /// Closes the socket with a status code and human-readable reason.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Transport`] if the underlying socket failed.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ConnectionError>;
}
