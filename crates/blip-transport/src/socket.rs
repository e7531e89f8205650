//! The `blip_core::WebSocket` capability, implemented over a split
//! `tokio-tungstenite` sink.

use async_trait::async_trait;
use blip_core::{ConnectionError, WebSocket};
use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// The write half of a negotiated `BLIP_3` WebSocket.
///
/// `blip-core`'s [`blip_core::connection::Connection`] never holds this
/// directly — `blip-transport`'s driver owns both this and the read half,
/// feeding `Action::Send` bytes into [`Self::send_binary`] and forwarding
/// incoming binary frames into `Connection::receive_frame`.
pub struct TungsteniteSocket<S> {
    sink: S,
}

impl<S> TungsteniteSocket<S> {
    /// Wraps an already-split sink half of a negotiated WebSocket stream.
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S> WebSocket for TungsteniteSocket<S>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + Sync,
{
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), ConnectionError> {
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
        let _ = self.sink.send(Message::Close(Some(frame))).await;
        self.sink.close().await.map_err(|err| ConnectionError::Transport(err.to_string()))
    }
}
