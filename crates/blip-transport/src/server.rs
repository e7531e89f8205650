//! Accepting `BLIP_3` WebSocket connections as a server.

use std::net::SocketAddr;
use std::sync::Arc;

use blip_core::{Connection, ConnectionConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

use crate::client::BLIP_SUBPROTOCOL;
use crate::delegate::ConnectionDelegate;
use crate::driver::{self, ConnectionHandle};
use crate::error::TransportError;

/// A bound listener accepting `BLIP_3` WebSocket connections.
///
/// A plain TCP listener plus a WebSocket handshake per connection.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Binds `address`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the address cannot be parsed or bound.
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let inner =
            TcpListener::bind(address).await.map_err(|err| TransportError::Bind(err.to_string()))?;
        Ok(Self { inner })
    }

    /// The address this listener is actually bound to.
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the OS cannot report the local address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.inner.local_addr().map_err(|err| TransportError::Bind(err.to_string()))
    }

    /// Accepts one TCP connection, negotiates the `BLIP_3` WebSocket
    /// handshake, and spawns a [`blip_core::Connection`] actor over it.
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the accept itself fails;
    /// [`TransportError::Handshake`] if the WebSocket upgrade fails.
    pub async fn accept(
        &self,
        config: ConnectionConfig,
        configure: impl FnOnce(&mut Connection),
        delegate: Arc<dyn ConnectionDelegate>,
    ) -> Result<(ConnectionHandle, tokio::task::JoinHandle<()>), TransportError> {
        let (tcp, _peer) =
            self.inner.accept().await.map_err(|err| TransportError::Bind(err.to_string()))?;
        let stream = accept_blip(tcp).await?;
        Ok(driver::spawn(stream, config, configure, delegate))
    }
}

async fn accept_blip(
    tcp: TcpStream,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>, TransportError> {
    tokio_tungstenite::accept_hdr_async(tcp, echo_blip_subprotocol)
        .await
        .map_err(|err| TransportError::Handshake(err.to_string()))
}

#[allow(clippy::expect_used)]
fn echo_blip_subprotocol(
    request: &Request,
    mut response: Response,
) -> Result<Response, tokio_tungstenite::tungstenite::handshake::server::ErrorResponse> {
    let requested = request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if requested.split(',').map(str::trim).any(|p| p == BLIP_SUBPROTOCOL) {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            BLIP_SUBPROTOCOL.parse().expect("constant parses as a header value"),
        );
    } else {
        tracing::warn!(requested, "client did not offer the BLIP_3 subprotocol; accepting anyway");
    }
    Ok(response)
}
