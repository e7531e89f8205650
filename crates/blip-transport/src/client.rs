//! Dialing a `BLIP_3` WebSocket as a client.

use std::sync::Arc;

use blip_core::{Connection, ConnectionConfig};
use http::Request;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use crate::delegate::ConnectionDelegate;
use crate::driver::{self, ConnectionHandle};
use crate::error::TransportError;

/// The `Sec-WebSocket-Protocol` value BLIP negotiates.
pub const BLIP_SUBPROTOCOL: &str = "BLIP_3";

/// Dials `url`, negotiates the `BLIP_3` subprotocol, and spawns a
/// [`blip_core::Connection`] actor over the resulting socket.
///
/// # Errors
///
/// [`TransportError::Handshake`] if the URL is invalid or the handshake
/// fails; [`TransportError::SubprotocolMismatch`] if the server did not echo
/// `BLIP_3` back.
pub async fn dial(
    url: &str,
    config: ConnectionConfig,
    configure: impl FnOnce(&mut Connection),
    delegate: Arc<dyn ConnectionDelegate>,
) -> Result<(ConnectionHandle, tokio::task::JoinHandle<()>), TransportError> {
    let mut request: Request<()> =
        url.into_client_request().map_err(|err| TransportError::Handshake(err.to_string()))?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        BLIP_SUBPROTOCOL.parse().map_err(|_| {
            TransportError::Handshake("invalid BLIP_3 subprotocol header".to_string())
        })?,
    );

    let (stream, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|err| TransportError::Handshake(err.to_string()))?;

    delegate.on_http_response(response.status(), response.headers());
    let negotiated = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok());
    if negotiated != Some(BLIP_SUBPROTOCOL) {
        return Err(TransportError::SubprotocolMismatch);
    }

    Ok(driver::spawn(stream, config, configure, delegate))
}
