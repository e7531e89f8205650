//! The delegate callbacks a driven `Connection` fires. All methods default
//! to a no-op; a host overrides only the ones it cares about.

use blip_core::{CloseStatus, ConnectionState};
use blip_proto::{CompletedMessage, MessageNo, Properties};
use http::{HeaderMap, StatusCode};

/// Host-visible events fired by a driven [`blip_core::Connection`].
///
/// Implementations must not block: the driver invokes these inline on its
/// single actor task.
pub trait ConnectionDelegate: Send + Sync {
    /// The WebSocket handshake's HTTP response arrived (client side only).
    fn on_http_response(&self, _status: StatusCode, _headers: &HeaderMap) {}

    /// A TLS certificate was presented during the handshake (DER-encoded).
    fn on_tls_certificate(&self, _der: &[u8]) {}

    /// The underlying WebSocket finished connecting.
    fn on_connect(&self) {}

    /// The connection finished closing; `new_state` is the state the
    /// connection settled into (`Closed` or `Disconnected`).
    fn on_close(&self, _status: &CloseStatus, _new_state: ConnectionState) {}

    /// A request's properties have parsed; its body may still be streaming.
    fn on_request_beginning(&self, _msg_no: MessageNo, _properties: &Properties) {}

    /// A request has fully arrived and was dispatched to its handler (or
    /// auto-errored if none was registered).
    fn on_request_received(&self, _request: &CompletedMessage) {}

    /// A request's handler deferred its reply; the host must eventually
    /// call [`crate::ConnectionHandle::respond`] with this message number.
    fn on_deferred_request(&self, _msg_no: MessageNo, _request: &CompletedMessage) {}
}

/// A delegate that observes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDelegate;

impl ConnectionDelegate for NullDelegate {}
