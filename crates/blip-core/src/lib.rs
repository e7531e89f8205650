//! The BLIP connection engine: a pure, deterministic state machine driving
//! `blip-proto` frames over a `WebSocket` capability.
//!
//! `blip-core` owns everything the wire format (`blip-proto`) does not: the
//! outgoing scheduler and its priority discipline, ack-driven flow control
//! and the icebox, the shared per-connection compression state, the
//! request-handler registry, and progress/log reporting. It never performs
//! I/O itself — [`connection::Connection`] methods take input and return a
//! `Vec<connection::Action>` for a host-level driver (`blip-transport` in
//! production, `blip-harness` under simulation) to execute.

mod codec;
mod config;
mod connection;
mod error;
mod handler;
mod log;
mod outgoing;
mod progress;
mod websocket;

pub use codec::{Deflater, Inflater};
pub use config::{ConnectionConfig, DEFAULT_COMPRESSION_LEVEL};
pub use connection::{Action, CloseKind, CloseStatus, Connection, ConnectionState};
pub use error::ConnectionError;
pub use handler::{Handler, HandlerError, HandlerOutcome, HandlerRegistry};
pub use log::{LogEntry, LogLevel, LogObserver, LogSystem, ObjectPathRegistry};
pub use outgoing::OutgoingMessage;
pub use progress::{ProgressEvent, ProgressState};
pub use websocket::WebSocket;
