//! A `tokio-tungstenite`-backed `WebSocket` for `blip-core`. The concrete
//! WebSocket transport is deliberately out of scope for the core engine,
//! but it needs something real to run over to be a runnable crate.
//!
//! `blip-core::Connection` is a pure state machine; this crate supplies the
//! single-threaded actor loop a production host needs to actually drive one
//! — dialing or accepting a WebSocket, negotiating the `BLIP_3`
//! subprotocol, and bridging socket reads/writes to `Connection` method
//! calls.

mod client;
mod delegate;
mod driver;
mod error;
mod server;
mod socket;

pub use client::{BLIP_SUBPROTOCOL, dial};
pub use delegate::{ConnectionDelegate, NullDelegate};
pub use driver::{ConnectionHandle, MessageOutcome, spawn};
pub use error::TransportError;
pub use server::Listener;
pub use socket::TungsteniteSocket;
