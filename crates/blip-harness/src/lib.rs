//! Deterministic network simulation for `blip-core`.
//!
//! Drives pairs of [`blip_core::Connection`]s over `turmoil`'s virtual TCP,
//! injecting latency, drops, and partitions deterministically. BLIP frames,
//! which normally ride one per WebSocket binary message, are carried
//! length-prefixed over the raw stream (see [`framed`]).

pub mod framed;
pub mod sim_driver;

pub use sim_driver::{SimHandle, SimOutcome, spawn};
