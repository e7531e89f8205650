//! BLIP wire format: frames, message types, the properties dictionary, and
//! outgoing/incoming message (de)framing.
//!
//! This crate is pure: no I/O, no compression codec, no scheduling. It only
//! knows how to turn a [`builder::MessageBuilder`] into a stream of frame
//! payloads and how to turn a stream of decompressed frame payloads back
//! into a [`incoming::CompletedMessage`]. `blip-core` drives both sides and
//! owns the shared deflater/inflater that sits between this crate and the
//! wire.

mod builder;
mod error;
mod frame;
mod incoming;
mod message;
mod properties;
mod varint;

pub use builder::{DataSource, MessageBuilder, MessageOut};
pub use error::FrameError;
pub use frame::{CHECKSUM_SIZE, Frame};
pub use incoming::{CompletedMessage, MessageIn};
pub use message::{
    DEFAULT_FRAME_SIZE, FrameFlags, ICEBOX_THRESHOLD, INCOMING_ACK_THRESHOLD, MAX_PROPERTIES_SIZE,
    MessageNo, MessageType, URGENT_FRAME_SIZE,
};
pub use properties::{BLIP_ERROR_DOMAIN, ERROR_CODE, ERROR_DOMAIN, PROFILE, Properties};
pub use varint::{read_uvarint, write_uvarint};
