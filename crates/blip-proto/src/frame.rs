//! The wire frame: `UVarInt(msgNo) | byte(flags) | payload | 4-byte checksum`.
//!
//! Ack frames (`AckRequest`/`AckResponse`) carry only a UVarInt payload and
//! have no checksum — they bypass both the codec and the checksum logic.

use bytes::{BufMut, Bytes};

use crate::error::FrameError;
use crate::message::{FrameFlags, MessageNo};
use crate::varint::{read_uvarint, write_uvarint};

/// CRC32-C (Castagnoli) checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// One wire frame: a slice of one BLIP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message this frame belongs to.
    pub msg_no: MessageNo,
    /// Type + boolean bits for this frame.
    pub flags: FrameFlags,
    /// For non-ack frames: the (possibly compressed) body bytes, exactly as
    /// they go on the wire. For ack frames: the UVarInt-encoded received
    /// byte count.
    pub payload: Bytes,
}

impl Frame {
    /// Builds a non-ack frame.
    #[must_use]
    pub fn new(msg_no: MessageNo, flags: FrameFlags, payload: impl Into<Bytes>) -> Self {
        Self { msg_no, flags, payload: payload.into() }
    }

    /// Whether this frame's type bypasses codec and checksum.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.flags.message_type().is_some_and(crate::message::MessageType::is_ack)
    }

    /// Serializes this frame onto the wire, appending a CRC32-C checksum
    /// over `msgNo | flags | payload` unless this is an ack frame.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut head = Vec::new();
        write_uvarint(&mut head, self.msg_no.0);
        head.push(self.flags.bits());
        head.extend_from_slice(&self.payload);

        if self.is_ack() {
            dst.put_slice(&head);
        } else {
            let checksum = crc32c::crc32c(&head);
            dst.put_slice(&head);
            dst.put_u32(checksum);
        }
    }

    /// Parses one complete WebSocket binary message as a frame.
    ///
    /// # Errors
    ///
    /// [`FrameError::Truncated`] if `bytes` ends before the varint, flags
    /// byte, or (for non-ack frames) checksum are present;
    /// [`FrameError::MalformedVarint`] if the leading `msgNo` varint never
    /// terminates; [`FrameError::ChecksumMismatch`] if the trailing checksum
    /// does not match the preceding bytes.
    #[allow(clippy::expect_used)]
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (msg_no_raw, consumed) = read_uvarint(bytes)?;
        let rest = &bytes[consumed..];
        let &flags_byte = rest
            .first()
            .ok_or(FrameError::Truncated { expected: consumed + 1, actual: bytes.len() })?;
        let flags = FrameFlags::from_bits_retain(flags_byte);
        let body = &rest[1..];

        let msg_no = MessageNo(msg_no_raw);
        let is_ack = flags.message_type().is_some_and(crate::message::MessageType::is_ack);

        if is_ack {
            return Ok(Self { msg_no, flags, payload: Bytes::copy_from_slice(body) });
        }

        if body.len() < CHECKSUM_SIZE {
            return Err(FrameError::Truncated {
                expected: body.len() + CHECKSUM_SIZE,
                actual: body.len(),
            });
        }
        let (payload, checksum_bytes) = body.split_at(body.len() - CHECKSUM_SIZE);
        let expected = u32::from_be_bytes(
            checksum_bytes.try_into().expect("split_at guarantees 4 bytes remain"),
        );

        let mut head = Vec::with_capacity(consumed + 1 + payload.len());
        write_uvarint(&mut head, msg_no.0);
        head.push(flags_byte);
        head.extend_from_slice(payload);
        let actual = crc32c::crc32c(&head);
        if actual != expected {
            return Err(FrameError::ChecksumMismatch);
        }

        Ok(Self { msg_no, flags, payload: Bytes::copy_from_slice(payload) })
    }

    /// Builds an ack frame carrying `bytes_received` as its sole payload.
    #[must_use]
    pub fn ack(msg_no: MessageNo, ty: crate::message::MessageType, bytes_received: u64) -> Self {
        debug_assert!(ty.is_ack());
        let mut payload = Vec::new();
        write_uvarint(&mut payload, bytes_received);
        Self { msg_no, flags: FrameFlags::empty().with_type(ty), payload: Bytes::from(payload) }
    }

    /// Decodes this frame's payload as an ack byte count.
    ///
    /// # Errors
    ///
    /// [`FrameError::MalformedVarint`] if the payload is not a single valid
    /// UVarInt.
    pub fn ack_byte_count(&self) -> Result<u64, FrameError> {
        let (count, consumed) = read_uvarint(&self.payload)?;
        if consumed != self.payload.len() {
            return Err(FrameError::MalformedVarint);
        }
        Ok(count)
    }
}
