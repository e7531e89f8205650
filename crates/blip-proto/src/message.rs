//! Message identifiers, types, and the per-frame flags byte.
//!
//! Mnemonics and values mirror BLIP's `kRequestType`..`kAckResponseType`/
//! `kTypeMask`/`kCompressed`/`kUrgent`/`kNoReply`/`kMoreComing` table.

/// Per-direction, per-connection identifier for a request. Responses reuse
/// their request's number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageNo(pub u64);

impl MessageNo {
    /// The first message number a side may assign (zero is never used).
    pub const FIRST: Self = Self(1);

    /// The next message number after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// The low 3 bits of a frame's flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// A new request, opening a message exchange.
    Request,
    /// A successful reply to a request.
    Response,
    /// A reply to a request carrying `Error-Domain`/`Error-Code` properties.
    Error,
    /// Flow-control ack of bytes received for a request.
    AckRequest,
    /// Flow-control ack of bytes received for a response.
    AckResponse,
}

impl MessageType {
    /// Decodes the low 3 bits of a flags byte. `None` for a value the
    /// protocol does not define; unknown types are ignored by the receiver
    /// for forward compatibility.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & FrameFlags::TYPE_MASK {
            0 => Some(Self::Request),
            1 => Some(Self::Response),
            2 => Some(Self::Error),
            4 => Some(Self::AckRequest),
            5 => Some(Self::AckResponse),
            _ => None,
        }
    }

    /// Encodes this type into the low 3 bits of a flags byte.
    #[must_use]
    pub fn to_bits(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::Error => 2,
            Self::AckRequest => 4,
            Self::AckResponse => 5,
        }
    }

    /// Whether this type is one of the two ack types, which carry a raw byte
    /// count instead of properties/body and bypass the codec and checksum.
    #[must_use]
    pub fn is_ack(self) -> bool {
        matches!(self, Self::AckRequest | Self::AckResponse)
    }
}

bitflags::bitflags! {
    /// The full flags byte of a frame: type (low 3 bits) plus four boolean
    /// bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// The message has further frames after this one.
        const MORE_COMING = 0x40;
        /// Schedule this message ahead of non-urgent traffic.
        const URGENT = 0x20;
        /// Suppress an automatic response (request only).
        const NO_REPLY = 0x10;
        /// This frame's payload is deflate-compressed.
        const COMPRESSED = 0x08;
    }
}

impl FrameFlags {
    /// Mask isolating the 3-bit [`MessageType`] from a flags byte.
    pub const TYPE_MASK: u8 = 0x07;

    /// Builds a flags byte from a message type plus the boolean bits.
    #[must_use]
    pub fn with_type(self, ty: MessageType) -> Self {
        Self::from_bits_retain((self.bits() & !Self::TYPE_MASK) | ty.to_bits())
    }

    /// The message type encoded in the low 3 bits.
    #[must_use]
    pub fn message_type(self) -> Option<MessageType> {
        MessageType::from_bits(self.bits())
    }
}

/// Maximum encoded size of a message's properties dictionary.
pub const MAX_PROPERTIES_SIZE: usize = 100 * 1024;

/// Default non-urgent frame payload size.
pub const DEFAULT_FRAME_SIZE: usize = 4 * 1024;

/// Frame payload size used when urgent scheduling rules apply: the message
/// is urgent, the outbox is empty, or the next message is not urgent.
pub const URGENT_FRAME_SIZE: usize = 16 * 1024;

/// Bytes of a single message's raw received data after which the receiver
/// synthesizes an ack frame.
pub const INCOMING_ACK_THRESHOLD: usize = 50_000;

/// Bytes of a single message's unacked sent data after which the sender
/// freezes it in the icebox.
pub const ICEBOX_THRESHOLD: usize = 128 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips() {
        for ty in [
            MessageType::Request,
            MessageType::Response,
            MessageType::Error,
            MessageType::AckRequest,
            MessageType::AckResponse,
        ] {
            assert_eq!(MessageType::from_bits(ty.to_bits()), Some(ty));
        }
    }

    #[test]
    fn unknown_type_bits_are_none() {
        assert_eq!(MessageType::from_bits(3), None);
        assert_eq!(MessageType::from_bits(6), None);
        assert_eq!(MessageType::from_bits(7), None);
    }

    #[test]
    fn flags_preserve_booleans_alongside_type() {
        let flags = (FrameFlags::MORE_COMING | FrameFlags::URGENT).with_type(MessageType::Request);
        assert_eq!(flags.message_type(), Some(MessageType::Request));
        assert!(flags.contains(FrameFlags::MORE_COMING));
        assert!(flags.contains(FrameFlags::URGENT));
        assert!(!flags.contains(FrameFlags::COMPRESSED));
    }

    #[test]
    fn ack_types_bypass_codec() {
        assert!(MessageType::AckRequest.is_ack());
        assert!(MessageType::AckResponse.is_ack());
        assert!(!MessageType::Request.is_ack());
    }
}
