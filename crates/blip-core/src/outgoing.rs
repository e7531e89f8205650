//! Bookkeeping wrapped around a [`MessageOut`]: how many bytes have been
//! sent and how many of those remain unacknowledged — the numbers that
//! decide when a message freezes in the icebox and thaws back out.

use blip_proto::{MessageNo, MessageOut, MessageType};

/// An outgoing message plus its flow-control accounting.
pub struct OutgoingMessage {
    pub(crate) out: MessageOut,
    total_sent_bytes: u64,
    unacked_bytes: u64,
    /// Placeholder response slot has been created in `pendingResponses`
    /// (requests only, set once the final frame is sent).
    pub(crate) response_pending: bool,
}

impl OutgoingMessage {
    /// Wraps a freshly built message with zeroed counters.
    #[must_use]
    pub fn new(out: MessageOut) -> Self {
        Self { out, total_sent_bytes: 0, unacked_bytes: 0, response_pending: false }
    }

    /// This message's number.
    #[must_use]
    pub fn msg_no(&self) -> MessageNo {
        self.out.msg_no()
    }

    /// Whether this message is scheduled ahead of non-urgent traffic.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.out.is_urgent()
    }

    /// The message type, for the outgoing flags byte.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.out.message_type()
    }

    /// Records that `n` wire bytes (post-compression, pre-checksum) of this
    /// message were just transmitted.
    pub fn record_sent(&mut self, n: u64) {
        self.total_sent_bytes += n;
        self.unacked_bytes += n;
    }

    /// Unacknowledged bytes in flight for this message.
    #[must_use]
    pub fn unacked_bytes(&self) -> u64 {
        self.unacked_bytes
    }

    /// Total wire bytes sent for this message so far.
    #[must_use]
    pub fn total_sent_bytes(&self) -> u64 {
        self.total_sent_bytes
    }

    /// Whether this message belongs in the icebox.
    #[must_use]
    pub fn exceeds_icebox_threshold(&self) -> bool {
        self.unacked_bytes as usize >= blip_proto::ICEBOX_THRESHOLD
    }

    /// Applies a peer's ack carrying the cumulative byte count it has
    /// received so far.
    ///
    /// Returns `false` (and leaves counters untouched) if `acked_total`
    /// exceeds what was actually sent; `unackedBytes` is only reduced if
    /// that count is at most bytes sent.
    pub fn apply_ack(&mut self, acked_total: u64) -> bool {
        if acked_total > self.total_sent_bytes {
            return false;
        }
        self.unacked_bytes = self.total_sent_bytes - acked_total;
        true
    }
}

#[cfg(test)]
mod tests {
    use blip_proto::{MessageBuilder, MessageNo};

    use super::*;

    fn sample() -> OutgoingMessage {
        let out = MessageBuilder::new()
            .body(bytes::Bytes::from_static(b"payload"))
            .build(MessageNo(1), MessageType::Request);
        OutgoingMessage::new(out)
    }

    #[test]
    fn ack_reduces_unacked_bytes() {
        let mut msg = sample();
        msg.record_sent(1000);
        assert_eq!(msg.unacked_bytes(), 1000);
        assert!(msg.apply_ack(400));
        assert_eq!(msg.unacked_bytes(), 600);
    }

    #[test]
    fn ack_exceeding_sent_bytes_is_rejected() {
        let mut msg = sample();
        msg.record_sent(100);
        assert!(!msg.apply_ack(200));
        assert_eq!(msg.unacked_bytes(), 100);
    }

    #[test]
    fn icebox_threshold_trips_at_128kib() {
        let mut msg = sample();
        msg.record_sent(blip_proto::ICEBOX_THRESHOLD as u64 - 1);
        assert!(!msg.exceeds_icebox_threshold());
        msg.record_sent(1);
        assert!(msg.exceeds_icebox_threshold());
    }
}
