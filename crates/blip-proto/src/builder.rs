//! Building outgoing messages and slicing them into frames.
//!
//! `MessageBuilder` is the host-facing API; `MessageOut` is what the
//! scheduler actually drives, one
//! `next_chunk` call per frame. Both are pure: no I/O, no knowledge of the
//! compression codec (that is layered on by `blip-core`, which owns the
//! shared deflater).

use bytes::Bytes;

use crate::message::{FrameFlags, MessageNo, MessageType};
use crate::properties::{PROFILE, Properties};
use crate::varint::write_uvarint;

/// A source of body bytes too large to buffer in memory. Each call returns a
/// fresh slice, or an empty one at EOF.
pub trait DataSource: Send {
    /// Returns up to `max_len` more bytes of the body, or empty at EOF.
    fn next_chunk(&mut self, max_len: usize) -> Bytes;
}

enum Body {
    Buffered(Bytes),
    Streamed(Box<dyn DataSource>),
}

/// Host-facing builder for an outgoing request or response.
pub struct MessageBuilder {
    properties: Properties,
    body: Body,
    urgent: bool,
    no_reply: bool,
    compressed: bool,
}

impl MessageBuilder {
    /// A builder with no properties, no body, and default flags.
    #[must_use]
    pub fn new() -> Self {
        Self {
            properties: Properties::new(),
            body: Body::Buffered(Bytes::new()),
            urgent: false,
            no_reply: false,
            compressed: false,
        }
    }

    /// Sets the `Profile` property, naming the handler that should receive
    /// this request.
    #[must_use]
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.properties.set(PROFILE, profile);
        self
    }

    /// Sets an arbitrary property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.set(key, value);
        self
    }

    /// Sets a fully-buffered body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Body::Buffered(body.into());
        self
    }

    /// Sets a streaming body source for data too large to buffer.
    #[must_use]
    pub fn body_source(mut self, source: impl DataSource + 'static) -> Self {
        self.body = Body::Streamed(Box::new(source));
        self
    }

    /// Marks this message for priority scheduling.
    #[must_use]
    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    /// Suppresses the automatic response (requests only).
    #[must_use]
    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;
        self
    }

    /// Marks this message's frames as eligible for deflate compression.
    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }

    /// Finalizes this builder into a [`MessageOut`] assigned to `msg_no`.
    #[must_use]
    pub fn build(self, msg_no: MessageNo, ty: MessageType) -> MessageOut {
        let properties_bytes = Bytes::from(self.properties.encode());
        MessageOut {
            msg_no,
            ty,
            properties_bytes,
            body: self.body,
            position: 0,
            sent_properties: false,
            last_stream_was_eof: false,
            urgent: self.urgent,
            no_reply: self.no_reply,
            compressed: self.compressed,
        }
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A message ready to be sliced into frames by the scheduler.
pub struct MessageOut {
    msg_no: MessageNo,
    ty: MessageType,
    properties_bytes: Bytes,
    body: Body,
    position: usize,
    sent_properties: bool,
    last_stream_was_eof: bool,
    urgent: bool,
    no_reply: bool,
    compressed: bool,
}

impl MessageOut {
    /// This message's number.
    #[must_use]
    pub fn msg_no(&self) -> MessageNo {
        self.msg_no
    }

    /// Whether this is scheduled as urgent.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Whether a request should suppress the automatic response.
    #[must_use]
    pub fn is_no_reply(&self) -> bool {
        self.no_reply
    }

    /// Whether this message's frames should be passed through the deflater.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The message type (request/response/error) for the flags byte.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.ty
    }

    /// Produces the uncompressed content of the next frame, bounded by
    /// `max_len`, plus whether more frames follow. The caller (the
    /// connection's scheduler) is responsible for compression and checksum.
    ///
    /// On the first call this is `UVarInt(propertiesSize) | properties`
    /// followed by as much body as fits; later calls are body-only.
    pub fn next_chunk(&mut self, max_len: usize) -> (Bytes, bool) {
        let mut chunk = Vec::new();
        if !self.sent_properties {
            let mut head = Vec::new();
            write_uvarint(&mut head, self.properties_bytes.len() as u64);
            head.extend_from_slice(&self.properties_bytes);
            self.sent_properties = true;
            chunk.extend_from_slice(&head);
            let remaining = max_len.saturating_sub(head.len());
            chunk.extend_from_slice(&self.take_body(remaining));
        } else {
            chunk.extend_from_slice(&self.take_body(max_len));
        }
        let more = self.has_more();
        (Bytes::from(chunk), more)
    }

    /// Whether any body bytes remain unsent (for a streamed source, this is
    /// only known after the next empty read, so it conservatively returns
    /// `true` until EOF is observed).
    #[must_use]
    pub fn has_more(&self) -> bool {
        match &self.body {
            Body::Buffered(b) => self.position < b.len(),
            Body::Streamed(_) => !self.last_stream_was_eof,
        }
    }

    fn take_body(&mut self, max_len: usize) -> Bytes {
        match &mut self.body {
            Body::Buffered(b) => {
                let take = max_len.min(b.len() - self.position);
                let slice = b.slice(self.position..self.position + take);
                self.position += take;
                slice
            },
            Body::Streamed(source) => {
                let chunk = source.next_chunk(max_len);
                self.last_stream_was_eof = chunk.is_empty();
                chunk
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunk_carries_properties_prefix() {
        let mut msg = MessageBuilder::new()
            .profile("Echo")
            .body(Bytes::from_static(b"hello"))
            .build(MessageNo(1), MessageType::Request);

        let (chunk, more) = msg.next_chunk(4096);
        assert!(!more);
        let (props_len, consumed) = crate::varint::read_uvarint(&chunk).unwrap();
        let props_len = props_len as usize;
        assert_eq!(&chunk[consumed..consumed + props_len], b"Profile\0Echo\0");
        assert_eq!(&chunk[consumed + props_len..], b"hello");
    }

    #[test]
    fn small_frame_size_splits_body_across_frames() {
        let mut msg = MessageBuilder::new().body(Bytes::from_static(b"0123456789")).build(
            MessageNo(1),
            MessageType::Request,
        );

        // properties are empty, so the first frame's head is just the
        // 1-byte UVarInt(0) length prefix, leaving 3 bytes of body budget.
        let (first, more1) = msg.next_chunk(4);
        assert_eq!(&first[..], [0u8, b'0', b'1', b'2']);
        assert!(more1);

        let (second, more2) = msg.next_chunk(4);
        assert_eq!(&second[..], b"3456");
        assert!(more2);

        let (third, more3) = msg.next_chunk(4);
        assert_eq!(&third[..], b"789");
        assert!(!more3);
    }

    struct Chunks(std::vec::IntoIter<&'static [u8]>);

    impl DataSource for Chunks {
        fn next_chunk(&mut self, _max_len: usize) -> Bytes {
            self.0.next().map(Bytes::from_static).unwrap_or_default()
        }
    }

    #[test]
    fn streamed_body_reports_eof_on_empty_read() {
        let mut msg = MessageBuilder::new()
            .body_source(Chunks(vec![b"ab".as_slice(), b"cd".as_slice()].into_iter()))
            .build(MessageNo(1), MessageType::Request);

        let (c1, more1) = msg.next_chunk(1024);
        assert_eq!(&c1[1..], b"ab");
        assert!(more1);

        let (c2, more2) = msg.next_chunk(1024);
        assert_eq!(&c2[..], b"cd");
        assert!(more2);

        let (c3, more3) = msg.next_chunk(1024);
        assert!(c3.is_empty());
        assert!(!more3);
    }
}
