//! Incoming message assembly: accumulating decompressed frame bytes into a
//! properties dictionary plus a body.
//!
//! Compression itself is out of scope here — `blip-core` owns the shared
//! per-connection inflater and feeds this type plain decompressed bytes as
//! they arrive.

use bytes::Bytes;

use crate::error::FrameError;
use crate::message::MessageNo;
use crate::properties::Properties;
use crate::varint::read_uvarint;

/// A message being assembled from one or more frames.
#[derive(Debug, Clone)]
pub struct MessageIn {
    msg_no: MessageNo,
    urgent: bool,
    no_reply: bool,
    buf: Vec<u8>,
}

/// A fully-assembled incoming message, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    /// This message's number.
    pub msg_no: MessageNo,
    /// Whether the sender marked it urgent.
    pub urgent: bool,
    /// Whether the sender requested no automatic response (requests only).
    pub no_reply: bool,
    /// The parsed properties dictionary.
    pub properties: Properties,
    /// The body, with properties stripped off the front.
    pub body: Bytes,
}

impl MessageIn {
    /// Starts assembling a new incoming message.
    #[must_use]
    pub fn new(msg_no: MessageNo, urgent: bool, no_reply: bool) -> Self {
        Self { msg_no, urgent, no_reply, buf: Vec::new() }
    }

    /// Appends decompressed bytes from one more frame.
    pub fn append(&mut self, decompressed: &[u8]) {
        self.buf.extend_from_slice(decompressed);
    }

    /// Total decompressed bytes buffered so far, for ack-threshold
    /// accounting mirrored at the connection layer.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to parse just the properties dictionary from whatever has
    /// been buffered so far, without requiring the body to be complete —
    /// used to fire the "request beginning" callback once properties are
    /// complete but the body may still be streaming in.
    #[must_use]
    pub fn try_properties(&self) -> Option<Properties> {
        let (props_len, consumed) = read_uvarint(&self.buf).ok()?;
        let props_len = props_len as usize;
        let end = consumed.checked_add(props_len)?;
        if self.buf.len() < end {
            return None;
        }
        Properties::decode(&self.buf[consumed..end]).ok()
    }

    /// Finishes assembly after the final frame (no `MoreComing`) has
    /// arrived, splitting the buffer into properties and body.
    ///
    /// # Errors
    ///
    /// Propagates [`FrameError`] if the leading `propertiesSize` varint or
    /// the properties slab itself is malformed.
    pub fn finish(self) -> Result<CompletedMessage, FrameError> {
        let (props_len, consumed) = read_uvarint(&self.buf)?;
        let props_len = props_len as usize;
        let end = consumed
            .checked_add(props_len)
            .ok_or(FrameError::Truncated { expected: props_len, actual: self.buf.len() })?;
        if self.buf.len() < end {
            return Err(FrameError::BodyBeforePropertiesEnd);
        }
        let properties = Properties::decode(&self.buf[consumed..end])?;
        let body = Bytes::copy_from_slice(&self.buf[end..]);
        Ok(CompletedMessage {
            msg_no: self.msg_no,
            urgent: self.urgent,
            no_reply: self.no_reply,
            properties,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MessageBuilder;
    use crate::message::MessageType;

    #[test]
    fn assembles_message_split_across_frames() {
        let mut out = MessageBuilder::new()
            .profile("Echo")
            .body(Bytes::from_static(b"hello world"))
            .build(MessageNo(7), MessageType::Request);

        let mut incoming = MessageIn::new(MessageNo(7), false, false);
        loop {
            let (chunk, more) = out.next_chunk(6);
            incoming.append(&chunk);
            if !more {
                break;
            }
        }

        let completed = incoming.finish().expect("valid message");
        assert_eq!(completed.properties.get("Profile"), Some("Echo"));
        assert_eq!(completed.body, Bytes::from_static(b"hello world"));
    }

    #[test]
    fn try_properties_succeeds_before_body_is_complete() {
        let mut incoming = MessageIn::new(MessageNo(1), false, false);
        let props = Properties::new().with("Profile", "Echo");
        let encoded = props.encode();
        let mut head = Vec::new();
        crate::varint::write_uvarint(&mut head, encoded.len() as u64);
        head.extend_from_slice(&encoded);
        incoming.append(&head);
        assert_eq!(incoming.try_properties(), Some(props));

        // Still nothing resembling a complete body: finish() would succeed
        // too (body is simply empty so far), but try_properties is usable
        // even mid-stream while more frames are still expected.
        incoming.append(b"more body bytes");
        assert!(incoming.try_properties().is_some());
    }
}
