//! Per-message progress reporting.
//!
//! Mirrors `MessageProgress::State`'s granularity (`kQueued, kSending,
//! kAwaitingReply, kReceivingReply, kComplete, kDisconnected`) rather than
//! collapsing states together; all six are modeled here.

use blip_proto::{CompletedMessage, MessageNo};

/// Lifecycle states a message's progress callback observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Enqueued but no bytes sent yet.
    Queued,
    /// At least one frame has been transmitted; more remain.
    Sending,
    /// All frames sent; waiting on the peer's response (requests only).
    AwaitingReply,
    /// The response has started arriving but is not yet complete.
    ReceivingReply,
    /// Finished: either the message was fully sent (responses) or the
    /// paired response fully arrived (requests).
    Complete,
    /// The connection died before this message completed.
    Disconnected,
}

/// One progress update for a message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// The message this update concerns.
    pub msg_no: MessageNo,
    /// The new state.
    pub state: ProgressState,
    /// Bytes of this message sent or received so far.
    pub bytes_transferred: u64,
    /// Present only on `Complete` for a request: the paired response.
    pub response: Option<CompletedMessage>,
}

impl ProgressEvent {
    /// Builds an event carrying no response payload.
    #[must_use]
    pub fn simple(msg_no: MessageNo, state: ProgressState, bytes_transferred: u64) -> Self {
        Self { msg_no, state, bytes_transferred, response: None }
    }

    /// Builds a `Complete` event for a request, carrying its response.
    #[must_use]
    pub fn completed_with_response(
        msg_no: MessageNo,
        bytes_transferred: u64,
        response: CompletedMessage,
    ) -> Self {
        Self {
            msg_no,
            state: ProgressState::Complete,
            bytes_transferred,
            response: Some(response),
        }
    }
}
