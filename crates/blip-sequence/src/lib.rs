//! Tracking which sequences a connection has pushed or pulled, so
//! replication can resume instead of restarting from scratch.

mod checkpoint;
mod sequence_set;

pub use checkpoint::{set_write_timestamps, Checkpoint};
pub use sequence_set::{Sequence, SequenceSet, INFINITY_SEQUENCE};

/// Errors parsing a persisted [`Checkpoint`].
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// The JSON document's top level was not an object.
    #[error("checkpoint JSON is not an object")]
    NotAnObject,

    /// The document was not valid JSON at all.
    #[error("malformed checkpoint JSON: {0}")]
    Json(#[from] serde_json::Error),
}
