//! Errors raised while decoding the BLIP wire format.
//!
//! Every variant here is a protocol violation: a peer that
//! triggers one has sent something structurally invalid, and the connection
//! that observes it closes with an "unexpected condition" code rather than
//! trying to recover in place.

use thiserror::Error;

/// A malformed frame, message, or properties blob.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer ended before a length-prefixed field was fully read.
    #[error("truncated frame: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A UVarInt's continuation bit never cleared within 64 bits, or the
    /// buffer ran out before it did.
    #[error("malformed varint")]
    MalformedVarint,

    /// The trailing 4-byte checksum did not match the frame's decompressed
    /// contents.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The properties dictionary exceeded `MAX_PROPERTIES_SIZE`.
    #[error("properties size {size} exceeds limit {limit}")]
    PropertiesTooLarge {
        /// Size actually claimed or observed.
        size: usize,
        /// Configured maximum (100 KiB).
        limit: usize,
    },

    /// The properties slab was not terminated by a final NUL before the
    /// declared properties length ran out.
    #[error("properties slab not NUL-terminated")]
    PropertiesNotTerminated,

    /// A key/value pair in the properties dictionary had an odd count of
    /// NUL-separated fields (a key without a matching value).
    #[error("properties dictionary has an unpaired key")]
    PropertiesUnpaired,

    /// Body bytes arrived before the declared properties length had been
    /// fully consumed.
    #[error("body bytes arrived before end of properties")]
    BodyBeforePropertiesEnd,
}
