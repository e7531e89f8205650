//! The shared per-connection deflater/inflater and the `SyncFlush`
//! terminator elision discipline.
//!
//! One [`Deflater`] and one [`Inflater`] live for the whole life of a
//! connection; their internal dictionaries span all messages, so frames of
//! distinct messages must never be interleaved mid-compression — the
//! scheduler in [`crate::connection`] guarantees this by fully compressing
//! one frame before starting the next.
//!
//! When deflate emits its trailing `00 00 FF FF` sync-flush block, the
//! writer omits those four bytes (they are reclaimed for the checksum); the
//! reader reinserts them before feeding the inflater.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::ConnectionError;

/// The four bytes `flate2`'s `Z_SYNC_FLUSH` always appends, elided on the
/// wire.
const SYNC_FLUSH_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// Owns the connection's single outgoing compression stream.
pub struct Deflater {
    compress: Compress,
}

impl Deflater {
    /// `level` 1-9; see `ConnectionConfig::compression_level`.
    /// Level 0 disables compression entirely and this type is not
    /// constructed in that case.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self { compress: Compress::new(Compression::new(level), false) }
    }

    /// Compresses `input` with a trailing `Sync` flush, then strips the
    /// four-byte terminator the caller will reclaim for the checksum.
    #[allow(clippy::expect_used)]
    pub fn compress_frame(&mut self, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(input.len());
        self.compress
            .compress_vec(input, &mut out, FlushCompress::Sync)
            .expect("compress_vec never returns BufError when writing to a growable Vec");
        if out.ends_with(&SYNC_FLUSH_TRAILER) {
            out.truncate(out.len() - SYNC_FLUSH_TRAILER.len());
        }
        out
    }
}

/// Owns the connection's single incoming decompression stream.
pub struct Inflater {
    decompress: Decompress,
}

impl Inflater {
    /// A fresh inflater with an empty dictionary, matching a fresh
    /// [`Deflater`] on the peer.
    #[must_use]
    pub fn new() -> Self {
        Self { decompress: Decompress::new(false) }
    }

    /// Reinserts the elided sync-flush terminator and decompresses one
    /// frame's payload.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ProtocolViolation`] if the bytes are not a valid
    /// continuation of this connection's deflate stream.
    pub fn decompress_frame(&mut self, input: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let mut buf = Vec::with_capacity(input.len());
        buf.extend_from_slice(input);
        buf.extend_from_slice(&SYNC_FLUSH_TRAILER);

        let mut out = Vec::with_capacity(input.len() * 3);
        let mut consumed = 0usize;
        loop {
            if consumed >= buf.len() {
                break;
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&buf[consumed..], &mut out, FlushDecompress::Sync)
                .map_err(|e| ConnectionError::ProtocolViolation(format!("inflate error: {e}")))?;
            let consumed_this_call = (self.decompress.total_in() - before_in) as usize;
            let produced_this_call = self.decompress.total_out() - before_out;
            consumed += consumed_this_call;
            if status == Status::StreamEnd || (consumed_this_call == 0 && produced_this_call == 0) {
                break;
            }
        }
        Ok(out)
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
