//! Length-prefixed framing of BLIP frames over a raw byte stream.
//!
//! BLIP frames normally ride one-per-WebSocket-binary-message; the
//! simulation harness drives connections directly over `turmoil`'s virtual
//! TCP instead, so each frame needs an explicit length prefix to stay
//! self-delimiting on a raw byte stream.

use async_trait::async_trait;
use blip_core::{ConnectionError, WebSocket};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The `blip_core::WebSocket` capability over the write half of a raw byte
/// stream, framing each BLIP frame with a 4-byte big-endian length prefix.
pub struct FramedSocket<W> {
    writer: W,
}

impl<W> FramedSocket<W> {
    /// Wraps a byte-stream write half.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W> WebSocket for FramedSocket<W>
where
    W: AsyncWrite + Unpin + Send + Sync,
{
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), ConnectionError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| ConnectionError::Transport("frame too large to simulate".to_string()))?;
        self.writer
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))?;
        self.writer
            .write_all(&bytes)
            .await
            .map_err(|err| ConnectionError::Transport(err.to_string()))
    }

    async fn close(&mut self, _code: u16, _reason: &str) -> Result<(), ConnectionError> {
        self.writer.shutdown().await.map_err(|err| ConnectionError::Transport(err.to_string()))
    }
}

/// Reads one length-prefixed frame from `reader`, or `None` at a clean EOF.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(()) => {},
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
