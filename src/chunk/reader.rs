//! Reassembles chunked messages from an async byte stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::GraphError;

/// Reads Bolt-chunked messages from an `AsyncRead` stream.
///
/// A message is a run of length-prefixed chunks closed by a `0x0000` marker.
/// A marker with no chunks before it is a NOOP keep-alive, which the reader
/// skips unless asked for it with [`ChunkReader::read_frame`].
pub struct ChunkReader<R> {
    reader: R,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: Vec::new(),
        }
    }

    /// Reads the next non-empty message.
    pub async fn read_message(&mut self) -> Result<BytesMut, GraphError> {
        loop {
            let frame = self.read_frame().await?;
            if !frame.is_empty() {
                return Ok(frame);
            }
            tracing::trace!("skipping NOOP chunk");
        }
    }

    /// Reads one frame, which may be empty for a NOOP.
    pub async fn read_frame(&mut self) -> Result<BytesMut, GraphError> {
        let mut message = BytesMut::new();
        loop {
            let len = self.reader.read_u16().await? as usize;
            if len == 0 {
                return Ok(message);
            }
            self.scratch.resize(len, 0);
            self.reader.read_exact(&mut self.scratch).await?;
            message.extend_from_slice(&self.scratch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn chunks_are_joined() {
        let data: Vec<u8> = vec![0x00, 0x02, 0xAA, 0xBB, 0x00, 0x01, 0xCC, 0x00, 0x00];
        let mut reader = ChunkReader::new(Cursor::new(data));
        let msg = reader.read_message().await.unwrap();
        assert_eq!(&msg[..], &[0xAA, 0xBB, 0xCC]);
    }

    #[tokio::test]
    async fn noops_are_skipped() {
        let data: Vec<u8> = vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x7F, 0x00, 0x00];
        let mut reader = ChunkReader::new(Cursor::new(data));
        let msg = reader.read_message().await.unwrap();
        assert_eq!(&msg[..], &[0x7F]);
    }

    #[tokio::test]
    async fn raw_frame_exposes_noop() {
        let mut reader = ChunkReader::new(Cursor::new(vec![0x00, 0x00]));
        assert!(reader.read_frame().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn eof_mid_message_is_a_connection_fault() {
        let data: Vec<u8> = vec![0x00, 0x04, 0x01, 0x02];
        let mut reader = ChunkReader::new(Cursor::new(data));
        let err = reader.read_message().await.unwrap_err();
        assert!(err.is_connection_fault());
    }
}
