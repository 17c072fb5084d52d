use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::GraphError;

const MAX_CHUNK: usize = u16::MAX as usize;

/// Frames outgoing messages into chunks.
///
/// Frames accumulate in memory and reach the stream on [`flush`](Self::flush),
/// so a pipeline of requests goes out in one write.
pub struct ChunkWriter<W> {
    writer: W,
    pending: BytesMut,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: BytesMut::new(),
        }
    }

    /// Frames one encoded message, followed by its empty end-of-message chunk.
    pub fn queue_message(&mut self, data: &[u8]) {
        for chunk in data.chunks(MAX_CHUNK) {
            self.pending.put_u16(chunk.len() as u16);
            self.pending.put_slice(chunk);
        }
        self.pending.put_u16(0);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub async fn flush(&mut self) -> Result<(), GraphError> {
        if !self.pending.is_empty() {
            let frames = self.pending.split();
            self.writer.write_all(&frames).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn framed(messages: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = ChunkWriter::new(&mut out);
        for m in messages {
            writer.queue_message(m);
        }
        writer.flush().await.unwrap();
        assert_eq!(writer.pending_len(), 0);
        out
    }

    #[tokio::test]
    async fn message_ends_with_an_empty_chunk() {
        assert_eq!(framed(&[&[0x01, 0x02, 0x03]]).await, [0, 3, 1, 2, 3, 0, 0]);
    }

    #[tokio::test]
    async fn pipelined_messages_leave_in_one_flush() {
        assert_eq!(framed(&[&[0xAA], &[]]).await, [0, 1, 0xAA, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn oversized_message_is_split() {
        let data = vec![0x11; MAX_CHUNK + 2];
        let out = framed(&[&data]).await;
        assert_eq!(&out[..2], &[0xFF, 0xFF]);
        let second = 2 + MAX_CHUNK;
        assert_eq!(&out[second..second + 2], &[0x00, 0x02]);
        assert_eq!(&out[out.len() - 2..], &[0x00, 0x00]);
    }
}
