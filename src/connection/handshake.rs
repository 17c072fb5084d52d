//! Client side of the Bolt handshake: magic preamble and version negotiation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::GraphError;
use crate::version::{self, BOLT_MAGIC};

/// Sends the preamble and `proposals`, then reads the version the server
/// picked.
pub async fn client_handshake<S>(stream: &mut S, proposals: &[u8; 16]) -> Result<(u8, u8), GraphError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut hello = [0u8; 20];
    hello[..4].copy_from_slice(&BOLT_MAGIC);
    hello[4..].copy_from_slice(proposals);
    stream.write_all(&hello).await?;
    stream.flush().await?;

    let mut response = [0u8; 4];
    stream.read_exact(&mut response).await?;
    version::decode_version(response)
        .ok_or_else(|| GraphError::Protocol("server rejected all proposed versions".into()))
}
