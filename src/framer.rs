//! Wire framer: length-prefixed read/write over any duplex byte stream.
//!
//! This is the only place that knows about the `u32 length` prefix in
//! isolation from packet semantics. It hands callers the raw `type + id +
//! body` bytes (everything after the length word) and writes them back
//! the same way, so both the client and the server share one
//! implementation regardless of what carries the bytes underneath — a
//! TCP socket, an in-memory pipe, or an SSH channel the caller owns.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::protocol::Packet;

/// One framed unit as read off the wire: the decoded length prefix has
/// already been consumed, this is everything after it.
pub struct Frame {
    /// `type + [id] + body`, ready for [`crate::protocol::Packet::decode`].
    pub body: Bytes,
}

/// Reads exactly one length-prefixed frame from `stream`.
///
/// Fails with [`Error::Protocol`] if the length prefix is zero (a
/// degenerate frame with no type byte) — this is the dedicated
/// short-packet error the codec's invariants require.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::Protocol("short packet: zero-length frame".into()));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Frame {
        body: Bytes::from(body),
    })
}

/// Writes one packet to `stream`: a single `write_all` for the header,
/// and, when the packet carries a bulk payload (`WRITE`/`DATA`), a second
/// `write_all` for the payload with no intermediate copy.
pub async fn write_packet<W: AsyncWrite + Unpin>(stream: &mut W, packet: &Packet) -> Result<()> {
    let (header, payload) = packet.encode_split();
    stream.write_all(&header).await?;
    if let Some(payload) = payload {
        if !payload.is_empty() {
            stream.write_all(&payload).await?;
        }
    }
    stream.flush().await?;
    Ok(())
}

/// Serializes writes to one connection behind a single mutex, so two
/// concurrent senders never interleave a header with another's payload.
pub struct WriteHalf<W> {
    inner: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> WriteHalf<W> {
    /// Wrap a writer for serialized framed writes.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Write one packet under the write lock.
    pub async fn write_packet(&self, packet: &Packet) -> Result<()> {
        let mut guard = self.inner.lock().await;
        write_packet(&mut *guard, packet).await
    }
}
