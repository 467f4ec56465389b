//! `ReadDir` iteration wrapper.
//!
//! `SSH_FXP_READDIR` hands back one batch of entries per round-trip and
//! signals the end of the listing with `STATUS(EOF)`; this wraps that in
//! a single call that drains the whole directory and closes the handle,
//! the natural client-side counterpart the wire-level op implies.

use tokio::io::AsyncWrite;

use crate::error::{Error, Result};
use crate::protocol::packet::{Close, NameEntry, ReadDir as ReadDirPacket};
use crate::protocol::{Packet, StatusCode};

use super::connection::Connection;

/// An open directory handle, mid-listing.
pub struct DirHandle<S: AsyncWrite> {
    connection: Connection<tokio::io::WriteHalf<S>>,
    handle: Vec<u8>,
}

impl<S> DirHandle<S>
where
    S: tokio::io::AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(connection: Connection<tokio::io::WriteHalf<S>>, handle: Vec<u8>) -> Self {
        Self { connection, handle }
    }

    /// Read the next batch of entries. Returns `Ok(None)` once the
    /// listing is exhausted (`STATUS(EOF)`); the handle is still open at
    /// that point, call [`DirHandle::close`] explicitly.
    pub async fn next_batch(&self) -> Result<Option<Vec<NameEntry>>> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Readdir(ReadDirPacket {
                    id,
                    handle: self.handle.clone(),
                }),
            )
            .await?;
        match response {
            Packet::Name(name) => Ok(Some(name.entries)),
            Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Eof => Ok(None),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to READDIR: {other:?}"))),
        }
    }

    /// Drain every remaining batch and close the handle.
    pub async fn collect_all(self) -> Result<Vec<NameEntry>> {
        let mut entries = Vec::new();
        loop {
            match self.next_batch().await {
                Ok(Some(batch)) => entries.extend(batch),
                Ok(None) => break,
                Err(err) => {
                    let _ = self.close().await;
                    return Err(err);
                }
            }
        }
        self.close().await?;
        Ok(entries)
    }

    /// Close the directory handle.
    pub async fn close(&self) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Close(Close {
                    id,
                    handle: self.handle.clone(),
                }),
            )
            .await?;
        match response {
            Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Ok => Ok(()),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to CLOSE: {other:?}"))),
        }
    }
}
