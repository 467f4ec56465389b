//! Pipelined transfer engine and the `File` handle type (`spec.md` §4.4, §6).
//!
//! `read_at`/`write_at` are single round-trips. `read_from`/`write_to`
//! pipeline up to `max_inflight` requests at once instead of waiting for
//! each round-trip before issuing the next, which is what makes bulk
//! transfer throughput independent of link latency (scenario S6).

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::attrs::FileAttrs;
use crate::protocol::extensions::{self, ExtensionSet, StatVfs};
use crate::protocol::packet::{
    Close, Data, FSetStat, Fstat, Read as ReadPacket, Stat as StatPacket, Write as WritePacket,
};
use crate::protocol::{Packet, StatusCode};

use super::connection::Connection;

/// An open remote file.
///
/// Cloning a [`Connection`] is cheap (it's a handle to shared state), so
/// every pipelined request below clones it into its own spawned task.
pub struct File<S: AsyncWrite> {
    connection: Connection<tokio::io::WriteHalf<S>>,
    handle: Vec<u8>,
    path: String,
    config: ClientConfig,
    extensions: Arc<ExtensionSet>,
    position: u64,
}

fn expect_status_ok(response: Packet, op: &'static str) -> Result<()> {
    match response {
        Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Ok => Ok(()),
        Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
        other => Err(Error::Protocol(format!("unexpected response to {op}: {other:?}"))),
    }
}

impl<S> File<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(
        connection: Connection<tokio::io::WriteHalf<S>>,
        handle: Vec<u8>,
        path: String,
        config: ClientConfig,
        extensions: Arc<ExtensionSet>,
    ) -> Self {
        Self {
            connection,
            handle,
            path,
            config,
            extensions,
            position: 0,
        }
    }

    /// Read up to `len` bytes at `offset`. An empty result means EOF, not
    /// an error — mirrors `STATUS(EOF)` on the wire (`spec.md` scenario S2).
    pub async fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Read(ReadPacket {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    len,
                }),
            )
            .await?;
        match response {
            Packet::Data(Data { data, .. }) => Ok(data.to_vec()),
            Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Eof => Ok(Vec::new()),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to READ: {other:?}"))),
        }
    }

    /// Write `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Write(WritePacket {
                    id,
                    handle: self.handle.clone(),
                    offset,
                    data: Bytes::copy_from_slice(data),
                }),
            )
            .await?;
        expect_status_ok(response, "WRITE")
    }

    /// Read at the current position, advancing it by the bytes returned.
    pub async fn read(&mut self, len: u32) -> Result<Vec<u8>> {
        let data = self.read_at(self.position, len).await?;
        self.position += data.len() as u64;
        Ok(data)
    }

    /// Write at the current position, advancing it by `data.len()`.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_at(self.position, data).await?;
        self.position += data.len() as u64;
        Ok(())
    }

    /// Reposition the next sequential `read`/`write`.
    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    /// Current sequential position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// `FSTAT`.
    pub async fn stat(&self) -> Result<FileAttrs> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Fstat(Fstat {
                    id,
                    handle: self.handle.clone(),
                }),
            )
            .await?;
        match response {
            Packet::Attrs(attrs) => Ok(attrs.attrs),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to FSTAT: {other:?}"))),
        }
    }

    /// `FSETSTAT`.
    pub async fn set_stat(&self, attrs: &FileAttrs) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Fsetstat(FSetStat {
                    id,
                    handle: self.handle.clone(),
                    attrs: attrs.clone(),
                }),
            )
            .await?;
        expect_status_ok(response, "FSETSTAT")
    }

    /// Change permission bits via `FSETSTAT`.
    pub async fn chmod(&self, permissions: u32) -> Result<()> {
        self.set_stat(&FileAttrs {
            permissions: Some(permissions),
            ..FileAttrs::default()
        })
        .await
    }

    /// Change ownership via `FSETSTAT`.
    pub async fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        self.set_stat(&FileAttrs {
            uid: Some(uid),
            gid: Some(gid),
            ..FileAttrs::default()
        })
        .await
    }

    /// Truncate (or extend) to `size` via `FSETSTAT`.
    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.set_stat(&FileAttrs::with_size(size)).await
    }

    /// `fsync@openssh.com`. Errors with [`StatusCode::OpUnsupported`] if
    /// the server never advertised it.
    pub async fn sync(&self) -> Result<()> {
        if !self.extensions.supports(extensions::FSYNC) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server did not advertise fsync@openssh.com",
            ));
        }
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Extended(crate::protocol::packet::Extended {
                    id,
                    request: extensions::FSYNC.to_string(),
                    data: extensions::encode_fsync(&self.handle),
                }),
            )
            .await?;
        match response {
            Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Ok => Ok(()),
            Packet::ExtendedReply(_) => Ok(()),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to fsync: {other:?}"))),
        }
    }

    /// `fstatvfs@openssh.com`. Errors with [`StatusCode::OpUnsupported`]
    /// if the server never advertised it.
    pub async fn statvfs(&self) -> Result<StatVfs> {
        if !self.extensions.supports(extensions::FSTATVFS) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server did not advertise fstatvfs@openssh.com",
            ));
        }
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Extended(crate::protocol::packet::Extended {
                    id,
                    request: extensions::FSTATVFS.to_string(),
                    data: extensions::encode_fstatvfs_handle(&self.handle),
                }),
            )
            .await?;
        match response {
            Packet::ExtendedReply(reply) => StatVfs::decode(&reply.data),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to fstatvfs: {other:?}"))),
        }
    }

    /// `CLOSE`.
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
        expect_status_ok(response, "CLOSE")
    }

    /// Pipelined bulk write: read chunks of `max_data_length` bytes from
    /// `source` (sequentially, since it's a single stream) and fire off
    /// up to `max_inflight` concurrent `WRITE`s at their respective
    /// offsets, starting at `start_offset`.
    ///
    /// Concurrency is gated by [`ClientConfig::use_concurrent_writes`]
    /// (off by default: a write failing partway through a concurrent
    /// batch leaves a hole at its offset instead of a clean truncation
    /// point).
    pub async fn read_from<R: AsyncRead + Unpin>(&self, mut source: R, start_offset: u64) -> Result<u64> {
        let chunk_size = self.config.max_data_length as usize;
        let max_inflight = if self.config.use_concurrent_writes {
            self.config.max_inflight
        } else {
            1
        };
        let token = self.connection.cancellation();

        let mut offset = start_offset;
        let mut total = 0u64;
        let mut inflight: JoinSet<Result<()>> = JoinSet::new();

        loop {
            if token.is_cancelled() {
                break;
            }
            let mut buf = vec![0u8; chunk_size];
            let n = tokio::select! {
                () = token.cancelled() => break,
                result = source.read(&mut buf) => result?,
            };
            if n == 0 {
                break;
            }
            buf.truncate(n);

            while inflight.len() >= max_inflight {
                join_one(&mut inflight).await?;
            }

            let connection = self.connection.clone();
            let handle = self.handle.clone();
            let write_offset = offset;
            inflight.spawn(async move {
                let id = connection.next_id();
                let response = connection
                    .call(
                        id,
                        &Packet::Write(WritePacket {
                            id,
                            handle,
                            offset: write_offset,
                            data: Bytes::from(buf),
                        }),
                    )
                    .await?;
                expect_status_ok(response, "WRITE")
            });

            offset += n as u64;
            total += n as u64;
        }

        while !inflight.is_empty() {
            join_one(&mut inflight).await?;
        }
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(total)
    }

    /// Pipelined bulk read: determine the file's size (`FSTAT`, or
    /// `STAT` by path when [`ClientConfig::use_fstat`] is off), then fire
    /// off up to `max_inflight` concurrent `READ`s and write each chunk
    /// to `sink` in offset order as it arrives.
    ///
    /// Per-chunk completion can arrive out of dispatch order, so results
    /// are collected by offset rather than acted on as they land:
    /// whichever offset fails, the call still returns the longest
    /// contiguous prefix that actually made it to `sink` and the error
    /// tied to the first failing offset, never a shorter prefix just
    /// because a later chunk happened to error out first.
    ///
    /// On failure (backend error or cancellation), returns
    /// [`Error::Partial`] carrying both the byte count already written
    /// to `sink` and the error that ended the transfer, rather than
    /// discarding the count.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, mut sink: W) -> Result<u64> {
        let size = self.size_for_write_to().await?;
        let chunk_size = u64::from(self.config.max_data_length);
        let max_inflight = if self.config.use_concurrent_reads {
            self.config.max_inflight
        } else {
            1
        };
        let token = self.connection.cancellation();

        let mut next_request_offset = 0u64;
        let mut next_write_offset = 0u64;
        let mut pending: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let mut errors: BTreeMap<u64, Error> = BTreeMap::new();
        let mut total = 0u64;
        let mut inflight: JoinSet<(u64, Result<Vec<u8>>)> = JoinSet::new();

        while next_request_offset < size || !inflight.is_empty() {
            // Stop dispatching new reads once a failure is known, but keep
            // draining what's already in flight so the contiguous prefix
            // up to the earliest failing offset is still fully assembled.
            while errors.is_empty()
                && !token.is_cancelled()
                && next_request_offset < size
                && inflight.len() < max_inflight
            {
                let connection = self.connection.clone();
                let handle = self.handle.clone();
                let read_offset = next_request_offset;
                let len = chunk_size.min(size - next_request_offset) as u32;
                inflight.spawn(async move {
                    let outcome: Result<Vec<u8>> = async {
                        let id = connection.next_id();
                        let response = connection
                            .call(
                                id,
                                &Packet::Read(ReadPacket {
                                    id,
                                    handle,
                                    offset: read_offset,
                                    len,
                                }),
                            )
                            .await?;
                        match response {
                            Packet::Data(Data { data, .. }) => Ok(data.to_vec()),
                            Packet::Status(s) if StatusCode::from(s.code) == StatusCode::Eof => {
                                Ok(Vec::new())
                            }
                            Packet::Status(s) => {
                                Err(Error::status(StatusCode::from(s.code), s.message))
                            }
                            other => Err(Error::Protocol(format!(
                                "unexpected response to READ: {other:?}"
                            ))),
                        }
                    }
                    .await;
                    (read_offset, outcome)
                });
                next_request_offset += u64::from(len);
            }

            let Some(result) = inflight.join_next().await else {
                break;
            };
            let (read_offset, outcome) = result.map_err(|e| Error::Other(e.to_string()))?;
            match outcome {
                Ok(data) => {
                    pending.insert(read_offset, data);
                }
                Err(err) => {
                    errors.insert(read_offset, err);
                }
            }

            while let Some(data) = pending.remove(&next_write_offset) {
                if data.is_empty() {
                    break;
                }
                sink.write_all(&data).await?;
                next_write_offset += data.len() as u64;
                total += data.len() as u64;
            }
        }

        if let Some((_, err)) = errors.into_iter().next() {
            return Err(Error::Partial {
                written: total,
                source: Box::new(err),
            });
        }
        if token.is_cancelled() {
            return Err(Error::Partial {
                written: total,
                source: Box::new(Error::Cancelled),
            });
        }

        sink.flush().await?;
        Ok(total)
    }
}

impl<S> File<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Source size for `write_to`'s chunk planning: `FSTAT` by default, or
    /// `STAT` by the path the handle was opened with when
    /// [`ClientConfig::use_fstat`] is off.
    async fn size_for_write_to(&self) -> Result<u64> {
        if self.config.use_fstat {
            return Ok(self.stat().await?.size.unwrap_or(0));
        }
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Stat(StatPacket {
                    id,
                    path: self.path.clone(),
                }),
            )
            .await?;
        match response {
            Packet::Attrs(attrs) => Ok(attrs.attrs.size.unwrap_or(0)),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to STAT: {other:?}"))),
        }
    }
}

async fn join_one(inflight: &mut JoinSet<Result<()>>) -> Result<()> {
    match inflight.join_next().await {
        Some(result) => result.map_err(|e| Error::Other(e.to_string()))?,
        None => Ok(()),
    }
}
