//! High-level client surface (`spec.md` §6): the operations a caller
//! reaches for directly, plus the `INIT`/`VERSION` handshake that builds
//! a [`Client`] out of a raw byte stream.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::framer;
use crate::protocol::attrs::FileAttrs;
use crate::protocol::extensions::{self, ExtensionSet, StatVfs};
use crate::protocol::packet::{
    Extended, Init, Lstat, MkDir, OpenDir, OpenFlags, Remove, Rename, RmDir, Stat as StatPacket,
    Symlink,
};
use crate::protocol::{Packet, StatusCode, SFTP_VERSION};

use super::connection::Connection;
use super::dir::DirHandle;
use super::file::File;
use super::options::ClientOptions;

/// A connected SFTP session: the request multiplexer plus the
/// negotiated extension set, wrapped in the high-level operations
/// `spec.md` §6 names.
pub struct Client<S: AsyncWrite> {
    connection: Connection<tokio::io::WriteHalf<S>>,
    config: ClientConfig,
    extensions: Arc<ExtensionSet>,
}

fn name_entry_path(response: Packet, op: &'static str) -> Result<String> {
    match response {
        Packet::Name(name) => name
            .entries
            .into_iter()
            .next()
            .map(|entry| entry.filename)
            .ok_or_else(|| Error::Protocol(format!("{op} returned an empty NAME"))),
        Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
        other => Err(Error::Protocol(format!("unexpected response to {op}: {other:?}"))),
    }
}

fn expect_ok(response: Packet, op: &'static str) -> Result<()> {
    match response {
        Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Ok => Ok(()),
        Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
        other => Err(Error::Protocol(format!("unexpected response to {op}: {other:?}"))),
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Perform the `INIT`/`VERSION` handshake over `stream` and build a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options.config` fails validation, or
    /// [`Error::Protocol`] if the peer's first frame is not a well-formed
    /// `VERSION` advertising version 3.
    pub async fn connect(stream: S, options: ClientOptions) -> Result<Self> {
        options.config.validate()?;
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        framer::write_packet(
            &mut write_half,
            &Packet::Init(Init {
                version: SFTP_VERSION,
            }),
        )
        .await?;

        let frame = framer::read_frame(&mut read_half).await?;
        let version = match Packet::decode(&frame.body)? {
            Packet::Version(version) => version,
            other => return Err(Error::Protocol(format!("expected VERSION, got {other:?}"))),
        };
        if version.version != SFTP_VERSION {
            return Err(Error::Protocol(format!(
                "server proposed unsupported version {}",
                version.version
            )));
        }

        let connection = Connection::new(read_half, write_half).with_cancellation(options.cancellation);
        Ok(Self {
            connection,
            config: options.config,
            extensions: Arc::new(ExtensionSet::from_version_pairs(&version.extensions)),
        })
    }

    /// True if the server advertised `name` in its `VERSION` reply.
    pub fn supports(&self, name: &str) -> bool {
        self.extensions.supports(name)
    }

    async fn open_raw(&self, path: &str, pflags: OpenFlags, attrs: &FileAttrs) -> Result<File<S>> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Open(crate::protocol::packet::Open {
                    id,
                    filename: path.to_string(),
                    pflags,
                    attrs: attrs.clone(),
                }),
            )
            .await?;
        match response {
            Packet::Handle(handle) => Ok(File::new(
                self.connection.clone(),
                handle.handle,
                path.to_string(),
                self.config.clone(),
                self.extensions.clone(),
            )),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to OPEN: {other:?}"))),
        }
    }

    /// Open an existing file for reading.
    pub async fn open(&self, path: &str) -> Result<File<S>> {
        self.open_raw(path, OpenFlags(OpenFlags::READ), &FileAttrs::default())
            .await
    }

    /// Create (or truncate) a file for writing.
    pub async fn create(&self, path: &str) -> Result<File<S>> {
        self.open_raw(
            path,
            OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC),
            &FileAttrs::default(),
        )
        .await
    }

    /// Open with caller-supplied flags and creation permissions.
    pub async fn open_file(&self, path: &str, pflags: OpenFlags, perm: u32) -> Result<File<S>> {
        let attrs = FileAttrs {
            permissions: Some(perm),
            ..FileAttrs::default()
        };
        self.open_raw(path, pflags, &attrs).await
    }

    /// `MKDIR`.
    pub async fn mkdir(&self, path: &str, perm: u32) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Mkdir(MkDir {
                    id,
                    path: path.to_string(),
                    attrs: FileAttrs {
                        permissions: Some(perm),
                        ..FileAttrs::default()
                    },
                }),
            )
            .await?;
        expect_ok(response, "MKDIR")
    }

    /// Create `path` and every missing ancestor directory, tolerating
    /// components that already exist.
    pub async fn mkdir_all(&self, path: &str, perm: u32) -> Result<()> {
        let mut built = String::new();
        if path.starts_with('/') {
            built.push('/');
        }
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !built.is_empty() && !built.ends_with('/') {
                built.push('/');
            }
            built.push_str(component);
            match self.mkdir(&built, perm).await {
                Ok(()) => {}
                Err(err) if matches!(err.kind(), Some(StatusCode::Failure) | Some(StatusCode::Other(_))) => {
                    // Already exists is reported as a generic FAILURE by most
                    // servers since SFTP v3 has no dedicated "exists" code;
                    // confirm via STAT before treating this as fatal.
                    if self.stat(&built).await.is_err() {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// `REMOVE`.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Remove(Remove {
                    id,
                    filename: path.to_string(),
                }),
            )
            .await?;
        expect_ok(response, "REMOVE")
    }

    /// `RMDIR`.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Rmdir(RmDir {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        expect_ok(response, "RMDIR")
    }

    /// `RENAME`. SFTP v3's rename fails if `newpath` already exists; use
    /// [`Client::posix_rename`] for overwrite semantics.
    pub async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Rename(Rename {
                    id,
                    oldpath: oldpath.to_string(),
                    newpath: newpath.to_string(),
                }),
            )
            .await?;
        expect_ok(response, "RENAME")
    }

    /// `posix-rename@openssh.com`: rename allowed to replace an existing target.
    pub async fn posix_rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        self.call_extension_status(extensions::POSIX_RENAME, extensions::encode_posix_rename(oldpath, newpath))
            .await
    }

    /// `hardlink@openssh.com`.
    pub async fn link(&self, oldpath: &str, newpath: &str) -> Result<()> {
        self.call_extension_status(extensions::HARDLINK, extensions::encode_hardlink(oldpath, newpath))
            .await
    }

    async fn call_extension_status(&self, name: &str, data: Vec<u8>) -> Result<()> {
        if !self.extensions.supports(name) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                format!("server did not advertise {name}"),
            ));
        }
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Extended(Extended {
                    id,
                    request: name.to_string(),
                    data,
                }),
            )
            .await?;
        match response {
            Packet::Status(status) if StatusCode::from(status.code) == StatusCode::Ok => Ok(()),
            Packet::ExtendedReply(_) => Ok(()),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to {name}: {other:?}"))),
        }
    }

    /// `SYMLINK`.
    pub async fn symlink(&self, linkpath: &str, targetpath: &str) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Symlink(Symlink {
                    id,
                    linkpath: linkpath.to_string(),
                    targetpath: targetpath.to_string(),
                }),
            )
            .await?;
        expect_ok(response, "SYMLINK")
    }

    /// `READLINK`.
    pub async fn read_link(&self, path: &str) -> Result<String> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Readlink(crate::protocol::packet::ReadLink {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        name_entry_path(response, "READLINK")
    }

    /// `REALPATH`.
    pub async fn real_path(&self, path: &str) -> Result<String> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Realpath(crate::protocol::packet::RealPath {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        name_entry_path(response, "REALPATH")
    }

    /// `STAT` (follows a trailing symlink).
    pub async fn stat(&self, path: &str) -> Result<FileAttrs> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Stat(StatPacket {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        match response {
            Packet::Attrs(attrs) => Ok(attrs.attrs),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to STAT: {other:?}"))),
        }
    }

    /// `LSTAT` (does not follow a trailing symlink).
    pub async fn lstat(&self, path: &str) -> Result<FileAttrs> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Lstat(Lstat {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        match response {
            Packet::Attrs(attrs) => Ok(attrs.attrs),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to LSTAT: {other:?}"))),
        }
    }

    /// `SETSTAT`.
    pub async fn set_stat(&self, path: &str, attrs: &FileAttrs) -> Result<()> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Setstat(crate::protocol::packet::SetStat {
                    id,
                    path: path.to_string(),
                    attrs: attrs.clone(),
                }),
            )
            .await?;
        expect_ok(response, "SETSTAT")
    }

    /// Change permission bits.
    pub async fn chmod(&self, path: &str, permissions: u32) -> Result<()> {
        self.set_stat(
            path,
            &FileAttrs {
                permissions: Some(permissions),
                ..FileAttrs::default()
            },
        )
        .await
    }

    /// Change ownership.
    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> Result<()> {
        self.set_stat(
            path,
            &FileAttrs {
                uid: Some(uid),
                gid: Some(gid),
                ..FileAttrs::default()
            },
        )
        .await
    }

    /// Change access and modification times.
    pub async fn chtimes(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        self.set_stat(
            path,
            &FileAttrs {
                atime: Some(atime),
                mtime: Some(mtime),
                ..FileAttrs::default()
            },
        )
        .await
    }

    /// Truncate (or extend) a file by path.
    pub async fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.set_stat(path, &FileAttrs::with_size(size)).await
    }

    /// `statvfs@openssh.com`.
    pub async fn statvfs(&self, path: &str) -> Result<StatVfs> {
        if !self.extensions.supports(extensions::STATVFS) {
            return Err(Error::status(
                StatusCode::OpUnsupported,
                "server did not advertise statvfs@openssh.com",
            ));
        }
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Extended(Extended {
                    id,
                    request: extensions::STATVFS.to_string(),
                    data: extensions::encode_statvfs_path(path),
                }),
            )
            .await?;
        match response {
            Packet::ExtendedReply(reply) => StatVfs::decode(&reply.data),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to statvfs: {other:?}"))),
        }
    }

    /// `OPENDIR`.
    pub async fn open_dir(&self, path: &str) -> Result<DirHandle<S>> {
        let id = self.connection.next_id();
        let response = self
            .connection
            .call(
                id,
                &Packet::Opendir(OpenDir {
                    id,
                    path: path.to_string(),
                }),
            )
            .await?;
        match response {
            Packet::Handle(handle) => Ok(DirHandle::new(self.connection.clone(), handle.handle)),
            Packet::Status(status) => Err(Error::status(StatusCode::from(status.code), status.message)),
            other => Err(Error::Protocol(format!("unexpected response to OPENDIR: {other:?}"))),
        }
    }

    /// Open `path`, drain every `READDIR` batch, and close the handle.
    pub async fn read_dir(&self, path: &str) -> Result<Vec<crate::protocol::packet::NameEntry>> {
        self.open_dir(path).await?.collect_all().await
    }

    /// Read an entire remote file into memory via pipelined `READ`s.
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let file = self.open(path).await?;
        let mut buf = Vec::new();
        let result = file.write_to(&mut buf).await;
        let _ = file.close().await;
        result?;
        Ok(buf)
    }

    /// Write `data` to a remote file via pipelined `WRITE`s, creating or
    /// truncating it first.
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let file = self.create(path).await?;
        let result = file.read_from(std::io::Cursor::new(data), 0).await;
        let close_result = file.close().await;
        result?;
        close_result
    }
}
