//! Shared fixtures for the integration test suite: a tempdir-backed
//! `Handler` implementation and a helper that wires a `Dispatcher` and a
//! `Client` together over an in-process `tokio::io::duplex` pipe.

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use sftp::config::{ClientConfig, ServerConfig};
use sftp::error::{Error, Result};
use sftp::protocol::attrs::FileAttrs;
use sftp::protocol::extensions::StatVfs;
use sftp::protocol::{NameEntry, OpenFlags};
use sftp::server::{DirHandler, FileHandler, Handler, OptionalExtensions};
use sftp::{Client, ClientOptions, Dispatcher};

fn io_err(err: std::io::Error) -> Error {
    Error::Io(err)
}

fn metadata_to_attrs(metadata: &std::fs::Metadata) -> FileAttrs {
    use std::os::unix::fs::MetadataExt;
    FileAttrs {
        size: Some(metadata.len()),
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
        permissions: Some(metadata.mode()),
        atime: Some(metadata.atime() as u32),
        mtime: Some(metadata.mtime() as u32),
        extended: Vec::new(),
    }
}

/// A `Handler` confined to a tempdir via [`sftp::server::to_local`].
pub struct FsHandler {
    root: PathBuf,
    _tempdir: Arc<TempDir>,
}

impl FsHandler {
    /// Build a handler rooted at a freshly created tempdir.
    pub fn new() -> (Self, Arc<TempDir>) {
        let tempdir = Arc::new(TempDir::new().expect("create tempdir"));
        let root = tempdir.path().to_path_buf();
        (
            Self {
                root,
                _tempdir: tempdir.clone(),
            },
            tempdir,
        )
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        sftp::server::to_local(&self.root, path)
    }
}

#[async_trait]
impl OptionalExtensions for FsHandler {
    async fn posix_rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let old = self.resolve(oldpath)?;
        let new = self.resolve(newpath)?;
        fs::rename(old, new).await.map_err(io_err)
    }

    async fn statvfs(&self, path: &str) -> Result<StatVfs> {
        let _ = self.resolve(path)?;
        Ok(StatVfs {
            bsize: 4096,
            frsize: 4096,
            blocks: 1_000_000,
            bfree: 500_000,
            bavail: 500_000,
            files: 100_000,
            ffree: 99_000,
            favail: 99_000,
            fsid: 1,
            flag: 0,
            namemax: 255,
        })
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[
            sftp::protocol::extensions::POSIX_RENAME,
            sftp::protocol::extensions::STATVFS,
            sftp::protocol::extensions::FSYNC,
        ]
    }
}

#[async_trait]
impl Handler for FsHandler {
    type File = FsFile;
    type Dir = FsDir;

    async fn lstat(&self, path: &str) -> Result<FileAttrs> {
        let local = self.resolve(path)?;
        let metadata = fs::symlink_metadata(&local).await.map_err(io_err)?;
        Ok(metadata_to_attrs(&metadata))
    }

    async fn stat(&self, path: &str) -> Result<FileAttrs> {
        let local = self.resolve(path)?;
        let metadata = fs::metadata(&local).await.map_err(io_err)?;
        Ok(metadata_to_attrs(&metadata))
    }

    async fn read_link(&self, path: &str) -> Result<String> {
        let local = self.resolve(path)?;
        let target = fs::read_link(&local).await.map_err(io_err)?;
        Ok(target.to_string_lossy().into_owned())
    }

    async fn real_path(&self, path: &str) -> Result<String> {
        let local = self.resolve(path)?;
        let relative = local.strip_prefix(&self.root).unwrap_or(&local);
        let mut rendered = String::from("/");
        rendered.push_str(&relative.to_string_lossy());
        Ok(rendered)
    }

    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> Result<()> {
        let local = self.resolve(path)?;
        fs::create_dir(&local).await.map_err(io_err)?;
        if let Some(mode) = attrs.permissions {
            fs::set_permissions(&local, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(io_err)?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        fs::remove_file(&local).await.map_err(io_err)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let local = self.resolve(path)?;
        fs::remove_dir(&local).await.map_err(io_err)
    }

    async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        let old = self.resolve(oldpath)?;
        let new = self.resolve(newpath)?;
        if fs::symlink_metadata(&new).await.is_ok() {
            return Err(Error::status(
                sftp::protocol::StatusCode::Failure,
                "destination already exists",
            ));
        }
        fs::rename(old, new).await.map_err(io_err)
    }

    async fn set_stat(&self, path: &str, attrs: &FileAttrs) -> Result<()> {
        let local = self.resolve(path)?;
        if let Some(size) = attrs.size {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&local)
                .await
                .map_err(io_err)?;
            file.set_len(size).await.map_err(io_err)?;
        }
        if let Some(mode) = attrs.permissions {
            fs::set_permissions(&local, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(io_err)?;
        }
        Ok(())
    }

    async fn symlink(&self, linkpath: &str, targetpath: &str) -> Result<()> {
        let link = self.resolve(linkpath)?;
        tokio::fs::symlink(targetpath, &link).await.map_err(io_err)
    }

    async fn open(&self, path: &str, pflags: OpenFlags, attrs: &FileAttrs) -> Result<Self::File> {
        let local = self.resolve(path)?;
        let mut options = fs::OpenOptions::new();
        options
            .read(pflags.has(OpenFlags::READ) || !pflags.has(OpenFlags::WRITE))
            .write(pflags.has(OpenFlags::WRITE))
            .create(pflags.has(OpenFlags::CREAT))
            .truncate(pflags.has(OpenFlags::TRUNC))
            .append(pflags.has(OpenFlags::APPEND))
            .create_new(pflags.has(OpenFlags::CREAT) && pflags.has(OpenFlags::EXCL));
        let file = options.open(&local).await.map_err(io_err)?;
        if let Some(mode) = attrs.permissions {
            let _ = fs::set_permissions(&local, std::fs::Permissions::from_mode(mode)).await;
        }
        Ok(FsFile {
            file: Mutex::new(file),
        })
    }

    async fn open_dir(&self, path: &str) -> Result<Self::Dir> {
        let local = self.resolve(path)?;
        let mut read_dir = fs::read_dir(&local).await.map_err(io_err)?;
        let mut entries = VecDeque::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(io_err)? {
            let metadata = entry.metadata().await.map_err(io_err)?;
            entries.push_back(NameEntry {
                filename: entry.file_name().to_string_lossy().into_owned(),
                longname: entry.file_name().to_string_lossy().into_owned(),
                attrs: metadata_to_attrs(&metadata),
            });
        }
        Ok(FsDir {
            entries: Mutex::new(entries),
        })
    }
}

/// A file handle backed by a real, open `tokio::fs::File`.
pub struct FsFile {
    file: Mutex<fs::File>,
}

#[async_trait]
impl FileHandler for FsFile {
    async fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io_err)?;
        let mut buf = vec![0u8; len as usize];
        let mut total = 0usize;
        loop {
            let n = file.read(&mut buf[total..]).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(io_err)?;
        file.write_all(data).await.map_err(io_err)
    }

    async fn stat(&self) -> Result<FileAttrs> {
        let file = self.file.lock().await;
        let metadata = file.metadata().await.map_err(io_err)?;
        Ok(metadata_to_attrs(&metadata))
    }

    async fn set_stat(&self, attrs: &FileAttrs) -> Result<()> {
        let file = self.file.lock().await;
        if let Some(size) = attrs.size {
            file.set_len(size).await.map_err(io_err)?;
        }
        if let Some(mode) = attrs.permissions {
            file.set_permissions(std::fs::Permissions::from_mode(mode))
                .await
                .map_err(io_err)?;
        }
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.sync_all().await.map_err(io_err)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A directory listing snapshotted at `OPENDIR` time.
pub struct FsDir {
    entries: Mutex<VecDeque<NameEntry>>,
}

#[async_trait]
impl DirHandler for FsDir {
    async fn read_dir(&self, max_entries: usize) -> Result<Vec<NameEntry>> {
        let mut entries = self.entries.lock().await;
        let take = max_entries.min(entries.len());
        Ok(entries.drain(..take).collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Spin up a [`Dispatcher`] over an [`FsHandler`] on one end of an
/// in-process pipe, and return a connected [`Client`] on the other end
/// plus the tempdir keeping the backing store alive.
pub async fn connected_client() -> (Client<tokio::io::DuplexStream>, Arc<TempDir>) {
    let (handler, tempdir) = FsHandler::new();
    let (client_io, server_io) = tokio::io::duplex(1 << 20);

    tokio::spawn(async move {
        let dispatcher = Dispatcher::new(handler, ServerConfig::default()).expect("valid config");
        let _ = dispatcher.serve(server_io).await;
    });

    let client = Client::connect(client_io, ClientOptions::with_config(ClientConfig::default()))
        .await
        .expect("handshake succeeds");
    (client, tempdir)
}
