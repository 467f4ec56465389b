//! The back-end contract (`spec.md` §6): what a concrete filesystem
//! (local disk, S3, in-memory) must implement for the dispatcher to
//! drive it. Everything in this module is a trait; no implementation
//! lives in this crate, per the Non-goal excluding concrete back-ends.

use async_trait::async_trait;

use crate::protocol::{FileAttrs, NameEntry, OpenFlags};
use crate::protocol::extensions::StatVfs;
use crate::error::Result;

/// A single open file, returned by [`Handler::open`].
#[async_trait]
pub trait FileHandler: Send + Sync {
    /// Read up to `len` bytes starting at `offset`. A short, non-empty
    /// read is not EOF by itself; the dispatcher reads EOF only from a
    /// zero-length result.
    async fn read_at(&self, offset: u64, len: u32) -> Result<Vec<u8>>;

    /// Write `data` at `offset`.
    async fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Attributes of the open file.
    async fn stat(&self) -> Result<FileAttrs>;

    /// Apply `attrs`' present fields to the open file.
    async fn set_stat(&self, attrs: &FileAttrs) -> Result<()>;

    /// Flush to stable storage (`fsync@openssh.com`).
    async fn sync(&self) -> Result<()>;

    /// Release any native resources (file descriptor).
    async fn close(&self) -> Result<()>;
}

/// A single open directory, returned by [`Handler::open_dir`].
#[async_trait]
pub trait DirHandler: Send + Sync {
    /// Return up to the next `max_entries` directory entries not yet
    /// returned by a previous call on this handle, or an empty vector if
    /// the directory is exhausted (the dispatcher turns that into
    /// `STATUS(EOF)`).
    async fn read_dir(&self, max_entries: usize) -> Result<Vec<NameEntry>>;

    /// Release any native resources (directory stream).
    async fn close(&self) -> Result<()>;
}

/// Optional capabilities a [`Handler`] may implement, probed once at
/// session start so the server only advertises extensions it can serve.
#[async_trait]
pub trait OptionalExtensions: Send + Sync {
    /// `hardlink@openssh.com`.
    async fn hardlink(&self, _oldpath: &str, _newpath: &str) -> Result<()> {
        Err(crate::error::Error::status(
            crate::protocol::StatusCode::OpUnsupported,
            "hardlink not supported",
        ))
    }

    /// `posix-rename@openssh.com`.
    async fn posix_rename(&self, _oldpath: &str, _newpath: &str) -> Result<()> {
        Err(crate::error::Error::status(
            crate::protocol::StatusCode::OpUnsupported,
            "posix-rename not supported",
        ))
    }

    /// `statvfs@openssh.com`.
    async fn statvfs(&self, _path: &str) -> Result<StatVfs> {
        Err(crate::error::Error::status(
            crate::protocol::StatusCode::OpUnsupported,
            "statvfs not supported",
        ))
    }

    /// Which of the above this implementation actually serves, so the
    /// server can advertise only those in `VERSION`.
    fn supported_extensions(&self) -> &'static [&'static str] {
        &[]
    }
}

/// The back-end filesystem contract the dispatcher invokes.
///
/// A concrete implementation (local disk, S3, in-memory, a chroot-confined
/// variant built on [`crate::server::sanitize::to_local`]) lives entirely
/// outside this crate.
#[async_trait]
pub trait Handler: OptionalExtensions {
    /// The concrete [`FileHandler`] this back-end returns from [`Handler::open`].
    type File: FileHandler;
    /// The concrete [`DirHandler`] this back-end returns from [`Handler::open_dir`].
    type Dir: DirHandler;

    /// `LSTAT`: attributes of `path`, not following a trailing symlink.
    async fn lstat(&self, path: &str) -> Result<FileAttrs>;

    /// `STAT`: attributes of `path`, following a trailing symlink.
    async fn stat(&self, path: &str) -> Result<FileAttrs>;

    /// `READLINK`: the target of the symlink at `path`.
    async fn read_link(&self, path: &str) -> Result<String>;

    /// `REALPATH`: canonicalize `path`.
    async fn real_path(&self, path: &str) -> Result<String>;

    /// `MKDIR`.
    async fn mkdir(&self, path: &str, attrs: &FileAttrs) -> Result<()>;

    /// `REMOVE`.
    async fn remove(&self, path: &str) -> Result<()>;

    /// `RMDIR`.
    async fn rmdir(&self, path: &str) -> Result<()>;

    /// `RENAME`.
    async fn rename(&self, oldpath: &str, newpath: &str) -> Result<()>;

    /// `SETSTAT`.
    async fn set_stat(&self, path: &str, attrs: &FileAttrs) -> Result<()>;

    /// `SYMLINK`.
    async fn symlink(&self, linkpath: &str, targetpath: &str) -> Result<()>;

    /// `OPEN`.
    async fn open(&self, path: &str, pflags: OpenFlags, attrs: &FileAttrs) -> Result<Self::File>;

    /// `OPENDIR`.
    async fn open_dir(&self, path: &str) -> Result<Self::Dir>;
}
