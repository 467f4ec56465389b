//! The `name=data` extension set advertised in `VERSION` and invoked via
//! `SSH_FXP_EXTENDED`/`SSH_FXP_EXTENDED_REPLY`.
//!
//! Each extension here is a pure encode/decode pair over the `Extended`
//! packet's opaque `data` field; the [`ExtensionSet`] tracks which names a
//! session has negotiated so callers on either side can ask "is this
//! available" before using it.

use std::collections::BTreeSet;

use bytes::{BufMut, BytesMut};

use super::codec;
use crate::error::Result;

/// `fsync@openssh.com`: flush a handle's writes to stable storage.
pub const FSYNC: &str = "fsync@openssh.com";
/// `hardlink@openssh.com`: create a hard link.
pub const HARDLINK: &str = "hardlink@openssh.com";
/// `posix-rename@openssh.com`: rename allowed to replace an existing target.
pub const POSIX_RENAME: &str = "posix-rename@openssh.com";
/// `statvfs@openssh.com`: filesystem statistics by path.
pub const STATVFS: &str = "statvfs@openssh.com";
/// `fstatvfs@openssh.com`: filesystem statistics by open handle.
pub const FSTATVFS: &str = "fstatvfs@openssh.com";

/// All extensions this crate knows how to encode/decode, independent of
/// whether a particular [`crate::server::handler::Handler`] implements
/// the capability behind them.
pub const KNOWN: &[&str] = &[FSYNC, HARDLINK, POSIX_RENAME, STATVFS, FSTATVFS];

/// The extension version string servers advertise for each of the
/// extensions above (OpenSSH advertises `"1"` for all of these).
pub const VERSION_STRING: &str = "1";

/// `fsync@openssh.com` request payload: just a handle.
pub fn encode_fsync(handle: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::put_bytes(&mut buf, handle);
    buf.to_vec()
}

/// Decode an `fsync@openssh.com` request payload.
pub fn decode_fsync(mut data: &[u8]) -> Result<Vec<u8>> {
    codec::get_bytes(&mut data)
}

/// `hardlink@openssh.com` request payload: `oldpath`, `newpath`.
pub fn encode_hardlink(oldpath: &str, newpath: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::put_string(&mut buf, oldpath);
    codec::put_string(&mut buf, newpath);
    buf.to_vec()
}

/// Decode a `hardlink@openssh.com` request payload into `(oldpath, newpath)`.
pub fn decode_hardlink(mut data: &[u8]) -> Result<(String, String)> {
    let oldpath = codec::get_string(&mut data)?;
    let newpath = codec::get_string(&mut data)?;
    Ok((oldpath, newpath))
}

/// `posix-rename@openssh.com` request payload: `oldpath`, `newpath`.
pub fn encode_posix_rename(oldpath: &str, newpath: &str) -> Vec<u8> {
    encode_hardlink(oldpath, newpath)
}

/// Decode a `posix-rename@openssh.com` request payload into `(oldpath, newpath)`.
pub fn decode_posix_rename(data: &[u8]) -> Result<(String, String)> {
    decode_hardlink(data)
}

/// `statvfs@openssh.com`/`fstatvfs@openssh.com` request payload: a path
/// or handle, respectively (the two extensions share this shape; the
/// wire name selects which lookup the server performs).
pub fn encode_statvfs_path(path: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    codec::put_string(&mut buf, path);
    buf.to_vec()
}

/// Decode a `statvfs@openssh.com` request payload.
pub fn decode_statvfs_path(mut data: &[u8]) -> Result<String> {
    codec::get_string(&mut data)
}

/// `fstatvfs@openssh.com` request payload: just a handle.
pub fn encode_fstatvfs_handle(handle: &[u8]) -> Vec<u8> {
    encode_fsync(handle)
}

/// Decode an `fstatvfs@openssh.com` request payload (a handle, not a path).
pub fn decode_fstatvfs_handle(mut data: &[u8]) -> Result<Vec<u8>> {
    codec::get_bytes(&mut data)
}

/// Filesystem statistics, the `statvfs@openssh.com`/`fstatvfs@openssh.com`
/// `EXTENDED_REPLY` payload shape (mirrors POSIX `struct statvfs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatVfs {
    /// Filesystem block size.
    pub bsize: u64,
    /// Fundamental fragment size.
    pub frsize: u64,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Free blocks available to unprivileged users.
    pub bavail: u64,
    /// Total file nodes.
    pub files: u64,
    /// Free file nodes.
    pub ffree: u64,
    /// Free file nodes available to unprivileged users.
    pub favail: u64,
    /// Filesystem id.
    pub fsid: u64,
    /// Mount flags.
    pub flag: u64,
    /// Maximum filename length.
    pub namemax: u64,
}

impl StatVfs {
    /// Encode as an `EXTENDED_REPLY` payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(11 * 8);
        buf.put_u64(self.bsize);
        buf.put_u64(self.frsize);
        buf.put_u64(self.blocks);
        buf.put_u64(self.bfree);
        buf.put_u64(self.bavail);
        buf.put_u64(self.files);
        buf.put_u64(self.ffree);
        buf.put_u64(self.favail);
        buf.put_u64(self.fsid);
        buf.put_u64(self.flag);
        buf.put_u64(self.namemax);
        buf.to_vec()
    }

    /// Decode from an `EXTENDED_REPLY` payload.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        Ok(Self {
            bsize: codec::get_u64(&mut data)?,
            frsize: codec::get_u64(&mut data)?,
            blocks: codec::get_u64(&mut data)?,
            bfree: codec::get_u64(&mut data)?,
            bavail: codec::get_u64(&mut data)?,
            files: codec::get_u64(&mut data)?,
            ffree: codec::get_u64(&mut data)?,
            favail: codec::get_u64(&mut data)?,
            fsid: codec::get_u64(&mut data)?,
            flag: codec::get_u64(&mut data)?,
            namemax: codec::get_u64(&mut data)?,
        })
    }
}

/// The set of extension names negotiated for a session, built from the
/// `VERSION` packet's `(name, data)` pairs.
///
/// The server side builds one from whatever optional capabilities its
/// [`crate::server::handler::Handler`] reports; the client side builds
/// one by parsing the server's `VERSION` reply.
#[derive(Debug, Clone, Default)]
pub struct ExtensionSet {
    names: BTreeSet<String>,
}

impl ExtensionSet {
    /// An empty set (no extensions negotiated).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `(name, data)` pairs of a `VERSION` packet.
    pub fn from_version_pairs(pairs: &[(String, String)]) -> Self {
        Self {
            names: pairs.iter().map(|(name, _)| name.clone()).collect(),
        }
    }

    /// Record that `name` is available.
    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// True if `name` was negotiated.
    pub fn supports(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Render as `VERSION` extension pairs, each advertised with
    /// [`VERSION_STRING`].
    pub fn to_version_pairs(&self) -> Vec<(String, String)> {
        self.names
            .iter()
            .map(|name| (name.clone(), VERSION_STRING.to_string()))
            .collect()
    }
}
