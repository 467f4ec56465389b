//! File attributes: the tagged bitmap described in the data model.
//!
//! A `flags` `u32` selects which fields are present on the wire. Encoders
//! write exactly the fields selected by `flags`; decoders read exactly
//! those fields and nothing else, so a caller that only sets `size` never
//! pays for the other five fields.

use bytes::{BufMut, BytesMut};

use super::codec;
use crate::error::Result;

const FLAG_SIZE: u32 = 0x0000_0001;
const FLAG_UIDGID: u32 = 0x0000_0002;
const FLAG_PERMISSIONS: u32 = 0x0000_0004;
const FLAG_ACMODTIME: u32 = 0x0000_0008;
const FLAG_EXTENDED: u32 = 0x8000_0000;

/// POSIX file-type bits folded into `permissions`, as SFTP v3 encodes them.
pub mod file_type {
    /// Regular file (`S_IFREG`).
    pub const REGULAR: u32 = 0o100000;
    /// Directory (`S_IFDIR`).
    pub const DIRECTORY: u32 = 0o040000;
    /// Symbolic link (`S_IFLNK`).
    pub const SYMLINK: u32 = 0o120000;
    /// Mask isolating the type bits from the permission bits.
    pub const MASK: u32 = 0o170000;
}

/// An `(name, value)` extended attribute pair, carried when the
/// `EXTENDED` flag bit is set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedAttr {
    /// Attribute name (vendor-namespaced, e.g. `"acl@openssh.com"`).
    pub name: String,
    /// Opaque attribute value.
    pub value: Vec<u8>,
}

/// SFTP v3 file attributes.
///
/// Every field is `Option`; `None` means the field was absent on the
/// wire, not zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    /// File size in bytes.
    pub size: Option<u64>,
    /// Owning user id.
    pub uid: Option<u32>,
    /// Owning group id.
    pub gid: Option<u32>,
    /// POSIX mode bits, including the file-type bits in [`file_type`].
    pub permissions: Option<u32>,
    /// Last access time, seconds since the Unix epoch.
    pub atime: Option<u32>,
    /// Last modification time, seconds since the Unix epoch.
    pub mtime: Option<u32>,
    /// Vendor-defined extended attribute pairs.
    pub extended: Vec<ExtendedAttr>,
}

impl FileAttrs {
    /// Build attributes describing a plain file of the given size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// True if [`FileAttrs::permissions`]'s type bits mark a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .is_some_and(|p| p & file_type::MASK == file_type::DIRECTORY)
    }

    /// True if [`FileAttrs::permissions`]'s type bits mark a symlink.
    pub fn is_symlink(&self) -> bool {
        self.permissions
            .is_some_and(|p| p & file_type::MASK == file_type::SYMLINK)
    }

    /// Encode into a freshly appended region of `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= FLAG_ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= FLAG_EXTENDED;
        }

        buf.put_u32(flags);
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if flags & FLAG_EXTENDED != 0 {
            buf.put_u32(self.extended.len() as u32);
            for attr in &self.extended {
                codec::put_string(buf, &attr.name);
                codec::put_bytes(buf, &attr.value);
            }
        }
    }

    /// Decode from the front of `buf`, consuming exactly the bytes the
    /// flags word says are present.
    pub fn decode(buf: &mut &[u8]) -> Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = FileAttrs::default();

        if flags & FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }
        if flags & FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }
        if flags & FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }
        if flags & FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf)?);
            attrs.mtime = Some(codec::get_u32(buf)?);
        }
        if flags & FLAG_EXTENDED != 0 {
            let count = codec::get_u32(buf)? as usize;
            attrs.extended.reserve(count);
            for _ in 0..count {
                let name = codec::get_string(buf)?;
                let value = codec::get_bytes(buf)?;
                attrs.extended.push(ExtendedAttr { name, value });
            }
        }

        Ok(attrs)
    }
}
