//! The closed packet set: opcodes, status codes, open flags, and the
//! tagged-union `Packet` type with its marshal/unmarshal contract.
//!
//! This replaces a visitor-style dispatch over packet variants with a
//! single exhaustive `match` in both directions: adding an opcode means
//! adding a `Packet` variant and a switch arm, and the compiler rejects a
//! build that forgets one.

use bytes::{BufMut, Bytes, BytesMut};

use super::attrs::FileAttrs;
use super::codec;
use crate::error::{Error, Result};

/// SFTP protocol version implemented by this crate.
pub const SFTP_VERSION: u32 = 3;

/// SFTP v3 wire opcodes (closed set, 1..21 plus the 100s and extension pair).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// `SSH_FXP_INIT`
    Init = 1,
    /// `SSH_FXP_VERSION`
    Version = 2,
    /// `SSH_FXP_OPEN`
    Open = 3,
    /// `SSH_FXP_CLOSE`
    Close = 4,
    /// `SSH_FXP_READ`
    Read = 5,
    /// `SSH_FXP_WRITE`
    Write = 6,
    /// `SSH_FXP_LSTAT`
    Lstat = 7,
    /// `SSH_FXP_FSTAT`
    Fstat = 8,
    /// `SSH_FXP_SETSTAT`
    Setstat = 9,
    /// `SSH_FXP_FSETSTAT`
    Fsetstat = 10,
    /// `SSH_FXP_OPENDIR`
    Opendir = 11,
    /// `SSH_FXP_READDIR`
    Readdir = 12,
    /// `SSH_FXP_REMOVE`
    Remove = 13,
    /// `SSH_FXP_MKDIR`
    Mkdir = 14,
    /// `SSH_FXP_RMDIR`
    Rmdir = 15,
    /// `SSH_FXP_REALPATH`
    Realpath = 16,
    /// `SSH_FXP_STAT`
    Stat = 17,
    /// `SSH_FXP_RENAME`
    Rename = 18,
    /// `SSH_FXP_READLINK`
    Readlink = 19,
    /// `SSH_FXP_SYMLINK`
    Symlink = 20,
    /// `SSH_FXP_STATUS`
    Status = 101,
    /// `SSH_FXP_HANDLE`
    Handle = 102,
    /// `SSH_FXP_DATA`
    Data = 103,
    /// `SSH_FXP_NAME`
    Name = 104,
    /// `SSH_FXP_ATTRS`
    Attrs = 105,
    /// `SSH_FXP_EXTENDED`
    Extended = 200,
    /// `SSH_FXP_EXTENDED_REPLY`
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        use MessageType::*;
        Ok(match value {
            1 => Init,
            2 => Version,
            3 => Open,
            4 => Close,
            5 => Read,
            6 => Write,
            7 => Lstat,
            8 => Fstat,
            9 => Setstat,
            10 => Fsetstat,
            11 => Opendir,
            12 => Readdir,
            13 => Remove,
            14 => Mkdir,
            15 => Rmdir,
            16 => Realpath,
            17 => Stat,
            18 => Rename,
            19 => Readlink,
            20 => Symlink,
            101 => Status,
            102 => Handle,
            103 => Data,
            104 => Name,
            105 => Attrs,
            200 => Extended,
            201 => ExtendedReply,
            other => return Err(Error::Protocol(format!("unknown message type: {other}"))),
        })
    }
}

/// SFTP status codes (`spec.md` §7). v5+ codes pass through unchanged via
/// their raw `u32` when not in this closed set, so a server speaking a
/// newer dialect's extension never gets silently coerced to `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// `SSH_FX_OK`
    Ok,
    /// `SSH_FX_EOF`
    Eof,
    /// `SSH_FX_NO_SUCH_FILE`
    NoSuchFile,
    /// `SSH_FX_PERMISSION_DENIED`
    PermissionDenied,
    /// `SSH_FX_FAILURE`
    Failure,
    /// `SSH_FX_BAD_MESSAGE`
    BadMessage,
    /// `SSH_FX_NO_CONNECTION`
    NoConnection,
    /// `SSH_FX_CONNECTION_LOST`
    ConnectionLost,
    /// `SSH_FX_OP_UNSUPPORTED`
    OpUnsupported,
    /// Any code outside the v3 closed set, preserved verbatim.
    Other(u32),
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            other => StatusCode::Other(other),
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Other(v) => v,
        }
    }
}

/// `SSH_FXF_*` open flags, as a plain bitmask newtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading.
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing.
    pub const WRITE: u32 = 0x0000_0002;
    /// Append writes to the end of the file.
    pub const APPEND: u32 = 0x0000_0004;
    /// Create the file if it does not exist.
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate an existing file to zero length.
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail if the file already exists (only meaningful with `CREAT`).
    pub const EXCL: u32 = 0x0000_0020;

    /// True if `bit` is set.
    pub fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// A single directory entry: filename, ls-style `longname`, and attributes.
///
/// `longname` is opaque to clients per the data model; nothing in this
/// crate parses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    /// Bare filename.
    pub filename: String,
    /// Human-readable `ls -l`-style rendering. Clients must not parse this.
    pub longname: String,
    /// Attributes for this entry.
    pub attrs: FileAttrs,
}

macro_rules! packet_enum {
    ($($variant:ident($ty:ident)),+ $(,)?) => {
        /// The full SFTP v3 packet set as a closed tagged union.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Packet {
            $($variant($ty),)+
        }

        $(
            impl From<$ty> for Packet {
                fn from(v: $ty) -> Packet {
                    Packet::$variant(v)
                }
            }
        )+
    };
}

packet_enum! {
    Init(Init),
    Version(Version),
    Open(Open),
    Close(Close),
    Read(Read),
    Write(Write),
    Lstat(Lstat),
    Fstat(Fstat),
    Setstat(SetStat),
    Fsetstat(FSetStat),
    Opendir(OpenDir),
    Readdir(ReadDir),
    Remove(Remove),
    Mkdir(MkDir),
    Rmdir(RmDir),
    Realpath(RealPath),
    Stat(Stat),
    Rename(Rename),
    Readlink(ReadLink),
    Symlink(Symlink),
    Status(Status),
    Handle(Handle),
    Data(Data),
    Name(Name),
    Attrs(Attrs),
    Extended(Extended),
    ExtendedReply(ExtendedReply),
}

/// `SSH_FXP_INIT`. Omits a request id, per the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Init {
    /// Client's proposed protocol version.
    pub version: u32,
}

/// `SSH_FXP_VERSION`. Omits a request id, per the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Version {
    /// Server's chosen protocol version.
    pub version: u32,
    /// Advertised `name=data` extension pairs.
    pub extensions: Vec<(String, String)>,
}

/// `SSH_FXP_OPEN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    /// Request id.
    pub id: u32,
    /// Path to open.
    pub filename: String,
    /// `SSH_FXF_*` flags.
    pub pflags: OpenFlags,
    /// Attributes to apply if the file is created.
    pub attrs: FileAttrs,
}

/// `SSH_FXP_CLOSE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    /// Request id.
    pub id: u32,
    /// Handle to close.
    pub handle: Vec<u8>,
}

/// `SSH_FXP_READ`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read {
    /// Request id.
    pub id: u32,
    /// Handle to read from.
    pub handle: Vec<u8>,
    /// Byte offset to read at.
    pub offset: u64,
    /// Maximum number of bytes to read.
    pub len: u32,
}

/// `SSH_FXP_WRITE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    /// Request id.
    pub id: u32,
    /// Handle to write to.
    pub handle: Vec<u8>,
    /// Byte offset to write at.
    pub offset: u64,
    /// Data to write.
    pub data: Bytes,
}

/// `SSH_FXP_LSTAT`. Does not follow a trailing symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lstat {
    /// Request id.
    pub id: u32,
    /// Path to stat.
    pub path: String,
}

/// `SSH_FXP_FSTAT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fstat {
    /// Request id.
    pub id: u32,
    /// Handle to stat.
    pub handle: Vec<u8>,
}

/// `SSH_FXP_SETSTAT`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetStat {
    /// Request id.
    pub id: u32,
    /// Path to modify.
    pub path: String,
    /// New attributes (only flagged fields change).
    pub attrs: FileAttrs,
}

/// `SSH_FXP_FSETSTAT`.
#[derive(Debug, Clone, PartialEq)]
pub struct FSetStat {
    /// Request id.
    pub id: u32,
    /// Handle to modify.
    pub handle: Vec<u8>,
    /// New attributes (only flagged fields change).
    pub attrs: FileAttrs,
}

/// `SSH_FXP_OPENDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDir {
    /// Request id.
    pub id: u32,
    /// Directory path to open.
    pub path: String,
}

/// `SSH_FXP_READDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDir {
    /// Request id.
    pub id: u32,
    /// Directory handle to read from.
    pub handle: Vec<u8>,
}

/// `SSH_FXP_REMOVE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remove {
    /// Request id.
    pub id: u32,
    /// Path to remove.
    pub filename: String,
}

/// `SSH_FXP_MKDIR`.
#[derive(Debug, Clone, PartialEq)]
pub struct MkDir {
    /// Request id.
    pub id: u32,
    /// Directory path to create.
    pub path: String,
    /// Attributes to apply to the new directory.
    pub attrs: FileAttrs,
}

/// `SSH_FXP_RMDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmDir {
    /// Request id.
    pub id: u32,
    /// Directory path to remove.
    pub path: String,
}

/// `SSH_FXP_REALPATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealPath {
    /// Request id.
    pub id: u32,
    /// Path to canonicalize.
    pub path: String,
}

/// `SSH_FXP_STAT`. Follows a trailing symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    /// Request id.
    pub id: u32,
    /// Path to stat.
    pub path: String,
}

/// `SSH_FXP_RENAME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    /// Request id.
    pub id: u32,
    /// Existing path.
    pub oldpath: String,
    /// Destination path.
    pub newpath: String,
}

/// `SSH_FXP_READLINK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLink {
    /// Request id.
    pub id: u32,
    /// Symlink path to read.
    pub path: String,
}

/// `SSH_FXP_SYMLINK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symlink {
    /// Request id.
    pub id: u32,
    /// Path of the link to create.
    pub linkpath: String,
    /// Target the link points at.
    pub targetpath: String,
}

/// `SSH_FXP_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Request id this responds to.
    pub id: u32,
    /// Status code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// RFC 3066 language tag (usually empty).
    pub language: String,
}

impl Status {
    /// Build an `Ok` status with an empty message, the common success case.
    pub fn ok(id: u32) -> Self {
        Self {
            id,
            code: StatusCode::Ok.into(),
            message: String::new(),
            language: String::new(),
        }
    }

    /// Build a status from a [`StatusCode`] and message.
    pub fn new(id: u32, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            message: message.into(),
            language: String::new(),
        }
    }
}

/// `SSH_FXP_HANDLE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    /// Request id this responds to.
    pub id: u32,
    /// Opaque handle string, at most 256 bytes.
    pub handle: Vec<u8>,
}

/// `SSH_FXP_DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    /// Request id this responds to.
    pub id: u32,
    /// Data read from the file.
    pub data: Bytes,
}

/// `SSH_FXP_NAME`.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    /// Request id this responds to.
    pub id: u32,
    /// Directory entries (or, for `REALPATH`, exactly one entry).
    pub entries: Vec<NameEntry>,
}

/// `SSH_FXP_ATTRS`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attrs {
    /// Request id this responds to.
    pub id: u32,
    /// Attributes.
    pub attrs: FileAttrs,
}

/// `SSH_FXP_EXTENDED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extended {
    /// Request id.
    pub id: u32,
    /// Extension name, e.g. `"fsync@openssh.com"`.
    pub request: String,
    /// Extension-specific payload.
    pub data: Vec<u8>,
}

/// `SSH_FXP_EXTENDED_REPLY`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedReply {
    /// Request id this responds to.
    pub id: u32,
    /// Extension-specific payload.
    pub data: Vec<u8>,
}

impl Packet {
    /// The request id carried by this packet, if any (`Init`/`Version` have none).
    pub fn id(&self) -> Option<u32> {
        match self {
            Packet::Init(_) | Packet::Version(_) => None,
            Packet::Open(p) => Some(p.id),
            Packet::Close(p) => Some(p.id),
            Packet::Read(p) => Some(p.id),
            Packet::Write(p) => Some(p.id),
            Packet::Lstat(p) => Some(p.id),
            Packet::Fstat(p) => Some(p.id),
            Packet::Setstat(p) => Some(p.id),
            Packet::Fsetstat(p) => Some(p.id),
            Packet::Opendir(p) => Some(p.id),
            Packet::Readdir(p) => Some(p.id),
            Packet::Remove(p) => Some(p.id),
            Packet::Mkdir(p) => Some(p.id),
            Packet::Rmdir(p) => Some(p.id),
            Packet::Realpath(p) => Some(p.id),
            Packet::Stat(p) => Some(p.id),
            Packet::Rename(p) => Some(p.id),
            Packet::Readlink(p) => Some(p.id),
            Packet::Symlink(p) => Some(p.id),
            Packet::Status(p) => Some(p.id),
            Packet::Handle(p) => Some(p.id),
            Packet::Data(p) => Some(p.id),
            Packet::Name(p) => Some(p.id),
            Packet::Attrs(p) => Some(p.id),
            Packet::Extended(p) => Some(p.id),
            Packet::ExtendedReply(p) => Some(p.id),
        }
    }

    /// The wire opcode for this packet.
    pub fn message_type(&self) -> MessageType {
        match self {
            Packet::Init(_) => MessageType::Init,
            Packet::Version(_) => MessageType::Version,
            Packet::Open(_) => MessageType::Open,
            Packet::Close(_) => MessageType::Close,
            Packet::Read(_) => MessageType::Read,
            Packet::Write(_) => MessageType::Write,
            Packet::Lstat(_) => MessageType::Lstat,
            Packet::Fstat(_) => MessageType::Fstat,
            Packet::Setstat(_) => MessageType::Setstat,
            Packet::Fsetstat(_) => MessageType::Fsetstat,
            Packet::Opendir(_) => MessageType::Opendir,
            Packet::Readdir(_) => MessageType::Readdir,
            Packet::Remove(_) => MessageType::Remove,
            Packet::Mkdir(_) => MessageType::Mkdir,
            Packet::Rmdir(_) => MessageType::Rmdir,
            Packet::Realpath(_) => MessageType::Realpath,
            Packet::Stat(_) => MessageType::Stat,
            Packet::Rename(_) => MessageType::Rename,
            Packet::Readlink(_) => MessageType::Readlink,
            Packet::Symlink(_) => MessageType::Symlink,
            Packet::Status(_) => MessageType::Status,
            Packet::Handle(_) => MessageType::Handle,
            Packet::Data(_) => MessageType::Data,
            Packet::Name(_) => MessageType::Name,
            Packet::Attrs(_) => MessageType::Attrs,
            Packet::Extended(_) => MessageType::Extended,
            Packet::ExtendedReply(_) => MessageType::ExtendedReply,
        }
    }

    /// Encode this packet into the wire form the framer writes: `u32
    /// length | u8 type | [u32 id] | body`. `length` covers everything
    /// after itself.
    pub fn encode(&self) -> BytesMut {
        codec::with_length_prefix(|buf| {
            buf.put_u8(self.message_type() as u8);
            if let Some(id) = self.id() {
                buf.put_u32(id);
            }
            self.encode_body(buf);
        })
    }

    /// Encode into `(header, payload)` per the marshaling contract: the
    /// header carries everything up to and including the final
    /// variable-length field's `u32` length prefix, and `payload` is that
    /// field's bytes, returned by reference so the framer can write a
    /// large `WRITE`/`DATA` body without copying it into the header
    /// buffer first.
    pub fn encode_split(&self) -> (BytesMut, Option<Bytes>) {
        match self {
            Packet::Write(p) => {
                let mut header = BytesMut::with_capacity(21 + p.handle.len());
                header.put_u32(0); // placeholder
                header.put_u8(MessageType::Write as u8);
                header.put_u32(p.id);
                codec::put_bytes(&mut header, &p.handle);
                header.put_u64(p.offset);
                header.put_u32(p.data.len() as u32);
                let len = (header.len() - 4 + p.data.len()) as u32;
                header[0..4].copy_from_slice(&len.to_be_bytes());
                (header, Some(p.data.clone()))
            }
            Packet::Data(p) => {
                let mut header = BytesMut::with_capacity(13);
                header.put_u32(0); // placeholder
                header.put_u8(MessageType::Data as u8);
                header.put_u32(p.id);
                header.put_u32(p.data.len() as u32);
                let len = (header.len() - 4 + p.data.len()) as u32;
                header[0..4].copy_from_slice(&len.to_be_bytes());
                (header, Some(p.data.clone()))
            }
            other => (other.encode(), None),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Packet::Init(p) => buf.put_u32(p.version),
            Packet::Version(p) => {
                buf.put_u32(p.version);
                for (name, data) in &p.extensions {
                    codec::put_string(buf, name);
                    codec::put_string(buf, data);
                }
            }
            Packet::Open(p) => {
                codec::put_string(buf, &p.filename);
                buf.put_u32(p.pflags.0);
                p.attrs.encode(buf);
            }
            Packet::Close(p) => codec::put_bytes(buf, &p.handle),
            Packet::Read(p) => {
                codec::put_bytes(buf, &p.handle);
                buf.put_u64(p.offset);
                buf.put_u32(p.len);
            }
            Packet::Write(p) => {
                codec::put_bytes(buf, &p.handle);
                buf.put_u64(p.offset);
                codec::put_bytes(buf, &p.data);
            }
            Packet::Lstat(p) => codec::put_string(buf, &p.path),
            Packet::Fstat(p) => codec::put_bytes(buf, &p.handle),
            Packet::Setstat(p) => {
                codec::put_string(buf, &p.path);
                p.attrs.encode(buf);
            }
            Packet::Fsetstat(p) => {
                codec::put_bytes(buf, &p.handle);
                p.attrs.encode(buf);
            }
            Packet::Opendir(p) => codec::put_string(buf, &p.path),
            Packet::Readdir(p) => codec::put_bytes(buf, &p.handle),
            Packet::Remove(p) => codec::put_string(buf, &p.filename),
            Packet::Mkdir(p) => {
                codec::put_string(buf, &p.path);
                p.attrs.encode(buf);
            }
            Packet::Rmdir(p) => codec::put_string(buf, &p.path),
            Packet::Realpath(p) => codec::put_string(buf, &p.path),
            Packet::Stat(p) => codec::put_string(buf, &p.path),
            Packet::Rename(p) => {
                codec::put_string(buf, &p.oldpath);
                codec::put_string(buf, &p.newpath);
            }
            Packet::Readlink(p) => codec::put_string(buf, &p.path),
            Packet::Symlink(p) => {
                codec::put_string(buf, &p.linkpath);
                codec::put_string(buf, &p.targetpath);
            }
            Packet::Status(p) => {
                buf.put_u32(p.code);
                codec::put_string(buf, &p.message);
                codec::put_string(buf, &p.language);
            }
            Packet::Handle(p) => codec::put_bytes(buf, &p.handle),
            Packet::Data(p) => codec::put_bytes(buf, &p.data),
            Packet::Name(p) => {
                buf.put_u32(p.entries.len() as u32);
                for entry in &p.entries {
                    codec::put_string(buf, &entry.filename);
                    codec::put_string(buf, &entry.longname);
                    entry.attrs.encode(buf);
                }
            }
            Packet::Attrs(p) => p.attrs.encode(buf),
            Packet::Extended(p) => {
                codec::put_string(buf, &p.request);
                buf.put_slice(&p.data);
            }
            Packet::ExtendedReply(p) => buf.put_slice(&p.data),
        }
    }

    /// Decode a packet body as delivered by the framer: `u8 type | [u32
    /// id] | body`, with the outer length prefix already stripped.
    pub fn decode(mut body: &[u8]) -> Result<Packet> {
        let msg_type = MessageType::try_from(codec::get_u8(&mut body)?)?;

        if matches!(msg_type, MessageType::Init) {
            let version = codec::get_u32(&mut body)?;
            return Ok(Packet::Init(Init { version }));
        }
        if matches!(msg_type, MessageType::Version) {
            let version = codec::get_u32(&mut body)?;
            let mut extensions = Vec::new();
            while !body.is_empty() {
                let name = codec::get_string(&mut body)?;
                let data = codec::get_string(&mut body)?;
                extensions.push((name, data));
            }
            return Ok(Packet::Version(Version { version, extensions }));
        }

        let id = codec::get_u32(&mut body)?;
        Ok(match msg_type {
            MessageType::Open => Packet::Open(Open {
                id,
                filename: codec::get_string(&mut body)?,
                pflags: OpenFlags(codec::get_u32(&mut body)?),
                attrs: FileAttrs::decode(&mut body)?,
            }),
            MessageType::Close => Packet::Close(Close {
                id,
                handle: codec::get_bytes(&mut body)?,
            }),
            MessageType::Read => Packet::Read(Read {
                id,
                handle: codec::get_bytes(&mut body)?,
                offset: codec::get_u64(&mut body)?,
                len: codec::get_u32(&mut body)?,
            }),
            MessageType::Write => Packet::Write(Write {
                id,
                handle: codec::get_bytes(&mut body)?,
                offset: codec::get_u64(&mut body)?,
                data: Bytes::from(codec::get_bytes(&mut body)?),
            }),
            MessageType::Lstat => Packet::Lstat(Lstat {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Fstat => Packet::Fstat(Fstat {
                id,
                handle: codec::get_bytes(&mut body)?,
            }),
            MessageType::Setstat => Packet::Setstat(SetStat {
                id,
                path: codec::get_string(&mut body)?,
                attrs: FileAttrs::decode(&mut body)?,
            }),
            MessageType::Fsetstat => Packet::Fsetstat(FSetStat {
                id,
                handle: codec::get_bytes(&mut body)?,
                attrs: FileAttrs::decode(&mut body)?,
            }),
            MessageType::Opendir => Packet::Opendir(OpenDir {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Readdir => Packet::Readdir(ReadDir {
                id,
                handle: codec::get_bytes(&mut body)?,
            }),
            MessageType::Remove => Packet::Remove(Remove {
                id,
                filename: codec::get_string(&mut body)?,
            }),
            MessageType::Mkdir => Packet::Mkdir(MkDir {
                id,
                path: codec::get_string(&mut body)?,
                attrs: FileAttrs::decode(&mut body)?,
            }),
            MessageType::Rmdir => Packet::Rmdir(RmDir {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Realpath => Packet::Realpath(RealPath {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Stat => Packet::Stat(Stat {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Rename => Packet::Rename(Rename {
                id,
                oldpath: codec::get_string(&mut body)?,
                newpath: codec::get_string(&mut body)?,
            }),
            MessageType::Readlink => Packet::Readlink(ReadLink {
                id,
                path: codec::get_string(&mut body)?,
            }),
            MessageType::Symlink => Packet::Symlink(Symlink {
                id,
                linkpath: codec::get_string(&mut body)?,
                targetpath: codec::get_string(&mut body)?,
            }),
            MessageType::Status => Packet::Status(Status {
                id,
                code: codec::get_u32(&mut body)?,
                message: codec::get_string(&mut body)?,
                language: codec::get_string(&mut body)?,
            }),
            MessageType::Handle => Packet::Handle(Handle {
                id,
                handle: codec::get_bytes(&mut body)?,
            }),
            MessageType::Data => Packet::Data(Data {
                id,
                data: Bytes::from(codec::get_bytes(&mut body)?),
            }),
            MessageType::Name => {
                let count = codec::get_u32(&mut body)? as usize;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(NameEntry {
                        filename: codec::get_string(&mut body)?,
                        longname: codec::get_string(&mut body)?,
                        attrs: FileAttrs::decode(&mut body)?,
                    });
                }
                Packet::Name(Name { id, entries })
            }
            MessageType::Attrs => Packet::Attrs(Attrs {
                id,
                attrs: FileAttrs::decode(&mut body)?,
            }),
            MessageType::Extended => Packet::Extended(Extended {
                id,
                request: codec::get_string(&mut body)?,
                data: body.to_vec(),
            }),
            MessageType::ExtendedReply => Packet::ExtendedReply(ExtendedReply {
                id,
                data: body.to_vec(),
            }),
            MessageType::Init | MessageType::Version => {
                return Err(Error::Protocol(format!(
                    "{msg_type:?} carries no request id, decoded above"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(packet: Packet) {
        let encoded = packet.encode();
        // Strip the outer length prefix the way the framer would have already done.
        let body = &encoded[4..];
        let decoded = Packet::decode(body).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn init_round_trips_without_id() {
        round_trip(Packet::Init(Init { version: 3 }));
    }

    #[test]
    fn version_round_trips_with_extensions() {
        round_trip(Packet::Version(Version {
            version: 3,
            extensions: vec![("posix-rename@openssh.com".into(), "1".into())],
        }));
    }

    #[test]
    fn open_round_trips() {
        round_trip(Packet::Open(Open {
            id: 7,
            filename: "/x".into(),
            pflags: OpenFlags(OpenFlags::READ),
            attrs: FileAttrs::default(),
        }));
    }

    #[test]
    fn write_round_trips_binary_payload() {
        round_trip(Packet::Write(Write {
            id: 9,
            handle: b"12".to_vec(),
            offset: 4096,
            data: Bytes::from_static(&[0u8, 255, 1, 2, 3]),
        }));
    }

    #[test]
    fn name_round_trips_multiple_entries() {
        round_trip(Packet::Name(Name {
            id: 1,
            entries: vec![
                NameEntry {
                    filename: "a".into(),
                    longname: "-rw-r--r-- 1 a".into(),
                    attrs: FileAttrs::with_size(1),
                },
                NameEntry {
                    filename: "b".into(),
                    longname: "drwxr-xr-x 1 b".into(),
                    attrs: FileAttrs::default(),
                },
            ],
        }));
    }

    #[test]
    fn status_round_trips() {
        round_trip(Packet::Status(Status::new(3, StatusCode::Eof, "EOF")));
    }

    #[test]
    fn extended_round_trips_opaque_payload() {
        round_trip(Packet::Extended(Extended {
            id: 5,
            request: "statvfs@openssh.com".into(),
            data: b"/mnt".to_vec(),
        }));
    }

    #[test]
    fn decode_of_byte_truncated_valid_packet_is_short_packet_error() {
        let encoded = Packet::Read(Read {
            id: 1,
            handle: b"1".to_vec(),
            offset: 0,
            len: 64,
        })
        .encode();
        let body = &encoded[4..encoded.len() - 1];
        assert!(Packet::decode(body).is_err());
    }

    #[test]
    fn unknown_message_type_is_protocol_error() {
        let body = [250u8, 0, 0, 0, 1];
        assert!(Packet::decode(&body).is_err());
    }
}
