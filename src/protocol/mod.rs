//! SFTP v3 wire protocol: buffer codec, attributes, the packet set, and
//! the extension registry.
//!
//! This implements draft-ietf-secsh-filexfer-02 (the version-3 dialect)
//! plus the OpenSSH extension pairs this crate supports. The SSH
//! transport that carries these bytes is out of scope here — every type
//! in this module is plain data, agnostic to how it arrived.

pub mod attrs;
pub mod codec;
pub mod extensions;
pub mod packet;

pub use attrs::{ExtendedAttr, FileAttrs};
pub use packet::{MessageType, NameEntry, OpenFlags, Packet, StatusCode, SFTP_VERSION};
