//! Client-side SFTP: the request multiplexer, pipelined transfer engine,
//! directory iteration, and the high-level operation surface built on
//! top of them.
//!
//! Nothing here owns a socket or an SSH channel — [`ops::Client::connect`]
//! takes any `AsyncRead + AsyncWrite` stream, matching the
//! transport-agnostic scope of the rest of this crate.

pub mod connection;
pub mod dir;
pub mod file;
pub mod ops;
pub mod options;

pub use connection::Connection;
pub use dir::DirHandle;
pub use file::File;
pub use ops::Client;
pub use options::ClientOptions;
