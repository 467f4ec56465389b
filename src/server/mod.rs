//! Server-side SFTP: the dispatch engine, ordering manager, handle table,
//! back-end handler contract, and chroot path sanitizer.
//!
//! [`Dispatcher::serve`] drives one connection end to end given a
//! [`handler::Handler`] implementation; nothing in this module owns a
//! listening socket or an SSH channel, matching the transport-agnostic
//! scope of the rest of this crate.

pub mod dispatch;
pub mod handler;
pub mod handles;
pub mod ordering;
pub mod sanitize;

pub use dispatch::Dispatcher;
pub use handler::{DirHandler, FileHandler, Handler, OptionalExtensions};
pub use handles::HandleTable;
pub use ordering::OrderingManager;
pub use sanitize::to_local;
