//! # sftp
//!
//! A transport-agnostic SFTP v3 core: packet codec, client request
//! multiplexer, server dispatch engine, ordering manager, and page
//! allocator.
//!
//! This crate never dials, authenticates, or encrypts a connection — it
//! is driven over anything implementing `tokio::io::{AsyncRead,
//! AsyncWrite}`, whether that's a raw TCP stream, an in-memory
//! `tokio::io::duplex` pipe, or an SSH channel obtained from a transport
//! crate the caller owns.
//!
//! ## Layout
//!
//! - [`protocol`] — the wire format: buffer codec, attributes, the
//!   closed packet set, and the OpenSSH extension registry.
//! - [`page`] — a fixed-size buffer pool bounding per-connection memory.
//! - [`framer`] — length-prefixed frame read/write over any duplex stream.
//! - [`client`] — the request multiplexer, pipelined transfer engine, and
//!   high-level operation surface.
//! - [`server`] — the dispatch engine, ordering manager, handle table,
//!   back-end `Handler` contract, and chroot path sanitizer.
//! - [`config`] — client/server tunables, loaded via `serde` + `toml`.

pub mod client;
pub mod config;
pub mod error;
pub mod framer;
pub mod page;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientOptions};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use page::{Page, PageAllocator};
pub use protocol::{FileAttrs, MessageType, NameEntry, OpenFlags, Packet, StatusCode, SFTP_VERSION};
pub use server::{DirHandler, Dispatcher, FileHandler, Handler, HandleTable, OptionalExtensions};
