//! Tunables for the client request multiplexer and the server dispatch engine.
//!
//! Both configs load the same way the rest of this crate's ambient layer
//! does: `serde` + `toml`, with `#[serde(default = "fn")]` supplying the
//! documented defaults so a caller's config file only needs to name the
//! fields it wants to override.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_max_packet_length() -> u32 {
    32 * 1024 + 256
}

fn default_max_data_length() -> u32 {
    32 * 1024
}

fn default_max_inflight() -> usize {
    64
}

/// Client-side tunables (`spec.md` §6's configuration options).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cap on the length of any single wire packet, header included.
    /// Rejected below 1 byte.
    pub max_packet_length: u32,
    /// Payload cap for a single READ/WRITE request.
    pub max_data_length: u32,
    /// Concurrent pipelined requests per file operation.
    pub max_inflight: usize,
    /// Opt-in: issue concurrent WRITE requests from `File::write_all`-style
    /// bulk writes. Off by default because a failing request partway
    /// through leaves a hole at its offset rather than truncating cleanly.
    pub use_concurrent_writes: bool,
    /// Issue concurrent READ requests from bulk reads. On by default.
    pub use_concurrent_reads: bool,
    /// Prefer FSTAT over STAT when `WriteTo` needs the source size.
    pub use_fstat: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_packet_length: default_max_packet_length(),
            max_data_length: default_max_data_length(),
            max_inflight: default_max_inflight(),
            use_concurrent_writes: false,
            use_concurrent_reads: true,
            use_fstat: true,
        }
    }
}

impl ClientConfig {
    /// Validate the loaded tunables, rejecting combinations the
    /// multiplexer and transfer engine cannot honor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_packet_length` is zero, if
    /// `max_data_length` exceeds `max_packet_length`, or if `max_inflight`
    /// is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_length == 0 {
            return Err(Error::Config("max_packet_length must be at least 1".into()));
        }
        if self.max_data_length > self.max_packet_length {
            return Err(Error::Config(
                "max_data_length must not exceed max_packet_length".into(),
            ));
        }
        if self.max_inflight == 0 {
            return Err(Error::Config("max_inflight must be at least 1".into()));
        }
        Ok(())
    }
}

/// Server-side tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of worker tasks draining the command/read-write channels.
    /// `spec.md` §9 leaves this open; this crate defaults to 8.
    pub worker_count: usize,
    /// Maximum simultaneously open handles per session. `0` means unbounded.
    pub max_handles: usize,
    /// Cap on the length of any single wire packet, header included.
    pub max_packet_length: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            max_handles: 1024,
            max_packet_length: default_max_packet_length(),
        }
    }
}

impl ServerConfig {
    /// Validate the loaded tunables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `worker_count` is zero or
    /// `max_packet_length` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".into()));
        }
        if self.max_packet_length == 0 {
            return Err(Error::Config("max_packet_length must be at least 1".into()));
        }
        Ok(())
    }
}
