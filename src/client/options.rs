//! Client-side configuration surface (`spec.md` §6).
//!
//! Wraps [`ClientConfig`] with the one ambient addition the teacher's
//! stack already carries: a `tokio-util` cancellation token, threaded
//! through the pipelined transfer engine and the in-flight wait so a
//! caller can abort a bulk transfer without tearing down the connection.

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;

/// Tunables and cancellation handle passed to [`crate::client::ops::Client::connect`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Wire and pipelining tunables.
    pub config: ClientConfig,
    /// Cancels any in-flight call on the resulting connection — single
    /// round-trips and the pipelined bulk-transfer engine alike.
    pub cancellation: CancellationToken,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl ClientOptions {
    /// Start from the given config, default cancellation token.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Attach a cancellation token, e.g. one shared with a caller's shutdown signal.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_carry_default_config_and_a_live_token() {
        let opts = ClientOptions::default();
        assert_eq!(opts.config.max_inflight, ClientConfig::default().max_inflight);
        assert!(!opts.cancellation.is_cancelled());
    }
}
