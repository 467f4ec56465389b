//! Error types for SFTP operations.

use thiserror::Error;

use crate::protocol::packet::StatusCode;

/// Result type alias for SFTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP error types.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error from the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Packet framing or codec failure (short packet, bad UTF-8, unknown opcode).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A well-formed `STATUS` response carrying a non-OK code.
    ///
    /// This is the typed status error callers match against via
    /// [`Error::kind`].
    #[error("{code:?}: {message}")]
    Status {
        /// Wire status code.
        code: StatusCode,
        /// Human-readable message from the server.
        message: String,
    },

    /// Invalid path (chroot escape, malformed UTF-8 path component).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error (bad tunable, missing file).
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection was lost or the server/client refused to continue.
    ///
    /// Terminal for the session: every in-flight call is broadcast this
    /// error exactly once.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A request's handle was unknown or already closed.
    #[error("invalid handle")]
    InvalidHandle,

    /// A call did not complete within its configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The caller's cancellation token fired while the call was still
    /// in flight. The request may or may not have been applied by the
    /// peer; any eventual reply is drained and dropped.
    #[error("operation cancelled")]
    Cancelled,

    /// A pipelined bulk transfer ended after only part of the data
    /// crossed: `written` is how many bytes reached the destination
    /// (sink, for `write_to`) in contiguous offset order before `source`
    /// ended the transfer.
    #[error("transfer failed after {written} bytes: {source}")]
    Partial {
        /// Bytes that made it across before the failure.
        written: u64,
        /// The error that ended the transfer.
        source: Box<Error>,
    },

    /// Generic error, used sparingly for conditions with no dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Status`] from wire parts.
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Error::Status {
            code,
            message: message.into(),
        }
    }

    /// The wire status code this error corresponds to, if any.
    ///
    /// `ConnectionLost` and `InvalidHandle` map onto their SFTP status
    /// equivalents even though they are not constructed through
    /// [`Error::Status`], so callers can compare against a single kind.
    pub fn kind(&self) -> Option<StatusCode> {
        match self {
            Error::Status { code, .. } => Some(*code),
            Error::ConnectionLost(_) => Some(StatusCode::ConnectionLost),
            Error::InvalidHandle => Some(StatusCode::BadMessage),
            Error::Partial { source, .. } => source.kind(),
            _ => None,
        }
    }

    /// True if this error represents end-of-file reached during a read.
    pub fn is_eof(&self) -> bool {
        matches!(self.kind(), Some(StatusCode::Eof))
    }

    /// True if this error means the remote path does not exist.
    pub fn is_not_exist(&self) -> bool {
        matches!(self.kind(), Some(StatusCode::NoSuchFile))
    }

    /// True if this error means the operation was denied by the backend.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.kind(), Some(StatusCode::PermissionDenied))
    }

    /// Map a backend I/O error to the SFTP status it corresponds to, per
    /// the errno table in the error-handling design (`ENOENT` ->
    /// `NoSuchFile`, `EACCES`/`EPERM` -> `PermissionDenied`, `ENOTSUP` ->
    /// `OpUnsupported`, everything else -> `Failure`). The original error
    /// text is preserved as the status message.
    pub fn to_status_code(&self) -> StatusCode {
        if let Some(code) = self.kind() {
            return code;
        }
        if let Error::Io(io_err) = self {
            return match io_err.kind() {
                std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
                std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
                std::io::ErrorKind::Unsupported => StatusCode::OpUnsupported,
                _ => StatusCode::Failure,
            };
        }
        StatusCode::Failure
    }
}

/// Map an OS-level `io::Error` from a backend [`crate::server::handler::Handler`]
/// implementation onto the wire status code the server returns.
pub fn io_error_to_status(err: &std::io::Error) -> (StatusCode, String) {
    let code = match err.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        std::io::ErrorKind::Unsupported => StatusCode::OpUnsupported,
        _ => StatusCode::Failure,
    };
    (code, err.to_string())
}
