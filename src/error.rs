//! Error types for the client.
//!
//! Protocol failures (a non-zero status byte) are reported to the caller of
//! the operation and leave the session usable. Transport failures and a
//! rejected login are fatal: the session fails every outstanding operation
//! with the same error.

use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by sessions, queries and the connection driver.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The stream ended before the expected bytes arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected the login.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// A command or query execution returned a non-zero status.
    #[error("command failed: {info}")]
    CommandFailed { info: String },

    /// Binding an external variable returned a non-zero status.
    #[error("bind error for ${name}: {message}")]
    BindFailed { name: String, message: String },

    /// The server did not hand out a query ID.
    #[error("unexpected status {status} received from server when allocating query ID")]
    AllocationFailed { status: u8 },

    /// An outbound argument cannot be encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The query handle has no usable ID.
    #[error("query has no allocated ID")]
    NotAllocated,

    /// A reply did not have the shape its read list promised.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket failure in the connection driver.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl Error {
    /// Returns true if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed | Error::AuthenticationFailed | Error::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
