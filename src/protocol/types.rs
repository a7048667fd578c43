//! Wire Types
//!
//! The server protocol only knows two kinds of frames:
//!
//! - **Text**: raw UTF-8 bytes terminated by `0x00`. In server replies every
//!   literal `0x00` or `0xFF` inside the text is escaped as `0xFF <byte>`.
//! - **Byte**: exactly one unsigned byte, no framing.
//!
//! Requests are a sequence of arguments (text or byte) written back to back.
//! Prepared query requests start with one of the [`command`] codes.
//!
//! ## Examples
//!
//! Login reply `[status]`: `00`
//! Command reply `[result, info, status]`: `6f 6b 00 00 00` (`"ok"`, `""`, `0`)
//! Escaped text `"a\0b"`: `61 ff 00 62 00`

use crate::error::{Error, Result};
use std::fmt;

/// Ends a text frame when not escaped.
pub const TERMINATOR: u8 = 0x00;

/// Marks the next byte of a text frame as literal data.
pub const ESCAPE: u8 = 0xFF;

/// Leading byte of prepared query requests.
pub mod command {
    pub const QUERY: u8 = 0;
    pub const CLOSE: u8 = 2;
    pub const BIND: u8 = 3;
    pub const RESULTS: u8 = 4;
    pub const EXECUTE: u8 = 5;
    pub const INFO: u8 = 6;
    pub const OPTIONS: u8 = 7;
}

/// A decoded frame from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Byte(u8),
}

impl Value {
    /// Returns the byte if this is a byte frame.
    pub fn as_byte(&self) -> Option<u8> {
        match self {
            Value::Byte(b) => Some(*b),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "\"{}\"", s),
            Value::Byte(b) => write!(f, "(byte) {}", b),
        }
    }
}

/// One argument of an outbound message.
///
/// Text must not contain a literal `0x00`; the encoder does not escape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Text(String),
    Byte(u8),
}

impl Arg {
    /// Creates a text argument.
    pub fn text(s: impl Into<String>) -> Self {
        Arg::Text(s.into())
    }

    /// Creates a byte argument from a wider integer.
    ///
    /// Fails with [`Error::InvalidArgument`] outside `0..=255`.
    pub fn byte(n: i64) -> Result<Self> {
        u8::try_from(n).map(Arg::Byte).map_err(|_| {
            Error::InvalidArgument(format!(
                "numeric protocol argument {} out of range (needs to be between 0 and 255)",
                n
            ))
        })
    }

    /// Number of bytes this argument occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Arg::Text(s) => s.len() + 1,
            Arg::Byte(_) => 1,
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<u8> for Arg {
    fn from(b: u8) -> Self {
        Arg::Byte(b)
    }
}

impl TryFrom<i64> for Arg {
    type Error = Error;

    fn try_from(n: i64) -> Result<Self> {
        Arg::byte(n)
    }
}

/// What the next inbound frame is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    String,
    Byte,
}

/// Positional access to the values collected for one continuation.
#[derive(Debug)]
pub struct Reply {
    values: std::vec::IntoIter<Value>,
}

impl Reply {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
        }
    }

    /// Takes the next value as text.
    pub fn text(&mut self) -> Result<String> {
        match self.values.next() {
            Some(Value::Text(s)) => Ok(s),
            Some(other) => Err(Error::Protocol(format!("expected text, got {}", other))),
            None => Err(Error::Protocol("expected text, reply exhausted".to_string())),
        }
    }

    /// Takes the next value as a byte.
    pub fn byte(&mut self) -> Result<u8> {
        match self.values.next() {
            Some(value) => value
                .as_byte()
                .ok_or_else(|| Error::Protocol(format!("expected byte, got {}", value))),
            None => Err(Error::Protocol("expected byte, reply exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range() {
        assert_eq!(Arg::byte(0).unwrap(), Arg::Byte(0));
        assert_eq!(Arg::byte(255).unwrap(), Arg::Byte(255));
        assert!(matches!(Arg::byte(256), Err(Error::InvalidArgument(_))));
        assert!(matches!(Arg::try_from(-1i64), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_encoded_len_counts_utf8_bytes() {
        assert_eq!(Arg::text("äb").encoded_len(), 4);
        assert_eq!(Arg::Byte(7).encoded_len(), 1);
    }

    #[test]
    fn test_reply_shape() {
        let mut reply = Reply::new(vec![Value::Text("id".into()), Value::Byte(0)]);
        assert_eq!(reply.text().unwrap(), "id");
        assert!(matches!(reply.text(), Err(Error::Protocol(_))));
        assert!(matches!(reply.byte(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_reply_byte() {
        let mut reply = Reply::new(vec![Value::Byte(1), Value::Text("x".into())]);
        assert_eq!(reply.byte().unwrap(), 1);
        let err = reply.byte().unwrap_err();
        assert_eq!(err.to_string(), Error::Protocol("expected byte, got \"x\"".into()).to_string());
    }
}
