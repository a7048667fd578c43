//! BaseX Server Protocol
//!
//! Framing and encoding for the zero-terminated, escape-encoded protocol the
//! BaseX server speaks on its client port.
//!
//! ## Modules
//!
//! - `types`: wire constants, `Value`, `Arg` and the `Read` kinds
//! - `decoder`: incremental decoder for server replies
//! - `encoder`: single-buffer encoder for client requests
//!
//! ## Example
//!
//! ```
//! use basex_client::protocol::{encode, Arg, FrameDecoder};
//!
//! let frame = encode(&[Arg::text("xquery 1+1"), Arg::Byte(0)]);
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.push(frame);
//! assert_eq!(decoder.try_read_string().as_deref(), Some("xquery 1+1"));
//! assert_eq!(decoder.try_read_byte(), Some(0));
//! ```

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::FrameDecoder;
pub use encoder::{encode, encode_into, encoded_len};
pub use types::{command, Arg, Read, Reply, Value, ESCAPE, TERMINATOR};
