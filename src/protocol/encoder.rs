//! Message Encoder
//!
//! Outbound messages are written as one contiguous buffer: the total length
//! is computed first so the buffer is allocated once and handed to the
//! transport in a single write.

use crate::protocol::types::{Arg, TERMINATOR};
use bytes::{BufMut, Bytes, BytesMut};

/// Total wire length of `args`.
pub fn encoded_len(args: &[Arg]) -> usize {
    args.iter().map(Arg::encoded_len).sum()
}

/// Encodes `args` into a new frame buffer.
pub fn encode(args: &[Arg]) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(args));
    encode_into(args, &mut buf);
    buf.freeze()
}

/// Appends the encoding of `args` to `buf`.
pub fn encode_into(args: &[Arg], buf: &mut BytesMut) {
    buf.reserve(encoded_len(args));
    for arg in args {
        match arg {
            Arg::Text(s) => {
                buf.put_slice(s.as_bytes());
                buf.put_u8(TERMINATOR);
            }
            Arg::Byte(b) => buf.put_u8(*b),
        }
    }
}
