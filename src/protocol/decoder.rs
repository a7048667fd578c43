//! Incremental Frame Decoder
//!
//! Server replies arrive in arbitrary chunks. A text frame, an escape pair,
//! or a multi-byte UTF-8 sequence may be split across any chunk boundary, and
//! the type of the next frame is only known to the caller (it depends on the
//! exchange in progress). So the decoder never parses ahead: it keeps the
//! received chunks in order and extracts one value when asked.
//!
//! ## How Text Decoding Works
//!
//! Bytes are moved from the chunk queue into an accumulator until an
//! unescaped `0x00` is seen. Escape state and the accumulator live on the
//! decoder, not on the chunk, so an escape byte at the very end of one chunk
//! applies to the first byte of the next. Only a complete frame is decoded as
//! UTF-8, which keeps split multi-byte sequences intact.
//!
//! After the terminator the rest of the chunk goes back to the front of the
//! queue, so bytes of the following frame are never consumed early.

use crate::protocol::types::{ESCAPE, TERMINATOR};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::trace;

/// Default capacity of the text accumulator (64 KB)
pub const DEFAULT_TEXT_CAPACITY: usize = 0x10000;

/// Turns received chunks into text and byte values on demand.
///
/// # Example
///
/// ```
/// use basex_client::protocol::FrameDecoder;
/// use bytes::Bytes;
///
/// let mut decoder = FrameDecoder::new();
/// decoder.push(Bytes::from_static(b"h\xff"));
/// assert_eq!(decoder.try_read_string(), None);
///
/// decoder.push(Bytes::from_static(b"\x00i\x00\x07"));
/// assert_eq!(decoder.try_read_string().as_deref(), Some("h\0i"));
/// assert_eq!(decoder.try_read_byte(), Some(7));
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    /// Unconsumed chunks, oldest first. Never holds an empty chunk.
    chunks: VecDeque<Bytes>,
    /// Bytes of the text frame being assembled
    text: BytesMut,
    /// The previous byte was an escape
    escaped: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TEXT_CAPACITY)
    }

    /// Creates a decoder whose text accumulator starts at `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            text: BytesMut::with_capacity(capacity),
            escaped: false,
        }
    }

    /// Takes ownership of a newly received chunk.
    pub fn push(&mut self, chunk: Bytes) {
        if !chunk.is_empty() {
            trace!(bytes = chunk.len(), queued = self.chunks.len(), "Chunk queued");
            self.chunks.push_back(chunk);
        }
    }

    /// Pops the next byte, or `None` if nothing is buffered.
    pub fn try_read_byte(&mut self) -> Option<u8> {
        let front = self.chunks.front_mut()?;
        let byte = front[0];
        if front.len() > 1 {
            front.advance(1);
        } else {
            self.chunks.pop_front();
        }
        Some(byte)
    }

    /// Extracts the next text frame, or `None` if its terminator has not
    /// arrived yet.
    ///
    /// On `None` every buffered chunk has been consumed into the partial
    /// frame; the next call continues where this one stopped.
    pub fn try_read_string(&mut self) -> Option<String> {
        while let Some(mut chunk) = self.chunks.pop_front() {
            let mut end = None;

            for (i, &byte) in chunk.iter().enumerate() {
                if self.escaped {
                    self.text.extend_from_slice(&[byte]);
                    self.escaped = false;
                } else if byte == ESCAPE {
                    self.escaped = true;
                } else if byte == TERMINATOR {
                    end = Some(i + 1);
                    break;
                } else {
                    self.text.extend_from_slice(&[byte]);
                }
            }

            if let Some(consumed) = end {
                chunk.advance(consumed);
                if !chunk.is_empty() {
                    self.chunks.push_front(chunk);
                }
                let text = String::from_utf8_lossy(&self.text).into_owned();
                self.text.clear();
                return Some(text);
            }
        }

        None
    }

    /// Number of received bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Returns true if a text frame is partially assembled.
    pub fn is_mid_text(&self) -> bool {
        !self.text.is_empty() || self.escaped
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_split(bytes: &[u8], splits: &[usize]) -> Vec<String> {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        let mut start = 0;
        for &end in splits.iter().chain(std::iter::once(&bytes.len())) {
            decoder.push(Bytes::copy_from_slice(&bytes[start..end]));
            while let Some(s) = decoder.try_read_string() {
                out.push(s);
            }
            start = end;
        }
        out
    }

    #[test]
    fn test_simple_text() {
        let mut decoder = FrameDecoder::new();
        decoder.push(Bytes::from_static(b"hello\x00"));
        assert_eq!(decoder.try_read_string().as_deref(), Some("hello"));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_empty_text() {
        let mut decoder = FrameDecoder::new();
        decoder.push(Bytes::from_static(b"\x00"));
        assert_eq!(decoder.try_read_string().as_deref(), Some(""));
    }

    #[test]
    fn test_incomplete_text() {
        let mut decoder = FrameDecoder::new();
        decoder.push(Bytes::from_static(b"hel"));
        assert_eq!(decoder.try_read_string(), None);
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.is_mid_text());

        decoder.push(Bytes::from_static(b"lo\x00"));
        assert_eq!(decoder.try_read_string().as_deref(), Some("hello"));
        assert!(!decoder.is_mid_text());
    }

    #[test]
    fn test_escaped_terminator_split_after_escape() {
        // h, ESC | 0x00, i, 0x00
        let decoded = decode_split(b"h\xff\x00i\x00", &[2]);
        assert_eq!(decoded, vec!["h\0i".to_string()]);
    }

    #[test]
    fn test_escape_at_chunk_end_matches_single_chunk() {
        let bytes = b"a\xff\xffb\x00";
        let whole = decode_split(bytes, &[]);
        let split = decode_split(bytes, &[2]);
        assert_eq!(whole, split);
        // 0xFF alone is not valid UTF-8, it is replaced
        assert_eq!(whole, vec!["a\u{fffd}b".to_string()]);
    }

    #[test]
    fn test_every_split_point_decodes_identically() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice("grüße \u{1F600}".as_bytes());
        bytes.extend_from_slice(&[ESCAPE, 0x00, b'x', 0x00]);
        bytes.extend_from_slice("second".as_bytes());
        bytes.push(0x00);

        let expected = decode_split(&bytes, &[]);
        assert_eq!(expected.len(), 2);
        assert_eq!(expected[0], "grüße \u{1F600}\0x");

        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                assert_eq!(decode_split(&bytes, &[a, b]), expected, "splits at {} {}", a, b);
            }
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = "ünïcode\u{00}".as_bytes();
        let splits: Vec<usize> = (1..bytes.len()).collect();
        assert_eq!(decode_split(bytes, &splits), vec!["ünïcode".to_string()]);
    }

    #[test]
    fn test_leftover_bytes_stay_available() {
        let mut decoder = FrameDecoder::new();
        decoder.push(Bytes::from_static(b"id\x00\x01err"));
        assert_eq!(decoder.try_read_string().as_deref(), Some("id"));
        assert_eq!(decoder.try_read_byte(), Some(1));
        assert_eq!(decoder.buffered(), 3);
        assert_eq!(decoder.try_read_string(), None);

        decoder.push(Bytes::from_static(b"or\x00"));
        assert_eq!(decoder.try_read_string().as_deref(), Some("error"));
    }

    #[test]
    fn test_read_byte_across_chunks() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.try_read_byte(), None);

        decoder.push(Bytes::from_static(b"\x05"));
        decoder.push(Bytes::new());
        decoder.push(Bytes::from_static(b"\x00\xff"));
        assert_eq!(decoder.try_read_byte(), Some(5));
        assert_eq!(decoder.try_read_byte(), Some(0));
        assert_eq!(decoder.try_read_byte(), Some(0xff));
        assert_eq!(decoder.try_read_byte(), None);
    }

    #[test]
    fn test_byte_read_does_not_see_escapes() {
        let mut decoder = FrameDecoder::new();
        decoder.push(Bytes::from_static(b"\xff"));
        assert_eq!(decoder.try_read_byte(), Some(0xff));
        assert!(!decoder.is_mid_text());
    }
}
