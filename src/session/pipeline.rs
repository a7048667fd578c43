//! Action Pipeline
//!
//! Every transaction registers the frames it expects back, followed by the
//! continuation that consumes them. Actions are kept in one FIFO queue and
//! the front action alone decides how the next bytes are interpreted, so
//! response bytes are always attributed to the right transaction.
//!
//! ```text
//!  front                                               back
//!  ┌──────────┬──────────┬────────────┬──────────┬─────────────┐
//!  │ ReadText │ ReadByte │ Invoke(A)  │ ReadText │ Invoke(B)   │
//!  └──────────┴──────────┴────────────┴──────────┴─────────────┘
//! ```
//!
//! The pipeline is generic over the continuation type so it can be driven
//! without a session.

use crate::protocol::{FrameDecoder, Read, Value};
use std::collections::VecDeque;
use tracing::trace;

/// One pending step of the pipeline.
pub enum Action<K> {
    /// Decode one frame of the given kind into the argument list.
    Read(Read),
    /// Hand the collected arguments to a continuation.
    Invoke(K),
}

/// Ordered queue of pending reads and continuations.
pub struct Pipeline<K> {
    actions: VecDeque<Action<K>>,
    /// Values collected for the continuation at the front
    args: Vec<Value>,
}

impl<K> Pipeline<K> {
    pub fn new() -> Self {
        Self {
            actions: VecDeque::new(),
            args: Vec::new(),
        }
    }

    /// Appends the expected reads and then the continuation.
    pub fn enqueue(&mut self, reads: &[Read], then: K) {
        self.actions.extend(reads.iter().copied().map(Action::Read));
        self.actions.push_back(Action::Invoke(then));
    }

    /// Puts a text read and its continuation ahead of everything queued.
    ///
    /// The server sends an error message right after a failure status, before
    /// any reply to a later request.
    pub fn push_error_read(&mut self, then: K) {
        self.actions.push_front(Action::Invoke(then));
        self.actions.push_front(Action::Read(Read::String));
    }

    /// Decodes as far as the buffered bytes allow and returns the next
    /// continuation whose reads are all satisfied, with its arguments.
    ///
    /// Returns `None` when the front read is still waiting for bytes, or the
    /// queue is empty.
    pub fn next_ready(&mut self, decoder: &mut FrameDecoder) -> Option<(K, Vec<Value>)> {
        loop {
            let read = match self.actions.pop_front()? {
                Action::Invoke(then) => return Some((then, std::mem::take(&mut self.args))),
                Action::Read(read) => read,
            };

            let value = match read {
                Read::String => decoder.try_read_string().map(Value::Text),
                Read::Byte => decoder.try_read_byte().map(Value::Byte),
            };

            match value {
                Some(value) => {
                    trace!(%value, "Decoded frame");
                    self.args.push(value);
                }
                None => {
                    // stays at the front until more bytes arrive
                    self.actions.push_front(Action::Read(read));
                    return None;
                }
            }
        }
    }

    /// Removes every pending continuation, in queue order.
    ///
    /// Used when the session fails and nothing more will be decoded.
    pub fn take_continuations(&mut self) -> Vec<K> {
        self.args.clear();
        self.actions
            .drain(..)
            .filter_map(|action| match action {
                Action::Invoke(then) => Some(then),
                Action::Read(_) => None,
            })
            .collect()
    }

    /// Returns true if no transaction is waiting for replies.
    pub fn is_idle(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of queued actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<K> Default for Pipeline<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn drain(pipeline: &mut Pipeline<&'static str>, decoder: &mut FrameDecoder) -> Vec<(&'static str, Vec<Value>)> {
        let mut fired = Vec::new();
        while let Some(ready) = pipeline.next_ready(decoder) {
            fired.push(ready);
        }
        fired
    }

    #[test]
    fn test_transactions_fire_in_order() {
        let mut pipeline = Pipeline::new();
        let mut decoder = FrameDecoder::new();
        pipeline.enqueue(&[Read::String, Read::Byte], "a");
        pipeline.enqueue(&[Read::String], "b");

        assert!(drain(&mut pipeline, &mut decoder).is_empty());

        decoder.push(Bytes::from_static(b"one\x00\x00two\x00"));
        let fired = drain(&mut pipeline, &mut decoder);
        assert_eq!(
            fired,
            vec![
                ("a", vec![Value::Text("one".into()), Value::Byte(0)]),
                ("b", vec![Value::Text("two".into())]),
            ]
        );
        assert!(pipeline.is_idle());
    }

    #[test]
    fn test_stops_at_missing_bytes() {
        let mut pipeline = Pipeline::new();
        let mut decoder = FrameDecoder::new();
        pipeline.enqueue(&[Read::String, Read::Byte], "a");

        decoder.push(Bytes::from_static(b"resu"));
        assert!(drain(&mut pipeline, &mut decoder).is_empty());
        decoder.push(Bytes::from_static(b"lt\x00"));
        assert!(drain(&mut pipeline, &mut decoder).is_empty());
        assert_eq!(pipeline.len(), 2);

        decoder.push(Bytes::from_static(b"\x01"));
        let fired = drain(&mut pipeline, &mut decoder);
        assert_eq!(fired, vec![("a", vec![Value::Text("result".into()), Value::Byte(1)])]);
    }

    #[test]
    fn test_error_read_jumps_the_queue() {
        let mut pipeline = Pipeline::new();
        let mut decoder = FrameDecoder::new();
        pipeline.enqueue(&[Read::String, Read::Byte], "bind");
        pipeline.enqueue(&[Read::String, Read::Byte], "execute");

        decoder.push(Bytes::from_static(b"\x00\x01"));
        let (first, _) = pipeline.next_ready(&mut decoder).unwrap();
        assert_eq!(first, "bind");

        // the bind failed: its error message comes before the execute reply
        pipeline.push_error_read("bind error");
        decoder.push(Bytes::from_static(b"no such variable\x00out\x00\x00"));

        let fired = drain(&mut pipeline, &mut decoder);
        assert_eq!(
            fired,
            vec![
                ("bind error", vec![Value::Text("no such variable".into())]),
                ("execute", vec![Value::Text("out".into()), Value::Byte(0)]),
            ]
        );
    }

    #[test]
    fn test_take_continuations() {
        let mut pipeline = Pipeline::new();
        let mut decoder = FrameDecoder::new();
        pipeline.enqueue(&[Read::String], "a");
        pipeline.enqueue(&[Read::Byte], "b");
        decoder.push(Bytes::from_static(b"partial"));
        assert!(pipeline.next_ready(&mut decoder).is_none());

        assert_eq!(pipeline.take_continuations(), vec!["a", "b"]);
        assert!(pipeline.is_idle());
    }
}
