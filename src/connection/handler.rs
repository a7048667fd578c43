//! Connection Handler
//!
//! Drives one [`Session`] over an async byte stream. The handler task owns
//! the session outright; client handles talk to it through a channel of
//! operations, so the session itself needs no locking.
//!
//! ## Main Loop
//!
//! ```text
//! ┌─────────────────────────── select! ───────────────────────────┐
//! │                                                               │
//! │  socket readable ──> session.receive(bytes)                   │
//! │                                                               │
//! │  write buffer non-empty ──> write_buf ──> (empty) drained()   │
//! │                                                               │
//! │  operation from a Client ──> op(&mut session)                 │
//! │                                                               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop ends when the session fails, or when every client handle has
//! been dropped and no request is outstanding. Operations still in the
//! channel at that point are run against the failed session, which rejects
//! them with the error that ended it.

use crate::error::{Error, Result};
use crate::session::{Flow, Session, State, Transport};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Buffered bytes above which the session is told to hold back (64 KB)
pub const HIGH_WATER: usize = 64 * 1024;

/// Initial read buffer capacity
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// An operation run by the handler against its session.
pub(crate) type Operation = Box<dyn FnOnce(&mut Session<WriteBuffer>) + Send>;

/// Traffic counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total bytes received from the server
    pub bytes_read: AtomicU64,
    /// Total bytes sent to the server
    pub bytes_written: AtomicU64,
    /// Operations submitted by client handles
    pub operations: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn operation_submitted(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Session transport that collects frames for the socket writer.
#[derive(Debug)]
pub struct WriteBuffer {
    buffer: BytesMut,
    high_water: usize,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::with_high_water(HIGH_WATER)
    }

    pub fn with_high_water(high_water: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            high_water,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WriteBuffer {
    fn write(&mut self, frame: Bytes) -> Flow {
        self.buffer.extend_from_slice(&frame);
        if self.buffer.len() >= self.high_water {
            Flow::Blocked
        } else {
            Flow::Ready
        }
    }
}

/// Owns the stream halves and the session of one connection.
pub struct ConnectionHandler<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    read_buffer: BytesMut,
    session: Session<WriteBuffer>,
    operations: mpsc::UnboundedReceiver<Operation>,
    stats: Arc<ConnectionStats>,
    /// Published once the handler stops, for handles that outlive it
    failure: Arc<OnceLock<Error>>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(crate) fn new(
        stream: S,
        session: Session<WriteBuffer>,
        operations: mpsc::UnboundedReceiver<Operation>,
        stats: Arc<ConnectionStats>,
        failure: Arc<OnceLock<Error>>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader,
            writer,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            session,
            operations,
            stats,
            failure,
        }
    }

    /// Runs the connection until it fails or is no longer used.
    ///
    /// Returns the error that ended the session, or `Ok` after a clean
    /// shutdown.
    pub async fn run(mut self) -> Result<()> {
        self.session.connected();
        self.main_loop().await;

        let result = match self.session.failure() {
            Some(error) => Err(error.clone()),
            None => {
                let _ = self.writer.shutdown().await;
                info!("Connection closed, no client handles left");
                Ok(())
            }
        };

        let _ = self
            .failure
            .set(self.session.failure().cloned().unwrap_or(Error::ConnectionClosed));
        self.reject_remaining();
        result
    }

    async fn main_loop(&mut self) {
        let mut accepting = true;

        loop {
            if self.read_buffer.capacity() - self.read_buffer.len() < 1024 {
                self.read_buffer.reserve(READ_BUFFER_SIZE);
            }
            let flushing = !self.session.transport().is_empty();

            tokio::select! {
                read = self.reader.read_buf(&mut self.read_buffer) => match read {
                    Ok(0) => {
                        self.session.closed();
                        return;
                    }
                    Ok(n) => {
                        self.stats.bytes_read(n);
                        trace!(bytes = n, "Read data");
                        self.session.receive(self.read_buffer.split().freeze());
                    }
                    Err(e) => {
                        self.session.abort(e.into());
                        return;
                    }
                },

                written = self.writer.write_buf(&mut self.session.transport_mut().buffer), if flushing => {
                    match written {
                        Ok(0) => {
                            self.session.abort(std::io::Error::from(std::io::ErrorKind::WriteZero).into());
                            return;
                        }
                        Ok(n) => {
                            self.stats.bytes_written(n);
                            trace!(bytes = n, "Wrote data");
                        }
                        Err(e) => {
                            self.session.abort(e.into());
                            return;
                        }
                    }
                    if self.session.transport().is_empty() {
                        if let Err(e) = self.writer.flush().await {
                            self.session.abort(e.into());
                            return;
                        }
                        if self.session.is_blocked() {
                            debug!("Write buffer drained");
                            self.session.drained();
                        }
                    }
                },

                operation = self.operations.recv(), if accepting => match operation {
                    Some(operation) => operation(&mut self.session),
                    None => {
                        debug!("All client handles dropped");
                        accepting = false;
                    }
                },
            }

            if self.session.state() == State::Failed {
                return;
            }
            if !accepting && self.session.is_idle() && self.session.transport().is_empty() {
                return;
            }
        }
    }

    fn reject_remaining(&mut self) {
        self.operations.close();
        let mut rejected = 0;
        while let Ok(operation) = self.operations.try_recv() {
            operation(&mut self.session);
            rejected += 1;
        }
        if rejected > 0 {
            warn!(rejected, "Rejected operations after connection ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_buffer_reports_high_water() {
        let mut buffer = WriteBuffer::with_high_water(8);
        assert_eq!(buffer.write(Bytes::from_static(b"1234")), Flow::Ready);
        assert_eq!(buffer.write(Bytes::from_static(b"5678")), Flow::Blocked);
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_default_high_water() {
        let mut buffer = WriteBuffer::new();
        assert_eq!(buffer.write(Bytes::from(vec![b'x'; HIGH_WATER - 1])), Flow::Ready);
        assert_eq!(buffer.write(Bytes::from_static(b"x")), Flow::Blocked);
    }

    #[test]
    fn test_stats() {
        let stats = ConnectionStats::new();
        stats.bytes_read(10);
        stats.bytes_written(3);
        stats.bytes_written(4);
        stats.operation_submitted();
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 10);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 7);
        assert_eq!(stats.operations.load(Ordering::Relaxed), 1);
    }
}
