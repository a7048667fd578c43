//! Session State Machine
//!
//! A [`Session`] is the protocol engine for one connection. It is sans-IO:
//! received bytes are handed to [`Session::receive`], outbound frames leave
//! through a [`Transport`], and every operation reports back through a
//! callback once its reply has been decoded.
//!
//! ## Lifecycle
//!
//! ```text
//! Connecting ──connected()──> AwaitingHandshake ──nonce──> Authenticating
//!                                                              │
//!                                         status 0 ┌───────────┴──────────┐ status != 0
//!                                                  ▼                      ▼
//!                                                Ready                  Failed
//! ```
//!
//! Stream loss moves any state to `Failed`. A failed session resolves every
//! outstanding operation with the fatal error and sends nothing more.
//!
//! ## One Transaction At A Time
//!
//! Replies carry no request identifier, so a request is only written once the
//! previous transaction's reads (including a trailing error message) have all
//! been decoded. Requests made while busy, or before login completes, wait in
//! a FIFO queue.

pub mod pipeline;
pub mod query;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{command, encode, Arg, FrameDecoder, Read, Reply, Value};
use bytes::Bytes;
use md5::{Digest, Md5};
use pipeline::Pipeline;
use query::QueryState;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, trace, warn};

pub use query::{Binding, QueryHandle};

/// Outbound side of the byte stream.
pub trait Transport: Send + 'static {
    /// Accepts a complete frame.
    ///
    /// Returns [`Flow::Blocked`] when the stream would rather not take more
    /// data until it signals [`Session::drained`].
    fn write(&mut self, frame: Bytes) -> Flow;
}

/// Write readiness reported by a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Ready,
    Blocked,
}

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Connecting,
    AwaitingHandshake,
    Authenticating,
    Ready,
    Failed,
}

/// Receives session-wide notifications.
pub trait SessionObserver: Send {
    /// Login succeeded.
    fn on_ready(&mut self) {}

    /// A fatal error, or a failed query allocation.
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }
}

/// Result of a plain command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub result: String,
    pub info: String,
}

/// A continuation with access to the session.
pub(crate) type Callback<T, R> = Box<dyn FnOnce(&mut Session<T>, Result<R>) + Send>;

/// Continuation of a transaction, receiving the decoded reply values.
pub(crate) type Continuation<T> = Callback<T, Vec<Value>>;

pub(crate) fn callback<T, R, F>(f: F) -> Callback<T, R>
where
    F: FnOnce(&mut Session<T>, Result<R>) + Send + 'static,
{
    Box::new(f)
}

/// A request waiting for the session to become free.
struct Transaction<T> {
    args: Vec<Arg>,
    reads: &'static [Read],
    then: Continuation<T>,
}

/// Protocol engine for one connection.
pub struct Session<T> {
    transport: T,
    username: String,
    password: String,

    decoder: FrameDecoder,
    pipeline: Pipeline<Continuation<T>>,

    /// Requests not yet written, in call order
    pending: VecDeque<Transaction<T>>,
    /// Encoded frames held back while the transport is blocked
    outbound: VecDeque<Bytes>,
    blocked: bool,

    state: State,
    failure: Option<Error>,
    observer: Option<Box<dyn SessionObserver>>,

    pub(crate) queries: HashMap<QueryHandle, QueryState<T>>,
    pub(crate) next_query_handle: u64,
}

impl<T: Transport> Session<T> {
    /// Creates a session in the `Connecting` state.
    pub fn new(config: &Config, transport: T) -> Self {
        Self {
            transport,
            username: config.username.clone(),
            password: config.password.clone(),
            decoder: FrameDecoder::with_capacity(config.initial_buffer_capacity),
            pipeline: Pipeline::new(),
            pending: VecDeque::new(),
            outbound: VecDeque::new(),
            blocked: false,
            state: State::Connecting,
            failure: None,
            observer: None,
            queries: HashMap::new(),
            next_query_handle: 0,
        }
    }

    /// Installs an observer for login and fatal errors.
    pub fn with_observer(mut self, observer: impl SessionObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The error that ended the session, if any.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Returns true if no request is in flight or waiting.
    pub fn is_idle(&self) -> bool {
        self.pipeline.is_idle() && self.pending.is_empty()
    }

    /// Returns true while writes are held back.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The stream is open: wait for the server nonce.
    pub fn connected(&mut self) {
        if self.state != State::Connecting {
            return;
        }
        debug!("Connected, awaiting handshake");
        self.state = State::AwaitingHandshake;
        self.transaction(
            Vec::new(),
            &[Read::String],
            callback(|session: &mut Session<T>, reply| session.login(reply)),
        );
    }

    /// Feeds received bytes and runs every continuation they complete.
    pub fn receive(&mut self, chunk: Bytes) {
        if self.state == State::Failed {
            trace!(bytes = chunk.len(), "Ignoring bytes on failed session");
            return;
        }
        self.decoder.push(chunk);

        while let Some((then, args)) = self.pipeline.next_ready(&mut self.decoder) {
            then(self, Ok(args));
            if self.state == State::Failed {
                return;
            }
            self.dispatch_next();
        }
    }

    /// The transport can accept data again: flush held-back frames in order.
    pub fn drained(&mut self) {
        self.blocked = false;
        while let Some(frame) = self.outbound.pop_front() {
            if self.transport.write(frame) == Flow::Blocked {
                debug!(queued = self.outbound.len(), "Transport blocked during flush");
                self.blocked = true;
                break;
            }
        }
    }

    /// The stream ended.
    pub fn closed(&mut self) {
        if self.state != State::Failed {
            warn!("Connection closed by server");
            self.fail(Error::ConnectionClosed);
        }
    }

    /// The stream failed.
    pub fn abort(&mut self, error: Error) {
        if self.state != State::Failed {
            warn!(error = %error, "Connection aborted");
            self.fail(error);
        }
    }

    /// Runs a plain command, e.g. `open db` or `xquery 1+1`.
    pub fn execute_command(
        &mut self,
        command: impl Into<String>,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) {
        self.command(command.into(), callback(move |_: &mut Session<T>, output| done(output)));
    }

    /// Asks the server to allocate a query ID for `text`.
    pub fn prepare_query(
        &mut self,
        text: impl Into<String>,
        done: impl FnOnce(Result<String>) + Send + 'static,
    ) {
        self.allocate(text.into(), callback(move |_: &mut Session<T>, id| done(id)));
    }

    /// Binds an external variable of the query `id`.
    pub fn bind_variable(
        &mut self,
        id: impl Into<String>,
        binding: Binding,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.bind_id(id.into(), binding, callback(move |_: &mut Session<T>, bound| done(bound)));
    }

    /// Executes the query `id` and returns its serialized result.
    pub fn execute_query(
        &mut self,
        id: impl Into<String>,
        done: impl FnOnce(Result<String>) + Send + 'static,
    ) {
        self.query_command(
            command::EXECUTE,
            id.into(),
            callback(move |_: &mut Session<T>, result| done(result)),
        );
    }

    /// Returns the compilation and profiling info of the query `id`.
    pub fn query_info(&mut self, id: impl Into<String>, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.query_command(
            command::INFO,
            id.into(),
            callback(move |_: &mut Session<T>, info| done(info)),
        );
    }

    /// Returns the serialization options of the query `id`.
    pub fn query_options(&mut self, id: impl Into<String>, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.query_command(
            command::OPTIONS,
            id.into(),
            callback(move |_: &mut Session<T>, options| done(options)),
        );
    }

    /// Releases the query `id` on the server.
    pub fn close_query(&mut self, id: impl Into<String>, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.query_command(
            command::CLOSE,
            id.into(),
            callback(move |_: &mut Session<T>, closed: Result<String>| done(closed.map(|_| ()))),
        );
    }

    pub(crate) fn command(&mut self, command: String, done: Callback<T, CommandOutput>) {
        debug!(command = %command, "Executing command");
        self.submit(
            vec![Arg::Text(command)],
            &[Read::String, Read::String, Read::Byte],
            callback(move |session: &mut Session<T>, reply| {
                let output = reply.and_then(|values| {
                    let mut reply = Reply::new(values);
                    let result = reply.text()?;
                    let info = reply.text()?;
                    match reply.byte()? {
                        0 => Ok(CommandOutput { result, info }),
                        _ => Err(Error::CommandFailed { info }),
                    }
                });
                done(session, output);
            }),
        );
    }

    pub(crate) fn allocate(&mut self, text: String, done: Callback<T, String>) {
        self.submit(
            vec![Arg::Byte(command::QUERY), Arg::Text(text)],
            &[Read::String, Read::Byte],
            callback(move |session: &mut Session<T>, reply| {
                let id = reply.and_then(|values| {
                    let mut reply = Reply::new(values);
                    let id = reply.text()?;
                    match reply.byte()? {
                        0 => Ok(id),
                        status => Err(Error::AllocationFailed { status }),
                    }
                });
                done(session, id);
            }),
        );
    }

    pub(crate) fn bind_id(&mut self, id: String, binding: Binding, done: Callback<T, ()>) {
        let Binding {
            name,
            value,
            type_name,
        } = binding;
        trace!(id = %id, name = %name, "Binding variable");

        let args = vec![
            Arg::Byte(command::BIND),
            Arg::Text(id),
            Arg::Text(name.clone()),
            Arg::Text(value),
            Arg::Text(type_name.unwrap_or_default()),
        ];
        self.submit(
            args,
            &[Read::String, Read::Byte],
            callback(move |session: &mut Session<T>, reply| {
                let status = reply.and_then(|values| {
                    let mut reply = Reply::new(values);
                    reply.text()?;
                    reply.byte()
                });
                match status {
                    Ok(0) => done(session, Ok(())),
                    Ok(_) => session.read_error(callback(move |session: &mut Session<T>, reply| {
                        let error = match reply.and_then(|values| Reply::new(values).text()) {
                            Ok(message) => Error::BindFailed { name, message },
                            Err(e) => e,
                        };
                        done(session, Err(error));
                    })),
                    Err(e) => done(session, Err(e)),
                }
            }),
        );
    }

    /// Sends `[code, id]` and expects `[text, status]`, plus an error
    /// message on a non-zero status.
    pub(crate) fn query_command(&mut self, code: u8, id: String, done: Callback<T, String>) {
        trace!(code, id = %id, "Query command");
        self.submit(
            vec![Arg::Byte(code), Arg::Text(id)],
            &[Read::String, Read::Byte],
            callback(move |session: &mut Session<T>, reply| {
                let parsed = reply.and_then(|values| {
                    let mut reply = Reply::new(values);
                    Ok((reply.text()?, reply.byte()?))
                });
                match parsed {
                    Ok((result, 0)) => done(session, Ok(result)),
                    Ok(_) => session.read_error(callback(move |session: &mut Session<T>, reply| {
                        let error = match reply.and_then(|values| Reply::new(values).text()) {
                            Ok(info) => Error::CommandFailed { info },
                            Err(e) => e,
                        };
                        done(session, Err(error));
                    })),
                    Err(e) => done(session, Err(e)),
                }
            }),
        );
    }

    fn login(&mut self, reply: Result<Vec<Value>>) {
        // a fatal error has already been reported
        let Ok(values) = reply else { return };
        let nonce = match Reply::new(values).text() {
            Ok(nonce) => nonce,
            Err(e) => return self.fail(e),
        };

        debug!("Received nonce, authenticating");
        self.state = State::Authenticating;
        let digest = login_digest(&self.password, &nonce);
        let args = vec![Arg::Text(self.username.clone()), Arg::Text(digest)];
        self.transaction(
            args,
            &[Read::Byte],
            callback(|session: &mut Session<T>, reply| session.finish_login(reply)),
        );
    }

    fn finish_login(&mut self, reply: Result<Vec<Value>>) {
        let Ok(values) = reply else { return };
        match Reply::new(values).byte() {
            Ok(0) => {
                info!(user = %self.username, "Logged in");
                self.state = State::Ready;
                if let Some(observer) = self.observer.as_mut() {
                    observer.on_ready();
                }
            }
            Ok(status) => {
                warn!(user = %self.username, status, "Authentication failed");
                self.fail(Error::AuthenticationFailed);
            }
            Err(e) => self.fail(e),
        }
    }

    /// Writes now if the session is free and nothing is waiting, otherwise
    /// queues behind the waiting requests.
    fn submit(&mut self, args: Vec<Arg>, reads: &'static [Read], then: Continuation<T>) {
        match self.state {
            State::Failed => {
                let error = self.failure.clone().unwrap_or(Error::ConnectionClosed);
                then(self, Err(error));
            }
            State::Ready if self.pipeline.is_idle() && self.pending.is_empty() => {
                self.transaction(args, reads, then)
            }
            _ => {
                trace!(queued = self.pending.len() + 1, "Session busy, queueing request");
                self.pending.push_back(Transaction { args, reads, then });
            }
        }
    }

    /// Writes the next queued request once the previous one has completed.
    fn dispatch_next(&mut self) {
        if self.state != State::Ready || !self.pipeline.is_idle() {
            return;
        }
        if let Some(Transaction { args, reads, then }) = self.pending.pop_front() {
            self.transaction(args, reads, then);
        }
    }

    /// Registers the expected reads and writes the request.
    fn transaction(&mut self, args: Vec<Arg>, reads: &'static [Read], then: Continuation<T>) {
        self.pipeline.enqueue(reads, then);
        if !args.is_empty() {
            self.write_frame(encode(&args));
        }
    }

    /// Reads the error message that follows a failure status, ahead of
    /// anything else queued.
    fn read_error(&mut self, then: Continuation<T>) {
        self.pipeline.push_error_read(then);
    }

    fn write_frame(&mut self, frame: Bytes) {
        trace!(bytes = frame.len(), "Writing frame");
        if self.blocked {
            self.outbound.push_back(frame);
            return;
        }
        if self.transport.write(frame) == Flow::Blocked {
            debug!("Transport blocked, holding back further writes");
            self.blocked = true;
        }
    }

    fn fail(&mut self, error: Error) {
        self.state = State::Failed;
        self.failure = Some(error.clone());
        self.outbound.clear();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_error(&error);
        }

        // continuations may submit follow-up work, which fails immediately
        loop {
            let mut continuations = self.pipeline.take_continuations();
            continuations.extend(self.pending.drain(..).map(|tx| tx.then));
            if continuations.is_empty() {
                break;
            }
            for then in continuations {
                then(self, Err(error.clone()));
            }
        }
    }
}

/// Computes the login digest `md5(md5(password) + nonce)` as lowercase hex.
pub fn login_digest(password: &str, nonce: &str) -> String {
    let inner = format!("{:x}", Md5::digest(password.as_bytes()));
    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(nonce.as_bytes());
    format!("{:x}", hasher.finalize())
}
