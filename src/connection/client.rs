//! Async client handles.

use super::handler::{ConnectionHandler, ConnectionStats, Operation, WriteBuffer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{Binding, CommandOutput, QueryHandle, Session, SessionObserver};
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// Resolves the login wait once the session is ready or has failed.
struct ReadySignal(Option<oneshot::Sender<Result<()>>>);

impl SessionObserver for ReadySignal {
    fn on_ready(&mut self) {
        if let Some(ready) = self.0.take() {
            let _ = ready.send(Ok(()));
        }
    }

    fn on_error(&mut self, error: &Error) {
        match self.0.take() {
            Some(ready) => {
                let _ = ready.send(Err(error.clone()));
            }
            None if error.is_fatal() => error!(error = %error, "Session failed"),
            None => debug!(error = %error, "Request failed"),
        }
    }
}

/// Cloneable handle to a logged-in BaseX session.
///
/// Every clone feeds the same connection; operations are answered strictly
/// in the order they were submitted. The connection task ends when all
/// handles are dropped and nothing is outstanding.
#[derive(Clone)]
pub struct Client {
    operations: mpsc::UnboundedSender<Operation>,
    stats: Arc<ConnectionStats>,
    failure: Arc<OnceLock<Error>>,
}

impl Client {
    /// Connects to `config.address()` and logs in.
    pub async fn connect(config: &Config) -> Result<Self> {
        let address = config.address();
        debug!(address = %address, "Connecting");
        let stream = TcpStream::connect(&address).await?;
        stream.set_nodelay(true)?;
        Self::handshake(stream, config).await
    }

    /// Logs in over an already connected stream.
    pub async fn handshake<S>(stream: S, config: &Config) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let session = Session::new(config, WriteBuffer::new()).with_observer(ReadySignal(Some(ready_tx)));
        let (operations, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(ConnectionStats::new());
        let failure = Arc::new(OnceLock::new());

        let handler = ConnectionHandler::new(
            stream,
            session,
            receiver,
            Arc::clone(&stats),
            Arc::clone(&failure),
        );
        tokio::spawn(handler.run());

        ready_rx.await.unwrap_or(Err(Error::ConnectionClosed))?;
        Ok(Self {
            operations,
            stats,
            failure,
        })
    }

    /// Runs a plain command such as `open db` or `xquery 1+1`.
    pub async fn execute(&self, command: impl Into<String>) -> Result<CommandOutput> {
        let command = command.into();
        self.call(move |session, reply| {
            session.execute_command(command, move |output| {
                let _ = reply.send(output);
            })
        })
        .await
    }

    /// Prepares a query.
    ///
    /// Returns at once; operations on the query wait for its server ID.
    pub fn query(&self, text: impl Into<String>) -> Query {
        let text = text.into();
        let handle = Arc::new(OnceLock::new());
        let slot = Arc::clone(&handle);
        let query_text = text.clone();
        // a failed submit surfaces on the first operation
        let _ = self.submit(Box::new(move |session: &mut Session<WriteBuffer>| {
            let _ = slot.set(session.prepare(query_text, |_| {}));
        }));
        Query {
            client: self.clone(),
            handle,
            text: text.into(),
        }
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Returns true once the connection task has stopped.
    pub fn is_closed(&self) -> bool {
        self.operations.is_closed()
    }

    fn submit(&self, operation: Operation) -> Result<()> {
        self.stats.operation_submitted();
        self.operations.send(operation).map_err(|_| self.failure())
    }

    async fn call<R, F>(&self, operation: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session<WriteBuffer>, oneshot::Sender<Result<R>>) + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        self.submit(Box::new(move |session: &mut Session<WriteBuffer>| operation(session, reply)))?;
        response.await.unwrap_or_else(|_| Err(self.failure()))
    }

    fn failure(&self) -> Error {
        self.failure.get().cloned().unwrap_or(Error::ConnectionClosed)
    }
}

/// A prepared query.
///
/// Dropping a `Query` does not release it on the server, nor the session's
/// record of the handle; call [`Query::close`].
#[derive(Clone)]
pub struct Query {
    client: Client,
    handle: Arc<OnceLock<QueryHandle>>,
    text: Arc<str>,
}

impl Query {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Waits for the server-assigned ID.
    pub async fn id(&self) -> Result<String> {
        self.call(|session, handle, reply| {
            session.allocation(handle, move |id| {
                let _ = reply.send(id);
            })
        })
        .await
    }

    pub async fn bind(&self, binding: Binding) -> Result<()> {
        self.call(move |session, handle, reply| {
            session.bind(handle, binding, move |bound| {
                let _ = reply.send(bound);
            })
        })
        .await
    }

    pub async fn execute(&self) -> Result<String> {
        self.execute_with(Vec::new()).await
    }

    /// Binds `bindings` in order, then executes.
    pub async fn execute_with(&self, bindings: Vec<Binding>) -> Result<String> {
        self.call(move |session, handle, reply| {
            session.execute_with(handle, bindings, move |result| {
                let _ = reply.send(result);
            })
        })
        .await
    }

    pub async fn info(&self) -> Result<String> {
        self.call(|session, handle, reply| {
            session.info(handle, move |info| {
                let _ = reply.send(info);
            })
        })
        .await
    }

    pub async fn options(&self) -> Result<String> {
        self.call(|session, handle, reply| {
            session.options(handle, move |options| {
                let _ = reply.send(options);
            })
        })
        .await
    }

    /// Releases the query on the server.
    pub async fn close(&self) -> Result<()> {
        self.call(|session, handle, reply| {
            session.close(handle, move |closed| {
                let _ = reply.send(closed);
            })
        })
        .await
    }

    async fn call<R, F>(&self, operation: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Session<WriteBuffer>, QueryHandle, oneshot::Sender<Result<R>>) + Send + 'static,
    {
        let slot = Arc::clone(&self.handle);
        self.client
            .call(move |session, reply| match slot.get() {
                Some(&handle) => operation(session, handle, reply),
                None => {
                    let _ = reply.send(Err(Error::NotAllocated));
                }
            })
            .await
    }
}
