//! Prepared Queries
//!
//! [`Session::prepare`] returns a [`QueryHandle`] at once while the ID
//! allocation is still in flight. Operations on the handle made before the
//! ID is known are kept in a per-handle queue and run, in call order, the
//! moment the allocation reply arrives. If allocation fails, the first
//! operation on the handle receives the allocation error and the handle is
//! forgotten; every other operation is rejected with
//! [`Error::NotAllocated`].
//!
//! A handle's state is only released by [`Session::close`] or by reporting
//! its allocation failure.

use super::{callback, Callback, Session, Transport};
use crate::error::{Error, Result};
use crate::protocol::command;
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Client-side key of a prepared query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryHandle(u64);

impl QueryHandle {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// An external variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub value: String,
    /// XQuery type such as `xs:integer`; the server infers it when absent
    pub type_name: Option<String>,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            type_name: None,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

pub(crate) struct QueryState<T> {
    text: String,
    allocation: Allocation<T>,
}

enum Allocation<T> {
    /// Operations waiting for the ID
    Pending(Vec<Callback<T, String>>),
    Allocated(String),
    /// Allocation error not yet reported to an operation on the handle
    Failed(Error),
}

impl<T: Transport> Session<T> {
    /// Prepares `text` and returns its handle immediately.
    ///
    /// `allocated` receives the server ID, or the allocation error. The
    /// error is also handed to the first operation on the handle.
    pub fn prepare(
        &mut self,
        text: impl Into<String>,
        allocated: impl FnOnce(Result<String>) + Send + 'static,
    ) -> QueryHandle {
        let text = text.into();
        let handle = QueryHandle(self.next_query_handle);
        self.next_query_handle += 1;
        debug!(handle = handle.0, "Preparing query");

        self.queries.insert(
            handle,
            QueryState {
                text: text.clone(),
                allocation: Allocation::Pending(Vec::new()),
            },
        );
        self.allocate(
            text,
            callback(move |session: &mut Session<T>, id| session.allocated(handle, id, allocated)),
        );
        handle
    }

    /// The server ID, once allocated.
    pub fn query_id(&self, handle: QueryHandle) -> Option<&str> {
        match &self.queries.get(&handle)?.allocation {
            Allocation::Allocated(id) => Some(id),
            _ => None,
        }
    }

    /// Reports the server ID once allocated, in order with other operations
    /// on the handle.
    pub fn allocation(&mut self, handle: QueryHandle, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.with_query_id(handle, callback(move |_: &mut Session<T>, id| done(id)));
    }

    /// The query text the handle was prepared with.
    pub fn query_text(&self, handle: QueryHandle) -> Option<&str> {
        self.queries.get(&handle).map(|q| q.text.as_str())
    }

    /// Binds an external variable.
    pub fn bind(
        &mut self,
        handle: QueryHandle,
        binding: Binding,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        self.with_query_id(
            handle,
            callback(move |session: &mut Session<T>, id| match id {
                Ok(id) => session.bind_id(
                    id,
                    binding,
                    callback(move |_: &mut Session<T>, bound| done(bound)),
                ),
                Err(e) => done(Err(e)),
            }),
        );
    }

    /// Executes the query.
    pub fn execute(&mut self, handle: QueryHandle, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.execute_with(handle, Vec::new(), done);
    }

    /// Binds each of `bindings` in order, then executes.
    ///
    /// The first failed bind is reported and the query is not executed.
    pub fn execute_with(
        &mut self,
        handle: QueryHandle,
        bindings: Vec<Binding>,
        done: impl FnOnce(Result<String>) + Send + 'static,
    ) {
        self.with_query_id(
            handle,
            callback(move |session: &mut Session<T>, id| match id {
                Ok(id) => session.bind_then_execute(
                    id,
                    bindings.into(),
                    callback(move |_: &mut Session<T>, result| done(result)),
                ),
                Err(e) => done(Err(e)),
            }),
        );
    }

    /// Returns compilation and profiling info.
    pub fn info(&mut self, handle: QueryHandle, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.query_op(handle, command::INFO, done);
    }

    /// Returns the serialization options.
    pub fn options(&mut self, handle: QueryHandle, done: impl FnOnce(Result<String>) + Send + 'static) {
        self.query_op(handle, command::OPTIONS, done);
    }

    /// Closes the query on the server and forgets the handle.
    pub fn close(&mut self, handle: QueryHandle, done: impl FnOnce(Result<()>) + Send + 'static) {
        self.with_query_id(
            handle,
            callback(move |session: &mut Session<T>, id| match id {
                Ok(id) => session.query_command(
                    command::CLOSE,
                    id,
                    callback(move |session: &mut Session<T>, closed: Result<String>| {
                        if closed.is_ok() {
                            session.queries.remove(&handle);
                        }
                        done(closed.map(|_| ()));
                    }),
                ),
                Err(e) => done(Err(e)),
            }),
        );
    }

    fn query_op(
        &mut self,
        handle: QueryHandle,
        code: u8,
        done: impl FnOnce(Result<String>) + Send + 'static,
    ) {
        self.with_query_id(
            handle,
            callback(move |session: &mut Session<T>, id| match id {
                Ok(id) => session.query_command(
                    code,
                    id,
                    callback(move |_: &mut Session<T>, result| done(result)),
                ),
                Err(e) => done(Err(e)),
            }),
        );
    }

    /// Runs `op` with the query ID now, or once it has been allocated.
    fn with_query_id(&mut self, handle: QueryHandle, op: Callback<T, String>) {
        let failed = matches!(
            self.queries.get(&handle).map(|q| &q.allocation),
            Some(Allocation::Failed(_))
        );
        if failed {
            // reported once, then the handle is gone
            let error = match self.queries.remove(&handle).map(|q| q.allocation) {
                Some(Allocation::Failed(error)) => error,
                _ => Error::NotAllocated,
            };
            return op(self, Err(error));
        }

        let id = match self.queries.get_mut(&handle).map(|q| &mut q.allocation) {
            Some(Allocation::Pending(deferred)) => {
                trace!(handle = handle.0, waiting = deferred.len() + 1, "Deferring until allocated");
                deferred.push(op);
                return;
            }
            Some(Allocation::Allocated(id)) => Ok(id.clone()),
            _ => Err(self.failure.clone().unwrap_or(Error::NotAllocated)),
        };
        op(self, id);
    }

    fn allocated(
        &mut self,
        handle: QueryHandle,
        id: Result<String>,
        notify: impl FnOnce(Result<String>),
    ) {
        let query_id = match id {
            Ok(query_id) => query_id,
            Err(error) => return self.allocation_failed(handle, error, notify),
        };

        let deferred = match self.queries.get_mut(&handle) {
            Some(query) => match std::mem::replace(
                &mut query.allocation,
                Allocation::Allocated(query_id.clone()),
            ) {
                Allocation::Pending(deferred) => deferred,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        debug!(handle = handle.0, id = %query_id, deferred = deferred.len(), "Query ID allocated");
        notify(Ok(query_id.clone()));
        for op in deferred {
            op(self, Ok(query_id.clone()));
        }
    }

    fn allocation_failed(&mut self, handle: QueryHandle, error: Error, notify: impl FnOnce(Result<String>)) {
        warn!(handle = handle.0, error = %error, "Query ID allocation failed");
        let Some(mut query) = self.queries.remove(&handle) else {
            return notify(Err(error));
        };
        let deferred = match std::mem::replace(&mut query.allocation, Allocation::Failed(error.clone())) {
            Allocation::Pending(deferred) => deferred,
            _ => Vec::new(),
        };

        if error.is_fatal() {
            notify(Err(error.clone()));
            for op in deferred {
                op(self, Err(error.clone()));
            }
            return;
        }

        if let Some(observer) = self.observer.as_mut() {
            observer.on_error(&error);
        }
        notify(Err(error.clone()));

        let mut deferred = deferred.into_iter();
        match deferred.next() {
            Some(first) => first(self, Err(error)),
            // kept until an operation asks for it
            None => {
                self.queries.insert(handle, query);
            }
        }
        for op in deferred {
            op(self, Err(Error::NotAllocated));
        }
    }

    fn bind_then_execute(&mut self, id: String, mut bindings: VecDeque<Binding>, done: Callback<T, String>) {
        match bindings.pop_front() {
            None => self.query_command(command::EXECUTE, id, done),
            Some(binding) => {
                let next_id = id.clone();
                self.bind_id(
                    id,
                    binding,
                    callback(move |session: &mut Session<T>, bound| match bound {
                        Ok(()) => session.bind_then_execute(next_id, bindings, done),
                        Err(e) => done(session, Err(e)),
                    }),
                );
            }
        }
    }
}
