//! Request/response bookkeeping for one session.
//!
//! Allocates request ids, tracks pending requests by id, remembers
//! cancelled ids, and holds the notification and server-request handler
//! registries. It performs no I/O: [`Dispatcher::dispatch`] tells the
//! caller what to do with each incoming message.
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::LspError;
use crate::message::{Message, RequestId, ResponseError};

/// Cancelled ids remembered for discarding late responses; the oldest
/// are forgotten first.
pub const CANCELLED_ID_LIMIT: usize = 1024;

/// Callback for a server notification; receives the params.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback answering a server-to-client request.
pub type RequestHandler = Arc<dyn Fn(Value) -> Result<Value, ResponseError> + Send + Sync>;

/// The outcome delivered to a waiting request.
pub type Completion = Result<Value, LspError>;

/// What the receive loop has to do after a message was dispatched.
pub enum Dispatch {
    /// A pending request was resolved or rejected.
    Resolved(i64),
    /// A response nobody waits for any more (cancelled, or session closed).
    Discarded(RequestId),
    /// A notification and every handler registered for its method.
    Notify {
        /// The method name.
        method: String,
        /// The params.
        params: Value,
        /// Handlers in registration order; may be empty.
        handlers: Vec<NotificationHandler>,
    },
    /// A server-to-client request that needs an answer.
    Request {
        /// The id to answer with.
        id: RequestId,
        /// The method name.
        method: String,
        /// The params.
        params: Value,
        /// The registered handler, if any.
        handler: Option<RequestHandler>,
    },
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Resolved(id) => f.debug_tuple("Resolved").field(id).finish(),
            Dispatch::Discarded(id) => f.debug_tuple("Discarded").field(id).finish(),
            Dispatch::Notify {
                method, handlers, ..
            } => f
                .debug_struct("Notify")
                .field("method", method)
                .field("handlers", &handlers.len())
                .finish(),
            Dispatch::Request {
                id,
                method,
                handler,
                ..
            } => f
                .debug_struct("Request")
                .field("id", id)
                .field("method", method)
                .field("handled", &handler.is_some())
                .finish(),
        }
    }
}

/// Manages pending requests and handler registries.
pub struct Dispatcher {
    next_id: i64,
    pending: HashMap<i64, oneshot::Sender<Completion>>,
    cancelled: BTreeSet<i64>,
    notification_handlers: HashMap<String, Vec<NotificationHandler>>,
    request_handlers: HashMap<String, RequestHandler>,
    closed: bool,
    disconnected: bool,
}

impl Dispatcher {
    /// Create a new dispatcher. The first allocated id is 1.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            cancelled: BTreeSet::new(),
            notification_handlers: HashMap::new(),
            request_handlers: HashMap::new(),
            closed: false,
            disconnected: false,
        }
    }

    /// Allocate the next id and register a pending request for it.
    ///
    /// Ids are never reused for the lifetime of the dispatcher.
    pub fn register_request(
        &mut self,
    ) -> Result<(i64, oneshot::Receiver<Completion>), LspError> {
        if self.closed {
            return Err(LspError::SessionClosed);
        }
        if self.disconnected {
            return Err(LspError::TransportLost);
        }
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        Ok((id, rx))
    }

    /// Drop a pending entry without completing it.
    pub fn forget(&mut self, id: i64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// How many requests are pending.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether `id` is still waiting for its response.
    pub fn is_pending(&self, id: i64) -> bool {
        self.pending.contains_key(&id)
    }

    /// Whether [`Dispatcher::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a handler for a notification method.
    ///
    /// Several handlers may share a method; they run in registration order.
    pub fn on_notification(&mut self, method: impl Into<String>, handler: NotificationHandler) {
        self.notification_handlers
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Register the handler for a server-to-client request method,
    /// replacing any earlier one.
    pub fn on_request(&mut self, method: impl Into<String>, handler: RequestHandler) {
        self.request_handlers.insert(method.into(), handler);
    }

    /// Route an incoming message.
    ///
    /// A response for an id that is not pending (never sent, or already
    /// resolved) is a [`LspError::ProtocolViolation`]. Late responses for
    /// cancelled ids are [`Dispatch::Discarded`].
    pub fn dispatch(&mut self, message: Message) -> Result<Dispatch, LspError> {
        match message {
            Message::Response { id, result } => self.resolve(id, result),
            Message::Notification { method, params } => {
                let handlers = self
                    .notification_handlers
                    .get(&method)
                    .cloned()
                    .unwrap_or_default();
                Ok(Dispatch::Notify {
                    method,
                    params,
                    handlers,
                })
            }
            Message::Request { id, method, params } => {
                let handler = self.request_handlers.get(&method).cloned();
                Ok(Dispatch::Request {
                    id,
                    method,
                    params,
                    handler,
                })
            }
        }
    }

    fn resolve(
        &mut self,
        id: RequestId,
        result: Result<Value, ResponseError>,
    ) -> Result<Dispatch, LspError> {
        let RequestId::Number(num) = id else {
            if self.closed {
                return Ok(Dispatch::Discarded(id));
            }
            return Err(LspError::ProtocolViolation(format!(
                "response for unknown request id {id}"
            )));
        };

        if let Some(sender) = self.pending.remove(&num) {
            // The caller may have dropped its handle; that is fine.
            let _ = sender.send(result.map_err(LspError::from));
            return Ok(Dispatch::Resolved(num));
        }
        if self.cancelled.remove(&num) || self.closed {
            return Ok(Dispatch::Discarded(id));
        }
        Err(LspError::ProtocolViolation(format!(
            "response for unknown request id {num}"
        )))
    }

    /// Cancel a pending request: reject it with [`LspError::Cancelled`] and
    /// remember the id so a late response is discarded quietly.
    ///
    /// At most [`CANCELLED_ID_LIMIT`] ids are remembered. Returns `false` if
    /// the id was not pending.
    pub fn cancel(&mut self, id: i64) -> bool {
        match self.pending.remove(&id) {
            Some(sender) => {
                let _ = sender.send(Err(LspError::Cancelled));
                self.cancelled.insert(id);
                if self.cancelled.len() > CANCELLED_ID_LIMIT {
                    self.cancelled.pop_first();
                }
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with the error built by `make_err`.
    ///
    /// Returns how many requests were rejected.
    pub fn fail_all(&mut self, make_err: impl Fn() -> LspError) -> usize {
        let count = self.pending.len();
        for (_, sender) in self.pending.drain() {
            let _ = sender.send(Err(make_err()));
        }
        count
    }

    /// The connection is gone: reject every pending request with the error
    /// built by `make_err` and refuse new ones with
    /// [`LspError::TransportLost`].
    pub fn disconnect(&mut self, make_err: impl Fn() -> LspError) -> usize {
        self.disconnected = true;
        self.fail_all(make_err)
    }

    /// Reject everything with [`LspError::SessionClosed`] and refuse new
    /// requests. Later responses are discarded.
    pub fn close(&mut self) {
        self.fail_all(|| LspError::SessionClosed);
        self.cancelled.clear();
        self.closed = true;
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
