//! The send path and receive loop around a [`Dispatcher`].
//!
//! Responses are resolved directly on the receive loop. Notifications and
//! server requests are queued, in arrival order, to a separate handler task
//! so a slow handler never holds up unrelated responses.
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, trace, warn};

use crate::dispatcher::{Completion, Dispatch, Dispatcher, NotificationHandler, RequestHandler};
use crate::error::LspError;
use crate::framer::{encode, FramingError};
use crate::message::{codes, Message, ResponseError};
use crate::transport::{FrameSender, ProcessExit, TransportEvent};

/// How long to wait for the matching half of "stdout closed" / "process
/// exited" once one of them has been seen.
const EXIT_LINGER: Duration = Duration::from_millis(200);

/// Why the receive loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEnd {
    /// EOF on the server's output.
    Closed,
    /// The server process exited.
    Exited(ProcessExit),
    /// The incoming stream could not be framed.
    FramingFailed(FramingError),
}

impl fmt::Display for ConnectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEnd::Closed => write!(f, "server closed its output"),
            ConnectionEnd::Exited(ProcessExit { code: Some(code) }) => {
                write!(f, "server exited with code {}", code)
            }
            ConnectionEnd::Exited(ProcessExit { code: None }) => {
                write!(f, "server was terminated by a signal")
            }
            ConnectionEnd::FramingFailed(err) => write!(f, "framing error: {}", err),
        }
    }
}

/// A live JSON-RPC connection: shared dispatcher plus the outgoing queue.
#[derive(Clone)]
pub struct Connection {
    dispatcher: Arc<Mutex<Dispatcher>>,
    sender: FrameSender,
}

impl Connection {
    /// Wrap a dispatcher and the transport's outgoing queue.
    pub fn new(dispatcher: Arc<Mutex<Dispatcher>>, sender: FrameSender) -> Self {
        Self { dispatcher, sender }
    }

    /// Start the receive loop and the handler task.
    ///
    /// `on_end` runs once, after every pending request has been rejected
    /// with [`LspError::TransportLost`], or with [`LspError::Framing`] when
    /// the stream could not be framed.
    pub fn listen<F>(
        &self,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        on_end: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(ConnectionEnd) + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_handlers(jobs_rx, self.sender.clone()));
        tokio::spawn(receive_loop(
            Arc::clone(&self.dispatcher),
            events,
            jobs_tx,
            self.sender.clone(),
            on_end,
        ))
    }

    /// Send a request and return a handle that resolves with its result.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
    ) -> Result<RequestHandle, LspError> {
        let (id, rx) = self.dispatcher.lock().await.register_request()?;
        trace!(id, method, "sending request");
        let bytes = encode(&Message::request(id, method, params));
        if let Err(err) = self.sender.send(bytes).await {
            self.dispatcher.lock().await.forget(id);
            return Err(err);
        }
        Ok(RequestHandle {
            id,
            rx,
            canceller: CancelHandle {
                id,
                connection: self.clone(),
            },
        })
    }

    /// Send a notification.
    pub async fn send_notification(&self, method: &str, params: Value) -> Result<(), LspError> {
        trace!(method, "sending notification");
        self.sender
            .send(encode(&Message::notification(method, params)))
            .await
    }

    /// Cancel a pending request and tell the server with `$/cancelRequest`.
    ///
    /// Returns `false` when `id` was not pending.
    pub async fn cancel(&self, id: i64) -> bool {
        if !self.dispatcher.lock().await.cancel(id) {
            return false;
        }
        debug!(id, "cancelled request");
        if let Err(err) = self
            .send_notification("$/cancelRequest", json!({ "id": id }))
            .await
        {
            debug!(id, "could not send $/cancelRequest: {}", err);
        }
        true
    }

    /// Register a notification handler.
    pub async fn on_notification(&self, method: &str, handler: NotificationHandler) {
        self.dispatcher.lock().await.on_notification(method, handler);
    }

    /// Register a server-request handler.
    pub async fn on_request(&self, method: &str, handler: RequestHandler) {
        self.dispatcher.lock().await.on_request(method, handler);
    }
}

/// A request in flight. Await it for the result.
pub struct RequestHandle {
    id: i64,
    rx: oneshot::Receiver<Completion>,
    canceller: CancelHandle,
}

impl RequestHandle {
    /// The request id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// A handle that can cancel this request from elsewhere.
    pub fn canceller(&self) -> CancelHandle {
        self.canceller.clone()
    }
}

impl Future for RequestHandle {
    type Output = Result<Value, LspError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|completion| completion.unwrap_or(Err(LspError::SessionClosed)))
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}

/// Cancels one request.
#[derive(Clone)]
pub struct CancelHandle {
    id: i64,
    connection: Connection,
}

impl CancelHandle {
    /// The id this handle cancels.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Cancel the request. Returns `false` if it already completed.
    pub async fn cancel(&self) -> bool {
        self.connection.cancel(self.id).await
    }
}

async fn receive_loop<F>(
    dispatcher: Arc<Mutex<Dispatcher>>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    jobs: mpsc::UnboundedSender<Dispatch>,
    sender: FrameSender,
    on_end: F,
) where
    F: FnOnce(ConnectionEnd),
{
    let mut closed = false;
    let mut exit = None;
    let mut deadline: Option<Instant> = None;

    let end = loop {
        let next = match deadline {
            Some(at) => timeout_at(at, events.recv()).await.unwrap_or(None),
            None => events.recv().await,
        };
        let Some(event) = next else {
            break exit.map_or(ConnectionEnd::Closed, ConnectionEnd::Exited);
        };
        match event {
            TransportEvent::Frame(value) => handle_frame(&dispatcher, value, &jobs, &sender).await,
            TransportEvent::FramingFailed(err) => break ConnectionEnd::FramingFailed(err),
            TransportEvent::Closed => {
                closed = true;
                if let Some(exit) = exit {
                    break ConnectionEnd::Exited(exit);
                }
                deadline.get_or_insert_with(|| Instant::now() + EXIT_LINGER);
            }
            TransportEvent::Exited(status) => {
                if closed {
                    break ConnectionEnd::Exited(status);
                }
                // Frames written just before exit may still be in the pipe.
                exit = Some(status);
                deadline.get_or_insert_with(|| Instant::now() + EXIT_LINGER);
            }
        }
    };

    let rejected = match &end {
        ConnectionEnd::FramingFailed(err) => dispatcher
            .lock()
            .await
            .disconnect(|| LspError::Framing(err.clone())),
        _ => dispatcher.lock().await.disconnect(|| LspError::TransportLost),
    };
    debug!(%end, rejected, "receive loop finished");
    on_end(end);
}

async fn handle_frame(
    dispatcher: &Mutex<Dispatcher>,
    value: Value,
    jobs: &mpsc::UnboundedSender<Dispatch>,
    sender: &FrameSender,
) {
    let message = match Message::from_value(value) {
        Ok(message) => message,
        Err(err) => {
            warn!("skipping malformed message: {}", err);
            return;
        }
    };
    let outcome = dispatcher.lock().await.dispatch(message);
    match outcome {
        Ok(Dispatch::Resolved(id)) => trace!(id, "request resolved"),
        Ok(Dispatch::Discarded(id)) => debug!(%id, "discarding response nobody waits for"),
        Ok(Dispatch::Notify {
            method, handlers, ..
        }) if handlers.is_empty() => {
            debug!(%method, "no handler for notification");
        }
        Ok(job) => {
            if let Err(mpsc::error::SendError(job)) = jobs.send(job) {
                answer_unqueued(job, sender).await;
            }
        }
        Err(err) => warn!("{}", err),
    }
}

/// The handler task is gone; server requests still get an answer.
async fn answer_unqueued(job: Dispatch, sender: &FrameSender) {
    match job {
        Dispatch::Request { id, method, .. } => {
            error!(%method, "handler task stopped, failing server request");
            let reply = Message::error_response(
                id,
                ResponseError::new(codes::INTERNAL_ERROR, "client handler task stopped"),
            );
            if sender.send(encode(&reply)).await.is_err() {
                debug!(%method, "transport gone, dropping reply");
            }
        }
        Dispatch::Notify { method, .. } => {
            error!(%method, "handler task stopped, dropping notification");
        }
        Dispatch::Resolved(_) | Dispatch::Discarded(_) => {}
    }
}

async fn run_handlers(mut jobs: mpsc::UnboundedReceiver<Dispatch>, sender: FrameSender) {
    while let Some(job) = jobs.recv().await {
        match job {
            Dispatch::Notify {
                method,
                params,
                handlers,
            } => {
                trace!(%method, handlers = handlers.len(), "running notification handlers");
                for handler in handlers {
                    let params = params.clone();
                    if catch_unwind(AssertUnwindSafe(|| handler(params))).is_err() {
                        error!(%method, "notification handler panicked");
                    }
                }
            }
            Dispatch::Request {
                id,
                method,
                params,
                handler,
            } => {
                let reply = match handler {
                    Some(handler) => match catch_unwind(AssertUnwindSafe(|| handler(params))) {
                        Ok(Ok(result)) => Message::response(id, result),
                        Ok(Err(error)) => Message::error_response(id, error),
                        Err(_) => {
                            error!(%method, "request handler panicked");
                            Message::error_response(
                                id,
                                ResponseError::new(
                                    codes::INTERNAL_ERROR,
                                    format!("handler for {method} panicked"),
                                ),
                            )
                        }
                    },
                    None => {
                        debug!(%method, "no handler for server request");
                        Message::error_response(id, ResponseError::method_not_found(&method))
                    }
                };
                if sender.send(encode(&reply)).await.is_err() {
                    debug!(%method, "transport gone, dropping reply");
                }
            }
            Dispatch::Resolved(_) | Dispatch::Discarded(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::{encode_value, MessageReader};
    use crate::transport::Transport;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    struct Peer {
        reader: MessageReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn recv(&mut self) -> Value {
            tokio::time::timeout(Duration::from_secs(5), self.reader.read_frame())
                .await
                .expect("timed out")
                .unwrap()
                .expect("client closed")
        }

        async fn send(&mut self, body: Value) {
            self.writer.write_all(&encode_value(&body)).await.unwrap();
        }
    }

    fn connect() -> (
        Connection,
        Transport,
        mpsc::UnboundedReceiver<TransportEvent>,
        Peer,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = Transport::from_io(client_read, client_write);
        let events = transport.take_events().unwrap();
        let conn = Connection::new(
            Arc::new(Mutex::new(Dispatcher::new())),
            transport.sender(),
        );
        let peer = Peer {
            reader: MessageReader::new(server_read),
            writer: server_write,
        };
        (conn, transport, events, peer)
    }

    #[test]
    fn connection_end_display() {
        assert_eq!(ConnectionEnd::Closed.to_string(), "server closed its output");
        assert_eq!(
            ConnectionEnd::Exited(ProcessExit { code: Some(3) }).to_string(),
            "server exited with code 3"
        );
        assert!(ConnectionEnd::FramingFailed(FramingError::MissingContentLength)
            .to_string()
            .starts_with("framing error"));
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (conn, _transport, events, mut peer) = connect();
        conn.listen(events, |_| {});

        let handle = conn.send_request("test/echo", json!({"x": 1})).await.unwrap();
        assert_eq!(handle.id(), 1);
        let req = peer.recv().await;
        assert_eq!(req["method"], "test/echo");
        assert_eq!(req["params"]["x"], 1);
        peer.send(json!({"jsonrpc": "2.0", "id": req["id"], "result": "ok"}))
            .await;
        assert_eq!(handle.await.unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn rpc_error_surfaces_verbatim() {
        let (conn, _transport, events, mut peer) = connect();
        conn.listen(events, |_| {});

        let handle = conn.send_request("test/fail", Value::Null).await.unwrap();
        let req = peer.recv().await;
        peer.send(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": -32602, "message": "bad params", "data": {"why": 1}}
        }))
        .await;
        match handle.await {
            Err(LspError::Rpc {
                code,
                message,
                data,
            }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
                assert_eq!(data, Some(json!({"why": 1})));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_sends_cancel_request() {
        let (conn, _transport, events, mut peer) = connect();
        conn.listen(events, |_| {});

        let handle = conn.send_request("slow", Value::Null).await.unwrap();
        let id = handle.id();
        let _ = peer.recv().await;
        assert!(handle.canceller().cancel().await);
        assert!(matches!(handle.await, Err(LspError::Cancelled)));

        let cancel = peer.recv().await;
        assert_eq!(cancel["method"], "$/cancelRequest");
        assert_eq!(cancel["params"]["id"], id);
        assert!(!conn.cancel(id).await);
    }

    #[tokio::test]
    async fn unhandled_server_request_gets_method_not_found() {
        let (conn, _transport, events, mut peer) = connect();
        conn.listen(events, |_| {});

        peer.send(json!({"jsonrpc": "2.0", "id": "s1", "method": "custom/ask"}))
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply["id"], "s1");
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn server_request_handler_answers() {
        let (conn, _transport, events, mut peer) = connect();
        conn.on_request("custom/ask", Arc::new(|params: Value| Ok(json!({"echo": params}))))
            .await;
        conn.listen(events, |_| {});

        peer.send(json!({"jsonrpc": "2.0", "id": 9, "method": "custom/ask", "params": [1]}))
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["result"], json!({"echo": [1]}));
    }

    #[tokio::test]
    async fn notifications_run_in_arrival_order() {
        let (conn, _transport, events, mut peer) = connect();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.on_notification(
            "test/tick",
            Arc::new(move |params: Value| sink.lock().unwrap().push(params["n"].as_i64().unwrap())),
        )
        .await;
        conn.listen(events, |_| {});

        for n in 0..20 {
            peer.send(json!({"jsonrpc": "2.0", "method": "test/tick", "params": {"n": n}}))
                .await;
        }
        for _ in 0..100 {
            if seen.lock().unwrap().len() == 20 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn malformed_message_does_not_stop_loop() {
        let (conn, _transport, events, mut peer) = connect();
        conn.listen(events, |_| {});

        let handle = conn.send_request("a", Value::Null).await.unwrap();
        let req = peer.recv().await;
        peer.send(json!({"jsonrpc": "1.0", "id": req["id"], "result": 0}))
            .await;
        peer.send(json!([1, 2, 3])).await;
        peer.send(json!({"jsonrpc": "2.0", "id": req["id"], "result": 1}))
            .await;
        assert_eq!(handle.await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn eof_rejects_pending_and_reports_end() {
        let (conn, _transport, events, mut peer) = connect();
        let (end_tx, end_rx) = oneshot::channel();
        conn.listen(events, move |end| {
            let _ = end_tx.send(end);
        });

        let handle = conn.send_request("a", Value::Null).await.unwrap();
        let _ = peer.recv().await;
        drop(peer);
        assert!(matches!(handle.await, Err(LspError::TransportLost)));
        assert_eq!(end_rx.await.unwrap(), ConnectionEnd::Closed);
        assert!(matches!(
            conn.send_request("b", Value::Null).await,
            Err(LspError::TransportLost)
        ));
    }

    /// Listen on a hand-fed event channel instead of the transport's own.
    fn listen_by_hand(
        conn: &Connection,
    ) -> (
        mpsc::UnboundedSender<TransportEvent>,
        oneshot::Receiver<ConnectionEnd>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (end_tx, end_rx) = oneshot::channel();
        conn.listen(events_rx, move |end| {
            let _ = end_tx.send(end);
        });
        (events_tx, end_rx)
    }

    const EXIT_3: ProcessExit = ProcessExit { code: Some(3) };

    #[tokio::test]
    async fn exit_then_close_reports_the_exit() {
        let (conn, _transport, _events, _peer) = connect();
        let (events, end) = listen_by_hand(&conn);

        events.send(TransportEvent::Exited(EXIT_3)).unwrap();
        events.send(TransportEvent::Closed).unwrap();
        let end = tokio::time::timeout(EXIT_LINGER / 2, end).await.unwrap();
        assert_eq!(end.unwrap(), ConnectionEnd::Exited(EXIT_3));
    }

    #[tokio::test]
    async fn close_then_exit_reports_the_exit() {
        let (conn, _transport, _events, _peer) = connect();
        let (events, end) = listen_by_hand(&conn);

        events.send(TransportEvent::Closed).unwrap();
        events.send(TransportEvent::Exited(EXIT_3)).unwrap();
        let end = tokio::time::timeout(EXIT_LINGER / 2, end).await.unwrap();
        assert_eq!(end.unwrap(), ConnectionEnd::Exited(EXIT_3));
    }

    #[tokio::test]
    async fn exit_without_close_ends_after_the_linger() {
        let (conn, _transport, _events, _peer) = connect();
        let (events, end) = listen_by_hand(&conn);

        let started = Instant::now();
        events.send(TransportEvent::Exited(EXIT_3)).unwrap();
        let end = tokio::time::timeout(Duration::from_secs(5), end)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, ConnectionEnd::Exited(EXIT_3));
        assert!(started.elapsed() >= EXIT_LINGER);
        // The sender is still alive; only the timer ended the loop.
        drop(events);
    }

    #[tokio::test]
    async fn frame_after_exit_still_resolves_its_request() {
        let (conn, _transport, _events, _peer) = connect();
        let (events, end) = listen_by_hand(&conn);

        let handle = conn.send_request("test/last", Value::Null).await.unwrap();
        let id = handle.id();
        events.send(TransportEvent::Exited(EXIT_3)).unwrap();
        events
            .send(TransportEvent::Frame(
                json!({"jsonrpc": "2.0", "id": id, "result": "late"}),
            ))
            .unwrap();
        events.send(TransportEvent::Closed).unwrap();

        assert_eq!(handle.await.unwrap(), json!("late"));
        assert_eq!(end.await.unwrap(), ConnectionEnd::Exited(EXIT_3));
    }

    #[tokio::test]
    async fn framing_failure_is_the_cause_pending_requests_see() {
        let (conn, _transport, _events, _peer) = connect();
        let (events, end) = listen_by_hand(&conn);

        let handle = conn.send_request("test/pending", Value::Null).await.unwrap();
        events
            .send(TransportEvent::FramingFailed(FramingError::MissingContentLength))
            .unwrap();

        assert!(matches!(
            handle.await,
            Err(LspError::Framing(FramingError::MissingContentLength))
        ));
        assert_eq!(
            end.await.unwrap(),
            ConnectionEnd::FramingFailed(FramingError::MissingContentLength)
        );
    }

    #[tokio::test]
    async fn panicking_notification_handler_does_not_stop_dispatch() {
        let (conn, _transport, events, mut peer) = connect();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.on_notification("test/boom", Arc::new(|_: Value| panic!("handler blew up")))
            .await;
        conn.on_notification(
            "test/boom",
            Arc::new(move |params: Value| sink.lock().unwrap().push(params)),
        )
        .await;
        conn.listen(events, |_| {});

        peer.send(json!({"jsonrpc": "2.0", "method": "test/boom", "params": 1}))
            .await;
        peer.send(json!({"jsonrpc": "2.0", "id": "q1", "method": "custom/unknown"}))
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply["id"], "q1");
        assert_eq!(reply["error"]["code"], -32601);
        // Later handlers for the same notification still ran.
        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn panicking_request_handler_gets_internal_error() {
        let (conn, _transport, events, mut peer) = connect();
        conn.on_request(
            "custom/explode",
            Arc::new(|_: Value| -> Result<Value, ResponseError> { panic!("handler blew up") }),
        )
        .await;
        conn.listen(events, |_| {});

        peer.send(json!({"jsonrpc": "2.0", "id": 4, "method": "custom/explode"}))
            .await;
        let reply = peer.recv().await;
        assert_eq!(reply["id"], 4);
        assert_eq!(reply["error"]["code"], codes::INTERNAL_ERROR);
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("custom/explode"));

        peer.send(json!({"jsonrpc": "2.0", "id": 5, "method": "custom/other"}))
            .await;
        assert_eq!(peer.recv().await["id"], 5);
    }
}
