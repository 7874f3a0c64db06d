//! Transport boundary - decoded requests in, response frames out.
//!
//! The wire protocol itself (message grammar, acks, retransmission, dedup,
//! blockwise) lives below this crate. A transport delivers each decoded
//! request as an [`Exchange`]: the request, a [`ResponseSink`] for the
//! response stream, and a [`FinishSignal`] that fires when the peer
//! disconnects or the stream is reset.
//!
//! Real transports implement [`Listener`]. The [`loopback`] transport is an
//! in-process channel pair used by tests and demos.
//!
//! # Frame model
//!
//! `set_status` and `set_option` latch metadata for the next frame; `write`
//! emits one frame carrying the latched metadata plus the payload; `end`
//! closes the stream. A one-shot response is `set_status` + `write` + `end`;
//! an observation stream is one `write` per notification with no `end` until
//! termination; an empty acknowledgement is a `write` of an empty payload
//! with no status set. Correlation with the originating request is the
//! transport's business - a sink is already scoped to its exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, ThingwireError};
use crate::response::Status;
use crate::BoxFuture;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// The observe option on a GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveFlag {
    /// Register for a notification stream.
    Register,
    /// Cancel a live registration.
    Deregister,
}

/// Options decoded from the request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Media type of the request payload.
    pub content_format: Option<String>,
    /// Observe register/deregister indicator.
    pub observe: Option<ObserveFlag>,
}

/// A decoded inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub options: RequestOptions,
    pub payload: Bytes,
}

impl InboundRequest {
    /// Build a request with no options and no payload.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            options: RequestOptions::default(),
            payload: Bytes::new(),
        }
    }

    /// GET shorthand.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// PUT shorthand with a payload.
    pub fn put(path: impl Into<String>, payload: Bytes) -> Self {
        let mut req = Self::new(Method::Put, path);
        req.payload = payload;
        req
    }

    /// POST shorthand with a payload (may be empty).
    pub fn post(path: impl Into<String>, payload: Bytes) -> Self {
        let mut req = Self::new(Method::Post, path);
        req.payload = payload;
        req
    }

    /// Set the content-format option.
    pub fn content_format(mut self, media_type: impl Into<String>) -> Self {
        self.options.content_format = Some(media_type.into());
        self
    }

    /// Set the observe-register option.
    pub fn observe_register(mut self) -> Self {
        self.options.observe = Some(ObserveFlag::Register);
        self
    }

    /// Set the observe-deregister option.
    pub fn observe_deregister(mut self) -> Self {
        self.options.observe = Some(ObserveFlag::Deregister);
        self
    }
}

/// An option attached to an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOption {
    /// Media type of the frame payload.
    ContentFormat(String),
    /// Notification sequence number on an observed stream.
    Observe(u64),
}

/// One outbound frame as observed by the peer.
///
/// `status: None` with a payload write is an empty acknowledgement frame;
/// `last` marks the stream-closing frame emitted by `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub status: Option<Status>,
    pub options: Vec<SinkOption>,
    pub payload: Bytes,
    pub last: bool,
}

impl Frame {
    /// The observe (sequence) option, if present.
    pub fn observe_seq(&self) -> Option<u64> {
        self.options.iter().find_map(|opt| match opt {
            SinkOption::Observe(seq) => Some(*seq),
            _ => None,
        })
    }

    /// The content-format option, if present.
    pub fn content_format(&self) -> Option<&str> {
        self.options.iter().find_map(|opt| match opt {
            SinkOption::ContentFormat(mt) => Some(mt.as_str()),
            _ => None,
        })
    }
}

/// Output sink for one exchange's response stream.
///
/// Status and options latch until the next `write`; see the module docs for
/// the frame model.
pub trait ResponseSink: Send {
    /// Latch the status code for the next frame.
    fn set_status(&mut self, status: Status);

    /// Latch an option for the next frame.
    fn set_option(&mut self, option: SinkOption);

    /// Emit one frame with the latched metadata and `payload`.
    ///
    /// Resolves once the transport has accepted the frame; at that point
    /// the write is complete for ordering purposes. Fails with
    /// [`ThingwireError::ConnectionClosed`] when the peer is gone.
    fn write(&mut self, payload: Bytes) -> BoxFuture<'_, Result<()>>;

    /// Close the response stream.
    fn end(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Sender half of the finish/disconnect signal.
///
/// Firing is idempotent; dropping the handle also counts as finished
/// (a transport that goes away takes its streams with it).
#[derive(Debug)]
pub struct FinishHandle {
    tx: watch::Sender<bool>,
}

impl FinishHandle {
    /// Signal that the peer's stream is finished.
    pub fn finish(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half of the finish/disconnect signal. Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct FinishSignal {
    rx: watch::Receiver<bool>,
}

impl FinishSignal {
    /// Create a connected handle/signal pair.
    pub fn channel() -> (FinishHandle, FinishSignal) {
        let (tx, rx) = watch::channel(false);
        (FinishHandle { tx }, FinishSignal { rx })
    }

    /// Resolve once the stream is finished. Cancel-safe; resolves
    /// immediately if the signal already fired.
    pub async fn finished(&mut self) {
        // A dropped handle means the transport is gone: also finished.
        let _ = self.rx.wait_for(|finished| *finished).await;
    }

    /// Whether the signal has fired.
    pub fn is_finished(&self) -> bool {
        *self.rx.borrow()
    }
}

/// One inbound request/stream delivered by a transport.
pub struct Exchange {
    /// Transport-assigned identifier of the subscriber stream; part of the
    /// subscription key.
    pub stream_id: u64,
    pub request: InboundRequest,
    pub sink: Box<dyn ResponseSink>,
    pub finish: FinishSignal,
}

/// A bound transport delivering exchanges to the server's accept loop.
///
/// Binding (and thus bind failures such as an already-taken port) happens
/// in the transport's own constructor, before the listener reaches
/// [`Server::start`](crate::Server).
pub trait Listener: Send + 'static {
    /// Accept the next exchange. `Ok(None)` means the transport shut down
    /// cleanly.
    fn accept(&mut self) -> BoxFuture<'_, Result<Option<Exchange>>>;
}

// ============================================================================
// Loopback transport
// ============================================================================

/// Create an in-process transport pair: a connector for issuing requests
/// and a listener to hand to the server.
pub fn loopback(capacity: usize) -> (LoopbackConnector, LoopbackListener) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        LoopbackConnector {
            tx,
            next_stream_id: Arc::new(AtomicU64::new(1)),
        },
        LoopbackListener { rx },
    )
}

/// Client side of the loopback transport.
#[derive(Clone)]
pub struct LoopbackConnector {
    tx: mpsc::Sender<Exchange>,
    next_stream_id: Arc<AtomicU64>,
}

impl LoopbackConnector {
    /// Send a request; returns the stream of response frames.
    pub async fn send(&self, request: InboundRequest) -> Result<ClientStream> {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (finish_handle, finish) = FinishSignal::channel();

        let exchange = Exchange {
            stream_id,
            request,
            sink: Box::new(ChannelSink::new(frame_tx)),
            finish,
        };

        self.tx
            .send(exchange)
            .await
            .map_err(|_| ThingwireError::ConnectionClosed)?;

        Ok(ClientStream {
            stream_id,
            frames: frame_rx,
            finish: finish_handle,
        })
    }
}

/// Server side of the loopback transport.
pub struct LoopbackListener {
    rx: mpsc::Receiver<Exchange>,
}

impl Listener for LoopbackListener {
    fn accept(&mut self) -> BoxFuture<'_, Result<Option<Exchange>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

/// The peer's view of one exchange: response frames plus a disconnect
/// trigger. Dropping the stream fires the finish signal, as a departing
/// peer would.
pub struct ClientStream {
    pub stream_id: u64,
    frames: mpsc::UnboundedReceiver<Frame>,
    finish: FinishHandle,
}

impl ClientStream {
    /// Receive the next frame; `None` once the sink side is gone.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Receive the next frame without waiting.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Simulate a peer disconnect/reset for this stream.
    pub fn disconnect(&self) {
        self.finish.finish();
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.finish.finish();
    }
}

/// [`ResponseSink`] writing frames into an in-process channel.
pub struct ChannelSink {
    status: Option<Status>,
    options: Vec<SinkOption>,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelSink {
    /// Create a sink writing to `tx`.
    pub fn new(tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            status: None,
            options: Vec::new(),
            tx,
        }
    }

    fn emit(&mut self, payload: Bytes, last: bool) -> Result<()> {
        let frame = Frame {
            status: self.status.take(),
            options: std::mem::take(&mut self.options),
            payload,
            last,
        };
        self.tx
            .send(frame)
            .map_err(|_| ThingwireError::ConnectionClosed)
    }
}

impl ResponseSink for ChannelSink {
    fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    fn set_option(&mut self, option: SinkOption) {
        self.options.push(option);
    }

    fn write(&mut self, payload: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.emit(payload, false) })
    }

    fn end(&mut self) -> BoxFuture<'_, Result<()>> {
        // The close marker carries no latched metadata; responses always
        // write before ending.
        Box::pin(async move {
            self.status = None;
            self.options.clear();
            self.emit(Bytes::new(), true)
        })
    }
}
