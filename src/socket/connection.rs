//! Connection lifecycle coordination.
//!
//! This module turns the transport's event-driven notification surface into
//! idempotent, coalescing async operations on a shared [`WebSocket`] handle.
//!
//! # Lifecycle
//!
//! ```text
//! connect ──► open task ──► Opened ──► connected ──► frames flow
//!    │                        │                          │
//!    │  (coalesced waiters)   │   disconnect ──► cancel  │
//!    ▼                        ▼                   │      ▼
//!  pending slot ◄── dispatcher ◄── Closed/Completed ── receive loop
//! ```
//!
//! Every caller-visible wait is a single-resolution completion slot: the
//! first caller of an operation registers the slot and triggers the
//! transport action; concurrent callers subscribe to the same slot and all
//! observe one shared result. Terminal transport events pass through one
//! dispatcher per connection epoch, which resolves the slots, closes the
//! message stream, and clears the task exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{CloseCode, Frame};
use crate::transport::{
    EventReceiver, EventSender, Transport, TransportEvent, TransportTask, TungsteniteTransport,
};

use super::stream::MessageStream;

// ============================================================================
// Completion
// ============================================================================

/// Single-resolution completion slot shared by coalesced callers.
///
/// The slot is taken out of connection state before resolution, so a
/// duplicate terminal notification finds nothing to resolve and becomes a
/// no-op.
struct Completion {
    /// One waiter per coalesced caller.
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Completion {
    /// Creates an empty slot.
    fn new() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    /// Attaches one more waiter to the pending operation.
    fn subscribe(&mut self) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Resolves every waiter with the same result.
    ///
    /// Waiters that stopped listening (dropped their future) are skipped.
    fn resolve(self, result: Result<()>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// Mutable connection state, guarded by one mutex.
///
/// Caller operations and the dispatcher are concurrent sources of
/// mutation; every transition happens under the lock, which is never held
/// across an await.
struct State {
    /// Monotonic lifetime counter, bumped on each connect and each
    /// teardown. Spawned helpers carry the epoch they were created for and
    /// stand down when it no longer matches.
    epoch: u64,
    /// Exclusive handle to the current transport task.
    task: Option<Arc<dyn TransportTask>>,
    /// Whether the open notification for the current task was observed.
    opened: bool,
    /// Close code recorded for the most recent task.
    close_code: Option<CloseCode>,
    /// Close code of a locally requested disconnect in progress.
    close_requested: Option<CloseCode>,
    /// Subprotocols requested at the last connect; reused by reconnect.
    protocols: Vec<String>,
    /// Subprotocol negotiated by the server for the current task.
    negotiated: Option<String>,
    /// Pending connect slot; at most one open at a time.
    pending_connect: Option<Completion>,
    /// Pending disconnect slot; at most one cancellation at a time.
    pending_disconnect: Option<Completion>,
    /// Open end of the current epoch's message stream.
    sink: Option<mpsc::UnboundedSender<Result<Frame>>>,
    /// Parked message stream, until the subscriber takes it.
    stream: Option<MessageStream>,
    /// Receive loop for the current epoch.
    receive_loop: Option<JoinHandle<()>>,
    /// Dispatcher for the current epoch.
    dispatcher: Option<JoinHandle<()>>,
}

impl State {
    fn new() -> Self {
        Self {
            epoch: 0,
            task: None,
            opened: false,
            close_code: None,
            close_requested: None,
            protocols: Vec::new(),
            negotiated: None,
            pending_connect: None,
            pending_disconnect: None,
            sink: None,
            stream: None,
            receive_loop: None,
            dispatcher: None,
        }
    }

    /// Connectivity is derived, never stored: a task must be installed,
    /// its open observed, and no close recorded.
    fn is_connected(&self) -> bool {
        self.task.is_some() && self.opened && self.close_code.is_none()
    }

    /// Closes the current epoch's message stream exactly once.
    ///
    /// An abnormal termination delivers one final `Err` item first.
    fn close_stream(&mut self, error: Option<Error>) {
        let Some(sink) = self.sink.take() else { return };
        if let Some(error) = error {
            let _ = sink.send(Err(error));
        }
    }

    /// Tears down the current epoch: stops the receive loop, drops the
    /// task, and invalidates stragglers by bumping the epoch.
    fn clear_task(&mut self) {
        self.epoch += 1;
        self.task = None;
        self.opened = false;
        self.close_requested = None;
        self.stream = None;
        if let Some(handle) = self.receive_loop.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// A client-side connection to one message-stream socket.
///
/// The handle is cheap to clone and may be driven by arbitrarily many
/// concurrent callers; operations of the same kind coalesce onto one
/// transport action. Dropping the last handle cancels any live task and
/// force-resolves every outstanding wait, so no caller is left hanging.
///
/// # Example
///
/// ```no_run
/// use socklink::{Result, WebSocket};
/// use url::Url;
///
/// # async fn example() -> Result<()> {
/// let url = Url::parse("ws://example.com/stream").expect("valid url");
/// let socket = WebSocket::new(url);
///
/// socket.connect().await?;
/// let mut messages = socket.messages().expect("first subscriber");
///
/// socket.send_text("hello").await?;
/// while let Some(frame) = messages.next().await {
///     println!("received: {:?}", frame?);
/// }
///
/// socket.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct WebSocket {
    /// Shared connection state and configuration.
    inner: Arc<Inner>,
}

impl Clone for WebSocket {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Shared core of a connection: immutable configuration plus guarded
/// mutable state. Helpers spawned per epoch hold only weak references, so
/// the transport never extends the connection's lifetime.
struct Inner {
    /// Target address, fixed at construction.
    url: Url,
    /// Capability used to open socket tasks.
    transport: Arc<dyn Transport>,
    /// Guarded mutable state.
    state: Mutex<State>,
}

// ============================================================================
// Constructors
// ============================================================================

impl WebSocket {
    /// Creates a connection to `url` using the default
    /// [`TungsteniteTransport`].
    ///
    /// No I/O happens until [`connect`](Self::connect).
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self::with_transport(url, Arc::new(TungsteniteTransport::new()))
    }

    /// Creates a connection using a caller-supplied transport.
    #[must_use]
    pub fn with_transport(url: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                url,
                transport,
                state: Mutex::new(State::new()),
            }),
        }
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl WebSocket {
    /// Returns the target address.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns `true` while a task is installed, opened, and unclosed.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().is_connected()
    }

    /// Subprotocol negotiated by the server for the current task, if any.
    #[inline]
    #[must_use]
    pub fn negotiated_protocol(&self) -> Option<String> {
        self.inner.state.lock().negotiated.clone()
    }

    /// Close code recorded for the most recent task, if it has closed.
    #[inline]
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.inner.state.lock().close_code
    }

    /// Returns `true` if both handles refer to the same connection
    /// instance.
    ///
    /// [`reconnect`](Self::reconnect) may hand back a different instance;
    /// this is how callers tell.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &WebSocket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ============================================================================
// Lifecycle Operations
// ============================================================================

impl WebSocket {
    /// Connects without subprotocols.
    ///
    /// See [`connect_with`](Self::connect_with).
    ///
    /// # Errors
    ///
    /// Same as [`connect_with`](Self::connect_with).
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(&[]).await
    }

    /// Connects, negotiating the given subprotocols in preference order.
    ///
    /// Idempotent and coalescing: an already-connected instance returns
    /// immediately without touching the transport, and any number of
    /// concurrent callers share one transport open and one result.
    /// Dropping a caller's future abandons only that caller's wait; the
    /// shared open continues for the others.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] if the open fails or the socket terminates
    ///   before the open completes
    /// - [`Error::Cancelled`] if the connection is torn down while the
    ///   open is pending
    pub async fn connect_with(&self, protocols: &[&str]) -> Result<()> {
        let protocols = protocols.iter().map(|p| (*p).to_owned()).collect();
        self.connect_protocols(protocols).await
    }

    async fn connect_protocols(&self, protocols: Vec<String>) -> Result<()> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.is_connected() {
                trace!("connect: already connected");
                return Ok(());
            }
            if let Some(pending) = state.pending_connect.as_mut() {
                trace!("connect: joining pending open");
                pending.subscribe()
            } else {
                self.initiate_connect(&mut state, protocols)
            }
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Registers the connect slot and spawns the shared open.
    ///
    /// The open runs on a detached task so that dropping any caller's wait
    /// never cancels the one transport open shared by coalesced callers.
    fn initiate_connect(
        &self,
        state: &mut State,
        protocols: Vec<String>,
    ) -> oneshot::Receiver<Result<()>> {
        state.epoch += 1;
        let epoch = state.epoch;
        state.protocols = protocols.clone();
        state.close_code = None;
        state.negotiated = None;

        let mut pending = Completion::new();
        let rx = pending.subscribe();
        state.pending_connect = Some(pending);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.dispatcher = Some(tokio::spawn(dispatch_events(
            Arc::downgrade(&self.inner),
            events_rx,
            epoch,
        )));

        debug!(url = %self.inner.url, epoch, "opening transport task");
        tokio::spawn(run_open(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            self.inner.url.clone(),
            protocols,
            events_tx,
            epoch,
        ));

        rx
    }

    /// Disconnects with a normal-closure code and no reason.
    ///
    /// See [`disconnect_with`](Self::disconnect_with).
    ///
    /// # Errors
    ///
    /// Same as [`disconnect_with`](Self::disconnect_with).
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnect_with(CloseCode::NORMAL, None).await
    }

    /// Disconnects with the given close code and optional reason.
    ///
    /// Idempotent and coalescing, mirroring connect: with no active task
    /// this is an immediate no-op success, and concurrent callers share
    /// one cancellation and one result. Never allocates a transport task.
    ///
    /// # Errors
    ///
    /// - [`Error::Transport`] / [`Error::AbnormalClosure`] if the task
    ///   fails before acknowledging the close
    /// - [`Error::Cancelled`] if the connection is torn down while the
    ///   close is pending
    pub async fn disconnect_with(&self, code: CloseCode, reason: Option<Vec<u8>>) -> Result<()> {
        let rx = {
            let mut state = self.inner.state.lock();
            let Some(task) = state.task.clone() else {
                trace!("disconnect: no active task");
                return Ok(());
            };
            if let Some(pending) = state.pending_disconnect.as_mut() {
                trace!("disconnect: joining pending cancellation");
                pending.subscribe()
            } else {
                debug!(%code, "requesting task cancellation");
                state.close_requested = Some(code);
                let mut pending = Completion::new();
                let rx = pending.subscribe();
                state.pending_disconnect = Some(pending);
                task.cancel(code, reason);
                rx
            }
        };

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Reconnects, reusing the subprotocols remembered from the last
    /// connect.
    ///
    /// If this instance is currently connected, a **new** connection
    /// instance sharing the address and transport is connected and
    /// returned; the live instance is left untouched rather than racing a
    /// fresh open against its state. If not connected, this instance
    /// reconnects and a clone of it is returned. Either way the returned
    /// handle is the authoritative one; compare with
    /// [`ptr_eq`](Self::ptr_eq).
    ///
    /// # Errors
    ///
    /// Same as [`connect_with`](Self::connect_with).
    pub async fn reconnect(&self) -> Result<WebSocket> {
        let (connected, protocols) = {
            let state = self.inner.state.lock();
            (state.is_connected(), state.protocols.clone())
        };

        if connected {
            debug!(url = %self.inner.url, "reconnect: producing a fresh connection");
            let fresh = WebSocket::with_transport(
                self.inner.url.clone(),
                Arc::clone(&self.inner.transport),
            );
            {
                fresh.inner.state.lock().protocols = protocols.clone();
            }
            fresh.connect_protocols(protocols).await?;
            Ok(fresh)
        } else {
            self.connect_protocols(protocols).await?;
            Ok(self.clone())
        }
    }
}

// ============================================================================
// Messaging
// ============================================================================

impl WebSocket {
    /// Sends a text frame, suspending until the transport acknowledges
    /// the write.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no task is open
    /// - [`Error::Transport`] if the write fails
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_frame(Frame::Text(text.into())).await
    }

    /// Sends a binary frame, suspending until the transport acknowledges
    /// the write.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if no task is open
    /// - [`Error::Transport`] if the write fails
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send_frame(Frame::Binary(data.into())).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        let task = {
            let state = self.inner.state.lock();
            if !state.is_connected() {
                return Err(Error::NotConnected);
            }
            state.task.clone().ok_or(Error::NotConnected)?
        };
        trace!(len = frame.len(), "sending frame");
        task.send(frame).await
    }

    /// Takes the current epoch's message stream.
    ///
    /// The stream is single-subscriber: the first call per epoch returns
    /// it, later calls return `None` until a reconnect creates the next
    /// epoch's stream. Returns `None` before the first connect.
    #[must_use]
    pub fn messages(&self) -> Option<MessageStream> {
        self.inner.state.lock().stream.take()
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("url", &self.inner.url.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ============================================================================
// Teardown
// ============================================================================

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();

        if let Some(pending) = state.pending_connect.take() {
            pending.resolve(Err(Error::Cancelled));
        }
        if let Some(pending) = state.pending_disconnect.take() {
            pending.resolve(Err(Error::Cancelled));
        }
        state.close_stream(Some(Error::Cancelled));

        if let Some(task) = state.task.take() {
            debug!("connection dropped with live task, cancelling");
            task.cancel(CloseCode::GOING_AWAY, None);
        }
        if let Some(handle) = state.receive_loop.take() {
            handle.abort();
        }
        if let Some(handle) = state.dispatcher.take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Shared Open
// ============================================================================

/// Performs the transport open for one epoch and installs the task.
///
/// Runs detached from every caller. Holds only a weak reference while the
/// open is in flight: if the connection is torn down (or the epoch moves
/// on) meanwhile, the freshly opened task is cancelled instead of
/// installed.
async fn run_open(
    inner: Weak<Inner>,
    transport: Arc<dyn Transport>,
    url: Url,
    protocols: Vec<String>,
    events: EventSender,
    epoch: u64,
) {
    match transport.open(&url, &protocols, events.clone()).await {
        Ok(task) => {
            let Some(inner) = inner.upgrade() else {
                task.cancel(CloseCode::GOING_AWAY, None);
                return;
            };

            let mut state = inner.state.lock();
            if state.epoch != epoch {
                drop(state);
                trace!(epoch, "open finished for a stale epoch, cancelling task");
                task.cancel(CloseCode::GOING_AWAY, None);
                return;
            }

            let (sink, receiver) = mpsc::unbounded_channel();
            state.task = Some(Arc::clone(&task));
            state.sink = Some(sink);
            state.stream = Some(MessageStream::new(receiver));
            // Pull frames starting now, not at the first subscriber read:
            // nothing delivered between open and the first read may be lost.
            state.receive_loop = Some(tokio::spawn(run_receive_loop(
                Arc::downgrade(&inner),
                task,
                events,
                epoch,
            )));

            // The open notification may already have been dispatched;
            // resolve the waiters now if so.
            if state.opened
                && let Some(pending) = state.pending_connect.take()
            {
                pending.resolve(Ok(()));
            }
        }
        Err(e) => {
            warn!(error = %e, "transport open failed");
            let Some(inner) = inner.upgrade() else { return };
            let mut state = inner.state.lock();
            if state.epoch != epoch {
                return;
            }
            if let Some(pending) = state.pending_connect.take() {
                pending.resolve(Err(e));
            }
        }
    }
}

// ============================================================================
// Receive Loop
// ============================================================================

/// Pulls frames from the task and republishes them in arrival order.
///
/// Stops on end-of-frames, a receive failure (handed to the dispatcher,
/// never retried), an epoch change, or connection teardown; it never
/// re-enters within an epoch.
async fn run_receive_loop(
    inner: Weak<Inner>,
    task: Arc<dyn TransportTask>,
    events: EventSender,
    epoch: u64,
) {
    loop {
        match task.receive().await {
            Ok(Some(frame)) => {
                trace!(len = frame.len(), "frame received");
                let Some(inner) = inner.upgrade() else { return };
                let state = inner.state.lock();
                if state.epoch != epoch {
                    return;
                }
                let Some(sink) = state.sink.as_ref() else {
                    return;
                };
                // Publication never blocks further receives; a departed
                // subscriber just discards frames.
                let _ = sink.send(Ok(frame));
            }
            Ok(None) => {
                trace!("no further frames for this task");
                return;
            }
            Err(e) => {
                debug!(error = %e, "receive failed, handing to dispatcher");
                let _ = events.send(TransportEvent::Completed { error: Some(e) });
                return;
            }
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Consumes one epoch's transport events and applies them to state.
///
/// Holds only a weak reference to the connection, so the transport cannot
/// keep a dropped connection alive. Exits after the first terminal event;
/// duplicate terminal notifications from the transport are never
/// re-processed. An event channel that closes without a terminal event is
/// treated as a clean completion.
async fn dispatch_events(inner: Weak<Inner>, mut events: EventReceiver, epoch: u64) {
    loop {
        let (event, channel_open) = match events.recv().await {
            Some(event) => (event, true),
            None => (TransportEvent::Completed { error: None }, false),
        };

        let Some(inner) = inner.upgrade() else { return };
        let terminal = inner.dispatch(event, epoch);
        if terminal || !channel_open {
            return;
        }
    }
}

impl Inner {
    /// Applies one transport notification to connection state.
    ///
    /// Returns `true` when the event was terminal (or stale). Terminal
    /// handling runs at most once per epoch: it bumps the epoch, so any
    /// straggler carrying the old epoch stands down.
    fn dispatch(&self, event: TransportEvent, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            trace!(epoch, "stale transport event ignored");
            return true;
        }

        match event {
            TransportEvent::Opened { protocol } => {
                debug!(protocol = ?protocol, "transport task opened");
                state.opened = true;
                state.negotiated = protocol;
                // Resolve only once the task is installed; otherwise the
                // shared open resolves the slot right after installing.
                if state.task.is_some()
                    && let Some(pending) = state.pending_connect.take()
                {
                    pending.resolve(Ok(()));
                }
                false
            }

            TransportEvent::Closed { code, reason } => {
                debug!(
                    %code,
                    reason_len = reason.as_ref().map_or(0, Vec::len),
                    "transport task closed"
                );
                state.close_code = Some(code);
                let requested = state.close_requested.is_some();

                if let Some(pending) = state.pending_connect.take() {
                    pending.resolve(Err(Error::transport(format!(
                        "socket closed before open completed (code {code})"
                    ))));
                }
                if let Some(pending) = state.pending_disconnect.take() {
                    pending.resolve(Ok(()));
                }
                let error =
                    (!requested && code.is_abnormal()).then(|| Error::abnormal_closure(code));
                state.close_stream(error);
                state.clear_task();
                true
            }

            TransportEvent::Completed { error } => {
                match error {
                    Some(e) => {
                        let e = if e.is_abnormal_disconnect() {
                            // A reset-class failure must not leave a
                            // half-open socket draining.
                            if state.close_code.is_none() {
                                if let Some(task) = state.task.as_ref() {
                                    warn!(error = %e, "abnormal disconnect, cancelling task");
                                    task.cancel(CloseCode::ABNORMAL, None);
                                }
                                state.close_code = Some(CloseCode::ABNORMAL);
                            }
                            Error::abnormal_closure(CloseCode::ABNORMAL)
                        } else {
                            warn!(error = %e, "transport task failed");
                            e
                        };

                        if let Some(pending) = state.pending_connect.take() {
                            pending.resolve(Err(e.clone()));
                        }
                        if let Some(pending) = state.pending_disconnect.take() {
                            pending.resolve(Err(e.clone()));
                        }
                        state.close_stream(Some(e));
                    }
                    None => {
                        debug!("transport task completed");
                        if let Some(pending) = state.pending_connect.take() {
                            pending
                                .resolve(Err(Error::transport("socket task completed before open")));
                        }
                        if let Some(pending) = state.pending_disconnect.take() {
                            pending.resolve(Ok(()));
                        }
                        state.close_stream(None);
                    }
                }
                state.clear_task();
                true
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
