//! Shared test fixtures: a scripted mock transport.
//!
//! The mock records every interaction (opens, sends, cancels) and lets a
//! test drive the notification surface by hand: frames are pushed into the
//! task's queue and lifecycle events are emitted on demand.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use socklink::transport::{EventSender, Transport, TransportEvent, TransportTask};
use socklink::{CloseCode, Error, Frame, Result};

/// Installs a test tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Address used by every mock-backed test; never dialled.
pub fn mock_url() -> Url {
    Url::parse("ws://mock.invalid/stream").expect("valid url")
}

// ============================================================================
// MockTransport
// ============================================================================

/// Scripted transport: records opens and hands out [`MockTask`]s.
pub struct MockTransport {
    /// Emit `Opened` immediately when a task is opened.
    auto_open: AtomicBool,
    /// Refuse `open` outright with a transport error.
    fail_open: AtomicBool,
    /// Number of `open` calls observed.
    open_calls: AtomicUsize,
    /// Protocol list passed to each `open`, in call order.
    opens: Mutex<Vec<Vec<String>>>,
    /// Every task handed out, in call order.
    tasks: Mutex<Vec<Arc<MockTask>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_open: AtomicBool::new(true),
            fail_open: AtomicBool::new(false),
            open_calls: AtomicUsize::new(0),
            opens: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// When disabled, tests emit the open notification by hand.
    pub fn set_auto_open(&self, auto_open: bool) {
        self.auto_open.store(auto_open, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail_open: bool) {
        self.fail_open.store(fail_open, Ordering::SeqCst);
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Protocol lists requested across all opens, in call order.
    pub fn opened_protocols(&self) -> Vec<Vec<String>> {
        self.opens.lock().clone()
    }

    /// The most recently opened task.
    pub fn last_task(&self) -> Arc<MockTask> {
        self.tasks.lock().last().cloned().expect("no task opened")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        _url: &Url,
        protocols: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn TransportTask>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.opens.lock().push(protocols.to_vec());

        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::transport("mock transport refused open"));
        }

        let task = MockTask::new(events);
        if self.auto_open.load(Ordering::SeqCst) {
            task.emit_opened(None);
        }
        self.tasks.lock().push(Arc::clone(&task));
        Ok(task)
    }
}

// ============================================================================
// MockTask
// ============================================================================

/// One scripted socket session.
pub struct MockTask {
    /// Event channel back to the owning connection.
    events: EventSender,
    /// Acknowledge `cancel` with a matching close notification.
    ack_cancel: AtomicBool,
    /// Frames sent by the connection, in send order.
    sent: Mutex<Vec<Frame>>,
    /// Close codes of every `cancel` call, in call order.
    cancels: Mutex<Vec<CloseCode>>,
    /// Queue of frames for the connection to receive.
    frames_tx: mpsc::UnboundedSender<Frame>,
    frames_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl MockTask {
    fn new(events: EventSender) -> Arc<Self> {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events,
            ack_cancel: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            frames_tx,
            frames_rx: tokio::sync::Mutex::new(frames_rx),
        })
    }

    /// When disabled, a `cancel` records the call but emits nothing.
    pub fn set_ack_cancel(&self, ack: bool) {
        self.ack_cancel.store(ack, Ordering::SeqCst);
    }

    /// Queues a frame for delivery to the connection.
    pub fn push_frame(&self, frame: Frame) {
        let _ = self.frames_tx.send(frame);
    }

    pub fn emit_opened(&self, protocol: Option<&str>) {
        let _ = self.events.send(TransportEvent::Opened {
            protocol: protocol.map(str::to_owned),
        });
    }

    pub fn emit_closed(&self, code: CloseCode) {
        let _ = self.events.send(TransportEvent::Closed { code, reason: None });
    }

    pub fn emit_completed(&self, error: Option<Error>) {
        let _ = self.events.send(TransportEvent::Completed { error });
    }

    /// Frames the connection has sent, in send order.
    pub fn sent(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    /// Close codes of every cancellation request, in call order.
    pub fn cancels(&self) -> Vec<CloseCode> {
        self.cancels.lock().clone()
    }
}

#[async_trait]
impl TransportTask for MockTask {
    async fn send(&self, frame: Frame) -> Result<()> {
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Frame>> {
        Ok(self.frames_rx.lock().await.recv().await)
    }

    fn cancel(&self, code: CloseCode, _reason: Option<Vec<u8>>) {
        self.cancels.lock().push(code);
        if self.ack_cancel.load(Ordering::SeqCst) {
            self.emit_closed(code);
        }
    }
}
