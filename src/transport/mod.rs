//! Transport capability layer.
//!
//! The connection lifecycle layer never talks to a socket directly. It
//! consumes the abstract capability defined here: a [`Transport`] opens
//! tasks, a [`TransportTask`] is one live socket session, and asynchronous
//! [`TransportEvent`] notifications report the session's state changes back
//! to the owning connection.
//!
//! ```text
//! ┌──────────────────┐   open / send / receive / cancel   ┌──────────────┐
//! │    WebSocket     │───────────────────────────────────►│  Transport   │
//! │  (lifecycle)     │◄───────────────────────────────────│  task        │
//! └──────────────────┘     TransportEvent notifications   └──────────────┘
//! ```
//!
//! Events for one task are delivered in emission order on an unbounded
//! channel supplied at open time. The [`Closed`](TransportEvent::Closed) and
//! [`Completed`](TransportEvent::Completed) events are terminal; a task must
//! emit at most one of each, and implementations may emit both (close
//! followed by completion), which consumers treat as a duplicate.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tungstenite` | Production adapter over `tokio-tungstenite` |

// ============================================================================
// Submodules
// ============================================================================

/// Production WebSocket transport over `tokio-tungstenite`.
pub mod tungstenite;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{CloseCode, Frame};

// ============================================================================
// Re-exports
// ============================================================================

pub use tungstenite::TungsteniteTransport;

// ============================================================================
// TransportEvent
// ============================================================================

/// Asynchronous notification from a transport task to its owning connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket finished its opening handshake.
    Opened {
        /// Subprotocol negotiated with the server, if any.
        protocol: Option<String>,
    },

    /// The socket closed with a close frame. Terminal.
    Closed {
        /// Close status code from the close frame.
        code: CloseCode,
        /// Close reason payload, if one was sent.
        reason: Option<Vec<u8>>,
    },

    /// The task finished, normally or with a fatal error. Terminal.
    Completed {
        /// The fatal error, or `None` for a clean completion.
        error: Option<Error>,
    },
}

/// Sender half of a task's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half of a task's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// Capability to open socket tasks.
///
/// One implementation is shared by every connection (and every reconnect)
/// that uses it; each successful `open` yields a brand-new task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new socket task toward `url`.
    ///
    /// `protocols` lists subprotocols to negotiate, in preference order.
    /// All notifications for the task are delivered on `events`; the task
    /// must emit [`TransportEvent::Opened`] once the handshake completes
    /// and exactly one terminal event when it ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the task cannot be created.
    async fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn TransportTask>>;
}

// ============================================================================
// TransportTask
// ============================================================================

/// One live socket session.
///
/// Exclusively owned by a single connection; never shared between
/// connections or reused after it reports close or error.
#[async_trait]
pub trait TransportTask: Send + Sync {
    /// Sends one frame, suspending until the transport acknowledges the
    /// write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the write fails or the task has
    /// already terminated.
    async fn send(&self, frame: Frame) -> Result<()>;

    /// Receives the next frame in delivery order.
    ///
    /// Resolves to `Ok(None)` when the task will deliver no further frames
    /// for this session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a receive failure.
    async fn receive(&self) -> Result<Option<Frame>>;

    /// Requests cancellation of the task with a close code and optional
    /// reason.
    ///
    /// Fire-and-forget: completion is reported through the event channel
    /// ([`TransportEvent::Closed`]), never through this call.
    fn cancel(&self, code: CloseCode, reason: Option<Vec<u8>>);
}
