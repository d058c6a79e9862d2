//! socklink - Client-side WebSocket connection lifecycle management.
//!
//! This library wraps an event-driven socket transport in a small set of
//! idempotent, cancellable async operations: `connect`, `send`,
//! `disconnect`, and `reconnect`, plus an ordered stream of received
//! frames. One connection handle may be shared by arbitrarily many
//! concurrent callers; operations of the same kind coalesce onto a single
//! transport action.
//!
//! # Architecture
//!
//! The crate is split along one seam:
//!
//! - **Lifecycle layer** ([`WebSocket`]): owns connection state, pending
//!   operation slots, the receive loop, and the dispatcher that resolves
//!   waiters on terminal transport events — exactly once each.
//! - **Transport layer** ([`transport`]): the abstract socket-task
//!   capability (open, send, receive, cancel, event notifications) and a
//!   production adapter over `tokio-tungstenite`. The lifecycle layer
//!   never sees framing, TLS, or wire details.
//!
//! Key design principles:
//!
//! - Connectivity is derived from task state, never stored as a flag
//! - Every caller-visible wait is a single-resolution completion slot;
//!   duplicate terminal notifications are no-ops
//! - Helpers spawned per connection epoch hold weak references and stand
//!   down when the epoch moves on
//! - Dropping the last handle tears everything down; no waiter is left
//!   hanging
//!
//! # Quick Start
//!
//! ```no_run
//! use socklink::{Result, WebSocket};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let url = Url::parse("wss://example.com/stream").expect("valid url");
//!     let socket = WebSocket::new(url);
//!
//!     // Connect, negotiating a subprotocol.
//!     socket.connect_with(&["chat.v2"]).await?;
//!
//!     // Exactly one subscriber per connection epoch.
//!     let mut messages = socket.messages().expect("first subscriber");
//!
//!     socket.send_text("hello").await?;
//!     if let Some(frame) = messages.next().await {
//!         println!("received: {:?}", frame?);
//!     }
//!
//!     socket.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | [`Frame`] and [`CloseCode`] surface types |
//! | [`socket`] | Lifecycle layer: [`WebSocket`], [`MessageStream`] |
//! | [`transport`] | Socket-task capability and tungstenite adapter |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Protocol surface types: message frames and close codes.
pub mod protocol;

/// Connection lifecycle layer.
///
/// The caller-facing [`WebSocket`] handle and its message stream.
pub mod socket;

/// Transport capability layer.
///
/// Abstract socket-task traits plus the `tokio-tungstenite` adapter.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Lifecycle types
pub use socket::{MessageStream, WebSocket};

// Protocol types
pub use protocol::{CloseCode, Frame};

// Error types
pub use error::{Error, Result};

// Transport types
pub use transport::{EventSender, Transport, TransportEvent, TransportTask, TungsteniteTransport};
