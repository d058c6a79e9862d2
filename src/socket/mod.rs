//! Connection lifecycle layer.
//!
//! This module owns the caller-facing [`WebSocket`] handle and the
//! machinery that turns the transport's asynchronous notifications into
//! idempotent, cancellable, ordering-correct operations.
//!
//! ```text
//! ┌──────────────┐  connect/send/disconnect  ┌───────────────┐
//! │  Application │──────────────────────────►│   WebSocket   │
//! │              │◄──────────────────────────│  (lifecycle)  │
//! └──────────────┘      MessageStream        └───────┬───────┘
//!                                                    │ open/cancel
//!                                                    ▼
//!                                            ┌───────────────┐
//!                                            │   Transport   │
//!                                            └───────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most one transport task per connection at any time
//! - Concurrent `connect` (or `disconnect`) callers share one transport
//!   action and one result
//! - Received frames are republished in delivery order on a
//!   single-subscriber stream that closes exactly once per epoch
//! - Terminal transport events resolve every outstanding wait exactly once
//! - Dropping the last handle cancels the live task and fails all waiters
//!   instead of leaving them to hang
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | The `WebSocket` handle and lifecycle coordination |
//! | `stream` | Single-subscriber stream of received frames |

// ============================================================================
// Submodules
// ============================================================================

/// The `WebSocket` handle and lifecycle coordination.
pub mod connection;

/// Single-subscriber stream of received frames.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::WebSocket;
pub use stream::MessageStream;
