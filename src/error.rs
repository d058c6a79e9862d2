//! Error types for socklink.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use socklink::{Result, WebSocket};
//!
//! async fn example(socket: &WebSocket) -> Result<()> {
//!     socket.connect().await?;
//!     socket.send_text("hello").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Lifecycle | [`Error::NotConnected`], [`Error::Cancelled`] |
//! | Transport | [`Error::Transport`], [`Error::AbnormalClosure`] |
//!
//! Because one terminal transport event may resolve several coalesced waiters
//! at once, [`Error`] is [`Clone`]: every waiter observes the same failure.

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::protocol::CloseCode;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// No open transport task.
    ///
    /// Returned when `send` is attempted before a successful connect or
    /// after the connection has closed.
    #[error("not connected")]
    NotConnected,

    /// Operation aborted by connection teardown.
    ///
    /// Returned to waiters that were still pending when the last handle to
    /// the connection was dropped.
    #[error("operation cancelled by connection teardown")]
    Cancelled,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Underlying transport failure.
    ///
    /// Wraps any open/send/receive/close failure reported by the transport.
    /// `kind` carries the underlying I/O error kind when one is known.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
        /// Underlying I/O error kind, if the failure originated in I/O.
        kind: Option<ErrorKind>,
    },

    /// Connection dropped abnormally.
    ///
    /// Returned when the transport reported a reset, timeout, or unreachable
    /// condition and the task was force-cancelled with an abnormal close code
    /// rather than left to drain.
    #[error("abnormal closure (code {code})")]
    AbnormalClosure {
        /// Close code recorded for the forced cancellation.
        code: CloseCode,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a transport error with no underlying I/O kind.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            kind: None,
        }
    }

    /// Creates a transport error carrying an underlying I/O kind.
    #[inline]
    pub fn transport_io(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self::Transport {
            message: message.into(),
            kind: Some(kind),
        }
    }

    /// Creates an abnormal closure error.
    #[inline]
    pub fn abnormal_closure(code: CloseCode) -> Self {
        Self::AbnormalClosure { code }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::AbnormalClosure { .. })
    }

    /// Returns `true` if this error indicates the peer became unreachable.
    ///
    /// Covers reset, aborted, timed-out, and unreachable I/O conditions.
    /// Such failures force an abnormal-closure cancel of the live task
    /// instead of a passive drain.
    #[inline]
    #[must_use]
    pub fn is_abnormal_disconnect(&self) -> bool {
        match self {
            Self::AbnormalClosure { .. } => true,
            Self::Transport {
                kind: Some(kind), ..
            } => matches!(
                kind,
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::TimedOut
                    | ErrorKind::HostUnreachable
                    | ErrorKind::NetworkUnreachable
            ),
            _ => false,
        }
    }

    /// Returns `true` if a later `connect` may succeed.
    ///
    /// All terminal failures leave the connection disconnected and
    /// retryable; only `Cancelled` means the connection itself is gone.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        let kind = match &err {
            WsError::Io(io) => Some(io.kind()),
            _ => None,
        };
        Self::Transport {
            message: err.to_string(),
            kind,
        }
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Self::Transport {
            message: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
