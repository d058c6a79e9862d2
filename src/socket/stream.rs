//! Single-subscriber stream of received frames.

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Frame;

// ============================================================================
// MessageStream
// ============================================================================

/// Ordered, push-driven sequence of frames received over one connection
/// epoch.
///
/// Exactly one subscriber may hold the stream per epoch; reconnecting
/// replaces it, and the previous stream ends. The stream terminates exactly
/// once: cleanly after a requested or normal close, or with one final `Err`
/// item after an abnormal close, transport failure, or connection teardown.
pub struct MessageStream {
    /// Receiving end of the epoch's frame channel.
    receiver: mpsc::UnboundedReceiver<Result<Frame>>,
}

impl MessageStream {
    /// Creates the stream from the receiving end of an epoch's channel.
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Result<Frame>>) -> Self {
        Self { receiver }
    }

    /// Receives the next frame, suspending until one arrives or the
    /// stream terminates.
    ///
    /// Returns `None` once the stream has ended; an abnormal termination
    /// yields one final `Some(Err(_))` first.
    pub async fn next(&mut self) -> Option<Result<Frame>> {
        self.receiver.recv().await
    }
}

impl Stream for MessageStream {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
