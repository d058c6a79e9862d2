//! Production WebSocket transport over `tokio-tungstenite`.
//!
//! Each opened task owns a spawned I/O loop that multiplexes:
//!
//! - Incoming frames from the socket (republished to the task's frame queue)
//! - Outgoing sends from the API (acknowledged per frame)
//! - Cancellation (close-frame handshake)
//!
//! Terminal socket states are reported on the event channel supplied at
//! open time; the loop exits after emitting its terminal event.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{CloseCode, Frame};
use crate::transport::{EventSender, Transport, TransportEvent, TransportTask};

// ============================================================================
// Types
// ============================================================================

/// Header used to negotiate subprotocols during the opening handshake.
const PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Socket stream produced by the client handshake.
type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Internal commands for the I/O loop.
enum TaskCommand {
    /// Send a frame and acknowledge the write.
    Send {
        frame: Frame,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Begin the close handshake.
    Cancel {
        code: CloseCode,
        reason: Option<Vec<u8>>,
    },
}

// ============================================================================
// TungsteniteTransport
// ============================================================================

/// [`Transport`] implementation backed by `tokio-tungstenite`.
///
/// Framing, masking, and the close handshake are delegated entirely to
/// `tungstenite`; this adapter only bridges its stream interface to the
/// task capability consumed by the lifecycle layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Creates the transport.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(
        &self,
        url: &Url,
        protocols: &[String],
        events: EventSender,
    ) -> Result<Arc<dyn TransportTask>> {
        let mut request = url.as_str().into_client_request()?;
        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", ")).map_err(|_| {
                Error::transport(format!("invalid subprotocol list: {protocols:?}"))
            })?;
            request.headers_mut().insert(PROTOCOL_HEADER, value);
        }

        let (stream, response) = connect_async(request).await?;

        let negotiated = response
            .headers()
            .get(PROTOCOL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        debug!(%url, protocol = ?negotiated, "websocket handshake completed");
        let _ = events.send(TransportEvent::Opened {
            protocol: negotiated,
        });

        Ok(Arc::new(TungsteniteTask::spawn(stream, events)))
    }
}

// ============================================================================
// TungsteniteTask
// ============================================================================

/// One live `tokio-tungstenite` socket session.
struct TungsteniteTask {
    /// Channel for sending commands to the I/O loop.
    command_tx: mpsc::UnboundedSender<TaskCommand>,
    /// Queue of received frames, drained by `receive`.
    frames: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl TungsteniteTask {
    /// Creates the task and spawns its I/O loop.
    fn spawn(stream: ClientStream, events: EventSender) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_io_loop(stream, command_rx, frame_tx, events));

        Self {
            command_tx,
            frames: Mutex::new(frame_rx),
        }
    }
}

#[async_trait]
impl TransportTask for TungsteniteTask {
    async fn send(&self, frame: Frame) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.command_tx
            .send(TaskCommand::Send {
                frame,
                ack: ack_tx,
            })
            .map_err(|_| Error::transport("socket task is no longer running"))?;
        ack_rx
            .await
            .map_err(|_| Error::transport("socket task terminated before acknowledging send"))?
    }

    async fn receive(&self) -> Result<Option<Frame>> {
        let mut frames = self.frames.lock().await;
        Ok(frames.recv().await)
    }

    fn cancel(&self, code: CloseCode, reason: Option<Vec<u8>>) {
        let _ = self.command_tx.send(TaskCommand::Cancel { code, reason });
    }
}

// ============================================================================
// I/O Loop
// ============================================================================

/// I/O loop bridging the socket to the command/frame/event channels.
///
/// Exits after the first terminal condition: close handshake completion,
/// read/write failure, end of stream, or all task handles dropped.
async fn run_io_loop(
    stream: ClientStream,
    mut commands: mpsc::UnboundedReceiver<TaskCommand>,
    frames: mpsc::UnboundedSender<Frame>,
    events: EventSender,
) {
    let (mut writer, mut reader) = stream.split();
    let mut close_sent = false;

    loop {
        tokio::select! {
            message = reader.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "text frame received");
                        let _ = frames.send(Frame::Text(text.as_str().to_owned()));
                    }

                    Some(Ok(Message::Binary(data))) => {
                        trace!(len = data.len(), "binary frame received");
                        let _ = frames.send(Frame::Binary(data.to_vec()));
                    }

                    Some(Ok(Message::Close(close))) => {
                        let (code, reason) = match close {
                            Some(frame) => (
                                CloseCode::from(u16::from(frame.code)),
                                (!frame.reason.is_empty())
                                    .then(|| frame.reason.as_str().as_bytes().to_vec()),
                            ),
                            None => (CloseCode::NO_STATUS, None),
                        };
                        debug!(%code, "close frame received");
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        let _ = writer.close().await;
                        break;
                    }

                    // Ping/Pong are answered by the protocol layer.
                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        error!(error = %e, "websocket read failed");
                        let _ = events.send(TransportEvent::Completed {
                            error: Some(e.into()),
                        });
                        break;
                    }

                    None => {
                        debug!("websocket stream ended");
                        let _ = events.send(TransportEvent::Completed { error: None });
                        break;
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(TaskCommand::Send { frame, ack }) => {
                        let result = writer
                            .send(into_message(frame))
                            .await
                            .map_err(Error::from);

                        if let Err(e) = &result {
                            warn!(error = %e, "websocket write failed");
                            let error = Some(e.clone());
                            let _ = ack.send(result);
                            let _ = events.send(TransportEvent::Completed { error });
                            break;
                        }
                        let _ = ack.send(result);
                    }

                    Some(TaskCommand::Cancel { code, reason }) => {
                        if !close_sent {
                            close_sent = true;
                            debug!(%code, "starting close handshake");
                            let frame = close_frame(code, reason);
                            if let Err(e) = writer.send(Message::Close(Some(frame))).await {
                                warn!(error = %e, "failed to send close frame");
                                let _ = events.send(TransportEvent::Completed {
                                    error: Some(e.into()),
                                });
                                break;
                            }
                        }
                        // Keep reading until the peer acknowledges the close.
                    }

                    None => {
                        debug!("task handle dropped, closing socket");
                        let _ = writer.close().await;
                        break;
                    }
                }
            }
        }
    }

    debug!("websocket I/O loop terminated");
}

// ============================================================================
// Conversions
// ============================================================================

/// Converts an outgoing frame into a `tungstenite` message.
fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
    }
}

/// Builds the outgoing close frame for a cancellation request.
fn close_frame(code: CloseCode, reason: Option<Vec<u8>>) -> CloseFrame {
    let reason = reason
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    CloseFrame {
        code: WsCloseCode::from(code.as_u16()),
        reason: reason.into(),
    }
}

// ============================================================================
// Tests
// ============================================================================
