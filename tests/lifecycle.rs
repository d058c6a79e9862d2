//! Connection lifecycle integration tests against the scripted mock
//! transport.

mod common;

use std::io::ErrorKind;
use std::time::Duration;

use tokio::time::sleep;
use tokio_test::assert_ok;

use socklink::{CloseCode, Error, Frame, WebSocket};

use common::{MockTransport, init_tracing, mock_url};

/// Long enough for spawned lifecycle tasks to settle.
const SETTLE: Duration = Duration::from_millis(50);

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn concurrent_connects_share_one_open() -> anyhow::Result<()> {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_auto_open(false);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let mut callers = Vec::new();
    for _ in 0..3 {
        let socket = socket.clone();
        callers.push(tokio::spawn(async move { socket.connect().await }));
    }
    sleep(SETTLE).await;

    assert_eq!(transport.open_calls(), 1);
    transport.last_task().emit_opened(None);

    for caller in callers {
        assert_ok!(caller.await?);
    }
    assert!(socket.is_connected());
    Ok(())
}

#[tokio::test]
async fn connect_is_idempotent_when_connected() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    assert_ok!(socket.connect().await);

    assert_eq!(transport.open_calls(), 1);
}

#[tokio::test]
async fn connect_records_negotiated_protocol() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_auto_open(false);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let pending = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.connect_with(&["chat.v2", "chat.v1"]).await })
    };
    sleep(SETTLE).await;
    transport.last_task().emit_opened(Some("chat.v2"));

    assert_ok!(pending.await.expect("join"));
    assert_eq!(socket.negotiated_protocol().as_deref(), Some("chat.v2"));
    assert_eq!(
        transport.opened_protocols(),
        vec![vec!["chat.v2".to_owned(), "chat.v1".to_owned()]]
    );
}

#[tokio::test]
async fn transport_failure_resolves_all_connect_callers_together() -> anyhow::Result<()> {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_auto_open(false);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let mut callers = Vec::new();
    for _ in 0..2 {
        let socket = socket.clone();
        callers.push(tokio::spawn(async move { socket.connect().await }));
    }
    sleep(SETTLE).await;
    assert_eq!(transport.open_calls(), 1);

    transport
        .last_task()
        .emit_completed(Some(Error::transport("handshake rejected")));

    for caller in callers {
        let error = caller.await?.expect_err("open never completed");
        assert!(matches!(error, Error::Transport { .. }));
        assert!(error.is_retryable());
    }
    assert!(!socket.is_connected());
    Ok(())
}

#[tokio::test]
async fn refused_open_is_retryable() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_fail_open(true);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let error = socket.connect().await.expect_err("open was refused");
    assert!(matches!(error, Error::Transport { .. }));
    assert!(!socket.is_connected());

    // A later connect starts over with a fresh task.
    transport.set_fail_open(false);
    assert_ok!(socket.connect().await);
    assert!(socket.is_connected());
    assert_eq!(transport.open_calls(), 2);
}

#[tokio::test]
async fn terminal_error_while_connecting_fails_connect() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_auto_open(false);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let pending = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.connect().await })
    };
    sleep(SETTLE).await;
    transport
        .last_task()
        .emit_completed(Some(Error::transport("handshake rejected")));

    let error = pending.await.expect("join").expect_err("connect failed");
    assert!(matches!(error, Error::Transport { .. }));
    assert!(!socket.is_connected());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn disconnect_before_connect_is_noop_success() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.disconnect().await);
    assert_eq!(transport.open_calls(), 0);
}

#[tokio::test]
async fn disconnect_closes_connection_and_stream() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let mut messages = socket.messages().expect("first subscriber");

    assert_ok!(socket.disconnect().await);

    assert!(!socket.is_connected());
    assert_eq!(socket.close_code(), Some(CloseCode::NORMAL));
    assert_eq!(transport.last_task().cancels(), vec![CloseCode::NORMAL]);
    assert!(messages.next().await.is_none());
}

#[tokio::test]
async fn disconnect_carries_requested_code() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    assert_ok!(
        socket
            .disconnect_with(CloseCode::GOING_AWAY, Some(b"maintenance".to_vec()))
            .await
    );

    assert_eq!(transport.last_task().cancels(), vec![CloseCode::GOING_AWAY]);
    assert_eq!(socket.close_code(), Some(CloseCode::GOING_AWAY));
}

#[tokio::test]
async fn concurrent_disconnects_share_one_cancel() -> anyhow::Result<()> {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let task = transport.last_task();
    task.set_ack_cancel(false);

    let mut callers = Vec::new();
    for _ in 0..3 {
        let socket = socket.clone();
        callers.push(tokio::spawn(async move { socket.disconnect().await }));
    }
    sleep(SETTLE).await;
    assert_eq!(task.cancels().len(), 1);

    task.emit_closed(CloseCode::NORMAL);
    for caller in callers {
        assert_ok!(caller.await?);
    }
    assert!(!socket.is_connected());
    Ok(())
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn send_requires_connection() {
    init_tracing();
    let socket = WebSocket::with_transport(mock_url(), MockTransport::new());

    let error = socket.send_text("hello").await.expect_err("not connected");
    assert!(matches!(error, Error::NotConnected));
}

#[tokio::test]
async fn frames_flow_in_order_until_clean_close() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let mut messages = socket.messages().expect("first subscriber");
    let task = transport.last_task();

    assert_ok!(socket.send_text("a").await);
    assert_ok!(socket.send_binary(vec![0x01, 0x02]).await);

    task.push_frame(Frame::text("first"));
    task.push_frame(Frame::binary(vec![0x09]));

    assert_eq!(
        messages.next().await.expect("frame").expect("ok"),
        Frame::text("first")
    );
    assert_eq!(
        messages.next().await.expect("frame").expect("ok"),
        Frame::binary(vec![0x09])
    );

    assert_ok!(socket.disconnect().await);
    assert!(messages.next().await.is_none());

    assert_eq!(
        task.sent(),
        vec![Frame::text("a"), Frame::binary(vec![0x01, 0x02])]
    );
}

#[tokio::test]
async fn messages_is_single_subscriber_per_epoch() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert!(socket.messages().is_none(), "no stream before connect");

    assert_ok!(socket.connect().await);
    assert!(socket.messages().is_some());
    assert!(socket.messages().is_none(), "stream already taken");
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn reconnect_while_connected_returns_new_instance() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect_with(&["alpha", "beta"]).await);
    let fresh = socket.reconnect().await.expect("reconnect");

    assert!(!fresh.ptr_eq(&socket), "live instance must not be reused");
    assert!(fresh.is_connected());
    assert!(socket.is_connected(), "original is left untouched");
    assert_eq!(transport.open_calls(), 2);

    // The remembered protocols were reused for the fresh open.
    let protocols = vec!["alpha".to_owned(), "beta".to_owned()];
    assert_eq!(
        transport.opened_protocols(),
        vec![protocols.clone(), protocols]
    );
}

#[tokio::test]
async fn reconnect_while_disconnected_reuses_instance_and_protocols() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect_with(&["alpha"]).await);
    assert_ok!(socket.disconnect().await);
    assert!(!socket.is_connected());

    let same = socket.reconnect().await.expect("reconnect");

    assert!(same.ptr_eq(&socket));
    assert!(socket.is_connected());
    assert_eq!(transport.open_calls(), 2);
    assert_eq!(
        transport.opened_protocols(),
        vec![vec!["alpha".to_owned()], vec!["alpha".to_owned()]]
    );
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn teardown_with_pending_connect_cancels_task_and_stream() {
    init_tracing();
    let transport = MockTransport::new();
    transport.set_auto_open(false);
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    let pending = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.connect().await })
    };
    sleep(SETTLE).await;

    // The stream exists as soon as the task is installed, and survives the
    // connection handles.
    let mut messages = socket.messages().expect("stream while open pending");

    drop(socket);
    pending.abort();
    let _ = pending.await;

    assert!(matches!(messages.next().await, Some(Err(Error::Cancelled))));
    assert!(messages.next().await.is_none());
    assert_eq!(transport.last_task().cancels(), vec![CloseCode::GOING_AWAY]);
}

#[tokio::test]
async fn teardown_cancels_live_task() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let mut messages = socket.messages().expect("first subscriber");
    let task = transport.last_task();

    drop(socket);

    assert!(matches!(messages.next().await, Some(Err(Error::Cancelled))));
    assert!(messages.next().await.is_none());
    assert_eq!(task.cancels(), vec![CloseCode::GOING_AWAY]);
}

// ============================================================================
// Abnormal Closure
// ============================================================================

#[tokio::test]
async fn reset_class_error_forces_one_abnormal_cancel() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let mut messages = socket.messages().expect("first subscriber");
    let task = transport.last_task();

    task.emit_completed(Some(Error::transport_io(
        "connection reset by peer",
        ErrorKind::ConnectionReset,
    )));

    // The stream terminates with the abnormal-closure error.
    match messages.next().await {
        Some(Err(Error::AbnormalClosure { code })) => assert_eq!(code, CloseCode::ABNORMAL),
        other => panic!("expected abnormal closure, got {other:?}"),
    }
    assert!(messages.next().await.is_none());

    assert!(!socket.is_connected());
    assert_eq!(task.cancels(), vec![CloseCode::ABNORMAL]);

    // A late close notification for the same task changes nothing.
    task.emit_closed(CloseCode::ABNORMAL);
    sleep(SETTLE).await;
    assert_eq!(task.cancels(), vec![CloseCode::ABNORMAL]);
    assert!(!socket.is_connected());
}

#[tokio::test]
async fn abnormal_error_fails_pending_disconnect() {
    init_tracing();
    let transport = MockTransport::new();
    let socket = WebSocket::with_transport(mock_url(), transport.clone());

    assert_ok!(socket.connect().await);
    let task = transport.last_task();
    task.set_ack_cancel(false);

    let pending = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.disconnect().await })
    };
    sleep(SETTLE).await;

    task.emit_completed(Some(Error::transport_io(
        "timed out",
        ErrorKind::TimedOut,
    )));

    let error = pending
        .await
        .expect("join")
        .expect_err("disconnect observed the failure");
    assert!(matches!(error, Error::AbnormalClosure { .. }));
    assert!(!socket.is_connected());
}
