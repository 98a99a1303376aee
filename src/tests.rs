//! Integration tests driving a full `Session` against an in-memory mock
//! transport: handshake, FIFO correlation, push routing, timeouts, decode
//! failures, and teardown, all without opening a real socket.

use crate::config::SessionOptions;
use crate::error::RespError;
use crate::session::Session;
use crate::transport::{ByteTransport, TransportState};
use crate::value::{Reply, Value};

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::sync::mpsc;

/// A `ByteTransport` backed by two unbounded channels: the test drives
/// `inbound` to simulate bytes arriving from a server, and inspects
/// `outbound` to assert on what the session wrote.
struct MockTransport {
    state: TransportState,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

fn mock_pair() -> (
    MockTransport,
    mpsc::UnboundedSender<Bytes>,
    mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let transport = MockTransport {
        state: TransportState::Disconnected,
        inbound: inbound_rx,
        outbound: outbound_tx,
    };
    (transport, inbound_tx, outbound_rx)
}

impl ByteTransport for MockTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn connect(&mut self, _timeout: Duration) -> crate::error::RespResult<()> {
        self.state = TransportState::Connected;
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> crate::error::RespResult<()> {
        let _ = self.outbound.send(bytes.to_vec());
        Ok(())
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> crate::error::RespResult<usize> {
        match self.inbound.recv().await {
            Some(chunk) => {
                buf.extend_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    async fn close(&mut self) -> crate::error::RespResult<()> {
        self.state = TransportState::Closed;
        Ok(())
    }
}

fn fast_options() -> SessionOptions {
    SessionOptions::new()
        .with_connect_timeout(Duration::from_millis(500))
        .with_command_timeout(Duration::from_millis(500))
}

/// Drains `count` writes from `outbound`, in order. Used to synchronize the
/// test with the actor: once a write is observed, the corresponding FIFO
/// slot is guaranteed to already be queued.
async fn drain_writes(
    outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    count: usize,
) -> Vec<Vec<u8>> {
    let mut writes = Vec::with_capacity(count);
    for _ in 0..count {
        writes.push(outbound.recv().await.expect("actor should still be writing"));
    }
    writes
}

#[tokio::test]
async fn handshake_accepts_simple_string_ok() {
    let (transport, inbound_tx, mut outbound) = mock_pair();
    inbound_tx.send(Bytes::from_static(b"+OK\r\n")).unwrap();

    let (session, _pushes) = Session::connect_with_transport(transport, fast_options())
        .await
        .expect("handshake should succeed on simple-string OK");

    let hello = drain_writes(&mut outbound, 1).await;
    assert_eq!(hello[0], b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n".to_vec());

    drop(session);
}

#[tokio::test]
async fn handshake_accepts_map_reply_describing_server() {
    let (transport, inbound_tx, _outbound) = mock_pair();
    inbound_tx
        .send(Bytes::from_static(
            b"%2\r\n$6\r\nserver\r\n$5\r\nredis\r\n$5\r\nproto\r\n:3\r\n",
        ))
        .unwrap();

    let result = Session::connect_with_transport(transport, fast_options()).await;
    assert!(result.is_ok(), "a map reply must count as handshake success");
}

#[tokio::test]
async fn handshake_fails_on_error_reply() {
    let (transport, inbound_tx, _outbound) = mock_pair();
    inbound_tx
        .send(Bytes::from_static(b"-NOPROTO unsupported protocol version\r\n"))
        .unwrap();

    let result = Session::connect_with_transport(transport, fast_options()).await;
    assert!(matches!(result, Err(RespError::HandshakeFailed(_))));
}

async fn connected_session() -> (
    Session,
    mpsc::UnboundedSender<Bytes>,
    mpsc::UnboundedReceiver<Vec<u8>>,
    mpsc::UnboundedReceiver<Reply>,
) {
    let (transport, inbound_tx, mut outbound) = mock_pair();
    inbound_tx.send(Bytes::from_static(b"+OK\r\n")).unwrap();
    let (session, pushes) = Session::connect_with_transport(transport, fast_options())
        .await
        .expect("handshake should succeed");
    drain_writes(&mut outbound, 1).await;
    (session, inbound_tx, outbound, pushes)
}

#[tokio::test]
async fn fifo_correlation_resolves_in_submission_order() {
    let (session, inbound_tx, mut outbound, _pushes) = connected_session().await;

    let pending_a = session
        .submit("GET", vec!["a".into()])
        .await
        .expect("submit a");
    let pending_b = session
        .submit("GET", vec!["b".into()])
        .await
        .expect("submit b");

    // Both commands must have actually been written before we reply, so the
    // FIFO has both slots queued in submission order.
    drain_writes(&mut outbound, 2).await;

    inbound_tx
        .send(Bytes::from_static(b"$7\r\nvalue-a\r\n$7\r\nvalue-b\r\n"))
        .unwrap();

    let value_a = pending_a.wait().await.expect("a resolves");
    let value_b = pending_b.wait().await.expect("b resolves");

    assert_eq!(
        value_a,
        Value::BlobString(Some(Bytes::from_static(b"value-a")))
    );
    assert_eq!(
        value_b,
        Value::BlobString(Some(Bytes::from_static(b"value-b")))
    );
}

#[tokio::test]
async fn push_frames_route_separately_from_replies() {
    let (session, inbound_tx, mut outbound, mut pushes) = connected_session().await;

    let pending = session
        .submit("SUBSCRIBE", vec!["channel".into()])
        .await
        .unwrap();
    drain_writes(&mut outbound, 1).await;

    // A push frame arrives first, then the command's own reply.
    inbound_tx
        .send(Bytes::from_static(
            b">2\r\n$7\r\nmessage\r\n$5\r\nhello\r\n+OK\r\n",
        ))
        .unwrap();

    let push = pushes.recv().await.expect("a push frame should arrive");
    assert!(push.value.is_push());

    let reply = pending.wait().await.expect("command reply resolves");
    assert_eq!(reply, Value::SimpleString("OK".to_string()));
}

#[tokio::test]
async fn command_timeout_tombstones_and_discards_late_reply() {
    let (transport, inbound_tx, mut outbound) = mock_pair();
    inbound_tx.send(Bytes::from_static(b"+OK\r\n")).unwrap();

    let options = SessionOptions::new()
        .with_connect_timeout(Duration::from_millis(500))
        .with_command_timeout(Duration::from_millis(30));
    let (session, _pushes) = Session::connect_with_transport(transport, options)
        .await
        .unwrap();
    drain_writes(&mut outbound, 1).await;

    let result = session.send("GET", vec!["slow".into()]).await;
    assert!(matches!(result, Err(RespError::CommandTimeout)));
    drain_writes(&mut outbound, 1).await;

    // Give the actor time to apply the Expire before the late reply lands.
    tokio::time::sleep(Duration::from_millis(20)).await;
    inbound_tx
        .send(Bytes::from_static(b"$9\r\ntoo-late!\r\n"))
        .unwrap();

    // A second, unrelated command must resolve against its own reply, not
    // the tombstoned one the late bytes above belonged to.
    let second = session.submit("GET", vec!["fast".into()]).await.unwrap();
    drain_writes(&mut outbound, 1).await;
    inbound_tx.send(Bytes::from_static(b"+FAST-OK\r\n")).unwrap();

    let value = second.wait().await.expect("second command resolves");
    assert_eq!(value, Value::SimpleString("FAST-OK".to_string()));
}

#[tokio::test]
async fn explicit_cancel_tombstones_without_affecting_other_commands() {
    let (session, inbound_tx, mut outbound, _pushes) = connected_session().await;

    let pending_a = session.submit("GET", vec!["a".into()]).await.unwrap();
    let pending_b = session.submit("GET", vec!["b".into()]).await.unwrap();
    drain_writes(&mut outbound, 2).await;

    session.cancel(pending_a).await;

    inbound_tx
        .send(Bytes::from_static(b"+IGNORED\r\n+STILL-GOOD\r\n"))
        .unwrap();

    let value_b = pending_b.wait().await.expect("b still resolves normally");
    assert_eq!(value_b, Value::SimpleString("STILL-GOOD".to_string()));
}

#[tokio::test]
async fn decode_error_fails_all_pending_and_closes_the_session() {
    let (session, inbound_tx, mut outbound, _pushes) = connected_session().await;

    let pending_a = session.submit("GET", vec!["a".into()]).await.unwrap();
    let pending_b = session.submit("GET", vec!["b".into()]).await.unwrap();
    drain_writes(&mut outbound, 2).await;

    // 'z' is not a valid RESP3 prefix byte.
    inbound_tx.send(Bytes::from_static(b"zzz\r\n")).unwrap();

    assert!(pending_a.wait().await.is_err());
    assert!(pending_b.wait().await.is_err());

    // Give the actor task a moment to exit after tearing down.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(session.submit("PING", vec![]).await.is_err());
}

#[tokio::test]
async fn close_fails_all_pending_with_connection_closed() {
    let (session, _inbound_tx, mut outbound, _pushes) = connected_session().await;

    let pending = session.submit("GET", vec!["a".into()]).await.unwrap();
    drain_writes(&mut outbound, 1).await;

    session.close().await.expect("close should succeed");

    assert!(matches!(
        pending.wait().await,
        Err(RespError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn state_reflects_connected_then_closed() {
    use crate::session::ConnectionState;

    let (session, _inbound_tx, _outbound, _pushes) = connected_session().await;
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await.expect("close should succeed");
    // The actor updates the watch channel before answering the close request.
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn auto_connect_opens_the_transport_on_first_send() {
    use crate::session::ConnectionState;

    let (transport, inbound_tx, mut outbound) = mock_pair();
    inbound_tx.send(Bytes::from_static(b"+OK\r\n")).unwrap();

    let (session, _pushes) = Session::new_with_transport(transport, fast_options())
        .expect("construction never touches the transport");
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let pending = session
        .submit("PING", vec![])
        .await
        .expect("submit should lazily connect first");

    let writes = drain_writes(&mut outbound, 2).await;
    assert_eq!(writes[0], b"*2\r\n$5\r\nHELLO\r\n$1\r\n3\r\n".to_vec());
    assert_eq!(writes[1], b"*1\r\n$4\r\nPING\r\n".to_vec());
    assert_eq!(session.state(), ConnectionState::Connected);

    inbound_tx.send(Bytes::from_static(b"+PONG\r\n")).unwrap();
    let reply = pending.wait().await.expect("ping resolves");
    assert_eq!(reply, Value::SimpleString("PONG".to_string()));
}

#[tokio::test]
async fn without_auto_connect_send_fails_until_explicit_connect() {
    use crate::session::ConnectionState;

    let (transport, inbound_tx, mut outbound) = mock_pair();
    inbound_tx.send(Bytes::from_static(b"+OK\r\n")).unwrap();

    let options = fast_options().without_auto_connect();
    let (session, _pushes) =
        Session::new_with_transport(transport, options).expect("construction succeeds");

    let result = session.send("PING", vec![]).await;
    assert!(matches!(result, Err(RespError::ConnectionRequired)));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    session.connect_now().await.expect("explicit connect succeeds");
    drain_writes(&mut outbound, 1).await;

    let pending = session.submit("PING", vec![]).await.unwrap();
    drain_writes(&mut outbound, 1).await;
    inbound_tx.send(Bytes::from_static(b"+PONG\r\n")).unwrap();
    assert_eq!(pending.wait().await.unwrap(), Value::SimpleString("PONG".to_string()));
}

#[tokio::test]
async fn command_reply_attributes_survive_send() {
    let (session, inbound_tx, mut outbound, _pushes) = connected_session().await;

    let pending = session.submit("GET", vec!["k".into()]).await.unwrap();
    drain_writes(&mut outbound, 1).await;

    inbound_tx
        .send(Bytes::from_static(b"|1\r\n+ttl\r\n:3600\r\n+OK\r\n"))
        .unwrap();

    let value = pending.wait().await.expect("decorated reply resolves");
    assert_eq!(
        value,
        Value::Attributed(
            Box::new(Value::SimpleString("OK".to_string())),
            vec![(Value::SimpleString("ttl".to_string()), Value::Integer(3600))]
        )
    );
}
