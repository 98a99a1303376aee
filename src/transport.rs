// ABOUTME: Minimal byte-transport interface the session drives, plus a TCP implementation
// ABOUTME: The transport is a trait so tests can swap in an in-memory mock

use crate::error::{RespError, RespResult};
use bytes::BytesMut;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;

/// Lifecycle state of a byte transport, independent of the session's own
/// connection state machine (the session layers handshake semantics on
/// top of this).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// The minimal byte-transport contract the session needs: connect, write,
/// close, and a buffered read. Implementations own their own internal
/// buffering; the session supplies the accumulation buffer for reads so it
/// can hand bytes straight to the decoder without an extra copy.
pub trait ByteTransport: Send {
    fn state(&self) -> TransportState;

    /// Establishes the stream, bounded by `timeout`. Re-entry from
    /// `Connected` fails with `InvalidTransportState`.
    fn connect(&mut self, timeout: Duration) -> impl Future<Output = RespResult<()>> + Send;

    /// Writes `bytes` fully, flushing afterward. Fails with
    /// `InvalidTransportState` outside `Connected`.
    fn write_all(&mut self, bytes: &[u8]) -> impl Future<Output = RespResult<()>> + Send;

    /// Reads more bytes into `buf`, appending rather than overwriting.
    /// Returns the number of bytes read; `0` signals a clean EOF.
    fn read_buf(&mut self, buf: &mut BytesMut) -> impl Future<Output = RespResult<usize>> + Send;

    /// Idempotent close; a no-op when already `Closed`/`Disconnected`.
    fn close(&mut self) -> impl Future<Output = RespResult<()>> + Send;
}

/// TCP transport built on a buffered `tokio::net::TcpStream`: a
/// `BufWriter<TcpStream>` plus a `BytesMut` read buffer, behind the
/// `ByteTransport` trait.
#[derive(Debug)]
pub struct TcpTransport {
    addr: String,
    state: TransportState,
    stream: Option<BufWriter<TcpStream>>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            state: TransportState::Disconnected,
            stream: None,
        }
    }
}

impl ByteTransport for TcpTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn connect(&mut self, timeout: Duration) -> RespResult<()> {
        if self.state == TransportState::Connected {
            return Err(RespError::InvalidTransportState(
                "already connected".to_string(),
            ));
        }
        self.state = TransportState::Connecting;
        let connect = TcpStream::connect(&self.addr);
        let stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                self.state = TransportState::Disconnected;
                return Err(classify_connect_error(err));
            }
            Err(_elapsed) => {
                self.state = TransportState::Disconnected;
                return Err(RespError::ConnectionTimeout);
            }
        };
        self.stream = Some(BufWriter::new(stream));
        self.state = TransportState::Connected;
        tracing::debug!(addr = %self.addr, "transport connected");
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> RespResult<()> {
        if self.state != TransportState::Connected {
            return Err(RespError::InvalidTransportState(
                "write issued outside connected state".to_string(),
            ));
        }
        let stream = self.stream.as_mut().expect("connected implies a stream");
        stream
            .write_all(bytes)
            .await
            .map_err(RespError::WriteFailed)?;
        stream.flush().await.map_err(RespError::WriteFailed)
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> RespResult<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| RespError::InvalidTransportState("not connected".to_string()))?;
        let n = stream.read_buf(buf).await?;
        Ok(n)
    }

    async fn close(&mut self) -> RespResult<()> {
        if matches!(
            self.state,
            TransportState::Closed | TransportState::Disconnected
        ) {
            return Ok(());
        }
        self.state = TransportState::Closing;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = TransportState::Closed;
        Ok(())
    }
}

fn classify_connect_error(err: std::io::Error) -> RespError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionRefused => RespError::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => RespError::ConnectionReset,
        ErrorKind::TimedOut => RespError::ConnectionTimeout,
        _ => RespError::UnknownIo(err),
    }
}
