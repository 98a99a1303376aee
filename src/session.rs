// ABOUTME: The connection core: handshake, FIFO reply correlation, deadlines, and teardown
// ABOUTME: Runs as a spawned actor task owning the transport, decoder, encoder, and reply FIFO

use crate::config::SessionOptions;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{RespError, RespResult};
use crate::transport::{ByteTransport, TcpTransport};
use crate::value::{Arg, Reply, Value};

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);

/// The session's connection state machine. `Disconnected` is the only
/// initial state; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Disconnecting,
    Closed,
    Error,
}

/// A correlation slot in the reply FIFO. `Tombstone` is left behind by a
/// fired deadline or an explicit cancellation so the eventual late reply is
/// discarded instead of mis-assigned to the next live command.
enum PendingSlot {
    Live(oneshot::Sender<RespResult<Value>>),
    Tombstone,
}

enum ActorCommand {
    Connect {
        resp: oneshot::Sender<RespResult<()>>,
    },
    Submit {
        id: u64,
        verb: String,
        args: Vec<Arg>,
        resolver: oneshot::Sender<RespResult<Value>>,
    },
    Expire {
        id: u64,
    },
    Close {
        resp: oneshot::Sender<RespResult<()>>,
    },
}

/// A handle to an in-flight command, returned by [`Session::submit`].
/// Awaiting it directly bypasses the deadline the convenience [`Session::send`]
/// wrapper applies; callers that need a custom timeout or manual cancellation
/// use this instead.
pub struct PendingCommand {
    id: u64,
    rx: oneshot::Receiver<RespResult<Value>>,
}

/// A cheap, cloneable handle to a live connection.
///
/// All real state (transport, decoder, encoder, FIFO) lives on a spawned
/// task; a `Session` is just a sender into that task's command queue, the
/// same shape as an owned-task connection manager.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::Sender<ActorCommand>,
    command_timeout: Duration,
    state_rx: watch::Receiver<ConnectionState>,
    auto_connect: bool,
}

impl Session {
    /// Opens a TCP connection to `options.host:options.port`, performs the
    /// `HELLO 3` handshake, and spawns the background actor. Returns the
    /// session handle plus the channel push frames are delivered on.
    ///
    /// This always connects before returning, regardless of
    /// `options.auto_connect`; that flag only governs what
    /// [`Session::submit`]/[`Session::send`] do with a session built via
    /// [`Session::new`] instead.
    pub async fn connect(
        options: SessionOptions,
    ) -> RespResult<(Session, mpsc::UnboundedReceiver<Reply>)> {
        let addr = format!("{}:{}", options.host, options.port);
        let transport = TcpTransport::new(addr);
        Self::connect_with_transport(transport, options).await
    }

    /// Same as [`Session::connect`] but driven by a caller-supplied
    /// transport, the seam tests use to exercise the session without a
    /// real socket.
    pub async fn connect_with_transport<T>(
        transport: T,
        options: SessionOptions,
    ) -> RespResult<(Session, mpsc::UnboundedReceiver<Reply>)>
    where
        T: ByteTransport + 'static,
    {
        let (session, push_rx) = Self::new_with_transport(transport, options)?;
        session.connect_now().await?;
        Ok((session, push_rx))
    }

    /// Builds a session without touching the transport: the actor task is
    /// spawned immediately but stays `Disconnected` until
    /// [`Session::connect_now`] is called explicitly, or implicitly by
    /// [`Session::submit`]/[`Session::send`] when `options.auto_connect` is
    /// set (the default).
    pub fn new(options: SessionOptions) -> RespResult<(Session, mpsc::UnboundedReceiver<Reply>)> {
        let addr = format!("{}:{}", options.host, options.port);
        let transport = TcpTransport::new(addr);
        Self::new_with_transport(transport, options)
    }

    /// Same as [`Session::new`] but driven by a caller-supplied transport.
    pub fn new_with_transport<T>(
        transport: T,
        options: SessionOptions,
    ) -> RespResult<(Session, mpsc::UnboundedReceiver<Reply>)>
    where
        T: ByteTransport + 'static,
    {
        options.validate()?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let actor = Actor {
            transport,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            fifo: VecDeque::new(),
            commands: command_rx,
            push_tx,
            state: ConnectionState::Disconnected,
            state_tx,
            connect_timeout: options.connect_timeout,
        };
        tokio::spawn(actor.run());

        Ok((
            Session {
                commands: command_tx,
                command_timeout: options.command_timeout,
                state_rx,
                auto_connect: options.auto_connect,
            },
            push_rx,
        ))
    }

    /// The session's current connection state, as last observed by the
    /// owning actor task. Read-only: the actor is the sole writer.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Opens the transport and runs the `HELLO 3` handshake, regardless of
    /// `auto_connect`. A no-op returning `Ok(())` if already connected; waits
    /// out an in-flight connect triggered elsewhere instead of starting a
    /// second one.
    pub async fn connect_now(&self) -> RespResult<()> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Connect { resp })
            .await
            .map_err(|_| RespError::ConnectionRequired)?;
        rx.await.map_err(|_dropped| RespError::ConnectionClosed)?
    }

    /// Implements the submit-path connection gate: connect on first use when
    /// `auto_connect` is enabled, wait out a connect already in flight, or
    /// fail with `connection-required` when neither applies.
    async fn ensure_ready(&self) -> RespResult<()> {
        loop {
            match self.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected if self.auto_connect => {
                    return self.connect_now().await;
                }
                ConnectionState::Connecting | ConnectionState::Handshaking => {
                    let mut rx = self.state_rx.clone();
                    if rx.changed().await.is_err() {
                        return Err(RespError::ConnectionClosed);
                    }
                }
                _ => return Err(RespError::ConnectionRequired),
            }
        }
    }

    /// Enqueues a command and returns a handle to its eventual reply,
    /// without applying a deadline. Use [`Session::send`] for the common
    /// case of awaiting with the configured `command_timeout`.
    ///
    /// Gated on the connection being ready first: see [`Session::ensure_ready`].
    pub async fn submit(
        &self,
        verb: impl Into<String>,
        args: Vec<Arg>,
    ) -> RespResult<PendingCommand> {
        self.ensure_ready().await?;

        let id = NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed);
        let (resolver, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Submit {
                id,
                verb: verb.into(),
                args,
                resolver,
            })
            .await
            .map_err(|_| RespError::ConnectionRequired)?;
        Ok(PendingCommand { id, rx })
    }

    /// The public send surface: submits a command and awaits its reply,
    /// bounded by the session's `command_timeout`. A decorated reply's
    /// attributes sidecar survives as `Value::Attributed`.
    pub async fn send(&self, verb: impl Into<String>, args: Vec<Arg>) -> RespResult<Value> {
        let pending = self.submit(verb, args).await?;
        self.await_pending(pending).await
    }

    async fn await_pending(&self, pending: PendingCommand) -> RespResult<Value> {
        let PendingCommand { id, rx } = pending;
        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_dropped)) => Err(RespError::ConnectionClosed),
            Err(_elapsed) => {
                let _ = self.commands.send(ActorCommand::Expire { id }).await;
                Err(RespError::CommandTimeout)
            }
        }
    }

    /// Cancels a previously submitted command. Behaves identically to a
    /// deadline firing: the FIFO slot tombstones so the eventual reply is
    /// discarded instead of mis-correlated.
    pub async fn cancel(&self, pending: PendingCommand) {
        let _ = self.commands.send(ActorCommand::Expire { id: pending.id }).await;
        drop(pending.rx);
    }

    /// Fails every pending command with `connection-closed`, closes the
    /// transport, and stops the actor task.
    pub async fn close(&self) -> RespResult<()> {
        let (resp, rx) = oneshot::channel();
        self.commands
            .send(ActorCommand::Close { resp })
            .await
            .map_err(|_| RespError::ConnectionClosed)?;
        rx.await.unwrap_or(Ok(()))
    }
}

impl PendingCommand {
    /// Awaits this command's reply with no deadline of its own.
    pub async fn wait(self) -> RespResult<Value> {
        self.rx.await.map_err(|_dropped| RespError::ConnectionClosed)?
    }
}

struct Actor<T: ByteTransport> {
    transport: T,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: BytesMut,
    fifo: VecDeque<(u64, PendingSlot)>,
    commands: mpsc::Receiver<ActorCommand>,
    push_tx: mpsc::UnboundedSender<Reply>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    connect_timeout: Duration,
}

impl<T: ByteTransport> Actor<T> {
    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    async fn run(mut self) {
        loop {
            self.drain_decoder();

            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(ActorCommand::Connect { resp }) => {
                            self.handle_connect(resp).await;
                        }
                        Some(ActorCommand::Submit { id, verb, args, resolver }) => {
                            if self.state != ConnectionState::Connected {
                                let _ = resolver.send(Err(RespError::ConnectionRequired));
                                continue;
                            }
                            self.fifo.push_back((id, PendingSlot::Live(resolver)));
                            self.encoder.encode_command(&verb, &args);
                            let bytes = self.encoder.take();
                            if self.transport.write_all(&bytes).await.is_err() {
                                self.teardown(|| RespError::ConnectionClosed);
                                let _ = self.transport.close().await;
                                return;
                            }
                        }
                        Some(ActorCommand::Expire { id }) => {
                            if let Some(entry) = self.fifo.iter_mut().find(|(sid, _)| *sid == id) {
                                entry.1 = PendingSlot::Tombstone;
                            }
                        }
                        Some(ActorCommand::Close { resp }) => {
                            self.teardown(|| RespError::ConnectionClosed);
                            let _ = self.transport.close().await;
                            self.set_state(ConnectionState::Closed);
                            let _ = resp.send(Ok(()));
                            return;
                        }
                        None => {
                            // every Session handle dropped; no one left to answer, so just close.
                            let _ = self.transport.close().await;
                            return;
                        }
                    }
                }
                result = self.transport.read_buf(&mut self.read_buf), if self.state == ConnectionState::Connected => {
                    match result {
                        Ok(0) => {
                            self.teardown(|| RespError::ConnectionClosed);
                            let _ = self.transport.close().await;
                            return;
                        }
                        Ok(_n) => {
                            let chunk = self.read_buf.split().freeze();
                            if let Err(decode_err) = self.decoder.feed(&chunk) {
                                self.teardown(|| RespError::Protocol(decode_err.clone()));
                                let _ = self.transport.close().await;
                                return;
                            }
                        }
                        Err(_err) => {
                            self.teardown(|| RespError::ConnectionClosed);
                            let _ = self.transport.close().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Handles one `Connect` command. Idempotent from `Connected`; a retry
    /// from `Error` is allowed (an explicit caller action, not the automatic
    /// reconnect this crate deliberately leaves out).
    async fn handle_connect(&mut self, resp: oneshot::Sender<RespResult<()>>) {
        match self.state {
            ConnectionState::Connected => {
                let _ = resp.send(Ok(()));
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.set_state(ConnectionState::Connecting);
                if let Err(err) = self.transport.connect(self.connect_timeout).await {
                    self.set_state(ConnectionState::Error);
                    let _ = resp.send(Err(err));
                    return;
                }
                self.set_state(ConnectionState::Handshaking);
                match self.perform_handshake().await {
                    Ok(()) => {
                        self.set_state(ConnectionState::Connected);
                        tracing::debug!("session handshake complete");
                        let _ = resp.send(Ok(()));
                    }
                    Err(err) => {
                        self.set_state(ConnectionState::Error);
                        let _ = self.transport.close().await;
                        let _ = resp.send(Err(err));
                    }
                }
            }
            ConnectionState::Connecting | ConnectionState::Handshaking | ConnectionState::Disconnecting => {
                let _ = resp.send(Err(RespError::ConnectionRequired));
            }
            ConnectionState::Closed => {
                let _ = resp.send(Err(RespError::ConnectionClosed));
            }
        }
    }

    async fn perform_handshake(&mut self) -> RespResult<()> {
        self.encoder.encode_command("HELLO", &[Arg::from("3")]);
        let handshake_bytes = self.encoder.take();
        self.transport.write_all(&handshake_bytes).await?;

        let reply = loop {
            if let Some(reply) = self.decoder.next_reply() {
                break reply;
            }
            let n = tokio::time::timeout(self.connect_timeout, self.transport.read_buf(&mut self.read_buf))
                .await
                .map_err(|_elapsed| RespError::ConnectionTimeout)??;
            if n == 0 {
                return Err(RespError::HandshakeFailed(
                    "connection closed during handshake".to_string(),
                ));
            }
            let chunk = self.read_buf.split().freeze();
            self.decoder.feed(&chunk).map_err(RespError::Protocol)?;
        };

        if let Value::Error { code, message } = &reply.value {
            let label = code.as_deref().unwrap_or("ERR");
            return Err(RespError::HandshakeFailed(format!("{label} {message}")));
        }
        Ok(())
    }

    /// Delivers every buffered push frame and resolves every buffered reply
    /// against the FIFO. Pushes are delivered synchronously and must never
    /// block; the unbounded channel send here never awaits.
    fn drain_decoder(&mut self) {
        while let Some(push) = self.decoder.next_push() {
            let _ = self.push_tx.send(push);
        }
        while let Some(reply) = self.decoder.next_reply() {
            self.dispatch_reply(reply);
        }
    }

    fn dispatch_reply(&mut self, reply: Reply) {
        match self.fifo.pop_front() {
            Some((_, PendingSlot::Live(resolver))) => {
                let _ = resolver.send(reply_to_result(reply));
            }
            Some((_, PendingSlot::Tombstone)) => {}
            None => {
                tracing::warn!("unsolicited reply with no pending command to correlate it with");
            }
        }
    }

    fn teardown(&mut self, make_err: impl Fn() -> RespError) {
        self.set_state(ConnectionState::Error);
        while let Some((_, slot)) = self.fifo.pop_front() {
            if let PendingSlot::Live(resolver) = slot {
                let _ = resolver.send(Err(make_err()));
            }
        }
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                ActorCommand::Connect { resp } => {
                    let _ = resp.send(Err(make_err()));
                }
                ActorCommand::Submit { resolver, .. } => {
                    let _ = resolver.send(Err(make_err()));
                }
                ActorCommand::Expire { .. } => {}
                ActorCommand::Close { resp } => {
                    let _ = resp.send(Ok(()));
                }
            }
        }
    }
}

/// Resolves a decoded reply into the result handed back to the caller that
/// submitted the command. Server errors fail the command; everything else
/// succeeds, carrying its attributes sidecar along as `Value::Attributed`
/// rather than dropping it on the floor.
fn reply_to_result(reply: Reply) -> RespResult<Value> {
    match reply.value {
        Value::Error { code, message } => Err(RespError::ServerError { code, message }),
        Value::BlobError { code, message } => Err(RespError::ServerBlobError { code, message }),
        other => Ok(match reply.attributes {
            Some(attrs) => Value::Attributed(Box::new(other), attrs),
            None => other,
        }),
    }
}
