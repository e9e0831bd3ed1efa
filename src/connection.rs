//! Connection façade.
//!
//! Composes the transport manager, frame codec, handshake negotiator, and
//! message router behind the surface the owning session drives. Each
//! session owns its own `Connection`; nothing is shared between
//! connections, so several sessions can hold live connections without
//! synchronization.
//!
//! Inbound flow: transport events arrive on one channel and are consumed
//! by a single dispatch task — the only place the receive buffer, the
//! handshake state, and the session callbacks are touched. Bytes are
//! therefore processed strictly in arrival order, and within one chunk
//! frames are dispatched in the order they complete.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RideError};
use crate::handshake::HandshakeNegotiator;
use crate::protocol::RecvBuffer;
use crate::router::MessageRouter;
use crate::session::Session;
use crate::transport::{OnAccept, SpawnOptions, TransportEvent, TransportManager};

/// Capacity of the transport event channel.
const EVENT_QUEUE_CAPACITY: usize = 64;

/// One connection to one interpreter, owned by one session.
pub struct Connection {
    session_id: u64,
    transport: TransportManager,
    router: MessageRouter,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    dispatch_task: JoinHandle<()>,
}

impl Connection {
    /// Create a connection for a session. No transport is acquired yet.
    pub fn new<S: Session>(session_id: u64, session: S) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let transport = TransportManager::new(session_id, events_tx.clone(), connected.clone());
        let router = MessageRouter::new(connected.clone());
        let dispatch_task = tokio::spawn(dispatch_loop(
            session_id,
            events_rx,
            Box::new(session),
            connected.clone(),
        ));
        Self {
            session_id,
            transport,
            router,
            events: events_tx,
            connected,
            dispatch_task,
        }
    }

    /// Open an outbound stream to a running interpreter.
    ///
    /// On success the handshake opens from this side. Acquisition errors
    /// are returned directly; failures after that reach the session's
    /// handlers.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let writer = self.transport.connect(host, port).await?;
        self.router.attach(writer);
        Ok(())
    }

    /// Bind and wait for the interpreter to dial in.
    ///
    /// `port` 0 picks an ephemeral port; an empty `host` binds loopback.
    /// The single accepted stream becomes the active transport and
    /// `on_accept` fires once with the peer address. No handshake hello is
    /// sent from this side; the remote opens the exchange.
    pub async fn listen(
        &mut self,
        port: u16,
        host: &str,
        on_accept: Option<OnAccept>,
    ) -> Result<SocketAddr> {
        let (local_addr, writer) = self.transport.listen(port, host, on_accept).await?;
        self.router.attach(writer);
        Ok(local_addr)
    }

    /// Launch an interpreter process.
    ///
    /// Not a data transport: reach the spawned interpreter with a separate
    /// connection's `connect` or `listen`. Exit and process errors are
    /// observed; there is no restart.
    pub fn spawn(&mut self, exe: &str, args: &[String], options: SpawnOptions) -> Result<()> {
        self.transport.spawn(exe, args, options)
    }

    /// Send a `[command, args]` pair. Fire-and-forget: with no active
    /// transport the message is dropped with a diagnostic.
    pub async fn send<T: Serialize + ?Sized>(&self, command: &str, args: &T) {
        self.router.send(command, args).await;
    }

    /// Send a bare control string over the same write path.
    pub async fn send_raw(&self, text: &str) {
        self.router.send_raw(text).await;
    }

    /// Release the active transport, if any.
    ///
    /// Idempotent and immediate: observers are detached, the connectivity
    /// flag and handshake state return to the disconnected baseline, and
    /// in-flight writes are not awaited.
    pub async fn disconnect(&mut self) {
        debug!(session = self.session_id, "disconnecting");
        self.transport.disconnect();
        self.router.detach();
        let _ = self.events.send(TransportEvent::Detached).await;
    }

    /// Bound local address when listening, otherwise not available.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Whether a transport is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispatch_task.abort();
    }
}

/// The single flow of control consuming events for one connection.
async fn dispatch_loop(
    session_id: u64,
    mut events: mpsc::Receiver<TransportEvent>,
    mut session: Box<dyn Session>,
    connected: Arc<AtomicBool>,
) {
    let mut recv = RecvBuffer::new();
    let mut negotiator = HandshakeNegotiator::new();
    let mut router = MessageRouter::new(connected.clone());
    // Set after a fatal protocol error, a close, or an explicit
    // disconnect; stale events from the released stream are ignored until
    // the next acquisition.
    let mut torn_down = false;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected { writer } => {
                recv.clear();
                negotiator.reset();
                router.attach(writer);
                torn_down = false;
                debug!(session = session_id, "transport ready, opening handshake");
                negotiator.start(&router).await;
            }
            TransportEvent::Accepted { peer, writer } => {
                recv.clear();
                negotiator.reset();
                router.attach(writer);
                torn_down = false;
                // The remote opens the exchange on accepted transports.
                debug!(session = session_id, %peer, "awaiting the interpreter's protocol offer");
            }
            TransportEvent::Data(chunk) => {
                if torn_down {
                    continue;
                }
                recv.extend(&chunk);
                loop {
                    match recv.next_payload() {
                        Ok(Some(text)) => {
                            if let Err(err) = router
                                .dispatch(&text, &mut negotiator, session.as_mut())
                                .await
                            {
                                error!(
                                    session = session_id,
                                    error = %err,
                                    "protocol failure, dropping connection"
                                );
                                router.shutdown().await;
                                router.detach();
                                connected.store(false, Ordering::Release);
                                recv.clear();
                                torn_down = true;
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(session = session_id, error = %err, "skipping malformed frame");
                        }
                    }
                }
            }
            TransportEvent::Error(e) => {
                if torn_down {
                    continue;
                }
                warn!(session = session_id, error = %e, "transport error");
                session.handle_connection_error(&RideError::Io(e));
            }
            TransportEvent::Closed => {
                if torn_down {
                    continue;
                }
                connected.store(false, Ordering::Release);
                router.detach();
                torn_down = true;
                let before_handshake = !negotiator.is_established();
                if before_handshake {
                    error!(
                        session = session_id,
                        "connection closed before handshake completed"
                    );
                } else {
                    info!(session = session_id, "connection closed");
                }
                session.handle_connection_close(before_handshake);
            }
            TransportEvent::ProcessExit { code, signal } => {
                info!(session = session_id, ?code, ?signal, "interpreter process exited");
            }
            TransportEvent::ProcessError(e) => {
                warn!(session = session_id, error = %e, "interpreter process error");
                session.handle_connection_error(&RideError::Io(e));
            }
            TransportEvent::Detached => {
                recv.clear();
                negotiator.reset();
                router.detach();
                torn_down = true;
            }
        }
    }
}
