//! Transport module - acquisition and lifecycle of the byte stream.
//!
//! Exactly one acquisition mode is active per connection:
//! - outbound connect to a running interpreter (the common case),
//! - a listening socket that accepts a single interpreter dialing in,
//! - a spawned interpreter process (observed, not a data transport).
//!
//! Whatever the mode, I/O is surfaced as one uniform stream of
//! [`TransportEvent`]s over a channel, consumed by the connection's single
//! dispatch flow:
//!
//! ```text
//! read task ────┐
//! accept task ──┼─► mpsc::Sender<TransportEvent> ─► dispatch loop
//! child watch ──┘
//! ```
//!
//! Outbound frames go the other way, through a [`WriterHandle`] feeding a
//! dedicated writer task. Releasing a transport flips a shared shutdown
//! signal that every task of the current acquisition watches, which
//! detaches all observers in one move.

pub mod process;
pub mod tcp;

pub use process::SpawnOptions;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::error::{Result, RideError};

/// Callback invoked once when a listening transport accepts its peer.
pub type OnAccept = Box<dyn FnOnce(SocketAddr) + Send + 'static>;

/// Capacity of the outbound frame queue feeding the writer task.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Uniform event stream emitted by every transport kind.
#[derive(Debug)]
pub enum TransportEvent {
    /// An outbound connect succeeded; the handle writes to the new stream.
    Connected {
        /// Writer for the freshly connected stream.
        writer: WriterHandle,
    },
    /// A listening transport accepted its single peer.
    Accepted {
        /// Remote address of the interpreter that dialed in.
        peer: SocketAddr,
        /// Writer for the accepted stream.
        writer: WriterHandle,
    },
    /// Raw bytes arrived on the stream.
    Data(Bytes),
    /// Socket- or listener-level failure. A `Closed` follows when the
    /// stream itself is affected.
    Error(std::io::Error),
    /// The stream reached EOF or was reset.
    Closed,
    /// The spawned interpreter process exited.
    ProcessExit {
        /// Exit code, when the process terminated normally.
        code: Option<i32>,
        /// Terminating signal, when killed (Unix only).
        signal: Option<i32>,
    },
    /// Waiting on the spawned interpreter failed.
    ProcessError(std::io::Error),
    /// All observers were released by `disconnect()`.
    Detached,
}

/// Message consumed by a writer task.
#[derive(Debug)]
pub enum OutboundMsg {
    /// A framed message to put on the wire.
    Frame(Bytes),
    /// Close the write side and stop.
    Shutdown,
}

/// Cheaply cloneable handle feeding frames to a writer task.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundMsg>,
}

impl WriterHandle {
    /// Create a handle and the receiving end for a (future) writer task.
    ///
    /// The task may be spawned later than the handle exists — in listen
    /// mode the stream only appears once the interpreter dials in.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMsg>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame for writing.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(OutboundMsg::Frame(frame))
            .await
            .map_err(|_| RideError::ConnectionClosed)
    }

    /// Ask the writer task to shut the stream down and exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(OutboundMsg::Shutdown).await;
    }
}

/// Owns at most one active transport for one connection.
pub struct TransportManager {
    session_id: u64,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    active: Option<Active>,
}

/// The currently held acquisition, with its shutdown signal.
enum Active {
    Outbound {
        shutdown: watch::Sender<bool>,
    },
    Listening {
        local_addr: SocketAddr,
        shutdown: watch::Sender<bool>,
    },
    Spawned {
        shutdown: watch::Sender<bool>,
    },
}

impl Active {
    fn shutdown(&self) -> &watch::Sender<bool> {
        match self {
            Active::Outbound { shutdown }
            | Active::Listening { shutdown, .. }
            | Active::Spawned { shutdown } => shutdown,
        }
    }
}

impl TransportManager {
    /// Create a manager emitting events for one connection.
    pub fn new(
        session_id: u64,
        events: mpsc::Sender<TransportEvent>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id,
            events,
            connected,
            active: None,
        }
    }

    /// Open an outbound stream to a pre-existing listener.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<WriterHandle> {
        if self.active.is_some() {
            return Err(RideError::TransportActive);
        }
        debug!(session = self.session_id, host, port, "connecting");

        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (writer, writer_rx) = WriterHandle::channel(OUTBOUND_QUEUE_CAPACITY);
        tcp::spawn_writer_task(write_half, writer_rx, self.events.clone(), shutdown_rx.clone());

        self.connected.store(true, Ordering::Release);
        self.active = Some(Active::Outbound {
            shutdown: shutdown_tx,
        });
        info!(session = self.session_id, %peer, "connected");

        // Announce before the read loop starts so no inbound byte can
        // outrun the writer attachment.
        let _ = self
            .events
            .send(TransportEvent::Connected {
                writer: writer.clone(),
            })
            .await;
        tcp::spawn_read_task(read_half, self.events.clone(), shutdown_rx);
        Ok(writer)
    }

    /// Bind and accept exactly one inbound connection.
    ///
    /// `port` 0 picks an ephemeral port; an empty `host` binds loopback.
    pub async fn listen(
        &mut self,
        port: u16,
        host: &str,
        on_accept: Option<OnAccept>,
    ) -> Result<(SocketAddr, WriterHandle)> {
        if self.active.is_some() {
            return Err(RideError::TransportActive);
        }
        let host = if host.is_empty() { "127.0.0.1" } else { host };

        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (writer, writer_rx) = WriterHandle::channel(OUTBOUND_QUEUE_CAPACITY);
        tcp::spawn_accept_task(
            self.session_id,
            listener,
            writer.clone(),
            writer_rx,
            on_accept,
            self.events.clone(),
            self.connected.clone(),
            shutdown_rx,
        );

        self.active = Some(Active::Listening {
            local_addr,
            shutdown: shutdown_tx,
        });
        info!(session = self.session_id, %local_addr, "listening for interpreter");
        Ok((local_addr, writer))
    }

    /// Launch an interpreter process and observe its lifecycle.
    pub fn spawn(&mut self, exe: &str, args: &[String], options: SpawnOptions) -> Result<()> {
        if self.active.is_some() {
            return Err(RideError::TransportActive);
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        process::spawn_interpreter(
            self.session_id,
            exe,
            args,
            options,
            self.events.clone(),
            shutdown_rx,
        )?;
        self.active = Some(Active::Spawned {
            shutdown: shutdown_tx,
        });
        Ok(())
    }

    /// Release whatever is held and detach all observers.
    ///
    /// Safe to call any number of times, including when nothing is active.
    /// Does not wait for in-flight writes to flush.
    pub fn disconnect(&mut self) {
        let Some(active) = self.active.take() else {
            debug!(session = self.session_id, "disconnect with no active transport");
            return;
        };
        let _ = active.shutdown().send(true);
        self.connected.store(false, Ordering::Release);
        info!(session = self.session_id, "transport released");
    }

    /// Bound local address, available only in listening mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.active {
            Some(Active::Listening { local_addr, .. }) => Some(*local_addr),
            _ => None,
        }
    }

    /// Whether a stream is currently connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
