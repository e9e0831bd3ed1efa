//! TCP stream tasks: read loop, writer loop, single-accept loop.
//!
//! Each connected stream gets one read task and one writer task. The read
//! task turns socket readiness into `TransportEvent`s; the writer task
//! drains the outbound queue. Both watch the acquisition's shutdown signal
//! and exit as soon as it flips, which is how `disconnect()` detaches
//! observers without touching the tasks directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{OnAccept, OutboundMsg, TransportEvent, WriterHandle};

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Spawn the read loop for a connected stream.
///
/// Emits `Data` for every chunk and `Closed` on EOF. A read error emits
/// `Error` followed by `Closed`: the error does not by itself end the
/// connection's bookkeeping, the close does.
pub(crate) fn spawn_read_task<R>(
    mut reader: R,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                res = reader.read(&mut buf) => match res {
                    Ok(0) => {
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                    Ok(n) => {
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        if events.send(TransportEvent::Data(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e)).await;
                        let _ = events.send(TransportEvent::Closed).await;
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Spawn the writer loop draining the outbound frame queue.
pub(crate) fn spawn_writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<OutboundMsg>,
    events: mpsc::Sender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(OutboundMsg::Frame(frame)) => {
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            let _ = events.send(TransportEvent::Error(e)).await;
                            break;
                        }
                    }
                    Some(OutboundMsg::Shutdown) => {
                        let _ = writer.shutdown().await;
                        break;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Spawn the accept loop for a listening transport.
///
/// Accepts exactly one peer; the accepted stream becomes the active
/// transport and the listener is dropped.
#[allow(clippy::too_many_arguments)]
pub(crate) fn spawn_accept_task(
    session_id: u64,
    listener: TcpListener,
    writer: WriterHandle,
    writer_rx: mpsc::Receiver<OutboundMsg>,
    on_accept: Option<OnAccept>,
    events: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_accept = shutdown.clone();
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, peer)) => {
                    info!(session = session_id, %peer, "interpreter connected");
                    let (read_half, write_half) = stream.into_split();
                    spawn_writer_task(write_half, writer_rx, events.clone(), shutdown.clone());
                    connected.store(true, Ordering::Release);
                    // Announce before the read loop starts so no inbound
                    // byte can outrun the writer attachment.
                    let _ = events.send(TransportEvent::Accepted { peer, writer }).await;
                    spawn_read_task(read_half, events.clone(), shutdown);
                    if let Some(callback) = on_accept {
                        callback(peer);
                    }
                }
                Err(e) => {
                    warn!(session = session_id, error = %e, "listener error");
                    let _ = events.send(TransportEvent::Error(e)).await;
                }
            },
            _ = shutdown_accept.changed() => {}
        }
    })
}
