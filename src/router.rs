//! Message routing between the wire, the negotiator, and the session.
//!
//! Outbound: commands are encoded as two-element JSON arrays, framed, and
//! queued for the writer task. Sends are fire-and-forget — with no
//! writable transport the message is dropped with a diagnostic, never
//! queued, and the caller gets no delivery signal.
//!
//! Inbound: each decoded payload is classified and dispatched. Control
//! strings drive the handshake negotiator, command pairs go to the
//! session, everything else is logged and discarded. Only protocol
//! violations (unsupported version, legacy dialect) are fatal; a payload
//! that merely fails to parse leaves the connection open.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::handshake::HandshakeNegotiator;
use crate::message::Payload;
use crate::protocol::encode_frame;
use crate::session::Session;
use crate::transport::WriterHandle;

/// Routes messages for one connection.
#[derive(Clone)]
pub struct MessageRouter {
    writer: Option<WriterHandle>,
    connected: Arc<AtomicBool>,
}

impl MessageRouter {
    /// Create a router with no transport attached.
    pub fn new(connected: Arc<AtomicBool>) -> Self {
        Self {
            writer: None,
            connected,
        }
    }

    /// Attach the writer of a freshly acquired transport.
    pub fn attach(&mut self, writer: WriterHandle) {
        self.writer = Some(writer);
    }

    /// Drop the writer; subsequent sends are diagnosed and discarded.
    pub fn detach(&mut self) {
        self.writer = None;
    }

    /// Whether a writer is currently attached.
    pub fn is_attached(&self) -> bool {
        self.writer.is_some()
    }

    fn writable(&self) -> Option<&WriterHandle> {
        if self.connected.load(Ordering::Acquire) {
            self.writer.as_ref()
        } else {
            None
        }
    }

    /// Send a `[command, args]` pair.
    pub async fn send<T: Serialize + ?Sized>(&self, command: &str, args: &T) {
        let Some(writer) = self.writable() else {
            warn!(command, "cannot send: no active transport");
            return;
        };
        let text = match serde_json::to_string(&(command, args)) {
            Ok(text) => text,
            Err(e) => {
                warn!(command, error = %e, "failed to encode command");
                return;
            }
        };
        if writer.send(encode_frame(&text)).await.is_err() {
            warn!(command, "cannot send: transport is gone");
            return;
        }
        debug!(command, "sent");
    }

    /// Send a bare control string. Same write path; handshake only.
    pub async fn send_raw(&self, text: &str) {
        let Some(writer) = self.writable() else {
            debug!(text, "cannot send raw: no active transport");
            return;
        };
        if writer.send(encode_frame(text)).await.is_err() {
            debug!(text, "cannot send raw: transport is gone");
            return;
        }
        debug!(text, "sent raw");
    }

    /// Ask the writer task to close the stream (fatal protocol errors).
    pub async fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            writer.shutdown().await;
        }
    }

    /// Classify and dispatch one decoded payload.
    ///
    /// An `Err` is a protocol violation fatal to the connection; the
    /// caller tears the transport down.
    pub async fn dispatch(
        &self,
        text: &str,
        negotiator: &mut HandshakeNegotiator,
        session: &mut dyn Session,
    ) -> Result<()> {
        trace!(payload = %preview(text), "received");
        match Payload::classify(text) {
            Payload::SupportedProtocols(offered) => {
                negotiator.on_supported_protocols(&offered, self).await;
                Ok(())
            }
            Payload::UsingProtocol(version) => negotiator.on_using_protocol(&version, session),
            Payload::Legacy => Err(negotiator.on_legacy_payload()),
            Payload::Command(command, args) => {
                session.recv(&command, args);
                Ok(())
            }
            Payload::Malformed(reason) => {
                warn!(reason = %reason, payload = %preview(text), "discarding unparseable command");
                Ok(())
            }
            Payload::Unrecognized(_) => {
                debug!(payload = %preview(text), "discarding unrecognized payload");
                Ok(())
            }
        }
    }
}

/// Truncate a payload for log lines.
fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 100;
    if text.chars().count() <= MAX_CHARS {
        text.to_owned()
    } else {
        let head: String = text.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    }
}
