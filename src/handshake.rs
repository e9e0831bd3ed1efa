//! Handshake negotiation state machine.
//!
//! Before any application command flows, the endpoints agree on a protocol
//! version. From the outbound initiator's side:
//!
//! ```text
//! Idle ──transport ready──► AwaitingProtocols
//!        send "SupportedProtocols=2"
//!
//! AwaitingProtocols ──recv "SupportedProtocols=..."──► AwaitingConfirmation
//!        send "UsingProtocol=2", Identify, Connect, GetWindowLayout
//!
//! AwaitingConfirmation ──recv "UsingProtocol=2"──► Established
//! AwaitingConfirmation ──recv "UsingProtocol=n"──► Failed
//! any state ──recv payload starting with '<'──► Failed
//! ```
//!
//! `Established` and `Failed` are terminal until the transport is released
//! and reacquired. There is deliberately no handshake timeout: a silent
//! peer parks the machine in `AwaitingProtocols` or `AwaitingConfirmation`
//! until the stream closes or the owner disconnects.

use serde_json::json;
use tracing::{debug, info};

use crate::error::{Result, RideError};
use crate::router::MessageRouter;
use crate::session::Session;

/// The protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "2";

/// Connection-wide handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No exchange yet.
    Idle,
    /// We sent our offer, waiting for the peer's.
    AwaitingProtocols,
    /// We selected a version, waiting for the peer's confirmation.
    AwaitingConfirmation,
    /// Negotiation succeeded; application commands may flow.
    Established,
    /// Negotiation failed; the connection is unusable.
    Failed,
}

impl HandshakeState {
    /// Terminal states end negotiation for this transport's lifetime.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

/// Drives the version negotiation for one connection.
pub struct HandshakeNegotiator {
    state: HandshakeState,
}

impl HandshakeNegotiator {
    /// Create a negotiator at the disconnected baseline.
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
        }
    }

    /// Current phase.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether negotiation completed successfully.
    pub fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }

    /// Return to the disconnected baseline.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
    }

    /// The outbound transport is ready: open the exchange.
    ///
    /// Only outbound connects call this. An accepted transport stays in
    /// `Idle` — the remote interpreter opens the exchange instead.
    pub async fn start(&mut self, router: &MessageRouter) {
        if self.state != HandshakeState::Idle {
            debug!(state = ?self.state, "handshake already started");
            return;
        }
        self.state = HandshakeState::AwaitingProtocols;
        router
            .send_raw(&format!("SupportedProtocols={PROTOCOL_VERSION}"))
            .await;
    }

    /// The peer announced its protocol offer.
    pub async fn on_supported_protocols(&mut self, offered: &str, router: &MessageRouter) {
        match self.state {
            // Idle happens on accepted transports: the remote sent the
            // opening offer, not us.
            HandshakeState::Idle | HandshakeState::AwaitingProtocols => {}
            state => {
                debug!(?state, offered, "ignoring protocol offer");
                return;
            }
        }
        self.state = HandshakeState::AwaitingConfirmation;
        router
            .send_raw(&format!("UsingProtocol={PROTOCOL_VERSION}"))
            .await;
        router
            .send("Identify", &json!({"apiVersion": 1, "identity": 1}))
            .await;
        router.send("Connect", &json!({"remoteId": 2})).await;
        router.send("GetWindowLayout", &json!({})).await;
    }

    /// The peer confirmed (or rejected) the selected version.
    pub fn on_using_protocol(&mut self, version: &str, session: &mut dyn Session) -> Result<()> {
        if self.state.is_terminal() {
            debug!(state = ?self.state, version, "ignoring protocol confirmation");
            return Ok(());
        }
        if version == PROTOCOL_VERSION {
            self.state = HandshakeState::Established;
            info!("handshake completed");
            session.handle_connection_open();
            Ok(())
        } else {
            self.state = HandshakeState::Failed;
            Err(RideError::UnsupportedProtocol(version.to_owned()))
        }
    }

    /// The peer spoke the pre-framing dialect; negotiation cannot proceed.
    pub fn on_legacy_payload(&mut self) -> RideError {
        self.state = HandshakeState::Failed;
        RideError::LegacyPeer
    }
}

impl Default for HandshakeNegotiator {
    fn default() -> Self {
        Self::new()
    }
}
