//! Session contract - the collaborator that owns a connection.
//!
//! The session is the GUI side of the system: it renders, keeps window
//! state, and decides what to do with interpreter commands. None of that
//! lives in this crate; the connection only needs these four callbacks.
//!
//! Callbacks are invoked from the connection's single dispatch flow, in
//! the order the underlying events arrived.

use serde_json::Value;

use crate::error::RideError;

/// Callbacks consumed by the connection core.
pub trait Session: Send + 'static {
    /// An application command `[command, args]` arrived after (or during)
    /// the handshake.
    fn recv(&mut self, command: &str, args: Value);

    /// The handshake completed; the connection is ready for commands.
    fn handle_connection_open(&mut self);

    /// A transport- or process-level failure. The connection is considered
    /// unusable afterward; whether to retry with a fresh connection is the
    /// session's call. A `handle_connection_close` usually follows.
    fn handle_connection_error(&mut self, err: &RideError);

    /// The transport closed. `closed_before_handshake` is true when the
    /// peer went away before negotiation finished.
    fn handle_connection_close(&mut self, closed_before_handshake: bool);
}
