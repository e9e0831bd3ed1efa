//! # ride-client
//!
//! Transport/protocol layer connecting an IDE session to an interpreter
//! process over a byte stream.
//!
//! The crate owns message framing, the protocol-version handshake, and
//! bidirectional command dispatch. Everything user-visible — windows,
//! menus, editors — lives in the session, an external collaborator that
//! implements [`Session`] and owns a [`Connection`].
//!
//! ## Architecture
//!
//! - **protocol**: length-prefixed wire frames and the receive buffer
//! - **handshake**: the version-negotiation state machine
//! - **transport**: outbound connect, single-accept listen, or a spawned
//!   interpreter process, all surfaced as one uniform event stream
//! - **router**: outbound command encoding, inbound classification
//! - **connection**: the façade composing the above
//!
//! ## Example
//!
//! ```ignore
//! use ride_client::Connection;
//!
//! let mut connection = Connection::new(session_id, my_session);
//! connection.connect("127.0.0.1", 4502).await?;
//! // ... commands arrive via Session::recv once the handshake completes
//! connection.send("Execute", &serde_json::json!({"text": "1+1\n"})).await;
//! connection.disconnect().await;
//! ```

pub mod error;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

mod connection;

pub use connection::Connection;
pub use error::{Result, RideError};
pub use session::Session;
pub use transport::{OnAccept, SpawnOptions};
