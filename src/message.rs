//! Inbound payload classification.
//!
//! Decoded frame payloads fall into a handful of shapes: the two raw
//! control strings used during the handshake, the legacy-dialect marker,
//! and JSON command pairs. Classification is pure; acting on the result
//! (and logging discards) is the router's job.

use serde_json::Value;

/// Prefix of the protocol-offer control string.
pub const SUPPORTED_PROTOCOLS_PREFIX: &str = "SupportedProtocols=";

/// Prefix of the protocol-selection control string.
pub const USING_PROTOCOL_PREFIX: &str = "UsingProtocol=";

/// A classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `SupportedProtocols=<comma-separated ints>`; carries the offer list.
    SupportedProtocols(String),
    /// `UsingProtocol=<int>`; carries the version text.
    UsingProtocol(String),
    /// First byte `<`: the peer speaks the pre-framing dialect.
    Legacy,
    /// A two-element `[command, args]` pair.
    Command(String, Value),
    /// Started like a command but did not parse as a two-element pair.
    Malformed(String),
    /// None of the above; dropped by the router.
    Unrecognized(String),
}

impl Payload {
    /// Classify a decoded payload string.
    pub fn classify(text: &str) -> Payload {
        if let Some(offered) = text.strip_prefix(SUPPORTED_PROTOCOLS_PREFIX) {
            return Payload::SupportedProtocols(offered.to_owned());
        }
        if let Some(version) = text.strip_prefix(USING_PROTOCOL_PREFIX) {
            return Payload::UsingProtocol(version.to_owned());
        }
        if text.starts_with('<') {
            return Payload::Legacy;
        }
        if text.starts_with('[') {
            return match serde_json::from_str::<(String, Value)>(text) {
                Ok((command, args)) => Payload::Command(command, args),
                Err(e) => Payload::Malformed(e.to_string()),
            };
        }
        Payload::Unrecognized(text.to_owned())
    }
}
