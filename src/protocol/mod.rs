//! Protocol module - wire format and framing.
//!
//! This module implements the length-prefixed frame layer:
//! - frame encoding with the fixed magic tag
//! - receive buffer for accumulating partial reads

mod recv_buffer;
mod wire_format;

pub use recv_buffer::RecvBuffer;
pub use wire_format::{encode_frame, peek_length, HEADER_SIZE, MAGIC};
