//! Wire format encoding.
//!
//! Every message travels in a length-prefixed frame:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────┐
//! │ Length     │ Magic      │ Payload      │
//! │ 4 bytes    │ 4 bytes    │ N bytes      │
//! │ int32 BE   │ "RIDE"     │ UTF-8 text   │
//! └────────────┴────────────┴──────────────┘
//! ```
//!
//! The length field counts the whole frame, header included, so the
//! smallest well-formed frame is 9 bytes (header plus one payload byte).
//! The magic tag is emitted on encode; on decode it is skipped by
//! position and never interpreted.

use bytes::{BufMut, Bytes, BytesMut};

/// Header size in bytes: 4-byte length field plus 4-byte magic tag.
pub const HEADER_SIZE: usize = 8;

/// Fixed magic tag, byte-identical on both endpoints.
pub const MAGIC: &[u8; 4] = b"RIDE";

/// Encode a payload string into a complete frame.
///
/// The length field equals `HEADER_SIZE + payload byte count`.
///
/// # Example
///
/// ```
/// use ride_client::protocol::{encode_frame, HEADER_SIZE};
///
/// let frame = encode_frame("UsingProtocol=2");
/// assert_eq!(frame.len(), HEADER_SIZE + 15);
/// assert_eq!(&frame[4..8], b"RIDE");
/// ```
pub fn encode_frame(payload: &str) -> Bytes {
    let total = HEADER_SIZE + payload.len();
    let mut buf = BytesMut::with_capacity(total);
    buf.put_i32(total as i32);
    buf.put_slice(MAGIC);
    buf.put_slice(payload.as_bytes());
    buf.freeze()
}

/// Peek the length field from the front of a buffer.
///
/// Returns `None` when fewer than 4 bytes are available. The value is
/// returned as `i32` because a misbehaving peer can put anything in the
/// field, including zero or a negative number.
pub fn peek_length(buf: &[u8]) -> Option<i32> {
    if buf.len() < 4 {
        return None;
    }
    Some(i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}
