//! Receive buffer for accumulating partial reads.
//!
//! Inbound chunks are appended as they arrive from the transport; complete
//! frames are extracted with [`RecvBuffer::next_payload`], called in a loop
//! until it reports that more data is needed. One chunk may carry several
//! frames, a fraction of one, or a mix of both — the frame sequence is the
//! same no matter how the byte stream was split into chunks.
//!
//! Malformed length fields are recovered locally so the stream can
//! resynchronize:
//! - `length <= 0` drops the entire remaining buffer (a zero-byte skip
//!   would never make forward progress);
//! - `0 < length <= 8` skips exactly `length` bytes, leaving any frames
//!   behind the bad one intact.

use bytes::{Buf, BytesMut};

use super::wire_format::{peek_length, HEADER_SIZE};
use crate::error::{Result, RideError};

/// Buffer for accumulating inbound bytes and extracting frame payloads.
pub struct RecvBuffer {
    buffer: BytesMut,
}

impl RecvBuffer {
    /// Create an empty receive buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
        }
    }

    /// Append a chunk read from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract the next complete payload.
    ///
    /// Returns:
    /// - `Ok(Some(payload))` — a complete frame was consumed;
    /// - `Ok(None)` — more data is needed, buffer unchanged;
    /// - `Err(RideError::Frame)` — a malformed frame was skipped; the
    ///   error is recoverable and the caller should keep looping.
    pub fn next_payload(&mut self) -> Result<Option<String>> {
        let Some(length) = peek_length(&self.buffer) else {
            return Ok(None);
        };

        if length <= 0 {
            let dropped = self.buffer.len();
            self.buffer.clear();
            return Err(RideError::Frame(format!(
                "length field {length} cannot be skipped; dropped {dropped} buffered bytes"
            )));
        }

        let length = length as usize;
        if length <= HEADER_SIZE {
            if length > self.buffer.len() {
                return Ok(None);
            }
            self.buffer.advance(length);
            return Err(RideError::Frame(format!(
                "length field {length} too small for a payload; skipped {length} bytes"
            )));
        }

        if length > self.buffer.len() {
            return Ok(None);
        }

        let frame = self.buffer.split_to(length);
        let payload = String::from_utf8_lossy(&frame[HEADER_SIZE..]).into_owned();
        Ok(Some(payload))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}
