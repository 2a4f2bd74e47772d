//! Delimiter-scanned framing over a TCP byte stream.
//!
//! TCP delivers bytes, not messages. One `read()` may return half a frame,
//! or three frames and the start of a fourth. [`FrameBuffer`] keeps the
//! leftover bytes between reads and hands out complete frames one at a time.
//!
//! There is no length prefix on the wire: a frame ends at the first
//! delimiter byte (`|` by default). A peer that never sends a delimiter would
//! make the buffer grow forever, so [`FrameBuffer`] refuses to hold more
//! than `max_frame_len` bytes of an unfinished frame.

use crate::TransportError;

/// The byte that terminates every frame.
pub const DEFAULT_DELIMITER: u8 = b'|';

/// Upper bound on a single frame. Level payloads pushed by the host are the
/// largest frames on the wire; 4 MB leaves plenty of room for them.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Accumulates raw bytes and splits them into delimiter-terminated frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    delimiter: u8,
    max_frame_len: usize,
    /// How far into `buf` we already searched without finding a delimiter.
    /// Saves rescanning a large partial frame on every read.
    scanned: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer for the given delimiter and size limit.
    pub fn new(delimiter: u8, max_frame_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            delimiter,
            max_frame_len,
            scanned: 0,
        }
    }

    /// Appends bytes from a socket read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, without its delimiter.
    ///
    /// Empty frames (two delimiters in a row) are skipped. Returns
    /// `Ok(None)` when only a partial frame is buffered.
    ///
    /// # Errors
    /// Returns [`TransportError::FrameTooLarge`] when the partial frame
    /// exceeds the limit. The buffer is cleared because there is no way to
    /// find the start of the next frame reliably.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            let found = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == self.delimiter);

            let Some(offset) = found else {
                self.scanned = self.buf.len();
                if self.buf.len() > self.max_frame_len {
                    let len = self.buf.len();
                    self.buf.clear();
                    self.scanned = 0;
                    return Err(TransportError::FrameTooLarge {
                        len,
                        max: self.max_frame_len,
                    });
                }
                return Ok(None);
            };

            let end = self.scanned + offset;
            let frame: Vec<u8> = self.buf.drain(..=end).take(end).collect();
            self.scanned = 0;
            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }

    /// Number of bytes buffered that do not yet form a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Appends the delimiter to a payload, producing the bytes to write.
///
/// # Errors
/// Returns [`TransportError::InvalidFrame`] if the payload itself contains
/// the delimiter.
pub fn encode_frame(payload: &[u8], delimiter: u8) -> Result<Vec<u8>, TransportError> {
    if payload.contains(&delimiter) {
        return Err(TransportError::InvalidFrame(delimiter as char));
    }
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(delimiter);
    Ok(frame)
}
