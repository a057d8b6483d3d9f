use crate::error::{Result, TransportError};
use std::collections::VecDeque;

/// Lines longer than this without a newline are treated as a broken stream
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Byte queue that yields complete `\n`-terminated lines from a chunked body.
///
/// Chunks from the network rarely align with line boundaries, so bytes are
/// queued until a newline arrives. A trailing `\r` is stripped to accept
/// CRLF-framed streams.
pub struct CircularLineBuffer {
    buffer: VecDeque<u8>,
    max_line_bytes: usize,
}

impl CircularLineBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Next complete line without its terminator, `None` if no newline is queued yet.
    /// The only error is a line outgrowing `max_line_bytes`.
    pub fn next_line(&mut self) -> Option<Result<String>> {
        let newline_pos = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => {
                if self.buffer.len() > self.max_line_bytes {
                    let dropped = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(TransportError::network(format!(
                        "Stream line exceeded {} bytes ({} buffered)",
                        self.max_line_bytes, dropped
                    ))));
                }
                return None;
            }
        };

        let mut line_bytes: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        line_bytes.pop();
        if line_bytes.last() == Some(&b'\r') {
            line_bytes.pop();
        }

        // Invalid UTF-8 surfaces later as an undecodable frame
        Some(Ok(String::from_utf8_lossy(&line_bytes).into_owned()))
    }

    /// Bytes of an unterminated line still waiting for its newline
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
