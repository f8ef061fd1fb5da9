//! Frame reassembly over a terminator-delimited byte stream (spec §4.E).
//!
//! painlessMesh's wire format has no length prefix (spec §6): each JSON
//! object is followed by a single terminator byte. We pick the null byte
//! `\0` as that terminator (a newline would collide with JSON generated by
//! a pretty-printer); `try_pop_frame` also accepts `\n` for interop with
//! peers that terminate frames that way, per spec §6's "newline-or-null"
//! wording.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame exceeds maximum size ({0} bytes buffered)")]
    Oversized(usize),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

const TERMINATORS: [u8; 2] = [0u8, b'\n'];

pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame_size: usize,
    consecutive_failures: u32,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        FrameBuffer { buf: Vec::new(), max_frame_size: 16 * 1024, consecutive_failures: 0 }
    }
}

impl FrameBuffer {
    pub fn new(max_frame_size: usize) -> Self {
        FrameBuffer { buf: Vec::new(), max_frame_size, consecutive_failures: 0 }
    }

    /// Accumulates freshly received bytes. Partial frames are retained
    /// across calls.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, if any. Malformed frames (not
    /// valid UTF-8) are reported as `FrameError`; the caller (the
    /// connection) is expected to close on persistent framing failure —
    /// see [`FrameBuffer::persistent_failure`].
    pub fn try_pop_frame(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| TERMINATORS.contains(b)) else {
                if self.buf.len() > self.max_frame_size {
                    self.consecutive_failures += 1;
                    return Err(FrameError::Oversized(self.buf.len()));
                }
                return Ok(None);
            };

            let frame_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let frame = &frame_bytes[..frame_bytes.len() - 1];
            if frame.is_empty() {
                continue; // keep-alive / stray terminator
            }

            return match String::from_utf8(frame.to_vec()) {
                Ok(s) => {
                    self.consecutive_failures = 0;
                    Ok(Some(s))
                }
                Err(_) => {
                    self.consecutive_failures += 1;
                    Err(FrameError::InvalidUtf8)
                }
            };
        }
    }

    /// Whether framing has failed enough in a row that the connection
    /// should give up and close (spec §4.E: "close on persistent framing
    /// failure").
    pub fn persistent_failure(&self) -> bool {
        self.consecutive_failures >= 3
    }

    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_a_frame_split_across_feeds() {
        let mut fb = FrameBuffer::default();
        fb.feed(b"{\"type\":3,");
        assert_eq!(fb.try_pop_frame().unwrap(), None);
        fb.feed(b"\"from\":1}\0");
        assert_eq!(fb.try_pop_frame().unwrap(), Some("{\"type\":3,\"from\":1}".to_string()));
    }

    #[test]
    fn accepts_newline_terminator_too() {
        let mut fb = FrameBuffer::default();
        fb.feed(b"{}\n");
        assert_eq!(fb.try_pop_frame().unwrap(), Some("{}".to_string()));
    }

    #[test]
    fn retains_partial_frame_and_emits_multiple_queued_frames() {
        let mut fb = FrameBuffer::default();
        fb.feed(b"{\"a\":1}\0{\"b\":2}\0{\"c\":3");
        assert_eq!(fb.try_pop_frame().unwrap(), Some("{\"a\":1}".to_string()));
        assert_eq!(fb.try_pop_frame().unwrap(), Some("{\"b\":2}".to_string()));
        assert_eq!(fb.try_pop_frame().unwrap(), None);
        assert_eq!(fb.pending_bytes(), 7);
    }

    #[test]
    fn oversized_unterminated_buffer_errors() {
        let mut fb = FrameBuffer::new(4);
        fb.feed(b"12345");
        assert_eq!(fb.try_pop_frame(), Err(FrameError::Oversized(5)));
    }

    #[test]
    fn invalid_utf8_is_reported_and_counts_toward_persistent_failure() {
        let mut fb = FrameBuffer::default();
        for _ in 0..3 {
            fb.feed(&[0xFF, 0xFE, 0]);
            assert!(fb.try_pop_frame().is_err());
        }
        assert!(fb.persistent_failure());
    }
}
