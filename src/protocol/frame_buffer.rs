//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForHeader`: Need at least 4 bytes
//! - `WaitingForPayload`: Header parsed, need N more payload bytes
//! - `Discarding`: Header announced an oversized payload, skip N more bytes
//!
//! An oversized frame is skipped rather than treated as fatal: its length is
//! known from the header, so the stream stays in sync and the next frame is
//! parsed normally.
//!
//! # Example
//!
//! ```
//! use mprpc::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(b"hello").unwrap();
//!
//! // data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..3]).is_empty());
//! let frames = buffer.push(&bytes[3..]);
//! assert_eq!(&frames[0][..], b"hello");
//! ```

use bytes::{Buf, Bytes, BytesMut};

use super::wire_format::{decode_header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for complete header (need 4 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload bytes.
    WaitingForPayload { remaining: u32 },
    /// Skipping the payload of an oversized frame.
    Discarding { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u32,
    /// Oversized frames skipped so far.
    skipped: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 64MB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
            skipped: 0,
        }
    }

    /// Push data into the buffer and extract all complete frame payloads.
    ///
    /// Partial data is buffered internally for the next push. Frames larger
    /// than `max_payload_size` are never buffered; their bytes are dropped as
    /// they arrive.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one() {
            frames.push(frame);
        }
        frames
    }

    fn try_extract_one(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let len = decode_header(&self.buffer)?;
                    self.buffer.advance(HEADER_SIZE);

                    if len > self.max_payload_size {
                        tracing::warn!(
                            len,
                            max = self.max_payload_size,
                            "skipping oversized frame"
                        );
                        self.skipped += 1;
                        self.state = State::Discarding {
                            remaining: len as usize,
                        };
                    } else {
                        self.state = State::WaitingForPayload { remaining: len };
                    }
                }

                State::WaitingForPayload { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return None;
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Some(payload);
                }

                State::Discarding { remaining } => {
                    let n = remaining.min(self.buffer.len());
                    self.buffer.advance(n);
                    if n < remaining {
                        self.state = State::Discarding {
                            remaining: remaining - n,
                        };
                        return None;
                    }
                    self.state = State::WaitingForHeader;
                }
            }
        }
    }

    /// True when no partial frame is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && matches!(self.state, State::WaitingForHeader)
    }

    /// Number of oversized frames skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
            State::Discarding { .. } => "Discarding",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"hello").unwrap());

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(b"first").unwrap();
        combined.extend(build_frame(b"second").unwrap());
        combined.extend(build_frame(b"third").unwrap());

        let frames = buffer.push(&combined);

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[1][..], b"second");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_header() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"test").unwrap();

        assert!(buffer.push(&bytes[..2]).is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        let frames = buffer.push(&bytes[2..]);
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let bytes = build_frame(payload).unwrap();

        let partial_len = HEADER_SIZE + 10;
        assert!(buffer.push(&bytes[..partial_len]).is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&bytes[partial_len..]);
        assert_eq!(&frames[0][..], payload);
    }

    #[test]
    fn test_empty_payload() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&build_frame(b"").unwrap());

        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let mut buffer = FrameBuffer::with_max_payload(8);

        let mut stream = build_frame(&[0xAA; 100]).unwrap();
        stream.extend(build_frame(b"after").unwrap());

        let frames = buffer.push(&stream);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"after");
        assert_eq!(buffer.skipped(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_frame_skipped_across_pushes() {
        let mut buffer = FrameBuffer::with_max_payload(8);
        let big = build_frame(&[0xAA; 100]).unwrap();
        let small = build_frame(b"ok").unwrap();

        // the skipped bytes are not accumulated
        assert!(buffer.push(&big[..50]).is_empty());
        assert_eq!(buffer.state_name(), "Discarding");
        assert!(buffer.buffer.is_empty());

        let mut rest = big[50..].to_vec();
        rest.extend(&small);
        let frames = buffer.push(&rest);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"ok");
    }

    #[test]
    fn test_max_payload_is_inclusive() {
        let mut buffer = FrameBuffer::with_max_payload(4);
        let frames = buffer.push(&build_frame(b"four").unwrap());
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.skipped(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(b"hi").unwrap();

        let mut all_frames = Vec::new();
        for byte in &bytes {
            all_frames.extend(buffer.push(&[*byte]));
        }

        assert_eq!(all_frames.len(), 1);
        assert_eq!(&all_frames[0][..], b"hi");
    }
}
