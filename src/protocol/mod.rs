//! Protocol module - length-prefixed framing for stream transports.
//!
//! - 4-byte length header encoding/decoding
//! - Frame buffer for accumulating partial reads

mod frame_buffer;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    build_frame, checked_payload_len, decode_header, encode_header, DEFAULT_MAX_PAYLOAD_SIZE,
    HEADER_SIZE,
};
