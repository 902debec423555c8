//! Stream framing.
//!
//! Stream transports carry one envelope per frame:
//! ```text
//! ┌──────────────┬────────────────────┐
//! │ Length       │ Payload            │
//! │ 4 bytes      │ Length bytes       │
//! │ uint32 BE    │ msgpack envelope   │
//! └──────────────┴────────────────────┘
//! ```

use crate::error::{Result, RpcError};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Encode the length header for a payload of `len` bytes.
///
/// # Example
///
/// ```
/// use mprpc::protocol::encode_header;
///
/// assert_eq!(encode_header(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_header(len: u32) -> [u8; HEADER_SIZE] {
    len.to_be_bytes()
}

/// Decode a length header. Returns `None` if the buffer is too short.
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Length header value for a payload of `len` bytes, refusing anything over
/// `max`.
///
/// # Errors
///
/// `Protocol` when `len` exceeds `max` (or `u32::MAX`).
pub fn checked_payload_len(len: usize, max: u32) -> Result<u32> {
    match u32::try_from(len) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(RpcError::Protocol(format!(
            "Payload size {len} exceeds maximum {max}"
        ))),
    }
}

/// Build a complete frame (header + payload) in one buffer.
///
/// # Errors
///
/// `Protocol` when the payload does not fit a `u32` length.
pub fn build_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = checked_payload_len(payload.len(), u32::MAX)?;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&encode_header(len));
    out.extend_from_slice(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian() {
        assert_eq!(encode_header(0x01020304), [1, 2, 3, 4]);
        assert_eq!(decode_header(&[1, 2, 3, 4]), Some(0x01020304));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(decode_header(&[0, 0, 1]), None);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode_header(&[0, 0, 0, 5, 9, 9]), Some(5));
    }

    #[test]
    fn test_build_frame() {
        let frame = build_frame(b"abc").unwrap();
        assert_eq!(frame, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_checked_payload_len() {
        assert_eq!(checked_payload_len(16, 16).unwrap(), 16);
        assert!(matches!(
            checked_payload_len(17, 16),
            Err(RpcError::Protocol(_))
        ));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_checked_payload_len_rejects_over_u32() {
        let len = u32::MAX as usize + 1;
        assert!(checked_payload_len(len, u32::MAX).is_err());
    }
}
