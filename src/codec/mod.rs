//! Codec module - MessagePack payloads and the RPC envelope.
//!
//! - [`MsgPackCodec`] - generic MessagePack via `rmp-serde` (`to_vec_named`)
//! - [`envelope`] - the `{method, params, id, result, error}` map exchanged on
//!   the wire, and its decoding into [`Message`](crate::Message)
//!
//! # Example
//!
//! ```
//! use mprpc::codec::envelope;
//!
//! let frame = envelope::encode_request("echo", &("hi",), 7).unwrap();
//! let msg = envelope::decode(&frame).unwrap();
//! assert_eq!(msg.method(), Some("echo"));
//! assert_eq!(msg.id(), 7);
//! ```

pub mod envelope;
mod msgpack;

pub use msgpack::MsgPackCodec;
