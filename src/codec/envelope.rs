//! RPC envelope encoding.
//!
//! Every frame payload is one MessagePack map with string keys:
//!
//! | kind         | keys                                  |
//! |--------------|---------------------------------------|
//! | request      | `method`, `params`, `id`              |
//! | notification | `method`, `params`                    |
//! | reply        | `id`, `result`                        |
//! | error reply  | `id`, `error: {code, message, data}`  |
//! | heartbeat    | `method: "$heartbeat"`, `params: {}`  |
//!
//! Outbound envelopes borrow their params/result so encoding is a single pass.
//! Inbound envelopes decode into an owned [`Message`] whose params/result are
//! `rmpv::Value` trees.

use rmpv::Value;
use serde::{Deserialize, Serialize};

use super::MsgPackCodec;
use crate::error::{Result, RpcError};
use crate::message::{CallId, ErrorObject, Message, HEARTBEAT_METHOD};

#[derive(Serialize)]
struct RequestOut<'a, P: Serialize + ?Sized> {
    method: &'a str,
    params: &'a P,
    #[serde(skip_serializing_if = "is_zero")]
    id: CallId,
}

#[derive(Serialize)]
struct ReplyOut<'a, R: Serialize + ?Sized> {
    id: CallId,
    result: &'a R,
}

#[derive(Serialize)]
struct ErrorReplyOut<'a> {
    id: CallId,
    error: &'a ErrorObject,
}

#[derive(Serialize)]
struct EmptyParams {}

#[derive(Deserialize)]
struct EnvelopeIn {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    id: Option<CallId>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

fn is_zero(id: &CallId) -> bool {
    *id == 0
}

/// Encode a request. An `id` of `0` produces a notification.
pub fn encode_request<P: Serialize + ?Sized>(method: &str, params: &P, id: CallId) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&RequestOut { method, params, id })
}

/// Encode a notification (no id, no reply expected).
pub fn encode_notification<P: Serialize + ?Sized>(method: &str, params: &P) -> Result<Vec<u8>> {
    encode_request(method, params, 0)
}

/// Encode a successful reply.
pub fn encode_reply<R: Serialize + ?Sized>(id: CallId, result: &R) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&ReplyOut { id, result })
}

/// Encode an error reply.
pub fn encode_error_reply(id: CallId, error: &ErrorObject) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&ErrorReplyOut { id, error })
}

/// Encode a heartbeat envelope (same shape in both directions).
pub fn encode_heartbeat() -> Result<Vec<u8>> {
    encode_notification(HEARTBEAT_METHOD, &EmptyParams {})
}

/// Decode one frame payload into a [`Message`], stamping the receive time.
///
/// # Errors
///
/// Fails on invalid MessagePack, on fields of the wrong type, and on envelopes
/// that carry neither a method nor an id.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    let env: EnvelopeIn = MsgPackCodec::decode(bytes)?;

    if env.method.is_none() && env.id.is_none() {
        return Err(RpcError::Protocol(
            "envelope carries neither method nor id".to_string(),
        ));
    }

    Ok(Message::from_parts(
        env.method,
        env.params,
        env.result,
        env.id.unwrap_or(0),
        env.error,
    ))
}
