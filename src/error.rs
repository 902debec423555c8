//! Error types for mprpc.
//!
//! Only local failures surface as [`RpcError`]. Failures that belong to a
//! particular call (timeout, lost connection, remote error) travel inside the
//! returned [`Message`](crate::Message) instead.

use thiserror::Error;

use crate::message::CallId;

/// Main error type for all mprpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration files only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Conversion between a value tree and a typed value failed.
    #[error("Value conversion error: {0}")]
    Value(#[from] rmpv::ext::Error),

    /// Protocol error (malformed envelope, oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A waiter is already registered for this call id.
    #[error("Call id {0} already has a live waiter")]
    DuplicateCallId(CallId),

    /// The session was closed with `close()`.
    #[error("Session closed")]
    Closed,

    /// No transport peer is registered under this address.
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
