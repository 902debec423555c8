//! Decoded RPC messages and error objects.
//!
//! A [`Message`] is what the network thread hands to application code: a
//! request, a notification, a reply, or a synthetic failure produced locally
//! (timeout, lost connection). It is immutable once built and is moved, never
//! shared, between threads.

use std::time::SystemTime;

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Correlation token linking a request to its reply. `0` means "no reply
/// expected".
pub type CallId = i32;

/// Reserved method name used for keep-alive exchanges in both directions.
pub const HEARTBEAT_METHOD: &str = "$heartbeat";

/// Well-known error codes.
///
/// The negative range follows JSON-RPC; the `-3200x` codes are produced by the
/// session itself and never sent on the wire.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// The call did not receive a reply before its deadline.
    pub const TIMEOUT: i32 = -32000;
    /// The peer went silent or the transport dropped.
    pub const CONNECTION_LOST: i32 = -32001;
    /// The session was closed while the call was outstanding.
    pub const CLOSED: i32 = -32002;
}

/// Error payload of a failed call: `{code, message, data}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: String,
}

impl ErrorObject {
    /// Create an error object without extra data.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: String::new(),
        }
    }

    /// Attach free-form data.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn timeout() -> Self {
        Self::new(codes::TIMEOUT, "timeout")
    }

    pub fn connection_lost() -> Self {
        Self::new(codes::CONNECTION_LOST, "connection lost")
    }

    pub fn not_connected() -> Self {
        Self::new(codes::CONNECTION_LOST, "not connected")
    }

    pub fn closed() -> Self {
        Self::new(codes::CLOSED, "session closed")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, "method not found").with_data(method)
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, "invalid params").with_data(detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, "internal error").with_data(detail)
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.data.is_empty() {
            write!(f, " ({})", self.data)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorObject {}

/// Local failures inside a handler surface to the caller as internal errors.
impl From<crate::error::RpcError> for ErrorObject {
    fn from(err: crate::error::RpcError) -> Self {
        Self::internal(err.to_string())
    }
}

/// One RPC unit: request, notification, reply, or synthetic failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    id: CallId,
    error: Option<ErrorObject>,
    recv_time: SystemTime,
}

impl Message {
    pub(crate) fn from_parts(
        method: Option<String>,
        params: Option<Value>,
        result: Option<Value>,
        id: CallId,
        error: Option<ErrorObject>,
    ) -> Self {
        Self {
            method,
            params,
            result,
            id,
            error,
            recv_time: SystemTime::now(),
        }
    }

    /// Build a locally generated failure for call `id`.
    pub fn failure(id: CallId, error: ErrorObject) -> Self {
        Self::from_parts(None, None, None, id, Some(error))
    }

    /// Method name; present on requests and notifications.
    #[inline]
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    #[inline]
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    #[inline]
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Call id, `0` for notifications.
    #[inline]
    pub fn id(&self) -> CallId {
        self.id
    }

    #[inline]
    pub fn error(&self) -> Option<&ErrorObject> {
        self.error.as_ref()
    }

    /// Local time the message was decoded (or synthesised).
    #[inline]
    pub fn recv_time(&self) -> SystemTime {
        self.recv_time
    }

    /// Error code, `0` when the message carries no error.
    #[inline]
    pub fn error_code(&self) -> i32 {
        self.error.as_ref().map_or(0, |e| e.code)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// A request or notification (has a method name).
    #[inline]
    pub fn is_request(&self) -> bool {
        self.method.is_some()
    }

    /// A request that expects no reply.
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id == 0
    }

    pub fn is_heartbeat(&self) -> bool {
        self.method.as_deref() == Some(HEARTBEAT_METHOD)
    }

    /// Deserialize params into `T`. Missing params deserialize from nil.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        value_as(self.params.as_ref())
    }

    /// Deserialize the result into `T`. Missing result deserializes from nil.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T> {
        value_as(self.result.as_ref())
    }

    /// Split a reply into its outcome.
    pub fn into_result(self) -> std::result::Result<Value, ErrorObject> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Nil)),
        }
    }
}

fn value_as<T: DeserializeOwned>(value: Option<&Value>) -> Result<T> {
    let value = value.cloned().unwrap_or(Value::Nil);
    Ok(rmpv::ext::from_value(value)?)
}
