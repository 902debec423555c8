//! Server-side connection handles.
//!
//! A [`Connection`] names one peer of a [`ServerSession`](super::ServerSession)
//! and routes sends back to it. Handles stay valid after the peer is gone;
//! sending through a stale handle simply returns `false`.

use std::sync::Weak;

use bytes::Bytes;
use serde::Serialize;

use super::ServerShared;
use crate::codec::envelope;
use crate::error::Result;
use crate::message::{CallId, ErrorObject};
use crate::protocol::checked_payload_len;

/// One addressable peer of a server session.
pub trait Connection: Send + Sync {
    /// Opaque peer address, stable for the lifetime of the connection.
    fn id(&self) -> &str;

    /// Send a raw frame payload. `false` once the connection is gone.
    fn send(&self, payload: Bytes) -> bool;

    /// Largest envelope the helpers on `dyn Connection` will send.
    fn max_payload_size(&self) -> u32 {
        u32::MAX
    }
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("id", &self.id()).finish()
    }
}

impl dyn Connection {
    /// Reply to call `id` with a result.
    ///
    /// Returns `Ok(false)` if the connection is gone or `id` is 0 (the
    /// request was a notification), and `Protocol` for an envelope over
    /// [`Connection::max_payload_size`].
    pub fn reply<R: Serialize + ?Sized>(&self, id: CallId, result: &R) -> Result<bool> {
        if id == 0 {
            return Ok(false);
        }
        self.send_envelope(envelope::encode_reply(id, result)?)
    }

    /// Reply to call `id` with an error.
    pub fn reply_error(&self, id: CallId, error: &ErrorObject) -> Result<bool> {
        if id == 0 {
            return Ok(false);
        }
        self.send_envelope(envelope::encode_error_reply(id, error)?)
    }

    /// Push a notification to the peer.
    pub fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<bool> {
        self.send_envelope(envelope::encode_notification(method, params)?)
    }

    fn send_envelope(&self, payload: Vec<u8>) -> Result<bool> {
        checked_payload_len(payload.len(), self.max_payload_size())?;
        Ok(self.send(Bytes::from(payload)))
    }
}

/// Handle given out by the server. Holds the server weakly so a handle kept
/// by application code does not keep the session alive.
pub(crate) struct ServerConnection {
    id: String,
    server: Weak<ServerShared>,
}

impl ServerConnection {
    pub(crate) fn new(id: String, server: Weak<ServerShared>) -> Self {
        Self { id, server }
    }
}

impl Connection for ServerConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, payload: Bytes) -> bool {
        match self.server.upgrade() {
            Some(server) => server.send(&self.id, payload),
            None => false,
        }
    }

    fn max_payload_size(&self) -> u32 {
        self.server
            .upgrade()
            .map_or(u32::MAX, |server| server.max_payload_size)
    }
}
