//! Call context for handlers.
//!
//! Provides methods for answering a call:
//! - `respond` - send the result
//! - `error` - send an error reply
//! - `notify` - push a notification to the same peer
//!
//! A call gets at most one reply. Handlers normally just return their result
//! and let the router reply; `respond`/`error` are for handlers that want to
//! answer early. Once a handler has replied, its return value is ignored.
//!
//! # Example
//!
//! ```ignore
//! router.method("slow", |job: Job, ctx: &CallContext| {
//!     ctx.respond(&"accepted")?;
//!     run(job);
//!     Ok(())
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use crate::error::Result;
use crate::message::{CallId, ErrorObject};
use crate::server::ConnectionRef;

/// Context passed to method handlers.
pub struct CallContext {
    conn: ConnectionRef,
    id: CallId,
    method: String,
    replied: AtomicBool,
}

impl CallContext {
    pub fn new(conn: ConnectionRef, id: CallId, method: impl Into<String>) -> Self {
        Self {
            conn,
            id,
            method: method.into(),
            replied: AtomicBool::new(false),
        }
    }

    /// Connection the call arrived on.
    #[inline]
    pub fn connection(&self) -> &ConnectionRef {
        &self.conn
    }

    /// Call id (0 = notification).
    #[inline]
    pub fn id(&self) -> CallId {
        self.id
    }

    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[inline]
    pub fn is_notification(&self) -> bool {
        self.id == 0
    }

    /// True once a reply has been sent for this call.
    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// Reply with `result`.
    ///
    /// Returns `Ok(false)` for notifications, for a second reply, and when the
    /// connection is gone.
    pub fn respond<R: Serialize + ?Sized>(&self, result: &R) -> Result<bool> {
        if !self.claim_reply() {
            return Ok(false);
        }
        self.conn.reply(self.id, result)
    }

    /// Reply with an error.
    pub fn error(&self, error: &ErrorObject) -> Result<bool> {
        if !self.claim_reply() {
            return Ok(false);
        }
        self.conn.reply_error(self.id, error)
    }

    /// Push a notification to the caller's connection.
    pub fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<bool> {
        self.conn.notify(method, params)
    }

    fn claim_reply(&self) -> bool {
        if self.is_notification() {
            return false;
        }
        if self.replied.swap(true, Ordering::AcqRel) {
            tracing::warn!(call_id = self.id, method = %self.method, "call already answered");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::envelope;
    use crate::server::Connection;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Bytes>>,
    }

    impl Connection for Recorder {
        fn id(&self) -> &str {
            "rec"
        }

        fn send(&self, payload: Bytes) -> bool {
            self.sent.lock().push(payload);
            true
        }
    }

    #[test]
    fn test_context_accessors() {
        let conn: ConnectionRef = Arc::new(Recorder::default());
        let ctx = CallContext::new(conn, 12, "echo");

        assert_eq!(ctx.id(), 12);
        assert_eq!(ctx.method(), "echo");
        assert_eq!(ctx.connection().id(), "rec");
        assert!(!ctx.is_notification());
        assert!(!ctx.has_replied());
    }

    #[test]
    fn test_respond_once() {
        let rec = Arc::new(Recorder::default());
        let ctx = CallContext::new(rec.clone(), 3, "m");

        assert!(ctx.respond(&42).unwrap());
        assert!(ctx.has_replied());
        assert!(!ctx.respond(&43).unwrap());
        assert!(!ctx.error(&ErrorObject::internal("late")).unwrap());

        let sent = rec.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(envelope::decode(&sent[0]).unwrap().result_as::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_notification_never_replies() {
        let rec = Arc::new(Recorder::default());
        let ctx = CallContext::new(rec.clone(), 0, "tick");

        assert!(!ctx.respond(&1).unwrap());
        assert!(!ctx.has_replied());
        assert!(rec.sent.lock().is_empty());
    }

    #[test]
    fn test_notify_does_not_count_as_reply() {
        let rec = Arc::new(Recorder::default());
        let ctx = CallContext::new(rec.clone(), 9, "job");

        assert!(ctx.notify("progress", &50).unwrap());
        assert!(!ctx.has_replied());

        let sent = rec.sent.lock();
        let msg = envelope::decode(&sent[0]).unwrap();
        assert!(msg.is_notification());
        assert_eq!(msg.method(), Some("progress"));
    }
}
