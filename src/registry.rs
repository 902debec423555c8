//! Call registry: outstanding calls awaiting a reply.
//!
//! A [`Waiter`] is created inside `call()` before the request leaves the
//! process and is removed exactly once, by whichever comes first:
//!
//! - the network thread resolving it with the reply ([`CallRegistry::resolve`])
//! - the caller giving up after its deadline ([`CallRegistry::reclaim`])
//! - bulk cancellation on disconnect or close ([`CallRegistry::cancel_all`])
//!
//! Waiters are completed while the map lock is held. A caller whose
//! `reclaim` returns `false` can therefore rely on the slot being filled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, RpcError};
use crate::message::{CallId, ErrorObject, Message};

/// Blocks one caller until its call resolves.
#[derive(Debug, Default)]
pub struct Waiter {
    slot: Mutex<Option<Message>>,
    cond: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self::default()
    }

    /// Store the outcome and wake the blocked caller. The slot is written at
    /// most once; later completions are ignored.
    fn complete(&self, msg: Message) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(msg);
        self.cond.notify_one();
        true
    }

    /// Block until the slot is filled or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.is_none() {
            if self.cond.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.take()
    }

    /// Take the outcome without blocking.
    pub fn take(&self) -> Option<Message> {
        self.slot.lock().take()
    }
}

/// Map of call id to waiter.
#[derive(Debug, Default)]
pub struct CallRegistry {
    waiters: Mutex<HashMap<CallId, Arc<Waiter>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`.
    ///
    /// # Errors
    ///
    /// `DuplicateCallId` if a live waiter already exists. The id counter makes
    /// this unreachable in practice, so it is logged as a bug.
    pub fn register(&self, id: CallId) -> Result<Arc<Waiter>> {
        let mut waiters = self.waiters.lock();
        if waiters.contains_key(&id) {
            tracing::error!(call_id = id, "call id already has a live waiter");
            return Err(RpcError::DuplicateCallId(id));
        }
        let waiter = Arc::new(Waiter::new());
        waiters.insert(id, waiter.clone());
        Ok(waiter)
    }

    /// Deliver `msg` to the waiter for `id`.
    ///
    /// Returns the message back when no waiter exists, so the caller can route
    /// it elsewhere or drop it as stale.
    pub fn resolve(&self, id: CallId, msg: Message) -> std::result::Result<(), Message> {
        let mut waiters = self.waiters.lock();
        match waiters.remove(&id) {
            Some(waiter) => {
                waiter.complete(msg);
                Ok(())
            }
            None => Err(msg),
        }
    }

    /// Fail every outstanding call with `error` and clear the map.
    ///
    /// Returns the number of waiters woken.
    pub fn cancel_all(&self, error: &ErrorObject) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        for (id, waiter) in waiters.drain() {
            waiter.complete(Message::failure(id, error.clone()));
        }
        if count > 0 {
            tracing::debug!(count, code = error.code, "cancelled outstanding calls");
        }
        count
    }

    /// Remove the waiter for `id` after its caller timed out.
    ///
    /// Returns `false` if it was already resolved or cancelled.
    pub fn reclaim(&self, id: CallId) -> bool {
        self.waiters.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.waiters.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::codes;
    use std::thread;

    fn reply(id: CallId) -> Message {
        Message::from_parts(None, None, Some(rmpv::Value::from(id)), id, None)
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = CallRegistry::new();
        let waiter = registry.register(1).unwrap();

        assert!(registry.resolve(1, reply(1)).is_ok());
        assert!(!registry.contains(1));

        let msg = waiter.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(msg.id(), 1);
    }

    #[test]
    fn test_duplicate_register_fails() {
        let registry = CallRegistry::new();
        let _w = registry.register(5).unwrap();
        assert!(matches!(
            registry.register(5),
            Err(RpcError::DuplicateCallId(5))
        ));
    }

    #[test]
    fn test_resolve_without_waiter_returns_message() {
        let registry = CallRegistry::new();
        let back = registry.resolve(3, reply(3)).unwrap_err();
        assert_eq!(back.id(), 3);
    }

    #[test]
    fn test_resolve_wakes_blocked_thread() {
        let registry = Arc::new(CallRegistry::new());
        let waiter = registry.register(8).unwrap();

        let handle = thread::spawn(move || waiter.wait(Duration::from_secs(5)));

        thread::sleep(Duration::from_millis(20));
        registry.resolve(8, reply(8)).unwrap();

        let msg = handle.join().unwrap().unwrap();
        assert_eq!(msg.id(), 8);
    }

    #[test]
    fn test_wait_times_out() {
        let registry = CallRegistry::new();
        let waiter = registry.register(2).unwrap();

        let start = Instant::now();
        assert!(waiter.wait(Duration::from_millis(50)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));

        assert!(registry.reclaim(2));
        assert!(!registry.reclaim(2));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reclaim_loses_to_resolve() {
        let registry = CallRegistry::new();
        let waiter = registry.register(4).unwrap();

        registry.resolve(4, reply(4)).unwrap();

        // the late reclaim is a no-op and the reply is still there
        assert!(!registry.reclaim(4));
        assert_eq!(waiter.take().unwrap().id(), 4);
    }

    #[test]
    fn test_cancel_all() {
        let registry = Arc::new(CallRegistry::new());
        let handles: Vec<_> = (1..=4)
            .map(|id| {
                let waiter = registry.register(id).unwrap();
                thread::spawn(move || waiter.wait(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.cancel_all(&ErrorObject::connection_lost()), 4);
        assert!(registry.is_empty());

        for handle in handles {
            let msg = handle.join().unwrap().unwrap();
            assert_eq!(msg.error_code(), codes::CONNECTION_LOST);
        }
    }

    #[test]
    fn test_stale_reply_after_cancel() {
        let registry = CallRegistry::new();
        let waiter = registry.register(6).unwrap();
        registry.cancel_all(&ErrorObject::closed());

        assert!(registry.resolve(6, reply(6)).is_err());
        assert_eq!(waiter.take().unwrap().error_code(), codes::CLOSED);
    }
}
