//! Callback dispatch queue and the thread that drains it.
//!
//! The network thread never runs application code. It pushes closures onto a
//! [`DispatchQueue`]; one [`CallbackThread`] per session pops them in FIFO
//! order and runs each to completion before taking the next. All callbacks of
//! a session are therefore serialized and delivered in arrival order.
//!
//! ```text
//! network thread ─► push(task) ─► [ VecDeque ] ─► callback thread ─► app code
//! ```

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

/// A queued callback invocation.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    tasks: VecDeque<Task>,
    stopping: bool,
}

/// FIFO of pending callbacks, guarded by a mutex and signalled on push.
pub struct DispatchQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                stopping: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a task. Returns `false` (and drops the task) once stopped.
    pub fn push(&self, task: Task) -> bool {
        let mut state = self.state.lock();
        if state.stopping {
            return false;
        }
        state.tasks.push_back(task);
        self.cond.notify_one();
        true
    }

    /// Ask the drain loop to exit once the queue is empty.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopping = true;
        self.cond.notify_all();
    }

    /// Next task, blocking while the queue is empty. `None` after `stop()`
    /// once everything queued before it has been handed out.
    fn next(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.tasks.pop_front() {
                return Some(task);
            }
            if state.stopping {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Drain loop. Runs every task outside the lock; a panicking task is
    /// logged and does not stop the loop.
    pub fn run(&self) {
        while let Some(task) = self.next() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(%reason, "callback panicked");
            }
        }
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedicated thread draining a [`DispatchQueue`].
pub struct CallbackThread {
    queue: Arc<DispatchQueue>,
    handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl CallbackThread {
    /// Spawn a named callback thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let queue = Arc::new(DispatchQueue::new());
        let worker = queue.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker.run())?;
        let thread_id = handle.thread().id();

        Ok(Self {
            queue,
            handle: Some(handle),
            thread_id,
        })
    }

    /// Shared handle to the queue, for producers on other threads.
    pub fn queue(&self) -> Arc<DispatchQueue> {
        self.queue.clone()
    }

    /// True when called from inside a callback.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting tasks, drain what is queued, join the thread.
    ///
    /// When invoked from the callback thread itself the join is skipped; the
    /// thread exits on its own after the current task returns.
    pub fn shutdown(&mut self) {
        self.queue.stop();
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("callback thread panicked");
            }
        }
    }
}

impl Drop for CallbackThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let mut cb = CallbackThread::spawn("test-cb").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            assert!(cb.queue().push(Box::new(move || seen.lock().push(i))));
        }

        cb.shutdown();
        assert_eq!(*seen.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_tasks_run_on_callback_thread() {
        let cb = CallbackThread::spawn("test-cb-name").unwrap();
        let (tx, rx) = mpsc::channel();

        cb.queue().push(Box::new(move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        }));

        let name = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(name.as_deref(), Some("test-cb-name"));
    }

    #[test]
    fn test_panic_does_not_kill_thread() {
        let mut cb = CallbackThread::spawn("test-cb-panic").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        cb.queue().push(Box::new(|| panic!("boom")));
        let c = count.clone();
        cb.queue().push(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        cb.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_push_after_stop_rejected() {
        let mut cb = CallbackThread::spawn("test-cb-stop").unwrap();
        let queue = cb.queue();
        cb.shutdown();

        assert!(!queue.push(Box::new(|| {})));
        assert!(queue.next().is_none());
    }

    #[test]
    fn test_shutdown_drains_pending_tasks() {
        let mut cb = CallbackThread::spawn("test-cb-drain").unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        // the first task holds the thread while the rest queue up
        cb.queue().push(Box::new(|| thread::sleep(Duration::from_millis(50))));
        for _ in 0..10 {
            let c = count.clone();
            cb.queue().push(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }

        cb.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_shutdown_from_inside_callback() {
        let cb = Arc::new(Mutex::new(None::<CallbackThread>));
        let thread = CallbackThread::spawn("test-cb-self").unwrap();
        let queue = thread.queue();
        *cb.lock() = Some(thread);

        let (tx, rx) = mpsc::channel();
        let slot = cb.clone();
        queue.push(Box::new(move || {
            if let Some(mut t) = slot.lock().take() {
                t.shutdown();
                drop(t);
            }
            let _ = tx.send(());
        }));

        // no deadlock: the callback returns and the thread exits
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
}
