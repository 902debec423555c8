//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use mprpc::codec::envelope;
use mprpc::transport::mem::MemServerTransport;
use mprpc::transport::{Acceptor, MemHub, PeerAddr, Transport, TransportEvent};
use mprpc::{CallId, ClientBuilder, ClientCallback, Message};

/// Something a client session reported to its callback.
#[derive(Debug, Clone)]
pub enum Event {
    Connected,
    Disconnected,
    Notification(Message),
    Result(CallId, Message),
}

/// Client callback that records every event.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    cond: Condvar,
}

impl Recorder {
    /// Block until `done` holds for the recorded events or `timeout` elapses.
    pub fn wait_until<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while !done(&events) {
            if self.cond.wait_until(&mut events, deadline).timed_out() {
                return done(&events);
            }
        }
        true
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn connected_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Connected))
    }

    pub fn disconnected_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Disconnected))
    }

    /// `(id, message)` pairs delivered to `on_call_result`, in delivery order.
    pub fn results(&self) -> Vec<(CallId, Message)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Result(id, msg) => Some((*id, msg.clone())),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.events.lock().push(event);
        self.cond.notify_all();
    }
}

impl ClientCallback for Recorder {
    fn on_connected(&self) {
        self.push(Event::Connected);
    }

    fn on_disconnected(&self) {
        self.push(Event::Disconnected);
    }

    fn on_notification(&self, msg: Message) {
        self.push(Event::Notification(msg));
    }

    fn on_call_result(&self, id: CallId, msg: Message) {
        self.push(Event::Result(id, msg));
    }
}

/// Client builder with short timers so liveness tests finish quickly.
pub fn fast_client() -> ClientBuilder {
    ClientBuilder::new()
        .heartbeat_interval(Duration::from_millis(50))
        .liveness_window(Duration::from_millis(400))
        .poll_interval(Duration::from_millis(10))
}

/// Run a scripted raw server peer on its own thread.
///
/// Returns once `addr` is listening on `hub`.
pub fn spawn_peer<F, Fut>(hub: &MemHub, addr: &str, script: F) -> JoinHandle<()>
where
    F: FnOnce(MemServerTransport) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let acceptor = hub.acceptor();
    let addr = addr.to_string();
    let (ready_tx, ready_rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let transport = acceptor.listen(&addr).await.unwrap();
            ready_tx.send(()).unwrap();
            script(transport).await;
        });
    });

    ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    handle
}

/// Next non-heartbeat message from any peer. Heartbeats are answered on the
/// way. `None` once the client side is gone.
pub async fn next_request<T: Transport>(transport: &mut T) -> Option<(PeerAddr, Message)> {
    loop {
        match transport.recv().await? {
            TransportEvent::Frame { peer, payload } => {
                let msg = envelope::decode(&payload).unwrap();
                if msg.is_heartbeat() {
                    transport.send(&peer, heartbeat()).await.unwrap();
                    continue;
                }
                return Some((peer, msg));
            }
            TransportEvent::Closed { .. } => return None,
        }
    }
}

pub fn heartbeat() -> Bytes {
    Bytes::from(envelope::encode_heartbeat().unwrap())
}

pub fn reply<R: serde::Serialize>(id: CallId, result: &R) -> Bytes {
    Bytes::from(envelope::encode_reply(id, result).unwrap())
}

pub fn request<P: serde::Serialize>(method: &str, params: &P, id: CallId) -> Bytes {
    Bytes::from(envelope::encode_request(method, params, id).unwrap())
}
