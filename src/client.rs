//! Client session: one connection to one server.
//!
//! The [`ClientBuilder`] configures timeouts, heartbeats and reconnection.
//! A running [`ClientSession`] owns two threads:
//! 1. the network thread, which runs a current-thread tokio runtime, owns the
//!    transport, sends queued frames, routes inbound messages and keeps the
//!    heartbeat going
//! 2. the callback thread, which runs every [`ClientCallback`] method in
//!    arrival order
//!
//! Application threads call [`ClientSession::call`] and block on their own
//! waiter; nothing they do runs on the network thread.
//!
//! # Example
//!
//! ```ignore
//! use mprpc::{ClientSession, transport::PipeConnector};
//!
//! let client = ClientSession::builder()
//!     .call_timeout(Duration::from_secs(2))
//!     .reconnect_interval(Duration::from_millis(500))
//!     .connect(PipeConnector::new(), "/tmp/svc.sock", ())?;
//!
//! let reply = client.call("echo", &json!({"x": 1}))?;
//! match reply.into_result() {
//!     Ok(value) => println!("{value}"),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::envelope;
use crate::config::{duration_ms, ClientConfig};
use crate::dispatch::{CallbackThread, DispatchQueue};
use crate::error::{Result, RpcError};
use crate::message::{codes, CallId, ErrorObject, Message};
use crate::protocol::checked_payload_len;
use crate::registry::{CallRegistry, Waiter};
use crate::transport::{Connector, Transport, TransportEvent};

/// Application hooks. Every method runs on the session's callback thread,
/// never concurrently with another hook of the same session.
pub trait ClientCallback: Send + Sync + 'static {
    /// The transport is up (initially and after each reconnect).
    fn on_connected(&self) {}

    /// The session was lost. Fires once per loss, never on `close()`.
    fn on_disconnected(&self) {}

    /// A request or notification from the server.
    fn on_notification(&self, msg: Message) {
        let _ = msg;
    }

    /// Outcome of an [`ClientSession::async_call`].
    fn on_call_result(&self, id: CallId, msg: Message) {
        let _ = (id, msg);
    }
}

impl ClientCallback for () {}

impl<T: ClientCallback> ClientCallback for Arc<T> {
    fn on_connected(&self) {
        (**self).on_connected()
    }

    fn on_disconnected(&self) {
        (**self).on_disconnected()
    }

    fn on_notification(&self, msg: Message) {
        (**self).on_notification(msg)
    }

    fn on_call_result(&self, id: CallId, msg: Message) {
        (**self).on_call_result(id, msg)
    }
}

/// Connection state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; entered only through `close()`.
    Closed,
}

/// Default thread name prefix.
const DEFAULT_THREAD_NAME: &str = "mprpc-client";

/// Builder for configuring and connecting a client session.
pub struct ClientBuilder {
    config: ClientConfig,
    name: String,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Timeout used by `call()`.
    ///
    /// Default: 6 seconds
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = duration_ms(timeout);
        self
    }

    /// Default: 1 second
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    /// Silence after which the session is considered lost.
    ///
    /// Default: 3 seconds
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.config.liveness_window_ms = duration_ms(window);
        self
    }

    /// Default: 100 milliseconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Retry the connection at this interval after a loss. Off by default.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval_ms = Some(duration_ms(interval));
        self
    }

    /// Largest envelope a call may carry. Match the peer's receive limit.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    /// Prefix for the session's thread names.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Connect and start the session.
    ///
    /// Blocks until the first connection attempt resolves. Must not be
    /// called from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the first attempt fails; both session
    /// threads are stopped before returning.
    pub fn connect<C, H>(self, connector: C, addr: &str, callback: H) -> Result<ClientSession>
    where
        C: Connector,
        H: ClientCallback,
    {
        let callbacks = CallbackThread::spawn(&format!("{}-cb", self.name))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::Connecting),
            registry: CallRegistry::new(),
            async_calls: Mutex::new(HashSet::new()),
            next_id: AtomicI32::new(1),
            outbound: outbound_tx,
            shutdown: Notify::new(),
            callback: Arc::new(callback),
            queue: callbacks.queue(),
            max_payload_size: self.config.max_payload_size,
        });

        let network = NetworkLoop {
            connector,
            addr: addr.to_string(),
            shared: shared.clone(),
            outbound: outbound_rx,
            heartbeat: Bytes::from(envelope::encode_heartbeat()?),
            config: self.config.clone(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = thread::Builder::new()
            .name(format!("{}-net", self.name))
            .spawn(move || network.run_thread(ready_tx))?;

        let outcome = ready_rx.blocking_recv();
        match outcome {
            Ok(Ok(())) => Ok(ClientSession {
                shared,
                network: Mutex::new(Some(handle)),
                callbacks: Mutex::new(Some(callbacks)),
                config: self.config,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(RpcError::ConnectionClosed)
            }
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between application threads and the network thread.
struct Shared {
    state: Mutex<SessionState>,
    registry: CallRegistry,
    async_calls: Mutex<HashSet<CallId>>,
    next_id: AtomicI32,
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown: Notify,
    callback: Arc<dyn ClientCallback>,
    queue: Arc<DispatchQueue>,
    max_payload_size: u32,
}

impl Shared {
    /// Next call id. The counter wraps and skips 0, which is reserved for
    /// notifications.
    fn next_call_id(&self) -> CallId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to `next` unless the session was closed.
    fn set_state(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Closed {
            return false;
        }
        *state = next;
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(RpcError::Closed);
        }
        Ok(())
    }

    /// Wrap an encoded envelope, refusing one over the payload limit so it
    /// never reaches the peer.
    fn frame(&self, envelope: Vec<u8>) -> Result<Bytes> {
        checked_payload_len(envelope.len(), self.max_payload_size)?;
        Ok(Bytes::from(envelope))
    }

    /// Hand the outcome of call `id` to whoever is waiting for it.
    fn deliver(&self, id: CallId, msg: Message) {
        let Err(msg) = self.registry.resolve(id, msg) else {
            return;
        };
        if self.async_calls.lock().remove(&id) {
            self.post(move |cb| cb.on_call_result(id, msg));
        } else {
            tracing::debug!(call_id = id, "dropping stale reply");
        }
    }

    /// Queue a hook invocation on the callback thread.
    fn post<F>(&self, f: F)
    where
        F: FnOnce(&dyn ClientCallback) + Send + 'static,
    {
        let callback = self.callback.clone();
        if !self.queue.push(Box::new(move || f(callback.as_ref()))) {
            tracing::debug!("callback queue stopped, dropping callback");
        }
    }
}

/// A connected client session.
///
/// Cheap to share across threads behind an `Arc`; every method takes `&self`.
pub struct ClientSession {
    shared: Arc<Shared>,
    network: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<Option<CallbackThread>>,
    config: ClientConfig,
}

impl ClientSession {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with the default configuration.
    pub fn connect<C, H>(connector: C, addr: &str, callback: H) -> Result<Self>
    where
        C: Connector,
        H: ClientCallback,
    {
        ClientBuilder::new().connect(connector, addr, callback)
    }

    /// Call `method` and wait for the reply with the configured timeout.
    pub fn call<P>(&self, method: &str, params: &P) -> Result<Message>
    where
        P: Serialize + ?Sized,
    {
        self.call_with_timeout(method, params, self.config.call_timeout())
    }

    /// Call `method` and block up to `timeout` for the reply.
    ///
    /// The returned message is the server's reply, or a locally generated
    /// failure carrying `TIMEOUT`, `CONNECTION_LOST` or `CLOSED`.
    ///
    /// # Errors
    ///
    /// Only local failures: params that fail to encode, an envelope over the
    /// payload limit (`Protocol`), a duplicate call id, or a session that was
    /// already closed.
    pub fn call_with_timeout<P>(&self, method: &str, params: &P, timeout: Duration) -> Result<Message>
    where
        P: Serialize + ?Sized,
    {
        self.shared.ensure_open()?;

        let id = self.shared.next_call_id();
        let frame = self.shared.frame(envelope::encode_request(method, params, id)?)?;
        let waiter = self.shared.registry.register(id)?;

        if self.shared.state() != SessionState::Connected {
            return Ok(self.abandon(id, &waiter, ErrorObject::not_connected()));
        }
        if self.shared.outbound.send(frame).is_err() {
            return Ok(self.abandon(id, &waiter, ErrorObject::connection_lost()));
        }

        if let Some(msg) = waiter.wait(timeout) {
            return Ok(msg);
        }
        tracing::debug!(call_id = id, method, "call timed out");
        Ok(self.abandon(id, &waiter, ErrorObject::timeout()))
    }

    /// Give up on call `id`. If the network thread got there first the real
    /// outcome is already in the slot and wins.
    fn abandon(&self, id: CallId, waiter: &Waiter, error: ErrorObject) -> Message {
        if self.shared.registry.reclaim(id) {
            return Message::failure(id, error);
        }
        waiter
            .take()
            .unwrap_or_else(|| Message::failure(id, error))
    }

    /// Send a call without waiting. The outcome is delivered to
    /// [`ClientCallback::on_call_result`] with the returned id, including the
    /// `CONNECTION_LOST` failure when the session is not connected.
    ///
    /// Async calls from one thread are transmitted in submission order.
    pub fn async_call<P>(&self, method: &str, params: &P) -> Result<CallId>
    where
        P: Serialize + ?Sized,
    {
        self.shared.ensure_open()?;

        let id = self.shared.next_call_id();
        let frame = self.shared.frame(envelope::encode_request(method, params, id)?)?;
        self.shared.async_calls.lock().insert(id);

        let queued =
            self.shared.state() == SessionState::Connected && self.shared.outbound.send(frame).is_ok();

        // a concurrent loss may already have reported this id
        if !queued && self.shared.async_calls.lock().remove(&id) {
            self.shared.post(move |cb| {
                cb.on_call_result(id, Message::failure(id, ErrorObject::not_connected()))
            });
        }
        Ok(id)
    }

    /// Send a notification; no reply is expected.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` when not connected, `Closed` after `close()`.
    pub fn notify<P>(&self, method: &str, params: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        self.shared.ensure_open()?;
        let frame = self.shared.frame(envelope::encode_notification(method, params)?)?;
        if self.shared.state() != SessionState::Connected {
            return Err(RpcError::ConnectionClosed);
        }
        self.shared
            .outbound
            .send(frame)
            .map_err(|_| RpcError::ConnectionClosed)
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Blocking calls plus async calls still awaiting their outcome.
    pub fn pending_calls(&self) -> usize {
        self.shared.registry.len() + self.shared.async_calls.lock().len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop the session. Idempotent.
    ///
    /// Outstanding calls fail with `CLOSED`, including async calls, whose
    /// failure is delivered to `on_call_result` before the callback thread
    /// drains and stops. `on_disconnected` is not fired. Safe to call from
    /// inside a callback.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        tracing::debug!("closing client session");
        self.shared.shutdown.notify_one();
        self.shared.registry.cancel_all(&ErrorObject::closed());

        if let Some(handle) = self.network.lock().take() {
            if handle.join().is_err() {
                tracing::error!("network thread panicked");
            }
        }
        // after the join, so no reply can race the failure
        let mut ids: Vec<CallId> = self.shared.async_calls.lock().drain().collect();
        ids.sort_unstable();
        for id in ids {
            self.shared
                .post(move |cb| cb.on_call_result(id, Message::failure(id, ErrorObject::closed())));
        }

        if let Some(mut callbacks) = self.callbacks.lock().take() {
            callbacks.shutdown();
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Why the inner loop returned.
enum Exit {
    Shutdown,
    Lost,
}

enum LoopEvent {
    Shutdown,
    Outbound(Bytes),
    Transport(Option<TransportEvent>),
    Tick,
}

/// Everything the network thread owns.
struct NetworkLoop<C: Connector> {
    connector: C,
    addr: String,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    heartbeat: Bytes,
    config: ClientConfig,
}

impl<C: Connector> NetworkLoop<C> {
    fn run_thread(mut self, ready: oneshot::Sender<Result<()>>) {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        runtime.block_on(async move {
            let transport = match self.connector.connect(&self.addr).await {
                Ok(transport) => transport,
                Err(e) => {
                    self.shared.set_state(SessionState::Disconnected);
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            self.connected();
            let _ = ready.send(Ok(()));
            self.run(transport).await;
        });
    }

    fn connected(&self) {
        if self.shared.set_state(SessionState::Connected) {
            tracing::info!(addr = %self.addr, "connected");
            self.shared.post(|cb| cb.on_connected());
        }
    }

    async fn run(&mut self, transport: C::Transport) {
        let mut transport = transport;
        loop {
            let exit = self.drive(&mut transport).await;
            drop(transport);

            match exit {
                Exit::Shutdown => return,
                Exit::Lost => self.lost(),
            }

            let Some(interval) = self.config.reconnect_interval() else {
                tracing::debug!("reconnect disabled, network loop stopping");
                return;
            };
            match self.reconnect(interval).await {
                Some(next) => transport = next,
                None => return,
            }
        }
    }

    /// Serve one transport until shutdown or loss.
    async fn drive(&mut self, transport: &mut C::Transport) -> Exit {
        let heartbeat_interval = self.config.heartbeat_interval();
        let liveness_window = self.config.liveness_window();

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent = Instant::now();
        let mut last_seen = Instant::now();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => LoopEvent::Shutdown,
                Some(frame) = self.outbound.recv() => LoopEvent::Outbound(frame),
                event = transport.recv() => LoopEvent::Transport(event),
                _ = ticker.tick() => LoopEvent::Tick,
            };

            match event {
                LoopEvent::Shutdown => return Exit::Shutdown,
                LoopEvent::Outbound(frame) => match transport.send(&self.addr, frame.clone()).await {
                    Ok(()) => {}
                    // refused before any byte was written; the stream is intact
                    Err(RpcError::Protocol(reason)) => self.reject(&frame, reason),
                    Err(e) => {
                        tracing::warn!(error = %e, "send failed");
                        return Exit::Lost;
                    }
                },
                LoopEvent::Transport(Some(TransportEvent::Frame { payload, .. })) => {
                    if self.route(&payload) {
                        last_seen = Instant::now();
                    }
                }
                LoopEvent::Transport(Some(TransportEvent::Closed { .. })) | LoopEvent::Transport(None) => {
                    tracing::warn!(addr = %self.addr, "transport closed");
                    return Exit::Lost;
                }
                LoopEvent::Tick => {
                    let now = Instant::now();
                    if now.duration_since(last_seen) >= liveness_window {
                        tracing::warn!(
                            addr = %self.addr,
                            silent_ms = duration_ms(now.duration_since(last_seen)),
                            "no heartbeat reply within liveness window"
                        );
                        return Exit::Lost;
                    }
                    if now.duration_since(last_sent) >= heartbeat_interval {
                        if let Err(e) = transport.send(&self.addr, self.heartbeat.clone()).await {
                            tracing::warn!(error = %e, "heartbeat send failed");
                            return Exit::Lost;
                        }
                        last_sent = now;
                    }
                }
            }
        }
    }

    /// Route one inbound payload. Returns `true` for a heartbeat.
    fn route(&self, payload: &[u8]) -> bool {
        let msg = match envelope::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, len = payload.len(), "dropping undecodable frame");
                return false;
            }
        };

        if msg.is_heartbeat() {
            return true;
        }
        if msg.is_request() {
            self.shared.post(move |cb| cb.on_notification(msg));
            return false;
        }

        self.shared.deliver(msg.id(), msg);
        false
    }

    /// Fail the call carried by a frame the transport refused to send.
    fn reject(&self, frame: &[u8], reason: String) {
        let id = envelope::decode(frame).map_or(0, |msg| msg.id());
        tracing::warn!(call_id = id, %reason, "transport refused frame");
        if id != 0 {
            let error = ErrorObject::new(codes::INVALID_REQUEST, "payload too large").with_data(reason);
            self.shared.deliver(id, Message::failure(id, error));
        }
    }

    /// Fail everything that was in flight and tell the application.
    fn lost(&mut self) {
        if !self.shared.set_state(SessionState::Disconnected) {
            return;
        }

        let error = ErrorObject::connection_lost();
        self.shared.registry.cancel_all(&error);

        let mut ids: Vec<CallId> = self.shared.async_calls.lock().drain().collect();
        ids.sort_unstable();
        for id in ids {
            let error = error.clone();
            self.shared
                .post(move |cb| cb.on_call_result(id, Message::failure(id, error)));
        }

        let mut discarded = 0usize;
        while self.outbound.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "discarded queued frames");
        }

        tracing::warn!(addr = %self.addr, "session lost");
        self.shared.post(|cb| cb.on_disconnected());
    }

    /// Retry until connected or shut down.
    async fn reconnect(&mut self, interval: Duration) -> Option<C::Transport> {
        loop {
            tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => return None,
                _ = tokio::time::sleep(interval) => {}
            }

            if !self.shared.set_state(SessionState::Connecting) {
                return None;
            }

            let attempt = tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => return None,
                attempt = self.connector.connect(&self.addr) => attempt,
            };

            match attempt {
                Ok(transport) => {
                    // frames queued while connecting belong to no one
                    while self.outbound.try_recv().is_ok() {}
                    self.connected();
                    return Some(transport);
                }
                Err(e) => {
                    tracing::debug!(addr = %self.addr, error = %e, "reconnect failed");
                    if !self.shared.set_state(SessionState::Disconnected) {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemHub;

    #[test]
    fn test_builder_configuration() {
        let builder = ClientSession::builder()
            .call_timeout(Duration::from_millis(250))
            .heartbeat_interval(Duration::from_millis(50))
            .liveness_window(Duration::from_millis(200))
            .reconnect_interval(Duration::from_secs(1))
            .name("svc");

        assert_eq!(builder.config.call_timeout_ms, 250);
        assert_eq!(builder.config.heartbeat_interval_ms, 50);
        assert_eq!(builder.config.liveness_window_ms, 200);
        assert_eq!(builder.config.reconnect_interval_ms, Some(1000));
        assert_eq!(builder.name, "svc");
    }

    #[test]
    fn test_builder_default() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.config, ClientConfig::default());
        assert_eq!(builder.name, DEFAULT_THREAD_NAME);
    }

    #[test]
    fn test_connect_refused() {
        let hub = MemHub::new();
        let result = ClientSession::connect(hub.connector(), "nobody", ());
        assert!(matches!(result, Err(RpcError::Io(_))));
    }

    #[test]
    fn test_call_id_skips_zero() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: Mutex::new(SessionState::Connected),
            registry: CallRegistry::new(),
            async_calls: Mutex::new(HashSet::new()),
            next_id: AtomicI32::new(-1),
            outbound: tx,
            shutdown: Notify::new(),
            callback: Arc::new(()),
            queue: Arc::new(DispatchQueue::new()),
            max_payload_size: crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE,
        };

        assert_eq!(shared.next_call_id(), -1);
        assert_eq!(shared.next_call_id(), 1);

        shared.next_id.store(i32::MAX, Ordering::Relaxed);
        assert_eq!(shared.next_call_id(), i32::MAX);
        assert_eq!(shared.next_call_id(), i32::MIN);
    }

    #[test]
    fn test_set_state_never_leaves_closed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: Mutex::new(SessionState::Closed),
            registry: CallRegistry::new(),
            async_calls: Mutex::new(HashSet::new()),
            next_id: AtomicI32::new(1),
            outbound: tx,
            shutdown: Notify::new(),
            callback: Arc::new(()),
            queue: Arc::new(DispatchQueue::new()),
            max_payload_size: crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE,
        };

        assert!(!shared.set_state(SessionState::Connected));
        assert_eq!(shared.state(), SessionState::Closed);
        assert!(matches!(shared.ensure_open(), Err(RpcError::Closed)));
    }
}
