//! Server session: any number of peers behind one bound transport.
//!
//! The network thread owns the transport. It tracks one [`Connection`] per
//! peer address, answers heartbeats itself, sweeps silent connections, and
//! queues everything else to the [`ServerCallback`] on the callback thread.
//! Application code replies through the connection handle it was given, from
//! any thread.
//!
//! ```text
//! peer ─► transport ─► network thread ─┬─► heartbeat reply
//!                                      └─► callback thread ─► on_call(conn, msg)
//! app  ─► conn.send() ─► command queue ─► network thread ─► transport ─► peer
//! ```

mod connection;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::envelope;
use crate::config::{duration_ms, ServerConfig};
use crate::dispatch::{CallbackThread, DispatchQueue};
use crate::error::{Result, RpcError};
use crate::message::Message;
use crate::protocol::checked_payload_len;
use crate::transport::{Acceptor, PeerAddr, Transport, TransportEvent};

pub use connection::Connection;
use connection::ServerConnection;

/// Shared handle to a connection.
pub type ConnectionRef = Arc<dyn Connection>;

/// Application hooks. Both run on the session's callback thread, in arrival
/// order.
pub trait ServerCallback: Send + Sync + 'static {
    /// A request or notification arrived on `conn`. Reply through `conn`.
    fn on_call(&self, conn: ConnectionRef, msg: Message);

    /// `conn` is gone: closed explicitly, timed out, dropped by the
    /// transport, or the server shut down. Fires exactly once per connection.
    fn on_close(&self, conn: ConnectionRef);
}

impl<T: ServerCallback> ServerCallback for Arc<T> {
    fn on_call(&self, conn: ConnectionRef, msg: Message) {
        (**self).on_call(conn, msg)
    }

    fn on_close(&self, conn: ConnectionRef) {
        (**self).on_close(conn)
    }
}

const DEFAULT_THREAD_NAME: &str = "mprpc-server";

/// Builder for configuring and starting a server session.
pub struct ServerBuilder {
    config: ServerConfig,
    name: String,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Silence after which a connection is closed.
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

    /// Largest envelope sent to a peer. A reply over it is replaced by an
    /// `INTERNAL_ERROR` reply; raw sends over it return `false`.
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

    /// Bind `addr` and start serving.
    ///
    /// Blocks until the transport is bound. Must not be called from inside an
    /// async runtime.
    pub fn listen<A, H>(self, acceptor: A, addr: &str, callback: H) -> Result<ServerSession>
    where
        A: Acceptor,
        H: ServerCallback,
    {
        let callbacks = CallbackThread::spawn(&format!("{}-cb", self.name))?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ServerShared {
            connections: Mutex::new(HashMap::new()),
            commands: commands_tx,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            callback: Arc::new(callback),
            queue: callbacks.queue(),
            max_payload_size: self.config.max_payload_size,
        });

        let network = ServerLoop {
            shared: shared.clone(),
            commands: commands_rx,
            heartbeat: Bytes::from(envelope::encode_heartbeat()?),
            config: self.config.clone(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let bind_addr = addr.to_string();
        let handle = thread::Builder::new()
            .name(format!("{}-net", self.name))
            .spawn(move || network.run_thread(acceptor, bind_addr, ready_tx))?;

        match ready_rx.blocking_recv() {
            Ok(Ok(())) => Ok(ServerSession {
                shared,
                network: Mutex::new(Some(handle)),
                callbacks: Mutex::new(Some(callbacks)),
                addr: addr.to_string(),
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

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ConnEntry {
    handle: Arc<ServerConnection>,
    last_seen: Instant,
}

enum Command {
    Send(PeerAddr, Bytes),
    Disconnect(PeerAddr),
}

/// State shared between the network thread, the callback thread and any
/// application thread holding a connection handle.
pub(crate) struct ServerShared {
    connections: Mutex<HashMap<PeerAddr, ConnEntry>>,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
    shutdown: Notify,
    callback: Arc<dyn ServerCallback>,
    queue: Arc<DispatchQueue>,
    pub(crate) max_payload_size: u32,
}

impl ServerShared {
    /// Queue a payload for `id`. Never creates a connection.
    pub(crate) fn send(&self, id: &str, payload: Bytes) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if let Err(e) = checked_payload_len(payload.len(), self.max_payload_size) {
            tracing::warn!(peer = id, error = %e, "refusing oversized send");
            return false;
        }
        if !self.connections.lock().contains_key(id) {
            return false;
        }
        self.commands
            .send(Command::Send(id.to_string(), payload))
            .is_ok()
    }

    fn post<F>(&self, f: F)
    where
        F: FnOnce(&dyn ServerCallback) + Send + 'static,
    {
        let callback = self.callback.clone();
        if !self.queue.push(Box::new(move || f(callback.as_ref()))) {
            tracing::debug!("callback queue stopped, dropping callback");
        }
    }

    fn post_close(&self, handle: Arc<ServerConnection>) {
        self.post(move |cb| cb.on_close(handle));
    }
}

/// A listening server session.
pub struct ServerSession {
    shared: Arc<ServerShared>,
    network: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<Option<CallbackThread>>,
    addr: String,
}

impl ServerSession {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Listen with the default configuration.
    pub fn listen<A, H>(acceptor: A, addr: &str, callback: H) -> Result<Self>
    where
        A: Acceptor,
        H: ServerCallback,
    {
        ServerBuilder::new().listen(acceptor, addr, callback)
    }

    /// Address the session is bound to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send a raw payload to connection `id`.
    ///
    /// `false` when the connection is not registered (closed or timed out) or
    /// the payload is over the configured maximum.
    pub fn send(&self, id: &str, payload: Bytes) -> bool {
        self.shared.send(id, payload)
    }

    /// Handle for connection `id`, if it is live.
    pub fn connection(&self, id: &str) -> Option<ConnectionRef> {
        self.shared
            .connections
            .lock()
            .get(id)
            .map(|entry| entry.handle.clone() as ConnectionRef)
    }

    /// Close connection `id`. `on_close` fires once; `false` if unknown.
    pub fn close_connection(&self, id: &str) -> bool {
        let Some(entry) = self.shared.connections.lock().remove(id) else {
            return false;
        };
        tracing::debug!(peer = id, "closing connection");
        let _ = self.shared.commands.send(Command::Disconnect(id.to_string()));
        self.shared.post_close(entry.handle);
        true
    }

    /// Live connection ids, sorted.
    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.connections.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.shared.connections.lock().contains_key(id)
    }

    /// Stop serving. Idempotent.
    ///
    /// `on_close` fires for every remaining connection before the callback
    /// thread is drained and joined.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(addr = %self.addr, "closing server session");
        self.shared.shutdown.notify_one();
        if let Some(handle) = self.network.lock().take() {
            if handle.join().is_err() {
                tracing::error!("network thread panicked");
            }
        }

        let remaining: Vec<ConnEntry> = self
            .shared
            .connections
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in remaining {
            self.shared.post_close(entry.handle);
        }

        if let Some(mut callbacks) = self.callbacks.lock().take() {
            callbacks.shutdown();
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.close();
    }
}

enum LoopEvent {
    Shutdown,
    Command(Command),
    Transport(Option<TransportEvent>),
    Tick,
}

struct ServerLoop {
    shared: Arc<ServerShared>,
    commands: mpsc::UnboundedReceiver<Command>,
    heartbeat: Bytes,
    config: ServerConfig,
}

impl ServerLoop {
    fn run_thread<A: Acceptor>(self, acceptor: A, addr: String, ready: oneshot::Sender<Result<()>>) {
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
            let transport = match acceptor.listen(&addr).await {
                Ok(transport) => transport,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            tracing::info!(%addr, "listening");
            let _ = ready.send(Ok(()));
            self.run(transport).await;
        });
    }

    async fn run<T: Transport>(mut self, mut transport: T) {
        let liveness_window = self.config.liveness_window();
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shared.shutdown.notified() => LoopEvent::Shutdown,
                Some(command) = self.commands.recv() => LoopEvent::Command(command),
                event = transport.recv(), if transport_open => LoopEvent::Transport(event),
                _ = ticker.tick() => LoopEvent::Tick,
            };

            match event {
                LoopEvent::Shutdown => return,
                LoopEvent::Command(Command::Send(peer, payload)) => {
                    // the connection may have gone since the command was queued
                    if !self.shared.connections.lock().contains_key(&peer) {
                        tracing::debug!(%peer, "dropping send to closed connection");
                        continue;
                    }
                    if let Err(e) = transport.send(&peer, payload).await {
                        tracing::warn!(%peer, error = %e, "send failed");
                    }
                }
                LoopEvent::Command(Command::Disconnect(peer)) => {
                    transport.disconnect(&peer);
                    self.remove(&peer);
                }
                LoopEvent::Transport(Some(TransportEvent::Frame { peer, payload })) => {
                    self.on_frame(&mut transport, peer, &payload).await;
                }
                LoopEvent::Transport(Some(TransportEvent::Closed { peer })) => {
                    if self.remove(&peer) {
                        tracing::debug!(%peer, "peer closed");
                    }
                }
                LoopEvent::Transport(None) => {
                    tracing::error!("transport ended, dropping all connections");
                    transport_open = false;
                    let ids: Vec<PeerAddr> = self.shared.connections.lock().keys().cloned().collect();
                    for peer in ids {
                        self.remove(&peer);
                    }
                }
                LoopEvent::Tick => self.sweep(&mut transport, liveness_window),
            }
        }
    }

    async fn on_frame<T: Transport>(&mut self, transport: &mut T, peer: PeerAddr, payload: &[u8]) {
        let now = Instant::now();
        if let Some(entry) = self.shared.connections.lock().get_mut(&peer) {
            entry.last_seen = now;
        }

        let msg = match envelope::decode(payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(%peer, error = %e, len = payload.len(), "dropping undecodable frame");
                return;
            }
        };

        let handle = {
            let mut connections = self.shared.connections.lock();
            let entry = connections.entry(peer.clone()).or_insert_with(|| {
                tracing::debug!(%peer, "connection opened");
                ConnEntry {
                    handle: Arc::new(ServerConnection::new(
                        peer.clone(),
                        Arc::downgrade(&self.shared),
                    )),
                    last_seen: now,
                }
            });
            entry.handle.clone()
        };

        if msg.is_heartbeat() {
            if let Err(e) = transport.send(&peer, self.heartbeat.clone()).await {
                tracing::warn!(%peer, error = %e, "heartbeat reply failed");
            }
            return;
        }

        self.shared.post(move |cb| cb.on_call(handle, msg));
    }

    /// Close connections silent for longer than the liveness window.
    fn sweep<T: Transport>(&mut self, transport: &mut T, liveness_window: Duration) {
        let now = Instant::now();
        let expired: Vec<(PeerAddr, Arc<ServerConnection>)> = {
            let mut connections = self.shared.connections.lock();
            let ids: Vec<PeerAddr> = connections
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.last_seen) >= liveness_window)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| connections.remove(&id).map(|entry| (id, entry.handle)))
                .collect()
        };

        for (peer, handle) in expired {
            tracing::warn!(%peer, "connection timed out");
            transport.disconnect(&peer);
            self.shared.post_close(handle);
        }
    }

    /// Drop `peer` from the registry and report it. `false` if unknown.
    fn remove(&self, peer: &str) -> bool {
        let removed = self.shared.connections.lock().remove(peer);
        match removed {
            Some(entry) => {
                self.shared.post_close(entry.handle);
                true
            }
            None => false,
        }
    }
}
