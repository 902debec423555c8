//! In-process transport.
//!
//! A [`MemHub`] is a tiny address space: acceptors register a name, connectors
//! attach to it. Frames are handed over through unbounded tokio channels, so
//! there is no framing and no I/O. Either side dropping its transport shows
//! up as [`TransportEvent::Closed`] on the other.
//!
//! ```
//! use mprpc::transport::MemHub;
//!
//! let hub = MemHub::new();
//! let acceptor = hub.acceptor();
//! let connector = hub.connector();
//! # let _ = (acceptor, connector);
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Acceptor, Connector, PeerAddr, Transport, TransportEvent};
use crate::error::{Result, RpcError};

enum HubMsg {
    Attach {
        peer: PeerAddr,
        tx: mpsc::UnboundedSender<Bytes>,
    },
    Frame {
        peer: PeerAddr,
        payload: Bytes,
    },
    Detach {
        peer: PeerAddr,
    },
}

#[derive(Default)]
struct HubInner {
    servers: Mutex<HashMap<String, mpsc::UnboundedSender<HubMsg>>>,
    next_peer: AtomicU64,
}

/// Process-local address space for [`MemAcceptor`] / [`MemConnector`].
#[derive(Clone, Default)]
pub struct MemHub {
    inner: Arc<HubInner>,
}

impl MemHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemConnector {
        MemConnector {
            inner: self.inner.clone(),
        }
    }

    pub fn acceptor(&self) -> MemAcceptor {
        MemAcceptor {
            inner: self.inner.clone(),
        }
    }

    /// True while an acceptor is listening on `addr`.
    pub fn is_listening(&self, addr: &str) -> bool {
        self.inner.servers.lock().contains_key(addr)
    }
}

/// Client side of a [`MemHub`].
#[derive(Clone)]
pub struct MemConnector {
    inner: Arc<HubInner>,
}

impl Connector for MemConnector {
    type Transport = MemClientTransport;

    async fn connect(&self, addr: &str) -> Result<MemClientTransport> {
        let to_server = self
            .inner
            .servers
            .lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| refused(addr))?;

        let n = self.inner.next_peer.fetch_add(1, Ordering::Relaxed);
        let peer = format!("mem-{n}");
        let (tx, from_server) = mpsc::unbounded_channel();

        to_server
            .send(HubMsg::Attach {
                peer: peer.clone(),
                tx,
            })
            .map_err(|_| refused(addr))?;

        tracing::debug!(addr, %peer, "mem transport attached");

        Ok(MemClientTransport {
            addr: addr.to_string(),
            peer,
            to_server: Some(to_server),
            from_server,
            closed: false,
        })
    }
}

fn refused(addr: &str) -> RpcError {
    RpcError::Io(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("nothing listening on {addr}"),
    ))
}

/// Client transport; its only peer is the server it attached to.
pub struct MemClientTransport {
    addr: String,
    peer: PeerAddr,
    to_server: Option<mpsc::UnboundedSender<HubMsg>>,
    from_server: mpsc::UnboundedReceiver<Bytes>,
    closed: bool,
}

impl MemClientTransport {
    /// Address the server sees for this client.
    pub fn local_peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for MemClientTransport {
    async fn send(&mut self, _peer: &str, payload: Bytes) -> Result<()> {
        let to_server = self.to_server.as_ref().ok_or(RpcError::ConnectionClosed)?;
        to_server
            .send(HubMsg::Frame {
                peer: self.peer.clone(),
                payload,
            })
            .map_err(|_| RpcError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        match self.from_server.recv().await {
            Some(payload) => Some(TransportEvent::Frame {
                peer: self.addr.clone(),
                payload,
            }),
            None => {
                self.closed = true;
                Some(TransportEvent::Closed {
                    peer: self.addr.clone(),
                })
            }
        }
    }

    fn disconnect(&mut self, _peer: &str) {
        if let Some(to_server) = self.to_server.take() {
            let _ = to_server.send(HubMsg::Detach {
                peer: self.peer.clone(),
            });
        }
        self.closed = true;
    }
}

impl Drop for MemClientTransport {
    fn drop(&mut self) {
        if let Some(to_server) = self.to_server.take() {
            let _ = to_server.send(HubMsg::Detach {
                peer: self.peer.clone(),
            });
        }
    }
}

/// Server side of a [`MemHub`].
pub struct MemAcceptor {
    inner: Arc<HubInner>,
}

impl Acceptor for MemAcceptor {
    type Transport = MemServerTransport;

    async fn listen(self, addr: &str) -> Result<MemServerTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut servers = self.inner.servers.lock();
            if servers.contains_key(addr) {
                return Err(RpcError::Io(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{addr} is already listening"),
                )));
            }
            servers.insert(addr.to_string(), tx);
        }

        tracing::debug!(addr, "mem transport listening");

        Ok(MemServerTransport {
            addr: addr.to_string(),
            inner: self.inner,
            rx,
            peers: HashMap::new(),
        })
    }
}

/// Server transport; unregisters its address when dropped.
pub struct MemServerTransport {
    addr: String,
    inner: Arc<HubInner>,
    rx: mpsc::UnboundedReceiver<HubMsg>,
    peers: HashMap<PeerAddr, mpsc::UnboundedSender<Bytes>>,
}

impl Transport for MemServerTransport {
    async fn send(&mut self, peer: &str, payload: Bytes) -> Result<()> {
        let tx = self
            .peers
            .get(peer)
            .ok_or_else(|| RpcError::UnknownPeer(peer.to_string()))?;
        tx.send(payload).map_err(|_| RpcError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            match self.rx.recv().await? {
                HubMsg::Attach { peer, tx } => {
                    self.peers.insert(peer, tx);
                }
                HubMsg::Frame { peer, payload } => {
                    // frames from a peer we already dropped are discarded
                    if self.peers.contains_key(&peer) {
                        return Some(TransportEvent::Frame { peer, payload });
                    }
                }
                HubMsg::Detach { peer } => {
                    if self.peers.remove(&peer).is_some() {
                        return Some(TransportEvent::Closed { peer });
                    }
                }
            }
        }
    }

    fn disconnect(&mut self, peer: &str) {
        self.peers.remove(peer);
    }
}

impl Drop for MemServerTransport {
    fn drop(&mut self) {
        self.inner.servers.lock().remove(&self.addr);
    }
}
