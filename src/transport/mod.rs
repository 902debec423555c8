//! Transport abstraction.
//!
//! A transport moves opaque frame payloads between peer addresses. Sessions
//! own exactly one transport and drive it from their network thread, so
//! implementations may spawn tokio tasks freely.
//!
//! Two implementations ship with the crate:
//! - [`mem`]: process-local hub, used by tests and for in-process wiring
//! - [`pipe`]: Unix domain sockets (Linux/macOS) or Named Pipes (Windows)

use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

pub mod mem;
pub mod pipe;

pub use mem::{MemAcceptor, MemConnector, MemHub};
pub use pipe::{generate_pipe_path, PipeAcceptor, PipeConnector};

/// Opaque name of one transport endpoint.
pub type PeerAddr = String;

/// Something a transport observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One complete frame payload from `peer`.
    Frame { peer: PeerAddr, payload: Bytes },
    /// `peer` went away (EOF, reset, or the other side dropped).
    Closed { peer: PeerAddr },
}

/// Bidirectional frame transport.
///
/// Client transports have exactly one peer, the address they connected to.
pub trait Transport: Send + 'static {
    /// Send one frame payload to `peer`.
    fn send(&mut self, peer: &str, payload: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Next event. Must be cancel safe: it sits in a `select!` next to the
    /// outbound queue and the timer. `None` means no further events will
    /// ever arrive.
    fn recv(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;

    /// Drop `peer`. No `Closed` event is reported for it afterwards.
    fn disconnect(&mut self, peer: &str);
}

/// Client side: opens a transport to one address.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    fn connect(&self, addr: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// Server side: binds a transport that accepts any number of peers.
pub trait Acceptor: Send + 'static {
    type Transport: Transport;

    fn listen(self, addr: &str) -> impl Future<Output = Result<Self::Transport>> + Send;
}
