//! Platform-specific stream transport.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! Every connected stream gets a reader task (a [`FrameBuffer`] feeding a
//! shared event channel) and a writer task (see [`crate::writer`]). The
//! listening side additionally runs an accept loop. Peers are named
//! `<path>#<n>` on the listening side; the connecting side names its only
//! peer after the path.
//!
//! # Example
//!
//! ```ignore
//! use mprpc::transport::{generate_pipe_path, PipeAcceptor, PipeConnector};
//!
//! let path = generate_pipe_path();
//! let server = ServerSession::listen(PipeAcceptor::new(), &path, router)?;
//! let client = ClientSession::connect(PipeConnector::new(), &path, callbacks)?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::{Acceptor, Connector, PeerAddr, Transport, TransportEvent};
use crate::error::{Result, RpcError};
use crate::protocol::{checked_payload_len, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Capacity of the channel shared by all reader tasks.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Read buffer size per stream.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Generate a unique pipe path for this process.
///
/// Format:
/// - Unix: `/tmp/mprpc-{pid}-{random}.sock`
/// - Windows: `\\.\pipe\mprpc-{pid}-{random}`
pub fn generate_pipe_path() -> String {
    let pid = std::process::id();
    let rand: u64 = rand_u64();

    #[cfg(unix)]
    {
        format!("/tmp/mprpc-{}-{:x}.sock", pid, rand)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\mprpc-{}-{:x}", pid, rand)
    }
}

/// Cheap unique-ish u64 from the clock, the pid and a process-wide counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    let pid = std::process::id() as u64;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ seq.rotate_left(32)
}

/// Stream options shared by connector and acceptor.
#[derive(Debug, Clone)]
struct StreamOptions {
    writer: WriterConfig,
    max_payload_size: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            writer: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

struct PeerHandle {
    writer: WriterHandle,
    reader: AbortHandle,
}

type PeerMap = Arc<Mutex<HashMap<PeerAddr, PeerHandle>>>;

/// Connected streams plus the channel their reader tasks feed.
pub struct PipeTransport {
    peers: PeerMap,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: mpsc::Receiver<TransportEvent>,
    options: StreamOptions,
    accept_task: Option<AbortHandle>,
    #[cfg(unix)]
    socket_path: Option<String>,
}

impl PipeTransport {
    fn new(options: StreamOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx,
            options,
            accept_task: None,
            #[cfg(unix)]
            socket_path: None,
        }
    }

    /// Number of connected streams.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

impl Transport for PipeTransport {
    async fn send(&mut self, peer: &str, payload: Bytes) -> Result<()> {
        // a receiver with the same limit would skip the frame
        checked_payload_len(payload.len(), self.options.max_payload_size)?;
        let writer = self
            .peers
            .lock()
            .get(peer)
            .map(|handle| handle.writer.clone())
            .ok_or_else(|| RpcError::UnknownPeer(peer.to_string()))?;
        writer.send(payload).await
    }

    async fn recv(&mut self) -> Option<TransportEvent> {
        loop {
            let event = self.events_rx.recv().await?;
            // frames read before a disconnect may still be queued
            if let TransportEvent::Frame { peer, .. } = &event {
                if !self.peers.lock().contains_key(peer) {
                    continue;
                }
            }
            return Some(event);
        }
    }

    fn disconnect(&mut self, peer: &str) {
        if let Some(handle) = self.peers.lock().remove(peer) {
            handle.reader.abort();
            tracing::debug!(peer, "stream dropped");
        }
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for (_, handle) in self.peers.lock().drain() {
            handle.reader.abort();
        }
        #[cfg(unix)]
        {
            if let Some(path) = self.socket_path.take() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Register a connected stream: spawn its writer and reader tasks.
fn attach_stream<R, W>(
    peer: PeerAddr,
    read_half: R,
    write_half: W,
    peers: &PeerMap,
    events: mpsc::Sender<TransportEvent>,
    options: &StreamOptions,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (writer, _writer_task) = spawn_writer_task(write_half, options.writer.clone());

    // the reader removes its own entry on EOF; insert before it can run
    let mut map = peers.lock();
    let reader = tokio::spawn(read_loop(
        peer.clone(),
        read_half,
        peers.clone(),
        events,
        options.max_payload_size,
    ));
    map.insert(
        peer,
        PeerHandle {
            writer,
            reader: reader.abort_handle(),
        },
    );
}

async fn read_loop<R>(
    peer: PeerAddr,
    mut read_half: R,
    peers: PeerMap,
    events: mpsc::Sender<TransportEvent>,
    max_payload_size: u32,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(%peer, error = %e, "stream read failed");
                break;
            }
        };

        for payload in frames.push(&buf[..n]) {
            let event = TransportEvent::Frame {
                peer: peer.clone(),
                payload,
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
    }

    if !frames.is_empty() || frames.skipped() > 0 {
        tracing::debug!(
            %peer,
            partial = !frames.is_empty(),
            skipped = frames.skipped(),
            "stream ended"
        );
    }

    // only report peers nobody disconnected explicitly
    if peers.lock().remove(&peer).is_some() {
        let _ = events.send(TransportEvent::Closed { peer }).await;
    }
}

/// Opens a client stream.
#[derive(Debug, Clone, Default)]
pub struct PipeConnector {
    options: StreamOptions,
}

impl PipeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer_config(mut self, config: WriterConfig) -> Self {
        self.options.writer = config;
        self
    }

    pub fn with_max_payload(mut self, max_payload_size: u32) -> Self {
        self.options.max_payload_size = max_payload_size;
        self
    }
}

impl Connector for PipeConnector {
    type Transport = PipeTransport;

    async fn connect(&self, addr: &str) -> Result<PipeTransport> {
        let transport = PipeTransport::new(self.options.clone());
        let (read_half, write_half) = platform::connect(addr).await?;
        attach_stream(
            addr.to_string(),
            read_half,
            write_half,
            &transport.peers,
            transport.events_tx.clone(),
            &transport.options,
        );
        tracing::debug!(addr, "pipe connected");
        Ok(transport)
    }
}

/// Binds a listening stream endpoint.
#[derive(Debug, Clone, Default)]
pub struct PipeAcceptor {
    options: StreamOptions,
}

impl PipeAcceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_writer_config(mut self, config: WriterConfig) -> Self {
        self.options.writer = config;
        self
    }

    pub fn with_max_payload(mut self, max_payload_size: u32) -> Self {
        self.options.max_payload_size = max_payload_size;
        self
    }
}

impl Acceptor for PipeAcceptor {
    type Transport = PipeTransport;

    async fn listen(self, addr: &str) -> Result<PipeTransport> {
        let mut transport = PipeTransport::new(self.options);
        let listener = platform::Listener::bind(addr)?;

        let peers = transport.peers.clone();
        let events = transport.events_tx.clone();
        let options = transport.options.clone();
        let path = addr.to_string();

        let accept = tokio::spawn(async move {
            let mut next_peer: u64 = 0;
            loop {
                match listener.accept().await {
                    Ok((read_half, write_half)) => {
                        next_peer += 1;
                        let peer = format!("{path}#{next_peer}");
                        tracing::debug!(%peer, "stream accepted");
                        attach_stream(peer, read_half, write_half, &peers, events.clone(), &options);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        return;
                    }
                }
            }
        });

        transport.accept_task = Some(accept.abort_handle());
        #[cfg(unix)]
        {
            transport.socket_path = Some(addr.to_string());
        }
        tracing::debug!(addr, "pipe listening");
        Ok(transport)
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod platform {
    use std::path::Path;

    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::{UnixListener, UnixStream};

    use crate::error::Result;

    pub async fn connect(path: &str) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = UnixStream::connect(path).await?;
        Ok(stream.into_split())
    }

    pub struct Listener {
        listener: UnixListener,
    }

    impl Listener {
        /// Removes any stale socket file at the path before binding.
        pub fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }
            Ok(Self {
                listener: UnixListener::bind(path)?,
            })
        }

        pub async fn accept(&self) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream.into_split())
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod platform {
    use parking_lot::Mutex;
    use tokio::io::{ReadHalf, WriteHalf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    use crate::error::Result;

    pub async fn connect(
        path: &str,
    ) -> Result<(ReadHalf<NamedPipeClient>, WriteHalf<NamedPipeClient>)> {
        let client = ClientOptions::new().open(path)?;
        Ok(tokio::io::split(client))
    }

    pub struct Listener {
        path: String,
        next: Mutex<Option<NamedPipeServer>>,
    }

    impl Listener {
        pub fn bind(path: &str) -> Result<Self> {
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)?;
            Ok(Self {
                path: path.to_string(),
                next: Mutex::new(Some(first)),
            })
        }

        pub async fn accept(
            &self,
        ) -> Result<(ReadHalf<NamedPipeServer>, WriteHalf<NamedPipeServer>)> {
            let pending = self.next.lock().take();
            let server = match pending {
                Some(server) => server,
                None => ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;

            // the next client needs an instance to connect to
            let instance = ServerOptions::new().create(&self.path)?;
            *self.next.lock() = Some(instance);
            Ok(tokio::io::split(server))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pipe_path_format() {
        let path = generate_pipe_path();

        #[cfg(unix)]
        {
            assert!(path.starts_with("/tmp/mprpc-"));
            assert!(path.ends_with(".sock"));
        }

        #[cfg(windows)]
        {
            assert!(path.starts_with(r"\\.\pipe\mprpc-"));
        }
    }

    #[test]
    fn test_generate_pipe_path_uniqueness() {
        let paths: Vec<String> = (0..10).map(|_| generate_pipe_path()).collect();

        for (i, p1) in paths.iter().enumerate() {
            for p2 in &paths[i + 1..] {
                assert_ne!(p1, p2);
            }
        }
    }

    #[test]
    fn test_pipe_path_contains_pid() {
        let path = generate_pipe_path();
        assert!(path.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listen_connect_exchange() {
        let path = generate_pipe_path();
        let mut server = PipeAcceptor::new().listen(&path).await.unwrap();
        let mut client = PipeConnector::new().connect(&path).await.unwrap();

        client.send(&path, Bytes::from_static(b"hello")).await.unwrap();
        let Some(TransportEvent::Frame { peer, payload }) = server.recv().await else {
            panic!("expected frame");
        };
        assert_eq!(peer, format!("{path}#1"));
        assert_eq!(&payload[..], b"hello");

        server.send(&peer, Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(
            client.recv().await,
            Some(TransportEvent::Frame {
                peer: path.clone(),
                payload: Bytes::from_static(b"world"),
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_client_drop_reports_closed() {
        let path = generate_pipe_path();
        let mut server = PipeAcceptor::new().listen(&path).await.unwrap();
        let mut client = PipeConnector::new().connect(&path).await.unwrap();
        client.send(&path, Bytes::from_static(b"x")).await.unwrap();

        let Some(TransportEvent::Frame { peer, .. }) = server.recv().await else {
            panic!("expected frame");
        };
        drop(client);

        assert_eq!(server.recv().await, Some(TransportEvent::Closed { peer }));
        assert_eq!(server.peer_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_file_removed_on_drop() {
        let path = generate_pipe_path();
        let server = PipeAcceptor::new().listen(&path).await.unwrap();
        assert!(std::path::Path::new(&path).exists());
        drop(server);
        assert!(!std::path::Path::new(&path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_to_missing_socket_fails() {
        let path = generate_pipe_path();
        assert!(PipeConnector::new().connect(&path).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_oversized_frame_skipped_stream_kept() {
        use tokio::io::AsyncWriteExt;

        let path = generate_pipe_path();
        let mut server = PipeAcceptor::new()
            .with_max_payload(16)
            .listen(&path)
            .await
            .unwrap();

        let mut raw = tokio::net::UnixStream::connect(&path).await.unwrap();
        raw.write_all(&crate::protocol::build_frame(&[7u8; 1024]).unwrap())
            .await
            .unwrap();
        raw.write_all(&crate::protocol::build_frame(b"small").unwrap())
            .await
            .unwrap();

        match server.recv().await {
            Some(TransportEvent::Frame { payload, .. }) => assert_eq!(&payload[..], b"small"),
            other => panic!("expected the small frame, got {other:?}"),
        }
        assert_eq!(server.peer_count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_send_rejects_oversized_payload() {
        let path = generate_pipe_path();
        let mut server = PipeAcceptor::new().listen(&path).await.unwrap();
        let mut client = PipeConnector::new()
            .with_max_payload(16)
            .connect(&path)
            .await
            .unwrap();

        let err = client
            .send(&path, Bytes::from(vec![0u8; 17]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));

        // the stream is still usable
        client.send(&path, Bytes::from_static(b"fits")).await.unwrap();
        match server.recv().await {
            Some(TransportEvent::Frame { payload, .. }) => assert_eq!(&payload[..], b"fits"),
            other => panic!("expected a frame, got {other:?}"),
        }
    }
}
