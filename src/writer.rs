//! Dedicated writer task for stream transports.
//!
//! Each stream connection gets one writer task fed by an mpsc channel. The
//! task prepends the length header and batches whatever frames are ready into
//! a single vectored write.
//!
//! ```text
//! network thread ─► WriterHandle ─► mpsc::Sender<Bytes> ─► Writer Task ─► socket
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};
use crate::protocol::{checked_payload_len, encode_header, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long `send` waits for queue space.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frame payloads to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a payload, waiting up to the backpressure timeout for space.
    ///
    /// # Errors
    ///
    /// `Protocol` for a payload whose length does not fit the header,
    /// `BackpressureTimeout` when the queue stays full, `ConnectionClosed`
    /// once the writer task has exited.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        checked_payload_len(payload.len(), u32::MAX)?;
        match tokio::time::timeout(self.timeout, self.tx.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => Err(RpcError::BackpressureTimeout),
        }
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly when every handle is dropped, or with an error when
/// the underlying write fails.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let handle = WriterHandle {
        tx,
        timeout: config.backpressure_timeout,
    };
    let task = tokio::spawn(writer_loop(rx, writer));
    (handle, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let Some(first) = rx.recv().await else {
            let _ = writer.shutdown().await;
            return Ok(());
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(payload) => batch.push(payload),
                Err(_) => break,
            }
        }

        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::debug!(error = %e, "writer task stopping");
            return Err(e);
        }
    }
}

/// Write a batch of payloads, each preceded by its length header, using
/// vectored I/O.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let headers = batch
        .iter()
        .map(|payload| checked_payload_len(payload.len(), u32::MAX).map(encode_header))
        .collect::<Result<Vec<[u8; HEADER_SIZE]>>>()?;
    let total_size: usize = batch.iter().map(|p| HEADER_SIZE + p.len()).sum();

    let mut total_written = 0;
    while total_written < total_size {
        let slices = build_remaining_slices(&headers, batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build the IoSlice list for whatever is left after `skip_bytes` were written.
fn build_remaining_slices<'a>(
    headers: &'a [[u8; HEADER_SIZE]],
    batch: &'a [Bytes],
    skip_bytes: usize,
) -> Vec<IoSlice<'a>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for (header, payload) in headers.iter().zip(batch) {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&header[start..]));
        }
        offset = header_end;

        if !payload.is_empty() {
            let payload_end = offset + payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0, 0, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[tokio::test]
    async fn test_writer_batching_preserves_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10u32 {
            handle
                .send(Bytes::copy_from_slice(&i.to_be_bytes()))
                .await
                .unwrap();
        }

        let mut frames = FrameBuffer::new();
        let mut received = Vec::new();
        let mut buf = vec![0u8; 1024];
        while received.len() < 10 {
            let n = server.read(&mut buf).await.unwrap();
            received.extend(frames.push(&buf[..n]));
        }

        for (i, frame) in received.iter().enumerate() {
            assert_eq!(&frame[..], &(i as u32).to_be_bytes());
        }
    }

    #[tokio::test]
    async fn test_send_times_out_when_stalled() {
        let (client, _server) = duplex(16);
        let config = WriterConfig {
            channel_capacity: 1,
            backpressure_timeout: Duration::from_millis(20),
        };
        let (handle, _task) = spawn_writer_task(client, config);

        // the duplex buffer fills, the writer stalls, the channel fills
        let mut saw_timeout = false;
        for _ in 0..64 {
            if let Err(RpcError::BackpressureTimeout) = handle.send(Bytes::from(vec![0u8; 64])).await {
                saw_timeout = true;
                break;
            }
        }
        assert!(saw_timeout);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![Bytes::from_static(b"hello")];
        let headers = vec![encode_header(5)];

        let slices = build_remaining_slices(&headers, &batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![Bytes::from_static(b"hello")];
        let headers = vec![encode_header(5)];

        let slices = build_remaining_slices(&headers, &batch, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_into_second_frame() {
        let batch = vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cde")];
        let headers = vec![encode_header(2), encode_header(3)];

        let slices = build_remaining_slices(&headers, &batch, HEADER_SIZE + 2 + 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 1);
        assert_eq!(slices[1].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| Bytes::from_static(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
