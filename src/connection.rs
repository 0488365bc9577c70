//! Transport ownership for a single receiver connection.
//!
//! A [`Connection`] owns both halves of the byte stream. The write half
//! stays behind an async mutex so concurrent requests never interleave
//! partial frames. The read half is handed out once, to the one dispatcher
//! task allowed to consume it.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected ──► Closed
//!                                  │                        ▲
//!                                  └── error: no Connection │
//!                                                           │
//!             write error / interrupted write / EOF / close()
//! ```
//!
//! `Closed` is terminal. Reconnecting means building a new `Connection`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::constants::{DEFAULT_READ_BUFFER_SIZE, WRITER_SHUTDOWN_TIMEOUT};
use crate::error::ClientError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection state for a receiver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// TCP handshake in progress.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Stream is gone. Terminal.
    Closed,
}

/// Connection state that can be observed (and awaited) from other tasks.
#[derive(Debug, Clone)]
pub struct SharedConnectionState {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl SharedConnectionState {
    /// Create new shared state.
    pub fn new(initial: ConnectionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Get the current state.
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Transition to `new_state`.
    ///
    /// Returns `false` (and changes nothing) if the state was already
    /// `new_state` or is `Closed`.
    pub fn set(&self, new_state: ConnectionState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == new_state {
                return false;
            }
            *state = new_state;
            true
        })
    }

    /// Check if closed.
    pub fn is_closed(&self) -> bool {
        self.get() == ConnectionState::Closed
    }

    /// Resolves once the state reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on Closed.
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    /// Watch receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Result of a single read from the transport.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadChunk<'a> {
    /// Bytes received from the peer.
    Data(&'a [u8]),
    /// The peer closed its side cleanly.
    EndOfStream,
}

/// The read half of a [`Connection`].
pub struct ConnectionReader {
    peer: String,
    inner: BoxedReader,
    buf: Vec<u8>,
}

impl std::fmt::Debug for ConnectionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReader")
            .field("peer", &self.peer)
            .field("buffer_size", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionReader {
    /// Read the next chunk of raw bytes from the peer.
    ///
    /// Cancel safe: if the future is dropped before completing, no bytes
    /// are lost.
    pub async fn read_chunk(&mut self) -> Result<ReadChunk<'_>, ClientError> {
        let n = self.inner.read(&mut self.buf).await.map_err(ClientError::Receive)?;
        if n == 0 {
            return Ok(ReadChunk::EndOfStream);
        }
        Ok(ReadChunk::Data(&self.buf[..n]))
    }

    /// Peer description this reader belongs to.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// A single connection to a receiver.
pub struct Connection {
    peer: String,
    writer: Mutex<BoxedWriter>,
    reader: StdMutex<Option<BoxedReader>>,
    read_buffer_size: usize,
    state: SharedConnectionState,
    writer_shut_down: AtomicBool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a TCP connection to `host:port`.
    ///
    /// No retry: a refused, unresolvable, or slow peer fails this attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if resolution or the handshake fails,
    /// or if it takes longer than `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self, ClientError> {
        let addr = format!("{host}:{port}");
        let state = SharedConnectionState::new(ConnectionState::Disconnected);
        state.set(ConnectionState::Connecting);
        log::info!("[Connection] Connecting to {}", addr);

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                state.set(ConnectionState::Disconnected);
                log::warn!("[Connection] Connect to {} failed: {}", addr, source);
                return Err(ClientError::Connect { addr, source });
            }
            Err(_elapsed) => {
                state.set(ConnectionState::Disconnected);
                log::warn!("[Connection] Connect to {} timed out", addr);
                let source = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {}ms", connect_timeout.as_millis()),
                );
                return Err(ClientError::Connect { addr, source });
            }
        };

        // Frames are tiny; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Connection] Could not set TCP_NODELAY on {}: {}", addr, e);
        }

        log::info!("[Connection] Connected to {}", addr);
        Ok(Self::with_state(addr, stream, state))
    }

    /// Wrap an already-open duplex stream.
    ///
    /// The connection starts in `Connected`.
    pub fn from_stream<S>(peer: impl Into<String>, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state = SharedConnectionState::new(ConnectionState::Connecting);
        Self::with_state(peer.into(), stream, state)
    }

    fn with_state<S>(peer: String, stream: S, state: SharedConnectionState) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        state.set(ConnectionState::Connected);
        Self {
            peer,
            writer: Mutex::new(Box::new(write_half)),
            reader: StdMutex::new(Some(Box::new(read_half))),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            state,
            writer_shut_down: AtomicBool::new(false),
        }
    }

    /// Set the size of each transport read. Must be called before
    /// [`Connection::take_reader`].
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Peer description (`host:port` for TCP).
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Shared lifecycle state.
    pub fn state(&self) -> &SharedConnectionState {
        &self.state
    }

    /// Take the read half. Returns `None` if it was already taken, so at
    /// most one dispatcher can ever read from this connection.
    pub fn take_reader(&self) -> Option<ConnectionReader> {
        let inner = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(ConnectionReader {
            peer: self.peer.clone(),
            inner,
            buf: vec![0u8; self.read_buffer_size],
        })
    }

    /// Write one full frame and flush it.
    ///
    /// # Errors
    ///
    /// See [`Connection::write_and_then`].
    pub async fn write(&self, frame: &[u8]) -> Result<(), ClientError> {
        self.write_and_then(frame, || ()).await
    }

    /// Write one full frame, flush it, then run `after` before releasing the
    /// write lock.
    ///
    /// Anything `after` records is therefore ordered exactly like the frames
    /// on the wire. A failed write, or a caller cancelled mid-write, leaves
    /// an unknown prefix of the frame on the stream, so the connection is
    /// moved to `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] if the connection is already
    /// closed, or [`ClientError::Send`] if the write or flush fails.
    pub async fn write_and_then<T>(&self, frame: &[u8], after: impl FnOnce() -> T) -> Result<T, ClientError> {
        if self.state.is_closed() {
            return Err(ClientError::ConnectionLost);
        }
        let mut writer = self.writer.lock().await;
        // The previous holder may have closed the stream while we waited.
        if self.state.is_closed() {
            return Err(ClientError::ConnectionLost);
        }

        let incomplete = scopeguard::guard(&self.state, |state| {
            log::warn!("[Connection] Write to {} did not complete, closing", self.peer);
            state.set(ConnectionState::Closed);
        });
        writer.write_all(frame).await.map_err(ClientError::Send)?;
        writer.flush().await.map_err(ClientError::Send)?;
        scopeguard::ScopeGuard::into_inner(incomplete);

        Ok(after())
    }

    /// Close the connection and shut the write half down. Idempotent.
    ///
    /// A writer stuck on a peer that stopped reading holds the write lock;
    /// after [`WRITER_SHUTDOWN_TIMEOUT`] the shutdown is skipped and the
    /// stream closes when the connection is dropped.
    pub async fn close(&self) {
        if self.state.set(ConnectionState::Closed) {
            log::info!("[Connection] Closed {}", self.peer);
        }
        if self.writer_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("[Connection] Shutdown of {} failed: {}", self.peer, e),
            Err(_elapsed) => log::warn!("[Connection] Writer for {} still busy, skipping shutdown", self.peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_closed_is_terminal() {
        let state = SharedConnectionState::new(ConnectionState::Connected);
        assert!(state.set(ConnectionState::Closed));
        assert!(!state.set(ConnectionState::Connected));
        assert_eq!(state.get(), ConnectionState::Closed);
    }

    #[test]
    fn test_set_same_state_reports_unchanged() {
        let state = SharedConnectionState::new(ConnectionState::Connected);
        assert!(!state.set(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_from_stream_starts_connected() {
        let (io, _peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        assert_eq!(conn.state().get(), ConnectionState::Connected);
        assert_eq!(conn.peer(), "duplex");
    }

    #[tokio::test]
    async fn test_reader_handed_out_once() {
        let (io, _peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        assert!(conn.take_reader().is_some());
        assert!(conn.take_reader().is_none());
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (io, mut peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        conn.write(b"{\"type\":\"get\"}").await.unwrap();

        let mut buf = [0u8; 64];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"{\"type\":\"get\"}");
    }

    #[tokio::test]
    async fn test_write_and_then_runs_after_flush() {
        let (io, _peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        let value = conn.write_and_then(b"{}", || 7).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_read_chunk_and_end_of_stream() {
        let (io, mut peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io).with_read_buffer_size(16);
        let mut reader = conn.take_reader().unwrap();

        peer.write_all(b"hello").await.unwrap();
        assert_eq!(reader.read_chunk().await.unwrap(), ReadChunk::Data(b"hello"));

        drop(peer);
        assert_eq!(reader.read_chunk().await.unwrap(), ReadChunk::EndOfStream);
    }

    #[tokio::test]
    async fn test_write_after_close_is_connection_lost() {
        let (io, _peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        conn.close().await;
        conn.close().await;
        assert!(conn.state().is_closed());
        assert!(matches!(conn.write(b"{}").await, Err(ClientError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_close_does_not_wait_on_stuck_writer() {
        let (io, _peer) = duplex(16);
        let conn = Arc::new(Connection::from_stream("duplex", io));
        let stuck = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.write(&[b' '; 1024]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stuck.is_finished());

        tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT * 3, conn.close())
            .await
            .expect("close blocked behind a stuck writer");
        assert!(conn.state().is_closed());
        stuck.abort();
    }

    #[tokio::test]
    async fn test_failed_write_closes_connection() {
        let (io, peer) = duplex(64);
        let conn = Connection::from_stream("duplex", io);
        drop(peer);
        let err = conn.write(b"{\"type\":\"get\",\"feature\":\"power\"}").await.unwrap_err();
        assert!(matches!(err, ClientError::Send(_)));
        assert!(conn.state().is_closed());
    }

    #[tokio::test]
    async fn test_closed_future_resolves() {
        let state = SharedConnectionState::new(ConnectionState::Connected);
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.closed().await })
        };
        state.set(ConnectionState::Closed);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = Connection::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_connect_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (conn, accepted) = tokio::join!(
            Connection::connect("127.0.0.1", port, Duration::from_secs(2)),
            listener.accept()
        );
        let conn = conn.unwrap();
        accepted.unwrap();
        assert_eq!(conn.state().get(), ConnectionState::Connected);
        assert_eq!(conn.peer(), format!("127.0.0.1:{port}"));
    }
}
