//! Framed TCP transport.
//!
//! A [`TcpConnection`] splits its socket into a read half and a write half,
//! each behind its own lock, so one task can block in `recv` while others
//! send. Writes are bounded by a timeout: a peer that stops reading must not
//! stall the registry's broadcast path forever.

use std::net::SocketAddr;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};

use crate::framing::{self, FrameBuffer};
use crate::{Connection, ConnectionId, DisconnectCause, Listener, TransportError};

const READ_CHUNK: usize = 4096;

/// Invoked once when a connection ends, with the reason it ended.
pub type DisconnectCallback = Box<dyn FnOnce(DisconnectCause) + Send + 'static>;

/// Per-connection tuning shared by both ends.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Byte that terminates each frame.
    pub delimiter: u8,
    /// Largest partial frame the reader will buffer.
    pub max_frame_len: usize,
    /// How long a single write may take before the peer is considered gone.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            delimiter: framing::DEFAULT_DELIMITER,
            max_frame_len: framing::MAX_FRAME_LEN,
            write_timeout: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// The TCP [`Listener`] the registry accepts peers on.
pub struct TcpTransport {
    listener: TcpListener,
    config: ConnectionConfig,
}

impl TcpTransport {
    /// Binds a listener to the given address (`"0.0.0.0:5555"`, `"127.0.0.1:0"`).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            config: ConnectionConfig::default(),
        })
    }

    /// Replaces the config applied to accepted connections.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }
}

impl Listener for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = TcpConnection::from_stream(stream, self.config.clone())
            .map_err(TransportError::AcceptFailed)?;
        tracing::debug!(id = %conn.id, peer = %conn.peer_addr, "accepted TCP connection");
        Ok(conn)
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

struct FrameReader {
    half: OwnedReadHalf,
    frames: FrameBuffer,
}

#[derive(Default)]
struct CloseState {
    cause: Option<DisconnectCause>,
    callback: Option<DisconnectCallback>,
}

/// A single framed TCP connection.
pub struct TcpConnection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    reader: Mutex<FrameReader>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    state: StdMutex<CloseState>,
    config: ConnectionConfig,
}

impl TcpConnection {
    /// Opens an outbound connection, giving up after `timeout`.
    pub async fn connect(
        addr: &str,
        timeout: Duration,
        config: ConnectionConfig,
    ) -> Result<Self, TransportError> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
            Err(_) => return Err(TransportError::ConnectTimedOut(timeout)),
        };
        let conn = Self::from_stream(stream, config).map_err(TransportError::ConnectFailed)?;
        tracing::debug!(id = %conn.id, peer = %conn.peer_addr, "connected");
        Ok(conn)
    }

    fn from_stream(stream: TcpStream, config: ConnectionConfig) -> std::io::Result<Self> {
        // Snapshots are tiny and latency-sensitive.
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Ok(Self {
            id: ConnectionId::next(),
            peer_addr,
            reader: Mutex::new(FrameReader {
                half: read_half,
                frames: FrameBuffer::new(config.delimiter, config.max_frame_len),
            }),
            writer: Mutex::new(Some(write_half)),
            closed,
            state: StdMutex::new(CloseState::default()),
            config,
        })
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Why the connection ended, or `None` while it is still open.
    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        self.lock_state().cause.clone()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    /// Registers the callback fired when the connection ends.
    ///
    /// If the connection is already closed the callback runs immediately.
    /// Registering again replaces a callback that has not fired yet.
    pub fn on_disconnected<F>(&self, callback: F)
    where
        F: FnOnce(DisconnectCause) + Send + 'static,
    {
        let mut state = self.lock_state();
        match state.cause.clone() {
            Some(cause) => {
                drop(state);
                callback(cause);
            }
            None => state.callback = Some(Box::new(callback)),
        }
    }

    /// Closes the connection, recording `cause`.
    ///
    /// Returns `true` for the call that actually closed it and `false` for
    /// every later call. Only the first cause is kept, and the disconnect
    /// callback fires at most once.
    pub async fn close_with(&self, cause: DisconnectCause) -> bool {
        let callback = {
            let mut state = self.lock_state();
            if state.cause.is_some() {
                return false;
            }
            state.cause = Some(cause.clone());
            state.callback.take()
        };

        self.closed.send_replace(true);
        tracing::debug!(id = %self.id, peer = %self.peer_addr, %cause, "connection closed");

        if let Some(mut half) = self.writer.lock().await.take() {
            let _ = half.shutdown().await;
        }
        if let Some(callback) = callback {
            callback(cause);
        }
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, CloseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    // An error means the sender is gone, which only happens on drop.
    let _ = rx.wait_for(|closed| *closed).await;
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let frame = framing::encode_frame(data, self.config.delimiter)?;

        let result = {
            let mut writer = self.writer.lock().await;
            let Some(half) = writer.as_mut() else {
                return Err(TransportError::ConnectionClosed(self.id.to_string()));
            };
            tokio::time::timeout(self.config.write_timeout, half.write_all(&frame)).await
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.close_with(DisconnectCause::Failed(e.to_string())).await;
                Err(TransportError::SendFailed(e))
            }
            Err(_) => {
                tracing::warn!(id = %self.id, timeout = ?self.config.write_timeout, "write timed out");
                self.close_with(DisconnectCause::TimedOut).await;
                Err(TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "write timed out",
                )))
            }
        }
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut closed_rx = self.closed.subscribe();
        if *closed_rx.borrow() {
            return Ok(None);
        }

        let mut reader = tokio::select! {
            _ = wait_closed(&mut closed_rx) => return Ok(None),
            reader = self.reader.lock() => reader,
        };
        let FrameReader { half, frames } = &mut *reader;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.close_with(DisconnectCause::Failed(e.to_string())).await;
                    return Err(e);
                }
            }

            let read = tokio::select! {
                _ = wait_closed(&mut closed_rx) => return Ok(None),
                read = half.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => {
                    if frames.pending() > 0 {
                        tracing::debug!(id = %self.id, pending = frames.pending(), "discarding partial frame at EOF");
                    }
                    self.close_with(DisconnectCause::PeerClosed).await;
                    return Ok(None);
                }
                Ok(n) => frames.extend(&chunk[..n]),
                Err(e) => {
                    self.close_with(DisconnectCause::Failed(e.to_string())).await;
                    return Err(TransportError::ReceiveFailed(e));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.close_with(DisconnectCause::LocalClose).await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
