//! Transport layer for Shinobi LAN sessions.
//!
//! Provides the [`Listener`] and [`Connection`] traits plus the framed TCP
//! implementation every peer uses. A connection carries whole frames: the
//! sender appends the delimiter, the receiver buffers partial reads until one
//! shows up (see [`framing`]).
//!
//! Every [`TcpConnection`] owns a close signal. Closing is idempotent, wakes
//! any task blocked in `recv`, and fires the registered disconnect callback
//! exactly once, whichever side noticed the disconnect first.

#![allow(async_fn_in_trait)]

mod error;
pub mod framing;
mod tcp;

pub use error::TransportError;
pub use framing::{DEFAULT_DELIMITER, FrameBuffer, MAX_FRAME_LEN};
pub use tcp::{ConnectionConfig, DisconnectCallback, TcpConnection, TcpTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique number of one connection, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// This side called `close()`.
    LocalClose,
    /// The peer closed its end of the socket (read returned EOF).
    PeerClosed,
    /// The peer announced it was leaving before closing.
    PeerLeft,
    /// The peer refused the join and is about to close.
    Rejected,
    /// A write did not complete within the write timeout.
    TimedOut,
    /// The local session is shutting down every connection.
    Shutdown,
    /// An I/O error or a framing violation broke the stream.
    Failed(String),
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalClose => f.write_str("closed locally"),
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::PeerLeft => f.write_str("peer left"),
            Self::Rejected => f.write_str("join rejected"),
            Self::TimedOut => f.write_str("write timed out"),
            Self::Shutdown => f.write_str("session shut down"),
            Self::Failed(reason) => write!(f, "connection failed: {reason}"),
        }
    }
}

/// Source of inbound connections. The listening socket is released when
/// the listener is dropped.
pub trait Listener: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The bound address, with the real port when bound to port 0.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// One peer, exchanging whole frames.
///
/// Frames never contain the delimiter: `send` appends it and `recv` strips
/// it. Both are safe to call from different tasks at the same time.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    /// Writes one frame.
    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Reads the next frame. `Ok(None)` means the connection is closed,
    /// by either side, and every later call returns `Ok(None)` too.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection. Later calls do nothing.
    async fn close(&self) -> Result<(), Self::Error>;

    fn is_closed(&self) -> bool;

    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_next_is_increasing() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();
        assert!(second > first);
        assert_ne!(first.as_u64(), 0);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::next();
        assert_eq!(id.to_string(), format!("conn#{}", id.as_u64()));
    }

    #[test]
    fn test_disconnect_cause_display_includes_reason() {
        let cause = DisconnectCause::Failed("connection reset".into());
        assert_eq!(cause.to_string(), "connection failed: connection reset");
        assert_eq!(DisconnectCause::PeerLeft.to_string(), "peer left");
    }
}
