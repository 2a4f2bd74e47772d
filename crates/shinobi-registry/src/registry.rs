//! `Registry` listener and accept loop.
//!
//! The registry is the host-side hub every peer connects to, the host's own
//! client included. It ties the layers together:
//! transport → protocol → seat table → relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shinobi_protocol::{Codec, Event, Message, PipeCodec, Roster};
use shinobi_transport::{ConnectionConfig, DisconnectCause, Listener, TcpConnection, TcpTransport};
use tokio::sync::{Mutex, watch};

use crate::handler::{deliver, handle_connection};
use crate::{RegistryConfig, RegistryError, SeatTable};

/// State shared by the accept loop, every connection task and every
/// [`RegistryHandle`].
///
/// All seat bookkeeping sits behind the one `table` lock; control
/// broadcasts are written while it is held so every peer sees joins,
/// departures and re-indexing in the same order.
pub(crate) struct Shared {
    pub(crate) table: Mutex<SeatTable<TcpConnection>>,
    pub(crate) config: RegistryConfig,
    pub(crate) codec: PipeCodec,
    accepting: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Encodes a message, logging instead of failing: every message the
    /// registry builds itself is representable.
    pub(crate) fn encode(&self, message: &Message) -> Option<Vec<u8>> {
        match self.codec.encode(message) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!(event = message.event.name(), error = %e, "failed to encode message");
                None
            }
        }
    }

    /// Stops accepting, sends `!leave` to every seat and closes it.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub(crate) async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);

        let seats = self.table.lock().await.drain();
        tracing::info!(seats = seats.len(), "registry shutting down");

        if let Some(leave) = self.encode(&Message::others(Event::Disconnect)) {
            deliver(&leave, &seats).await;
        }
        for (_, conn) in seats {
            conn.close_with(DisconnectCause::Shutdown).await;
        }
    }
}

/// A bound registry, ready to [`run`](Self::run).
///
/// # Example
///
/// ```rust,ignore
/// let registry = Registry::bind(RegistryConfig::default()).await?;
/// let handle = registry.spawn();
/// // ... later
/// handle.shutdown().await;
/// ```
pub struct Registry {
    transport: TcpTransport,
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl Registry {
    /// Binds the listener described by `config`.
    pub async fn bind(config: RegistryConfig) -> Result<Self, RegistryError> {
        let config = config.validated();
        let transport = TcpTransport::bind(&config.bind_addr)
            .await?
            .with_config(ConnectionConfig {
                write_timeout: config.write_timeout,
                ..ConnectionConfig::default()
            });
        let local_addr = transport.local_addr()?;
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            table: Mutex::new(SeatTable::new(config.max_slots)),
            config,
            codec: PipeCodec,
            accepting: AtomicBool::new(true),
            shutdown,
        });

        Ok(Self {
            transport,
            shared,
            local_addr,
        })
    }

    /// The address the registry is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle for inspecting and stopping the registry.
    pub fn handle(&self) -> RegistryHandle {
        RegistryHandle {
            shared: Arc::clone(&self.shared),
            local_addr: self.local_addr,
        }
    }

    /// Runs the accept loop on a background task and returns its handle.
    pub fn spawn(self) -> RegistryHandle {
        let handle = self.handle();
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!(error = %e, "registry stopped with error");
            }
        });
        handle
    }

    /// Accepts connections until the registry is shut down.
    ///
    /// Each accepted connection gets its own task running the handshake
    /// and then the relay loop.
    pub async fn run(mut self) -> Result<(), RegistryError> {
        tracing::info!(addr = %self.local_addr, max_slots = self.shared.config.max_slots, "registry running");
        let mut shutdown = self.shared.shutdown.subscribe();

        loop {
            let conn = tokio::select! {
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };

            if !self.shared.is_accepting() {
                conn.close_with(DisconnectCause::Shutdown).await;
                break;
            }

            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(conn, shared).await {
                    tracing::debug!(error = %e, "connection ended with error");
                }
            });
        }

        drop(self.transport);
        tracing::info!(addr = %self.local_addr, "registry stopped");
        Ok(())
    }
}

/// Cloneable handle to a running registry.
#[derive(Clone)]
pub struct RegistryHandle {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl RegistryHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current seat roster, in seat order.
    pub async fn roster(&self) -> Roster {
        self.shared.table.lock().await.roster()
    }

    /// Number of occupied seats.
    pub async fn occupied(&self) -> usize {
        self.shared.table.lock().await.len()
    }

    /// Whether the host's `[START GAME]` has gone out.
    pub async fn launched(&self) -> bool {
        self.shared.table.lock().await.launched()
    }

    /// Disconnects every peer and stops the accept loop. Idempotent.
    pub async fn shutdown(&self) {
        self.shared.shutdown().await;
    }

    pub fn is_shut_down(&self) -> bool {
        !self.shared.is_accepting()
    }

    /// Resolves once the registry has shut down, whether by
    /// [`shutdown`](Self::shutdown) or because the host left.
    pub async fn wait_shutdown(&self) {
        let mut rx = self.shared.shutdown.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
