//! Error types for the session registry.

use shinobi_protocol::{ClientId, ProtocolError};
use shinobi_transport::TransportError;

/// Errors raised while admitting or serving a connection.
///
/// Each one is confined to a single connection: the registry logs it and
/// keeps serving everyone else.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The peer's nickname or client-id reply was missing, late or
    /// malformed. The socket is dropped without admitting it.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Every slot is occupied.
    #[error("session is full ({0} slots)")]
    CapacityExceeded(usize),

    /// A client tried to join before the host took slot 0.
    #[error("no host in the session yet")]
    HostNotPresent,

    /// The claimed client id is already seated.
    #[error("client id {0} is already in the session")]
    DuplicateClientId(ClientId),

    /// The registry is shutting down.
    #[error("registry is shut down")]
    ShutDown,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
