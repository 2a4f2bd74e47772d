//! Unified error type for Shinobi.

use shinobi_client::ClientError;
use shinobi_protocol::ProtocolError;
use shinobi_registry::RegistryError;
use shinobi_session::SessionError;
use shinobi_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `shinobi` facade you deal with this single error type
/// instead of importing errors from each layer; `?` converts them.
#[derive(Debug, thiserror::Error)]
pub enum ShinobiError {
    /// Socket-level failure (connect, send, recv, framing).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame or payload that could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An action not allowed in the current phase or role.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The host-side registry failed to start or refused a peer.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Connecting or acting on a client session failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl ShinobiError {
    /// Short status for a menu line, e.g. `"[TIMED OUT]"`.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::Client(e) => e.status_text(),
            Self::Transport(TransportError::ConnectTimedOut(_)) => "[TIMED OUT]",
            Self::Registry(_) => "[ERROR]",
            _ => "[DISCONNECTED]",
        }
    }
}
