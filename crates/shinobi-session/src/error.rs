//! Error types for the session layer.

use crate::Phase;

/// Errors raised by the lobby and session state machine.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The requested phase change is not an edge of the state machine.
    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// A message that is well-formed but not valid right now, such as
    /// `[START GAME]` before the lobby exists.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Launch was requested while some occupied slots are not ready.
    /// Carries the nicknames still being waited on.
    #[error("launch not permitted, waiting on {}", waiting.join(", "))]
    LaunchNotPermitted { waiting: Vec<String> },

    /// A host-only action was attempted by a client.
    #[error("only the host may do this")]
    NotHost,

    /// Every slot is taken.
    #[error("all {0} slots are occupied")]
    LobbyFull(usize),

    /// An index beyond the occupied slots was referenced.
    #[error("slot {0} is not occupied")]
    SlotOutOfRange(usize),
}
