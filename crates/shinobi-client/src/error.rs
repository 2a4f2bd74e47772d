//! Error types for the client session.

use shinobi_protocol::ProtocolError;
use shinobi_session::SessionError;
use shinobi_transport::{DisconnectCause, TransportError};

/// Errors surfaced to the game while connecting or acting on a session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A connect or join attempt ran past its deadline.
    #[error("timed out waiting for {0}")]
    TimedOut(&'static str),

    /// The connection closed before a slot was assigned.
    #[error("connection interrupted before joining: {0}")]
    Interrupted(DisconnectCause),

    /// The registry answered `[JOIN FAILED]`.
    #[error("the host refused the join")]
    JoinFailed,

    /// The session ended after the join.
    #[error("connection lost: {0}")]
    ConnectionLost(DisconnectCause),

    /// An action was attempted on a session that is no longer connected.
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Short status for a menu line, e.g. `"[TIMED OUT]"`.
    pub fn status_text(&self) -> &'static str {
        match self {
            Self::TimedOut(_) | Self::Transport(TransportError::ConnectTimedOut(_)) => "[TIMED OUT]",
            Self::Interrupted(_) => "[INTERRUPTED]",
            Self::JoinFailed => "[JOIN FAILED]",
            _ => "[DISCONNECTED]",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_status_text_timeouts() {
        assert_eq!(ClientError::TimedOut("join").status_text(), "[TIMED OUT]");
        let connect = ClientError::Transport(TransportError::ConnectTimedOut(Duration::from_secs(5)));
        assert_eq!(connect.status_text(), "[TIMED OUT]");
    }

    #[test]
    fn test_status_text_join_outcomes() {
        assert_eq!(ClientError::JoinFailed.status_text(), "[JOIN FAILED]");
        assert_eq!(
            ClientError::Interrupted(DisconnectCause::PeerClosed).status_text(),
            "[INTERRUPTED]"
        );
        assert_eq!(
            ClientError::ConnectionLost(DisconnectCause::PeerLeft).status_text(),
            "[DISCONNECTED]"
        );
        assert_eq!(ClientError::NotConnected.status_text(), "[DISCONNECTED]");
    }

    #[test]
    fn test_display_includes_cause() {
        let err = ClientError::ConnectionLost(DisconnectCause::TimedOut);
        assert_eq!(err.to_string(), "connection lost: write timed out");
    }
}
