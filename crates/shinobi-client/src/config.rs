//! Client session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shinobi_protocol::ClientId;
use shinobi_session::Role;
use shinobi_tick::{CLIENT_SEND_HZ, HOST_SEND_HZ};

/// Configuration for a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `ip:port` of the host's registry.
    pub server_addr: String,
    pub nickname: String,
    pub role: Role,
    /// Client id to claim in the handshake. `None` claims `"host"` for the
    /// host role and `client_unverified` otherwise.
    pub client_id: Option<ClientId>,
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on the wait between an open socket and an assigned slot.
    pub join_timeout: Duration,
    /// Entity batches per second. `None` uses 60 Hz for the host and 30 Hz
    /// for clients.
    pub send_rate_hz: Option<u32>,
    /// How long a single write may take.
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:5050".into(),
            nickname: "Player".into(),
            role: Role::Client,
            client_id: None,
            connect_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
            send_rate_hz: None,
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    /// A joining client.
    pub fn client(server_addr: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            nickname: nickname.into(),
            ..Self::default()
        }
    }

    /// The host's own session, connecting to its local registry.
    pub fn host(server_addr: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            role: Role::Host,
            ..Self::client(server_addr, nickname)
        }
    }

    /// The id sent in reply to `[CLIENT ID]`.
    pub fn claimed_client_id(&self) -> ClientId {
        self.client_id
            .clone()
            .unwrap_or_else(|| self.role.claimed_client_id())
    }

    pub fn send_rate(&self) -> u32 {
        self.send_rate_hz.unwrap_or(match self.role {
            Role::Host => HOST_SEND_HZ,
            Role::Client => CLIENT_SEND_HZ,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_rate_defaults_by_role() {
        assert_eq!(ClientConfig::client("h:1", "Ann").send_rate(), 30);
        assert_eq!(ClientConfig::host("h:1", "Host").send_rate(), 60);

        let config = ClientConfig {
            send_rate_hz: Some(10),
            ..ClientConfig::default()
        };
        assert_eq!(config.send_rate(), 10);
    }

    #[test]
    fn test_claimed_client_id_follows_role() {
        assert!(ClientConfig::host("h:1", "Host").claimed_client_id().is_host());
        assert!(ClientConfig::client("h:1", "Ann").claimed_client_id().is_unverified());

        let config = ClientConfig {
            client_id: Some(ClientId::new("ann")),
            ..ClientConfig::default()
        };
        assert_eq!(config.claimed_client_id(), ClientId::new("ann"));
    }
}
