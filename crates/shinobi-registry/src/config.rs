//! Registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use shinobi_session::MAX_SLOTS;

/// Port the host listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 5050;

/// Configuration for a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Address to listen on.
    pub bind_addr: String,
    /// Seats available, host included. At most [`MAX_SLOTS`].
    pub max_slots: usize,
    /// How long each handshake reply may take.
    pub handshake_timeout: Duration,
    /// How long a single write to a peer may take.
    pub write_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_slots: MAX_SLOTS,
            handshake_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl RegistryConfig {
    /// Clamps `max_slots` into `1..=MAX_SLOTS`.
    pub fn validated(mut self) -> Self {
        let clamped = self.max_slots.clamp(1, MAX_SLOTS);
        if clamped != self.max_slots {
            tracing::warn!(max_slots = self.max_slots, clamped, "max_slots out of range, clamping");
            self.max_slots = clamped;
        }
        self
    }
}
