//! Participant role and session phase.

use std::fmt;

use serde::{Deserialize, Serialize};
use shinobi_protocol::{ClientId, EntityId};

use crate::SessionError;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Whether this participant is the authoritative host or a joining client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Client,
}

impl Role {
    /// Only the host simulates enemies; clients mirror them.
    pub fn can_simulate_enemies(self) -> bool {
        matches!(self, Self::Host)
    }

    /// Only the host originates `[START GAME]`.
    pub fn can_launch(self) -> bool {
        matches!(self, Self::Host)
    }

    /// The client id this role claims during the handshake.
    pub fn claimed_client_id(self) -> ClientId {
        match self {
            Self::Host => ClientId::host(),
            Self::Client => ClientId::unverified(),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Lifecycle of one participant's session.
///
/// ```text
/// Disconnected → Connecting → AwaitingSlot → Lobby → Launched → Running
///       ↑______________________ (any phase) ____________________|
/// ```
///
/// - **Connecting**: the TCP connect is in flight.
/// - **AwaitingSlot**: socket open, handshake not yet answered with a slot.
/// - **Lobby**: a slot is assigned; readiness is being collected.
/// - **Launched**: `[START GAME]` was sent or received.
/// - **Running**: the first level finished loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    AwaitingSlot,
    Lobby,
    Launched,
    Running,
}

impl Phase {
    /// The phase that follows this one on the happy path.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Disconnected => Some(Self::Connecting),
            Self::Connecting => Some(Self::AwaitingSlot),
            Self::AwaitingSlot => Some(Self::Lobby),
            Self::Lobby => Some(Self::Launched),
            Self::Launched => Some(Self::Running),
            Self::Running => None,
        }
    }

    /// Any phase may drop to `Disconnected`; otherwise only the next phase
    /// is reachable.
    pub fn can_transition_to(self, target: Self) -> bool {
        target == Self::Disconnected || self.next() == Some(target)
    }

    /// Whether a slot has been assigned.
    pub fn has_slot(self) -> bool {
        matches!(self, Self::Lobby | Self::Launched | Self::Running)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingSlot => "AwaitingSlot",
            Self::Lobby => "Lobby",
            Self::Launched => "Launched",
            Self::Running => "Running",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// One participant's view of its own session.
///
/// Mutated by event dispatch and local actions only. Dropping to
/// `Disconnected` clears everything except the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub role: Role,
    phase: Phase,
    self_index: Option<usize>,
    self_client_id: Option<ClientId>,
    game_started: bool,
}

impl SessionState {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: Phase::Disconnected,
            self_index: None,
            self_client_id: None,
            game_started: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn self_index(&self) -> Option<usize> {
        self.self_index
    }

    pub fn self_client_id(&self) -> Option<&ClientId> {
        self.self_client_id.as_ref()
    }

    /// True from launch until disconnect. Entity batches flow only while set.
    pub fn game_started(&self) -> bool {
        self.game_started
    }

    /// The entity this participant is authoritative for.
    pub fn own_player(&self) -> Option<EntityId> {
        self.self_index.map(EntityId::player)
    }

    /// Moves to `to`, or fails without changing anything.
    pub fn transition(&mut self, to: Phase) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(to) {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(role = ?self.role, from = %self.phase, %to, "phase transition");
        match to {
            Phase::Disconnected => self.reset(),
            Phase::Launched => {
                self.phase = to;
                self.game_started = true;
            }
            _ => self.phase = to,
        }
        Ok(())
    }

    /// Records the slot the registry assigned (or re-assigned).
    pub fn assign_slot(&mut self, index: usize, client_id: ClientId) {
        self.self_index = Some(index);
        self.self_client_id = Some(client_id);
    }

    /// Back to `Disconnected` with no slot.
    pub fn reset(&mut self) {
        *self = Self::new(self.role);
    }
}
