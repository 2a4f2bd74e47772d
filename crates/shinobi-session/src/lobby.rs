//! The four-seat slot table and the launch rule.
//!
//! Occupied slots are always contiguous from index 0: a new player takes
//! the first free seat, and removing a seat shifts every higher seat down
//! by one. The host joins first and is never shifted.

use shinobi_protocol::{ClientId, EntityId, Roster};

use crate::{Role, SessionError};

/// Maximum number of seats in a session.
pub const MAX_SLOTS: usize = 4;

/// One occupied seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerState {
    pub nickname: String,
    pub client_id: ClientId,
    pub ready: bool,
    /// `player_{index + 1}`; follows the seat when it is shifted.
    pub entity_id: EntityId,
}

/// A seat that changed index after a departure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shift {
    pub from: usize,
    pub to: usize,
    pub client_id: ClientId,
}

/// Fixed array of optional seats, indexed `0..MAX_SLOTS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotTable {
    slots: [Option<PlayerState>; MAX_SLOTS],
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the table from a roster, in roster order.
    pub fn from_roster(roster: &Roster) -> Self {
        let mut table = Self::new();
        table.rebuild(roster);
        table
    }

    /// Replaces the seats with the roster's, keeping the ready flag of
    /// every client id that is still present.
    pub fn rebuild(&mut self, roster: &Roster) {
        if roster.len() > MAX_SLOTS {
            tracing::debug!(len = roster.len(), "roster longer than the slot table, truncating");
        }
        let previous = std::mem::take(&mut self.slots);
        for (index, (nickname, client_id)) in roster.iter().take(MAX_SLOTS).enumerate() {
            let ready = previous
                .iter()
                .flatten()
                .any(|p| p.client_id == *client_id && p.ready);
            self.slots[index] = Some(PlayerState {
                nickname: nickname.to_owned(),
                client_id: client_id.clone(),
                ready,
                entity_id: EntityId::player(index),
            });
        }
    }

    /// Seats a player in the first free slot and returns its index.
    pub fn push(&mut self, nickname: impl Into<String>, client_id: ClientId) -> Result<usize, SessionError> {
        let index = self.len();
        let Some(cell) = self.slots.get_mut(index) else {
            return Err(SessionError::LobbyFull(MAX_SLOTS));
        };
        *cell = Some(PlayerState {
            nickname: nickname.into(),
            client_id,
            ready: false,
            entity_id: EntityId::player(index),
        });
        Ok(index)
    }

    /// Vacates `index` and shifts every higher seat down by one.
    ///
    /// Returns the removed player and the seats that moved.
    pub fn remove(&mut self, index: usize) -> Result<(PlayerState, Vec<Shift>), SessionError> {
        let removed = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(SessionError::SlotOutOfRange(index))?;

        let mut shifts = Vec::new();
        for from in index + 1..MAX_SLOTS {
            let Some(mut player) = self.slots[from].take() else {
                break;
            };
            let to = from - 1;
            player.entity_id = EntityId::player(to);
            shifts.push(Shift {
                from,
                to,
                client_id: player.client_id.clone(),
            });
            self.slots[to] = Some(player);
        }
        Ok((removed, shifts))
    }

    /// Marks the seat held by `client_id` as ready. Returns `false` if no
    /// seat has that id.
    pub fn mark_ready(&mut self, client_id: &ClientId) -> bool {
        match self.slots.iter_mut().flatten().find(|p| p.client_id == *client_id) {
            Some(player) => {
                player.ready = true;
                true
            }
            None => false,
        }
    }

    /// True when at least one seat is occupied and every occupied seat is
    /// ready.
    pub fn all_ready(&self) -> bool {
        !self.is_empty() && self.iter().all(|(_, p)| p.ready)
    }

    /// Checks whether `role` may launch right now.
    pub fn check_launch(&self, role: Role) -> Result<(), SessionError> {
        if !role.can_launch() {
            return Err(SessionError::NotHost);
        }
        let waiting: Vec<String> = self
            .iter()
            .filter(|(_, p)| !p.ready)
            .map(|(_, p)| p.nickname.clone())
            .collect();
        if self.is_empty() || !waiting.is_empty() {
            return Err(SessionError::LaunchNotPermitted { waiting });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&PlayerState> {
        self.slots.get(index)?.as_ref()
    }

    pub fn index_of(&self, client_id: &ClientId) -> Option<usize> {
        self.iter()
            .find(|(_, p)| p.client_id == *client_id)
            .map(|(index, _)| index)
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.index_of(client_id).is_some()
    }

    /// Number of occupied seats.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAX_SLOTS
    }

    /// Occupied seats with their indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &PlayerState)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|p| (index, p)))
    }

    /// The nickname/id lists sent in join and re-initialize messages.
    pub fn roster(&self) -> Roster {
        let mut roster = Roster::default();
        for (_, player) in self.iter() {
            roster.push(player.nickname.clone(), player.client_id.clone());
        }
        roster
    }
}
