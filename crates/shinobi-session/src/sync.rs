//! Entity sync: per-tick batch assembly and application.
//!
//! Each participant sends one batch per tick. A client reports only its own
//! player; the host adds every live enemy. Receivers overwrite their local
//! copies (last write wins) and drop snapshots for entities they no longer
//! have. That gap is accepted: a kill and a stale update from another
//! connection may arrive in either order.

use std::collections::BTreeMap;

use shinobi_protocol::{ClientId, EntityId, EntitySnapshot, Event};

use crate::{SessionState, SlotTable};

/// The game-side entity store the sync protocol reads and writes.
pub trait EntityWorld {
    /// Current state of the local player, once it exists.
    fn local_player(&self) -> Option<EntitySnapshot>;

    /// Current state of every live enemy. Only consulted on the host.
    fn live_enemies(&self) -> Vec<EntitySnapshot> {
        Vec::new()
    }

    /// Overwrites the local copy of `snapshot.entity_id`. Returns `false`
    /// if there is no such entity.
    fn apply_remote(&mut self, snapshot: &EntitySnapshot) -> bool;

    /// Removes an entity. Returns `false` if it was already gone.
    fn remove_entity(&mut self, id: &EntityId) -> bool;
}

/// Builds this tick's batch, or `None` when there is nothing to send.
///
/// Nothing is sent before the game starts. A local player snapshot that
/// names someone else's entity is left out.
pub fn assemble_batch<W: EntityWorld + ?Sized>(state: &SessionState, world: &W) -> Option<Event> {
    if !state.game_started() {
        return None;
    }
    let sender = state.self_client_id()?.clone();
    let own = state.own_player()?;

    let mut snapshots = Vec::new();
    if let Some(player) = world.local_player() {
        if player.entity_id == own {
            snapshots.push(player);
        } else {
            tracing::debug!(expected = %own, got = %player.entity_id, "local player snapshot has the wrong id, not sent");
        }
    }
    if state.role.can_simulate_enemies() {
        snapshots.extend(world.live_enemies().into_iter().filter(|s| s.entity_id.is_enemy()));
    }

    if snapshots.is_empty() {
        return None;
    }
    Some(Event::EntityBatch { sender, snapshots })
}

/// What happened to each snapshot of a received batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Written to a local entity.
    pub applied: usize,
    /// Enemies removed because the snapshot marked them dead.
    pub removed: usize,
    /// No matching local entity.
    pub dropped: usize,
    /// Refused: the sender has no authority over the entity.
    pub rejected: usize,
}

/// Applies a received batch to the local world.
///
/// - Snapshots of our own player are ignored; we are authoritative for it.
/// - Enemy snapshots are accepted only from the host, and never on the host.
/// - Player snapshots are accepted only from the client seated in that slot,
///   according to `lobby`.
pub fn apply_batch<W: EntityWorld + ?Sized>(
    state: &SessionState,
    lobby: &SlotTable,
    world: &mut W,
    sender: &ClientId,
    snapshots: &[EntitySnapshot],
) -> SyncOutcome {
    let own = state.own_player();
    let mut outcome = SyncOutcome::default();

    for snapshot in snapshots {
        let id = &snapshot.entity_id;
        if own.as_ref() == Some(id) || !has_authority(state, lobby, sender, id) {
            outcome.rejected += 1;
            continue;
        }

        if !world.apply_remote(snapshot) {
            tracing::trace!(entity = %id, %sender, "no local entity, snapshot dropped");
            outcome.dropped += 1;
            continue;
        }
        outcome.applied += 1;

        if snapshot.dead && id.is_enemy() && world.remove_entity(id) {
            tracing::debug!(entity = %id, "enemy died, removed");
            outcome.removed += 1;
        }
    }
    outcome
}

fn has_authority(state: &SessionState, lobby: &SlotTable, sender: &ClientId, id: &EntityId) -> bool {
    if id.is_enemy() {
        return sender.is_host() && !state.role.can_simulate_enemies();
    }
    match id.player_index() {
        Some(index) => lobby.get(index).is_some_and(|p| p.client_id == *sender),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// MirrorWorld
// ---------------------------------------------------------------------------

/// An in-memory [`EntityWorld`]: the latest snapshot of every entity.
///
/// Enough for headless peers, demos and tests. A real game keeps its own
/// entities and implements [`EntityWorld`] over them.
#[derive(Debug, Clone, Default)]
pub struct MirrorWorld {
    entities: BTreeMap<EntityId, EntitySnapshot>,
    local: Option<EntityId>,
}

impl MirrorWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entity.
    pub fn spawn(&mut self, snapshot: EntitySnapshot) {
        self.entities.insert(snapshot.entity_id.clone(), snapshot);
    }

    /// Makes `id` the local player, spawning it at the origin if needed.
    ///
    /// After a re-index the local player's entity id changes; its state is
    /// carried over to the new id.
    pub fn set_local_player(&mut self, id: EntityId) {
        let carried = self
            .local
            .take()
            .filter(|old| *old != id)
            .and_then(|old| self.entities.remove(&old));
        let snapshot = match carried {
            Some(previous) => EntitySnapshot {
                entity_id: id.clone(),
                ..previous
            },
            None => self
                .entities
                .remove(&id)
                .unwrap_or_else(|| EntitySnapshot::new(id.clone())),
        };
        self.entities.insert(id.clone(), snapshot);
        self.local = Some(id);
    }

    /// Edits the local player in place. Returns `false` if there is none.
    pub fn update_local(&mut self, edit: impl FnOnce(&mut EntitySnapshot)) -> bool {
        let Some(id) = &self.local else {
            return false;
        };
        match self.entities.get_mut(id) {
            Some(snapshot) => {
                edit(snapshot);
                true
            }
            None => false,
        }
    }

    /// Keeps only the players listed; enemies are untouched.
    pub fn retain_players(&mut self, players: &[EntityId]) {
        let local = self.local.clone();
        self.entities
            .retain(|id, _| !id.is_player() || players.contains(id) || local.as_ref() == Some(id));
    }

    /// Removes every enemy, before loading a new level.
    pub fn clear_enemies(&mut self) {
        self.entities.retain(|id, _| !id.is_enemy());
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntitySnapshot> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn enemy_count(&self) -> usize {
        self.entities.keys().filter(|id| id.is_enemy()).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityWorld for MirrorWorld {
    fn local_player(&self) -> Option<EntitySnapshot> {
        self.entities.get(self.local.as_ref()?).cloned()
    }

    fn live_enemies(&self) -> Vec<EntitySnapshot> {
        self.entities
            .values()
            .filter(|s| s.entity_id.is_enemy() && !s.dead)
            .cloned()
            .collect()
    }

    fn apply_remote(&mut self, snapshot: &EntitySnapshot) -> bool {
        match self.entities.get_mut(&snapshot.entity_id) {
            Some(local) => {
                *local = snapshot.clone();
                true
            }
            None => false,
        }
    }

    fn remove_entity(&mut self, id: &EntityId) -> bool {
        self.entities.remove(id).is_some()
    }
}
