//! The game-side collaborator of a client session.

use shinobi_protocol::{ClientId, EntityId, EntitySnapshot, MapPayload};
use shinobi_session::{EntityWorld, MirrorWorld, SlotTable};
use shinobi_transport::DisconnectCause;

/// Callbacks the session invokes as protocol events arrive.
///
/// Remote entity updates go through the [`EntityWorld`] supertrait; the
/// rest are notifications with no-op defaults. Every callback runs on the
/// session's receive task with the session state locked, so keep them
/// short.
pub trait GameHooks: EntityWorld + Send + 'static {
    /// Our own seat was assigned or moved.
    fn on_slot_assigned(&mut self, _index: usize, _client_id: &ClientId) {}

    /// A seat was filled. `lobby` already includes it.
    fn on_players_joined(&mut self, _index: usize, _client_id: &ClientId, _lobby: &SlotTable) {}

    /// The seat at `index` was vacated. `lobby` is already compacted.
    fn on_player_left(&mut self, _index: usize, _lobby: &SlotTable) {}

    /// The registry re-sent the roster after a departure.
    fn on_reinitialized(&mut self, _index: usize, _lobby: &SlotTable) {}

    fn on_player_ready(&mut self, _client_id: &ClientId) {}

    /// The host pushed a level.
    fn on_map_synced(&mut self, _payload: &MapPayload) {}

    fn on_game_started(&mut self) {}

    /// The session ended. No further callbacks follow.
    fn on_disconnected(&mut self, _cause: &DisconnectCause) {}

    /// The level the host pushes to a player who just joined. Only asked
    /// on the host.
    fn map_payload(&self) -> Option<MapPayload> {
        None
    }
}

/// Keeps one mirrored entity per seat, the local player following our own
/// seat.
impl GameHooks for MirrorWorld {
    fn on_slot_assigned(&mut self, index: usize, _client_id: &ClientId) {
        self.set_local_player(EntityId::player(index));
    }

    fn on_players_joined(&mut self, _index: usize, _client_id: &ClientId, lobby: &SlotTable) {
        sync_seats(self, lobby);
    }

    fn on_player_left(&mut self, _index: usize, lobby: &SlotTable) {
        sync_seats(self, lobby);
    }

    fn on_reinitialized(&mut self, _index: usize, lobby: &SlotTable) {
        sync_seats(self, lobby);
    }
}

fn sync_seats(world: &mut MirrorWorld, lobby: &SlotTable) {
    let seats: Vec<EntityId> = lobby.iter().map(|(_, p)| p.entity_id.clone()).collect();
    world.retain_players(&seats);
    for id in seats {
        if !world.contains(&id) {
            world.spawn(EntitySnapshot::new(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use shinobi_protocol::Roster;

    use super::*;

    fn lobby(n: usize) -> SlotTable {
        let mut roster = Roster::default();
        roster.push("Host", ClientId::host());
        for i in 1..n {
            roster.push(format!("P{i}"), ClientId::numbered(i));
        }
        SlotTable::from_roster(&roster)
    }

    #[test]
    fn test_mirror_world_spawns_one_entity_per_seat() {
        let mut world = MirrorWorld::new();
        world.on_slot_assigned(1, &ClientId::numbered(1));
        world.on_players_joined(2, &ClientId::numbered(2), &lobby(3));

        for index in 0..3 {
            assert!(world.contains(&EntityId::player(index)));
        }
        assert_eq!(world.local_player().unwrap().entity_id, EntityId::player(1));
    }

    #[test]
    fn test_mirror_world_drops_vacated_seat() {
        let mut world = MirrorWorld::new();
        world.on_slot_assigned(0, &ClientId::host());
        world.on_players_joined(3, &ClientId::numbered(3), &lobby(4));

        world.on_player_left(3, &lobby(3));

        assert!(!world.contains(&EntityId::player(3)));
        assert!(world.contains(&EntityId::player(2)));
    }
}
