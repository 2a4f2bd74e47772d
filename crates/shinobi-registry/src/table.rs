//! The registry's seat table: lobby seats plus the connection behind each.
//!
//! Pure bookkeeping with no I/O, so every admission and departure rule is
//! testable without sockets. The registry holds one `SeatTable` behind a
//! single mutex; re-indexing rewrites the whole table at once.

use std::sync::Arc;

use shinobi_protocol::{ClientId, Roster, Scope};
use shinobi_session::{MAX_SLOTS, PlayerState, Shift, SlotTable};

use crate::RegistryError;

/// A successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub index: usize,
    pub client_id: ClientId,
    /// Roster after the join, for the `NEW PLAYERS JOINED` broadcast.
    pub roster: Roster,
}

/// A vacated seat and its consequences.
#[derive(Debug)]
pub struct Departure<C> {
    pub index: usize,
    pub player: PlayerState,
    pub conn: Arc<C>,
    /// Seats that moved down, each owed a `RE_INITIALIZE`.
    pub shifts: Vec<Shift>,
    /// Roster after the departure.
    pub roster: Roster,
}

impl<C> Departure<C> {
    pub fn host_left(&self) -> bool {
        self.player.client_id.is_host()
    }
}

/// Seats and connections, always shifted together.
pub struct SeatTable<C> {
    lobby: SlotTable,
    conns: [Option<Arc<C>>; MAX_SLOTS],
    capacity: usize,
    launched: bool,
}

impl<C> SeatTable<C> {
    /// An empty table with `capacity` seats (clamped to `1..=MAX_SLOTS`).
    pub fn new(capacity: usize) -> Self {
        Self {
            lobby: SlotTable::new(),
            conns: std::array::from_fn(|_| None),
            capacity: capacity.clamp(1, MAX_SLOTS),
            launched: false,
        }
    }

    /// Seats a connection that finished the handshake.
    ///
    /// - The host (claimed id `"host"`) must be first and unique.
    /// - Clients are refused until the host is seated.
    /// - A client replying `client_unverified` gets `client_{n}`, `n`
    ///   being the seat its nickname lands on; if that id is still held by
    ///   a shifted seat, the lowest free number is used instead.
    pub fn admit(&mut self, nickname: &str, claimed: ClientId, conn: Arc<C>) -> Result<Admission, RegistryError> {
        if self.is_full() {
            return Err(RegistryError::CapacityExceeded(self.capacity));
        }

        let client_id = if claimed.is_host() {
            if self.lobby.contains(&claimed) {
                return Err(RegistryError::DuplicateClientId(claimed));
            }
            claimed
        } else {
            if !self.has_host() {
                return Err(RegistryError::HostNotPresent);
            }
            if claimed.is_unverified() {
                self.assign_client_id()
            } else if self.lobby.contains(&claimed) {
                return Err(RegistryError::DuplicateClientId(claimed));
            } else {
                claimed
            }
        };

        let index = self
            .lobby
            .push(nickname, client_id.clone())
            .map_err(|_| RegistryError::CapacityExceeded(self.capacity))?;
        self.conns[index] = Some(conn);

        Ok(Admission {
            index,
            client_id,
            roster: self.lobby.roster(),
        })
    }

    fn assign_client_id(&self) -> ClientId {
        let preferred = ClientId::numbered(self.lobby.len());
        if !self.lobby.contains(&preferred) {
            return preferred;
        }
        (1..)
            .map(ClientId::numbered)
            .find(|id| !self.lobby.contains(id))
            .unwrap_or(preferred)
    }

    /// Vacates the seat held by `client_id`, shifting higher seats down.
    ///
    /// Returns `None` if the id is not seated (already removed, or never
    /// admitted).
    pub fn remove(&mut self, client_id: &ClientId) -> Option<Departure<C>> {
        let index = self.lobby.index_of(client_id)?;
        let (player, shifts) = self.lobby.remove(index).ok()?;
        let conn = self.conns[index].take()?;
        for shift in &shifts {
            self.conns[shift.to] = self.conns[shift.from].take();
        }
        if self.lobby.is_empty() {
            self.launched = false;
        }

        Some(Departure {
            index,
            player,
            conn,
            shifts,
            roster: self.lobby.roster(),
        })
    }

    /// Removes every seat, for shutdown.
    pub fn drain(&mut self) -> Vec<(ClientId, Arc<C>)> {
        let seats = self.seats();
        self.lobby = SlotTable::new();
        self.conns = std::array::from_fn(|_| None);
        self.launched = false;
        seats
    }

    /// Connections that should receive a message from `sender`.
    pub fn recipients(&self, sender: &ClientId, scope: &Scope) -> Vec<(ClientId, Arc<C>)> {
        self.seats()
            .into_iter()
            .filter(|(id, _)| match scope {
                Scope::Others => id != sender,
                Scope::All => true,
                Scope::To(target) => id == target,
            })
            .collect()
    }

    /// Every seated connection, in seat order.
    pub fn seats(&self) -> Vec<(ClientId, Arc<C>)> {
        self.lobby
            .iter()
            .filter_map(|(index, player)| {
                let conn = self.conns[index].as_ref()?;
                Some((player.client_id.clone(), Arc::clone(conn)))
            })
            .collect()
    }

    pub fn conn(&self, client_id: &ClientId) -> Option<Arc<C>> {
        let index = self.lobby.index_of(client_id)?;
        self.conns[index].clone()
    }

    pub fn mark_ready(&mut self, client_id: &ClientId) -> bool {
        self.lobby.mark_ready(client_id)
    }

    pub fn all_ready(&self) -> bool {
        self.lobby.all_ready()
    }

    pub fn has_host(&self) -> bool {
        self.lobby.contains(&ClientId::host())
    }

    /// Set once the host's `[START GAME]` was relayed.
    pub fn launched(&self) -> bool {
        self.launched
    }

    pub fn set_launched(&mut self) {
        self.launched = true;
    }

    pub fn lobby(&self) -> &SlotTable {
        &self.lobby
    }

    pub fn roster(&self) -> Roster {
        self.lobby.roster()
    }

    pub fn len(&self) -> usize {
        self.lobby.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobby.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lobby.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in connection: just a label.
    type Conn = &'static str;

    fn seated() -> SeatTable<Conn> {
        let mut table = SeatTable::new(MAX_SLOTS);
        table.admit("Host", ClientId::host(), Arc::new("host-conn")).unwrap();
        table.admit("Ann", ClientId::unverified(), Arc::new("ann-conn")).unwrap();
        table.admit("Bob", ClientId::unverified(), Arc::new("bob-conn")).unwrap();
        table.admit("Cid", ClientId::unverified(), Arc::new("cid-conn")).unwrap();
        table
    }

    fn ids(pairs: &[(ClientId, Arc<Conn>)]) -> Vec<String> {
        pairs.iter().map(|(id, _)| id.to_string()).collect()
    }

    // =========================================================================
    // admit
    // =========================================================================

    #[test]
    fn test_admit_first_client_gets_index_one_and_client_1() {
        let mut table = SeatTable::new(MAX_SLOTS);
        table.admit("Host", ClientId::host(), Arc::new("h")).unwrap();

        let admission = table.admit("Ann", ClientId::unverified(), Arc::new("a")).unwrap();

        assert_eq!(admission.index, 1);
        assert_eq!(admission.client_id, ClientId::numbered(1));
        assert_eq!(admission.roster.nicknames, vec!["Host", "Ann"]);
    }

    #[test]
    fn test_admit_fifth_connection_is_capacity_exceeded() {
        let mut table = seated();
        let err = table.admit("Eve", ClientId::unverified(), Arc::new("e")).unwrap_err();
        assert!(matches!(err, RegistryError::CapacityExceeded(4)));
    }

    #[test]
    fn test_admit_client_before_host_is_refused() {
        let mut table: SeatTable<Conn> = SeatTable::new(MAX_SLOTS);
        let err = table.admit("Ann", ClientId::unverified(), Arc::new("a")).unwrap_err();
        assert!(matches!(err, RegistryError::HostNotPresent));
        assert!(table.is_empty());
    }

    #[test]
    fn test_admit_second_host_is_refused() {
        let mut table = SeatTable::new(MAX_SLOTS);
        table.admit("Host", ClientId::host(), Arc::new("h")).unwrap();
        let err = table.admit("Fake", ClientId::host(), Arc::new("f")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateClientId(_)));
    }

    #[test]
    fn test_admit_after_shift_avoids_id_collision() {
        let mut table = seated();
        table.remove(&ClientId::numbered(1));
        // Seats are now host, client_2, client_3; seat 3 is free but
        // client_3 is taken, so the newcomer gets the lowest free number.
        let admission = table.admit("Dee", ClientId::unverified(), Arc::new("d")).unwrap();
        assert_eq!(admission.index, 3);
        assert_eq!(admission.client_id, ClientId::numbered(1));
    }

    #[test]
    fn test_admit_explicit_duplicate_id_is_refused() {
        let mut table = SeatTable::new(MAX_SLOTS);
        table.admit("Host", ClientId::host(), Arc::new("h")).unwrap();
        table.admit("Ann", ClientId::new("ann"), Arc::new("a")).unwrap();
        assert!(table.admit("Ann2", ClientId::new("ann"), Arc::new("a2")).is_err());
    }

    #[test]
    fn test_admit_respects_reduced_capacity() {
        let mut table = SeatTable::new(2);
        table.admit("Host", ClientId::host(), Arc::new("h")).unwrap();
        table.admit("Ann", ClientId::unverified(), Arc::new("a")).unwrap();
        assert!(table.is_full());
    }

    // =========================================================================
    // remove
    // =========================================================================

    #[test]
    fn test_remove_index_one_shifts_two_and_three() {
        let mut table = seated();
        let departure = table.remove(&ClientId::numbered(1)).unwrap();

        assert_eq!(departure.index, 1);
        assert_eq!(*departure.conn, "ann-conn");
        assert!(!departure.host_left());
        let moved: Vec<(usize, usize)> = departure.shifts.iter().map(|s| (s.from, s.to)).collect();
        assert_eq!(moved, vec![(2, 1), (3, 2)]);
        assert_eq!(departure.roster.nicknames, vec!["Host", "Bob", "Cid"]);

        // Connections moved with their seats.
        assert_eq!(*table.conn(&ClientId::numbered(2)).unwrap(), "bob-conn");
        assert_eq!(table.lobby().index_of(&ClientId::numbered(3)), Some(2));
    }

    #[test]
    fn test_remove_unknown_id_is_none() {
        let mut table = seated();
        assert!(table.remove(&ClientId::numbered(9)).is_none());
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_remove_host_reports_host_left() {
        let mut table = seated();
        assert!(table.remove(&ClientId::host()).unwrap().host_left());
    }

    #[test]
    fn test_drain_empties_table() {
        let mut table = seated();
        let seats = table.drain();
        assert_eq!(ids(&seats), vec!["host", "client_1", "client_2", "client_3"]);
        assert!(table.is_empty());
    }

    // =========================================================================
    // recipients
    // =========================================================================

    #[test]
    fn test_recipients_by_scope() {
        let table = seated();
        let sender = ClientId::numbered(1);

        assert_eq!(
            ids(&table.recipients(&sender, &Scope::Others)),
            vec!["host", "client_2", "client_3"]
        );
        assert_eq!(table.recipients(&sender, &Scope::All).len(), 4);
        assert_eq!(
            ids(&table.recipients(&ClientId::host(), &Scope::To(ClientId::numbered(2)))),
            vec!["client_2"]
        );
        assert!(table.recipients(&sender, &Scope::To(ClientId::numbered(9))).is_empty());
    }

    #[test]
    fn test_all_ready_after_every_seat_marked() {
        let mut table = seated();
        assert!(!table.all_ready());
        for id in ["host", "client_1", "client_2", "client_3"] {
            assert!(table.mark_ready(&ClientId::new(id)));
        }
        assert!(table.all_ready());
    }
}
