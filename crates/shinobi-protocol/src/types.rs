//! Core protocol types: identities, snapshots, rosters, and events.
//!
//! Every value here can be turned into wire text by the codec and rebuilt
//! from it. Fields are strongly typed so nothing downstream indexes into a
//! split string by position.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The session-level identity of one participant.
///
/// The host is always `"host"`. Joining peers are `"client_N"`, assigned by
/// the registry when the peer asks for one by replying `"client_unverified"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// The reserved id of the hosting participant.
    pub const HOST: &'static str = "host";
    /// Sentinel a peer replies with to have the registry assign its id.
    pub const UNVERIFIED: &'static str = "client_unverified";

    /// Wraps a raw id without validation. Use [`ClientId::parse`] for
    /// untrusted input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses an id received from the network.
    ///
    /// Ids are non-empty and use only ASCII letters, digits, `_` and `-`,
    /// which keeps them clear of every separator in the protocol.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let valid = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(ProtocolError::InvalidField {
                field: "client_id",
                value: raw.to_owned(),
            })
        }
    }

    pub fn host() -> Self {
        Self(Self::HOST.to_owned())
    }

    pub fn unverified() -> Self {
        Self(Self::UNVERIFIED.to_owned())
    }

    /// `client_{n}`.
    pub fn numbered(n: usize) -> Self {
        Self(format!("client_{n}"))
    }

    pub fn is_host(&self) -> bool {
        self.0 == Self::HOST
    }

    pub fn is_unverified(&self) -> bool {
        self.0 == Self::UNVERIFIED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifies one simulated entity: `player_1`..`player_4` or `enemy_N`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The player entity for slot `index` (`player_{index + 1}`).
    pub fn player(index: usize) -> Self {
        Self(format!("player_{}", index + 1))
    }

    /// `enemy_{n}`.
    pub fn enemy(n: usize) -> Self {
        Self(format!("enemy_{n}"))
    }

    /// The slot index this entity belongs to, if it is a player.
    pub fn player_index(&self) -> Option<usize> {
        self.0
            .strip_prefix("player_")?
            .parse::<usize>()
            .ok()?
            .checked_sub(1)
    }

    pub fn is_player(&self) -> bool {
        self.player_index().is_some()
    }

    pub fn is_enemy(&self) -> bool {
        self.0.starts_with("enemy_")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Entity state
// ---------------------------------------------------------------------------

/// One entity's state for the current tick.
///
/// Floats travel with one decimal place, so a decoded snapshot matches the
/// sent one to that precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    /// Input delta applied this tick.
    pub last_movement_x: f32,
    pub last_movement_y: f32,
    /// Absolute position. The owner of the entity is authoritative.
    pub pos_x: f32,
    pub pos_y: f32,
    /// Magnitude is the remaining dash ticks, sign is the direction.
    pub dash_counter: i32,
    /// Edge-triggered: true only on the tick the jump started.
    pub jumped: bool,
    pub dead: bool,
}

impl EntitySnapshot {
    /// A snapshot at the origin with no movement.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            last_movement_x: 0.0,
            last_movement_y: 0.0,
            pos_x: 0.0,
            pos_y: 0.0,
            dash_counter: 0,
            jumped: false,
            dead: false,
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.pos_x = x;
        self.pos_y = y;
        self
    }
}

// ---------------------------------------------------------------------------
// Lobby view
// ---------------------------------------------------------------------------

/// Nicknames and client ids of every occupied slot, in slot order.
///
/// Position `i` in both lists describes slot `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    pub nicknames: Vec<String>,
    pub client_ids: Vec<ClientId>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.client_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.client_ids.is_empty()
    }

    pub fn push(&mut self, nickname: impl Into<String>, client_id: ClientId) {
        self.nicknames.push(nickname.into());
        self.client_ids.push(client_id);
    }

    /// Slot index of `client_id`, if present.
    pub fn position_of(&self, client_id: &ClientId) -> Option<usize> {
        self.client_ids.iter().position(|id| id == client_id)
    }

    /// `(nickname, client_id)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClientId)> {
        self.nicknames
            .iter()
            .map(String::as_str)
            .zip(self.client_ids.iter())
    }
}

/// Checks a nickname can travel inside a roster list.
///
/// Nicknames may not be empty and may not contain `|`, `;`, `,` or `>>>`.
pub fn check_nickname(nickname: &str) -> Result<(), ProtocolError> {
    let reserved = nickname.is_empty()
        || nickname.contains(['|', ';', ','])
        || nickname.contains(">>>");
    if reserved {
        return Err(ProtocolError::InvalidField {
            field: "nickname",
            value: nickname.to_owned(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Who the registry should deliver a message to.
///
/// On the wire, [`Scope::All`] is a leading `*` and [`Scope::To`] is a
/// trailing `>>>clientId`. A message without either goes to every slot
/// except the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// Every slot except the sender.
    #[default]
    Others,
    /// Every slot, sender included.
    All,
    /// One slot.
    To(ClientId),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A decoded protocol event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `[NICKNAME]`: the registry asks for the peer's nickname.
    Nickname,
    /// `[CLIENT ID]`: the registry asks for the peer's client id.
    ClientId,
    /// `[START GAME]`: the host launches the session.
    StartGame,
    /// `[PLAYER READY]`. The registry fills in the sender when relaying.
    PlayerReady(Option<ClientId>),
    /// `SYNCED MAP::<payload>`: serialized level data from the host.
    MapSync(String),
    /// `NEW PLAYERS JOINED`: a slot was filled.
    PlayersJoined {
        index: usize,
        client_id: ClientId,
        roster: Roster,
    },
    /// `PLAYER LEFT`: the slot at `index` was vacated.
    PlayerLeft(usize),
    /// `RE_INITIALIZE`: the recipient's slot moved to `index`.
    ReInitialize {
        index: usize,
        client_id: ClientId,
        roster: Roster,
    },
    /// `[JOIN FAILED]`: the registry refused the connection.
    JoinFailed,
    /// `!leave`: graceful disconnect.
    Disconnect,
    /// Per-tick entity states from one sender.
    EntityBatch {
        sender: ClientId,
        snapshots: Vec<EntitySnapshot>,
    },
    /// A token this version does not know. Receivers skip it.
    Unrecognized(String),
}

impl Event {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Nickname => "nickname",
            Self::ClientId => "client_id",
            Self::StartGame => "start_game",
            Self::PlayerReady(_) => "player_ready",
            Self::MapSync(_) => "map_sync",
            Self::PlayersJoined { .. } => "players_joined",
            Self::PlayerLeft(_) => "player_left",
            Self::ReInitialize { .. } => "re_initialize",
            Self::JoinFailed => "join_failed",
            Self::Disconnect => "disconnect",
            Self::EntityBatch { .. } => "entity_batch",
            Self::Unrecognized(_) => "unrecognized",
        }
    }

    /// Events only the registry may originate. A peer that sends one is
    /// committing a protocol violation.
    pub fn is_registry_only(&self) -> bool {
        matches!(
            self,
            Self::Nickname
                | Self::ClientId
                | Self::PlayersJoined { .. }
                | Self::PlayerLeft(_)
                | Self::ReInitialize { .. }
                | Self::JoinFailed
        )
    }
}

/// The wire unit: an event plus its routing scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub scope: Scope,
    pub event: Event,
}

impl Message {
    /// Delivered to every slot except the sender.
    pub fn others(event: Event) -> Self {
        Self {
            scope: Scope::Others,
            event,
        }
    }

    /// Delivered to every slot including the sender.
    pub fn all(event: Event) -> Self {
        Self {
            scope: Scope::All,
            event,
        }
    }

    /// Delivered to a single slot.
    pub fn to(client_id: ClientId, event: Event) -> Self {
        Self {
            scope: Scope::To(client_id),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_parse_accepts_assigned_ids() {
        assert!(ClientId::parse("client_3").is_ok());
        assert!(ClientId::parse("host").unwrap().is_host());
        assert!(ClientId::parse(ClientId::UNVERIFIED).unwrap().is_unverified());
    }

    #[test]
    fn test_client_id_parse_rejects_separators() {
        for raw in ["", "a;b", "a,b", "a|b", "a b", "x:y"] {
            assert!(ClientId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_entity_id_player_index_round_trip() {
        assert_eq!(EntityId::player(0).as_str(), "player_1");
        assert_eq!(EntityId::player(3).player_index(), Some(3));
        assert_eq!(EntityId::new("player_0").player_index(), None);
        assert_eq!(EntityId::enemy(7).player_index(), None);
        assert!(EntityId::enemy(7).is_enemy());
    }

    #[test]
    fn test_check_nickname_rejects_reserved_characters() {
        assert!(check_nickname("Ann").is_ok());
        assert!(check_nickname("Ann: the second").is_ok());
        for raw in ["", "A|nn", "A;nn", "A,nn", "A>>>nn"] {
            assert!(check_nickname(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn test_roster_position_of_finds_slot() {
        let mut roster = Roster::default();
        roster.push("Host", ClientId::host());
        roster.push("Ann", ClientId::numbered(1));

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.position_of(&ClientId::numbered(1)), Some(1));
        assert_eq!(roster.position_of(&ClientId::numbered(2)), None);
    }

    #[test]
    fn test_event_is_registry_only() {
        assert!(Event::PlayerLeft(1).is_registry_only());
        assert!(Event::JoinFailed.is_registry_only());
        assert!(!Event::StartGame.is_registry_only());
        assert!(!Event::Disconnect.is_registry_only());
    }
}
