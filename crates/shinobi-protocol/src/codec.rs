//! Text codec for the pipe-delimited wire protocol.
//!
//! A frame (already stripped of its `|` terminator by the transport) is one
//! of:
//!
//! ```text
//! [NICKNAME]                          [CLIENT ID]
//! [START GAME]                        [JOIN FAILED]
//! [PLAYER READY]                      [PLAYER READY]:client_2
//! NEW PLAYERS JOINED:1;client_1;Host,Ann;host,client_1
//! RE_INITIALIZE:1;client_2;Host,Cid;host,client_2
//! PLAYER LEFT:1
//! SYNCED MAP::{"tilemap":...}         SYNCED MAP::{...}>>>client_1
//! !leave
//! host;player_1,0.0,0.0,12.5,40.0,0,0,0;enemy_3,-1.0,0.0,80.0,40.0,0,0,1
//! ```
//!
//! A leading `*` widens delivery to the sender as well; a trailing
//! `>>>clientId` narrows it to one slot (see [`Scope`]).
//!
//! Each token has its own decoder function. Unknown tokens decode to
//! [`Event::Unrecognized`] so newer peers can add messages; a known token
//! with the wrong field count is a [`ProtocolError`].

use crate::types::{ClientId, EntityId, EntitySnapshot, Event, Message, Roster, Scope, check_nickname};
use crate::ProtocolError;

pub const NICKNAME: &str = "[NICKNAME]";
pub const CLIENT_ID: &str = "[CLIENT ID]";
pub const START_GAME: &str = "[START GAME]";
pub const PLAYER_READY: &str = "[PLAYER READY]";
pub const JOIN_FAILED: &str = "[JOIN FAILED]";
pub const LEAVE: &str = "!leave";
pub const SYNCED_MAP: &str = "SYNCED MAP::";
pub const PLAYERS_JOINED: &str = "NEW PLAYERS JOINED";
pub const PLAYER_LEFT: &str = "PLAYER LEFT";
pub const RE_INITIALIZE: &str = "RE_INITIALIZE";

const BROADCAST_ALL: char = '*';
const TARGET_MARKER: &str = ">>>";

/// Fields per entity segment: the id plus seven state values.
const SNAPSHOT_FIELDS: usize = 8;

/// Converts [`Message`]s to frame payloads and back.
///
/// The transport adds and strips the frame delimiter, so codecs never see
/// it.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a message into the payload of one frame.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] when a field cannot be represented on
    /// the wire (for example a nickname containing a separator).
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;

    /// Decodes one frame payload.
    ///
    /// # Errors
    /// Returns a [`ProtocolError`] for malformed frames. Unknown tokens are
    /// not an error.
    fn decode(&self, frame: &[u8]) -> Result<Message, ProtocolError>;
}

/// The `|`-terminated text protocol spoken by every Shinobi peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeCodec;

impl Codec for PipeCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        encode_message(message).map(String::into_bytes)
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, ProtocolError> {
        decode_message(std::str::from_utf8(frame)?)
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes a message to its frame text, without the terminator.
pub fn encode_message(message: &Message) -> Result<String, ProtocolError> {
    let body = encode_event(&message.event)?;
    Ok(match &message.scope {
        Scope::Others => body,
        Scope::All => format!("{BROADCAST_ALL}{body}"),
        Scope::To(target) => {
            ClientId::parse(target.as_str())?;
            format!("{body}{TARGET_MARKER}{target}")
        }
    })
}

/// Encodes an event body (no scope markers).
pub fn encode_event(event: &Event) -> Result<String, ProtocolError> {
    let text = match event {
        Event::Nickname => NICKNAME.to_owned(),
        Event::ClientId => CLIENT_ID.to_owned(),
        Event::StartGame => START_GAME.to_owned(),
        Event::JoinFailed => JOIN_FAILED.to_owned(),
        Event::Disconnect => LEAVE.to_owned(),
        Event::PlayerReady(None) => PLAYER_READY.to_owned(),
        Event::PlayerReady(Some(id)) => {
            ClientId::parse(id.as_str())?;
            format!("{PLAYER_READY}:{id}")
        }
        Event::MapSync(payload) => {
            if payload.contains('|') {
                return Err(ProtocolError::InvalidField {
                    field: "map_payload",
                    value: truncated(payload),
                });
            }
            format!("{SYNCED_MAP}{payload}")
        }
        Event::PlayersJoined {
            index,
            client_id,
            roster,
        } => format!("{PLAYERS_JOINED}:{}", encode_slot_view(*index, client_id, roster)?),
        Event::ReInitialize {
            index,
            client_id,
            roster,
        } => format!("{RE_INITIALIZE}:{}", encode_slot_view(*index, client_id, roster)?),
        Event::PlayerLeft(index) => format!("{PLAYER_LEFT}:{index}"),
        Event::EntityBatch { sender, snapshots } => encode_entity_batch(sender, snapshots)?,
        Event::Unrecognized(raw) => {
            if raw.contains('|') {
                return Err(ProtocolError::InvalidField {
                    field: "token",
                    value: raw.clone(),
                });
            }
            raw.clone()
        }
    };
    Ok(text)
}

fn encode_slot_view(index: usize, client_id: &ClientId, roster: &Roster) -> Result<String, ProtocolError> {
    ClientId::parse(client_id.as_str())?;
    if roster.nicknames.len() != roster.client_ids.len() {
        return Err(ProtocolError::RosterMismatch {
            nicknames: roster.nicknames.len(),
            client_ids: roster.client_ids.len(),
        });
    }
    for nickname in &roster.nicknames {
        check_nickname(nickname)?;
    }
    let mut ids = Vec::with_capacity(roster.client_ids.len());
    for id in &roster.client_ids {
        ClientId::parse(id.as_str())?;
        ids.push(id.as_str());
    }
    Ok(format!(
        "{index};{client_id};{};{}",
        roster.nicknames.join(","),
        ids.join(",")
    ))
}

/// Encodes `sender;entity,f1..f7;entity,f1..f7`.
pub fn encode_entity_batch(sender: &ClientId, snapshots: &[EntitySnapshot]) -> Result<String, ProtocolError> {
    ClientId::parse(sender.as_str())?;
    if snapshots.is_empty() {
        return Err(ProtocolError::EmptyBatch {
            sender: sender.to_string(),
        });
    }

    let mut out = sender.to_string();
    for snapshot in snapshots {
        ClientId::parse(snapshot.entity_id.as_str()).map_err(|_| ProtocolError::InvalidField {
            field: "entity_id",
            value: snapshot.entity_id.to_string(),
        })?;
        out.push(';');
        out.push_str(snapshot.entity_id.as_str());
        for value in [
            snapshot.last_movement_x,
            snapshot.last_movement_y,
            snapshot.pos_x,
            snapshot.pos_y,
        ] {
            if !value.is_finite() {
                return Err(ProtocolError::InvalidField {
                    field: "snapshot",
                    value: value.to_string(),
                });
            }
            out.push_str(&format!(",{value:.1}"));
        }
        out.push_str(&format!(
            ",{},{},{}",
            snapshot.dash_counter,
            u8::from(snapshot.jumped),
            u8::from(snapshot.dead)
        ));
    }
    Ok(out)
}

fn truncated(value: &str) -> String {
    value.chars().take(32).collect()
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes one frame's text into a scoped message.
pub fn decode_message(frame: &str) -> Result<Message, ProtocolError> {
    let (all, rest) = match frame.strip_prefix(BROADCAST_ALL) {
        Some(rest) => (true, rest),
        None => (false, frame),
    };
    let (body, target) = split_target(rest);

    let scope = match target {
        Some(id) => Scope::To(id),
        None if all => Scope::All,
        None => Scope::Others,
    };
    Ok(Message {
        scope,
        event: decode_event(body)?,
    })
}

/// Splits a trailing `>>>clientId`. A suffix that is not a valid client id
/// is treated as part of the body.
fn split_target(frame: &str) -> (&str, Option<ClientId>) {
    if let Some(at) = frame.rfind(TARGET_MARKER) {
        let candidate = &frame[at + TARGET_MARKER.len()..];
        if let Ok(id) = ClientId::parse(candidate) {
            return (&frame[..at], Some(id));
        }
    }
    (frame, None)
}

/// Decodes an event body (scope markers already removed).
pub fn decode_event(body: &str) -> Result<Event, ProtocolError> {
    match body {
        NICKNAME => return Ok(Event::Nickname),
        CLIENT_ID => return Ok(Event::ClientId),
        START_GAME => return Ok(Event::StartGame),
        PLAYER_READY => return Ok(Event::PlayerReady(None)),
        JOIN_FAILED => return Ok(Event::JoinFailed),
        LEAVE => return Ok(Event::Disconnect),
        _ => {}
    }

    if let Some(payload) = body.strip_prefix(SYNCED_MAP) {
        return Ok(decode_map_sync(payload));
    }

    if let Some((token, fields)) = body.split_once(':') {
        return match token {
            PLAYERS_JOINED => decode_players_joined(fields),
            RE_INITIALIZE => decode_re_initialize(fields),
            PLAYER_LEFT => decode_player_left(fields),
            PLAYER_READY => decode_player_ready(fields),
            _ => Ok(Event::Unrecognized(body.to_owned())),
        };
    }

    if !body.starts_with('[') && body.contains(';') {
        return decode_entity_batch(body);
    }
    Ok(Event::Unrecognized(body.to_owned()))
}

/// `SYNCED MAP::<payload>`. The payload is opaque at this layer.
pub fn decode_map_sync(payload: &str) -> Event {
    Event::MapSync(payload.to_owned())
}

/// `[PLAYER READY]:<clientId>`.
pub fn decode_player_ready(fields: &str) -> Result<Event, ProtocolError> {
    Ok(Event::PlayerReady(Some(ClientId::parse(fields)?)))
}

/// `PLAYER LEFT:<index>`.
pub fn decode_player_left(fields: &str) -> Result<Event, ProtocolError> {
    let parts: Vec<&str> = fields.split(';').collect();
    if parts.len() != 1 {
        return Err(ProtocolError::FieldCount {
            token: PLAYER_LEFT,
            expected: 1,
            found: parts.len(),
        });
    }
    Ok(Event::PlayerLeft(parse_index(parts[0])?))
}

/// `NEW PLAYERS JOINED:<index>;<clientId>;<nick,...>;<id,...>`.
pub fn decode_players_joined(fields: &str) -> Result<Event, ProtocolError> {
    let (index, client_id, roster) = decode_slot_view(PLAYERS_JOINED, fields)?;
    Ok(Event::PlayersJoined {
        index,
        client_id,
        roster,
    })
}

/// `RE_INITIALIZE:<index>;<clientId>;<nick,...>;<id,...>`.
pub fn decode_re_initialize(fields: &str) -> Result<Event, ProtocolError> {
    let (index, client_id, roster) = decode_slot_view(RE_INITIALIZE, fields)?;
    Ok(Event::ReInitialize {
        index,
        client_id,
        roster,
    })
}

fn decode_slot_view(token: &'static str, fields: &str) -> Result<(usize, ClientId, Roster), ProtocolError> {
    let parts: Vec<&str> = fields.split(';').collect();
    let [index, client_id, nicknames, client_ids] = parts[..] else {
        return Err(ProtocolError::FieldCount {
            token,
            expected: 4,
            found: parts.len(),
        });
    };

    let nicknames: Vec<String> = split_list(nicknames).map(str::to_owned).collect();
    let client_ids = split_list(client_ids)
        .map(ClientId::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if nicknames.len() != client_ids.len() {
        return Err(ProtocolError::RosterMismatch {
            nicknames: nicknames.len(),
            client_ids: client_ids.len(),
        });
    }

    Ok((
        parse_index(index)?,
        ClientId::parse(client_id)?,
        Roster {
            nicknames,
            client_ids,
        },
    ))
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').filter(|item| !item.is_empty())
}

/// `<senderId>;<entityId>,f1,...,f7;...`.
pub fn decode_entity_batch(body: &str) -> Result<Event, ProtocolError> {
    let mut segments = body.split(';');
    let sender = ClientId::parse(segments.next().unwrap_or_default())?;

    let snapshots = segments
        .map(decode_snapshot)
        .collect::<Result<Vec<_>, _>>()?;
    if snapshots.is_empty() {
        return Err(ProtocolError::EmptyBatch {
            sender: sender.to_string(),
        });
    }
    Ok(Event::EntityBatch { sender, snapshots })
}

fn decode_snapshot(segment: &str) -> Result<EntitySnapshot, ProtocolError> {
    let fields: Vec<&str> = segment.split(',').collect();
    let [id, move_x, move_y, pos_x, pos_y, dash, jumped, dead] = fields[..] else {
        return Err(ProtocolError::FieldCount {
            token: "entity",
            expected: SNAPSHOT_FIELDS,
            found: fields.len(),
        });
    };

    let entity_id = ClientId::parse(id)
        .map(|_| EntityId::new(id))
        .map_err(|_| ProtocolError::InvalidField {
            field: "entity_id",
            value: id.to_owned(),
        })?;

    Ok(EntitySnapshot {
        entity_id,
        last_movement_x: parse_float("last_movement_x", move_x)?,
        last_movement_y: parse_float("last_movement_y", move_y)?,
        pos_x: parse_float("pos_x", pos_x)?,
        pos_y: parse_float("pos_y", pos_y)?,
        dash_counter: dash.trim().parse().map_err(|_| ProtocolError::BadNumber {
            field: "dash_counter",
            value: dash.to_owned(),
        })?,
        jumped: parse_flag("jumped", jumped)?,
        dead: parse_flag("dead", dead)?,
    })
}

fn parse_index(raw: &str) -> Result<usize, ProtocolError> {
    raw.trim().parse().map_err(|_| ProtocolError::BadNumber {
        field: "index",
        value: raw.to_owned(),
    })
}

fn parse_float(field: &'static str, raw: &str) -> Result<f32, ProtocolError> {
    match raw.trim().parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ProtocolError::BadNumber {
            field,
            value: raw.to_owned(),
        }),
    }
}

/// Accepts `1`/`0` as sent by this codec, and the spelled-out forms older
/// peers used.
fn parse_flag(field: &'static str, raw: &str) -> Result<bool, ProtocolError> {
    match raw.trim() {
        "1" | "true" | "True" => Ok(true),
        "0" | "false" | "False" => Ok(false),
        _ => Err(ProtocolError::BadFlag {
            field,
            value: raw.to_owned(),
        }),
    }
}
