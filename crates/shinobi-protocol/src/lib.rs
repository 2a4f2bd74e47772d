//! Wire protocol for Shinobi.
//!
//! This crate defines the language every peer speaks:
//!
//! - **Types** ([`Event`], [`Message`], [`EntitySnapshot`], [`Roster`], ...):
//!   what travels on the wire, with typed fields.
//! - **Codec** ([`Codec`] trait, [`PipeCodec`]): how those messages become
//!   `|`-terminated text and back, one decoder function per token.
//! - **Map payloads** ([`MapPayload`], `json` feature): level documents
//!   pushed by the host.
//! - **Errors** ([`ProtocolError`]).
//!
//! It knows nothing about sockets or slots.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Registry / Client session
//! ```

mod codec;
mod error;
#[cfg(feature = "json")]
mod map;
mod types;

pub use codec::{
    Codec, PipeCodec, decode_entity_batch, decode_event, decode_map_sync, decode_message,
    decode_player_left, decode_player_ready, decode_players_joined, decode_re_initialize,
    encode_entity_batch, encode_event, encode_message,
};
pub use error::ProtocolError;
#[cfg(feature = "json")]
pub use map::MapPayload;
pub use types::{
    ClientId, EntityId, EntitySnapshot, Event, Message, Roster, Scope, check_nickname,
};

/// Literal tokens, for peers that need to match raw frames.
pub mod tokens {
    pub use crate::codec::{
        CLIENT_ID, JOIN_FAILED, LEAVE, NICKNAME, PLAYER_LEFT, PLAYER_READY, PLAYERS_JOINED,
        RE_INITIALIZE, START_GAME, SYNCED_MAP,
    };
}
