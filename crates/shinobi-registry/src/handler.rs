//! Per-connection handler: handshake, admission, relay, departure.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Send `[NICKNAME]` and `[CLIENT ID]`, read both replies
//!   2. Seat the peer, or answer `[JOIN FAILED]` + `!leave`
//!   3. Loop: receive frames → apply control events, relay the rest
//!   4. Vacate the seat and tell the others who moved

use std::sync::Arc;

use shinobi_protocol::{ClientId, Codec, Event, Message, Scope, check_nickname};
use shinobi_transport::{Connection, DisconnectCause, TcpConnection};

use crate::RegistryError;
use crate::registry::Shared;

/// What the serve loop does after routing one message.
enum Flow {
    Continue,
    Leave,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(conn: TcpConnection, shared: Arc<Shared>) -> Result<(), RegistryError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = %conn.peer_addr(), "handling new connection");

    // Refuse early when there is obviously no seat; admission re-checks.
    if shared.table.lock().await.is_full() {
        let err = RegistryError::CapacityExceeded(shared.config.max_slots);
        reject(&conn, &shared, &err).await;
        return Err(err);
    }

    // --- Step 1: Handshake ---
    let (nickname, claimed) = match perform_handshake(&conn, &shared).await {
        Ok(answers) => answers,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "handshake failed");
            conn.close_with(DisconnectCause::Failed(e.to_string())).await;
            return Err(e);
        }
    };

    // --- Step 2: Admission ---
    let client_id = match admit(&conn, &shared, &nickname, claimed).await {
        Ok(client_id) => client_id,
        Err(e) => {
            tracing::info!(%conn_id, %nickname, error = %e, "join refused");
            reject(&conn, &shared, &e).await;
            return Err(e);
        }
    };

    // --- Step 3: Serve ---
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::info!(%client_id, "connection closed");
                break;
            }
            Err(e) => {
                tracing::debug!(%client_id, error = %e, "recv error");
                break;
            }
        };

        let message = match shared.codec.decode(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%client_id, error = %e, "failed to decode frame");
                continue;
            }
        };

        if let Flow::Leave = route(&conn, &shared, &client_id, message, &data).await {
            break;
        }
    }

    // --- Step 4: Departure ---
    depart(&conn, &shared, &client_id).await;
    Ok(())
}

/// Asks for the peer's nickname and claimed client id.
async fn perform_handshake(conn: &TcpConnection, shared: &Shared) -> Result<(String, ClientId), RegistryError> {
    send(conn, shared, &Message::others(Event::Nickname)).await?;
    let nickname = read_reply(conn, shared, "nickname").await?;
    check_nickname(&nickname).map_err(|e| RegistryError::HandshakeFailed(e.to_string()))?;

    send(conn, shared, &Message::others(Event::ClientId)).await?;
    let reply = read_reply(conn, shared, "client id").await?;
    let claimed = ClientId::parse(&reply).map_err(|e| RegistryError::HandshakeFailed(e.to_string()))?;

    Ok((nickname, claimed))
}

async fn read_reply(conn: &TcpConnection, shared: &Shared, what: &str) -> Result<String, RegistryError> {
    let data = match tokio::time::timeout(shared.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(RegistryError::HandshakeFailed(format!(
                "connection closed before {what} reply"
            )));
        }
        Ok(Err(e)) => return Err(RegistryError::Transport(e)),
        Err(_) => {
            return Err(RegistryError::HandshakeFailed(format!(
                "timed out waiting for {what}"
            )));
        }
    };
    String::from_utf8(data).map_err(|_| RegistryError::HandshakeFailed(format!("{what} reply is not UTF-8")))
}

/// Seats the peer and announces it to everyone, itself included.
async fn admit(
    conn: &Arc<TcpConnection>,
    shared: &Shared,
    nickname: &str,
    claimed: ClientId,
) -> Result<ClientId, RegistryError> {
    let mut table = shared.table.lock().await;
    if !shared.is_accepting() {
        return Err(RegistryError::ShutDown);
    }

    let admission = table.admit(nickname, claimed, Arc::clone(conn))?;
    tracing::info!(
        client_id = %admission.client_id,
        index = admission.index,
        nickname,
        occupied = table.len(),
        "player joined"
    );

    let joined = Message::all(Event::PlayersJoined {
        index: admission.index,
        client_id: admission.client_id.clone(),
        roster: admission.roster,
    });
    if let Some(frame) = shared.encode(&joined) {
        deliver(&frame, &table.seats()).await;
    }

    // A late joiner never saw the launch.
    if table.launched() {
        if let Some(frame) = shared.encode(&Message::all(Event::StartGame)) {
            deliver(&frame, &[(admission.client_id.clone(), Arc::clone(conn))]).await;
        }
    }

    Ok(admission.client_id)
}

/// `[JOIN FAILED]`, then `!leave`, then close.
async fn reject(conn: &TcpConnection, shared: &Shared, reason: &RegistryError) {
    tracing::debug!(conn_id = %conn.id(), %reason, "rejecting connection");
    for event in [Event::JoinFailed, Event::Disconnect] {
        if send(conn, shared, &Message::others(event)).await.is_err() {
            break;
        }
    }
    conn.close_with(DisconnectCause::Rejected).await;
}

/// Applies one message from a seated peer.
///
/// Control events are handled here; map and entity frames are forwarded
/// verbatim to the recipients their scope names.
async fn route(
    conn: &TcpConnection,
    shared: &Shared,
    client_id: &ClientId,
    message: Message,
    frame: &[u8],
) -> Flow {
    match message.event {
        Event::Disconnect => {
            tracing::info!(%client_id, "player left");
            conn.close_with(DisconnectCause::PeerLeft).await;
            Flow::Leave
        }

        Event::PlayerReady(_) => {
            // Readiness is attributed to the connection, not to whatever
            // id the frame carries.
            let mut table = shared.table.lock().await;
            if table.mark_ready(client_id) {
                tracing::info!(%client_id, all_ready = table.all_ready(), "player ready");
                let ready = Message::all(Event::PlayerReady(Some(client_id.clone())));
                if let Some(frame) = shared.encode(&ready) {
                    deliver(&frame, &table.seats()).await;
                }
            }
            Flow::Continue
        }

        Event::StartGame => {
            let mut table = shared.table.lock().await;
            if !client_id.is_host() {
                tracing::warn!(%client_id, "protocol violation: only the host may launch");
            } else if !table.all_ready() {
                let waiting: Vec<String> = table
                    .lobby()
                    .iter()
                    .filter(|(_, p)| !p.ready)
                    .map(|(_, p)| p.nickname.clone())
                    .collect();
                tracing::warn!(?waiting, "launch refused, not every player is ready");
            } else if table.launched() {
                tracing::debug!("duplicate launch ignored");
            } else {
                table.set_launched();
                tracing::info!(players = table.len(), "game launched");
                if let Some(frame) = shared.encode(&Message::all(Event::StartGame)) {
                    deliver(&frame, &table.seats()).await;
                }
            }
            Flow::Continue
        }

        Event::MapSync(_) => {
            if !client_id.is_host() {
                tracing::warn!(%client_id, "protocol violation: only the host may sync the map");
                return Flow::Continue;
            }
            relay(shared, client_id, &message.scope, frame).await;
            Flow::Continue
        }

        Event::EntityBatch { ref sender, .. } => {
            if sender != client_id {
                tracing::debug!(%client_id, %sender, "dropping batch with forged sender");
                return Flow::Continue;
            }
            relay(shared, client_id, &message.scope, frame).await;
            Flow::Continue
        }

        Event::Unrecognized(ref text) => {
            tracing::debug!(%client_id, token = %text, "skipping unrecognized message");
            Flow::Continue
        }

        ref event if event.is_registry_only() => {
            tracing::debug!(%client_id, event = event.name(), "protocol violation: registry-only event from peer");
            Flow::Continue
        }

        ref event => {
            tracing::debug!(%client_id, event = event.name(), "ignoring event");
            Flow::Continue
        }
    }
}

/// Forwards a frame unchanged. Recipients are resolved under the lock; the
/// writes happen after it is released.
async fn relay(shared: &Shared, sender: &ClientId, scope: &Scope, frame: &[u8]) {
    let recipients = shared.table.lock().await.recipients(sender, scope);
    deliver(frame, &recipients).await;
}

/// Vacates the seat. When the host leaves the whole session ends;
/// otherwise the others learn which index emptied and who shifted down.
async fn depart(conn: &TcpConnection, shared: &Shared, client_id: &ClientId) {
    conn.close().await.ok();

    let mut table = shared.table.lock().await;
    let Some(departure) = table.remove(client_id) else {
        // Already drained by a shutdown.
        return;
    };
    tracing::info!(
        %client_id,
        index = departure.index,
        shifted = departure.shifts.len(),
        occupied = table.len(),
        "seat vacated"
    );

    if departure.host_left() {
        drop(table);
        tracing::info!("host left, ending session");
        shared.shutdown().await;
        return;
    }

    if let Some(frame) = shared.encode(&Message::others(Event::PlayerLeft(departure.index))) {
        deliver(&frame, &table.seats()).await;
    }

    for shift in &departure.shifts {
        let Some(target) = table.conn(&shift.client_id) else {
            continue;
        };
        let moved = Message::others(Event::ReInitialize {
            index: shift.to,
            client_id: shift.client_id.clone(),
            roster: departure.roster.clone(),
        });
        if let Some(frame) = shared.encode(&moved) {
            deliver(&frame, &[(shift.client_id.clone(), target)]).await;
        }
    }
}

async fn send(conn: &TcpConnection, shared: &Shared, message: &Message) -> Result<(), RegistryError> {
    let frame = shared.codec.encode(message)?;
    conn.send(&frame).await?;
    Ok(())
}

/// Writes one frame to each recipient. A failed write closes that
/// connection, which ends its own handler; nobody else is affected.
pub(crate) async fn deliver(frame: &[u8], recipients: &[(ClientId, Arc<TcpConnection>)]) {
    for (client_id, conn) in recipients {
        if let Err(e) = conn.send(frame).await {
            tracing::debug!(%client_id, error = %e, "delivery failed");
        }
    }
}
