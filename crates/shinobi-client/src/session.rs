//! Client session: one participant's connection to the registry.
//!
//! Each session runs two Tokio tasks over one [`TcpConnection`]:
//!
//! - the **receive task** answers the handshake, decodes every frame and
//!   dispatches it to the session state and the game's [`GameHooks`];
//! - the **send task** writes queued control messages and, once the game
//!   has started, one entity batch per tick.
//!
//! Both end when the connection closes, whichever side closed it. The
//! receive task then tears the session down exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shinobi_protocol::{
    ClientId, Codec, Event, MapPayload, Message, PipeCodec, Roster, check_nickname,
};
use shinobi_session::{Phase, SessionError, SessionState, SlotTable, apply_batch, assemble_batch};
use shinobi_tick::{TickConfig, TickScheduler};
use shinobi_transport::{Connection, ConnectionConfig, DisconnectCause, TcpConnection, TransportError};
use tokio::sync::{Mutex, mpsc, watch};

use crate::{ClientConfig, ClientError, GameHooks};

/// Work queued for the send task.
enum Outgoing {
    Message(Message),
    /// Write `!leave`, then close.
    Leave,
}

/// Session state and the game collaborator, locked together so every
/// event is applied to both atomically.
struct Core<H> {
    state: SessionState,
    lobby: SlotTable,
    hooks: H,
}

struct Inner<H> {
    conn: TcpConnection,
    config: ClientConfig,
    codec: PipeCodec,
    core: Mutex<Core<H>>,
    phase: watch::Sender<Phase>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    join_failed: AtomicBool,
}

/// A connected participant, host or client.
///
/// Cheap to clone; every clone drives the same session.
pub struct ClientSession<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for ClientSession<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: GameHooks> ClientSession<H> {
    /// Connects, answers the handshake and waits for a slot.
    ///
    /// Both the TCP connect and the wait for a slot are bounded by the
    /// timeouts in `config`.
    ///
    /// # Errors
    /// - [`ClientError::TimedOut`] if the host is not found or never
    ///   assigns a slot in time.
    /// - [`ClientError::JoinFailed`] if the registry refused the join.
    /// - [`ClientError::Interrupted`] if the connection closed first.
    pub async fn connect(config: ClientConfig, hooks: H) -> Result<Self, ClientError> {
        check_nickname(&config.nickname)?;

        let mut state = SessionState::new(config.role);
        state.transition(Phase::Connecting)?;
        tracing::info!(addr = %config.server_addr, nickname = %config.nickname, role = ?config.role, "connecting");

        let conn_config = ConnectionConfig {
            write_timeout: config.write_timeout,
            ..ConnectionConfig::default()
        };
        let conn = TcpConnection::connect(&config.server_addr, config.connect_timeout, conn_config)
            .await
            .map_err(|e| match e {
                TransportError::ConnectTimedOut(_) => ClientError::TimedOut("the host"),
                e => ClientError::Transport(e),
            })?;
        state.transition(Phase::AwaitingSlot)?;

        let (phase, mut phase_rx) = watch::channel(state.phase());
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let join_timeout = config.join_timeout;

        let inner = Arc::new(Inner {
            conn,
            config,
            codec: PipeCodec,
            core: Mutex::new(Core {
                state,
                lobby: SlotTable::new(),
                hooks,
            }),
            phase,
            outgoing,
            join_failed: AtomicBool::new(false),
        });

        tokio::spawn(receive_loop(Arc::clone(&inner)));
        tokio::spawn(send_loop(Arc::clone(&inner), outgoing_rx));

        let joined = tokio::time::timeout(
            join_timeout,
            phase_rx.wait_for(|p| p.has_slot() || *p == Phase::Disconnected),
        )
        .await
        .map(|seen| seen.map(|p| *p));

        match joined {
            Ok(Ok(p)) if p.has_slot() => Ok(Self { inner }),
            Ok(_) => {
                let cause = inner
                    .conn
                    .disconnect_cause()
                    .unwrap_or(DisconnectCause::PeerClosed);
                if inner.join_failed.load(Ordering::Acquire) {
                    Err(ClientError::JoinFailed)
                } else {
                    Err(ClientError::Interrupted(cause))
                }
            }
            Err(_) => {
                tracing::info!(timeout = ?join_timeout, "no slot assigned in time");
                inner.conn.close_with(DisconnectCause::TimedOut).await;
                Err(ClientError::TimedOut("a slot"))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    /// A receiver that sees every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.inner.phase.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() != Phase::Disconnected
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> SessionState {
        self.inner.core.lock().await.state.clone()
    }

    /// This participant's copy of the seat table.
    pub async fn lobby(&self) -> SlotTable {
        self.inner.core.lock().await.lobby.clone()
    }

    pub async fn roster(&self) -> Roster {
        self.inner.core.lock().await.lobby.roster()
    }

    /// Runs `f` against the game collaborator with the session locked.
    pub async fn with_hooks<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.inner.core.lock().await.hooks)
    }

    /// Why the session ended, once it has.
    pub fn disconnect_cause(&self) -> Option<DisconnectCause> {
        self.inner.conn.disconnect_cause()
    }

    /// Resolves once the session is torn down.
    pub async fn wait_disconnected(&self) -> DisconnectCause {
        let mut rx = self.inner.phase.subscribe();
        let _ = rx.wait_for(|p| *p == Phase::Disconnected).await;
        self.disconnect_cause().unwrap_or(DisconnectCause::LocalClose)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Tells everyone this player is ready. The registry attributes it to
    /// our seat and echoes it back as `*[PLAYER READY]:<clientId>`.
    pub async fn ready_up(&self) -> Result<(), ClientError> {
        let phase = self.inner.core.lock().await.state.phase();
        if phase != Phase::Lobby {
            return Err(SessionError::ProtocolViolation(format!("ready in phase {phase}")).into());
        }
        self.send_control(Message::all(Event::PlayerReady(None)))
    }

    /// Asks the registry to launch the game. Host only, and only once every
    /// seat is ready.
    ///
    /// The session stays in `Lobby` until the registry echoes
    /// `*[START GAME]`. The registry refuses the launch if its own table is
    /// not all ready, for example when a player joined a moment ago; the
    /// host then stays in the lobby and may launch again.
    pub async fn launch(&self) -> Result<(), ClientError> {
        {
            let core = self.inner.core.lock().await;
            core.lobby.check_launch(core.state.role)?;
            let phase = core.state.phase();
            if !phase.can_transition_to(Phase::Launched) {
                return Err(SessionError::InvalidTransition {
                    from: phase,
                    to: Phase::Launched,
                }
                .into());
            }
        }
        tracing::info!("requesting launch");
        self.send_control(Message::all(Event::StartGame))
    }

    /// Reports that a level finished loading. The first call after launch
    /// moves the session to `Running`; later levels leave it there.
    pub async fn level_loaded(&self) -> Result<(), ClientError> {
        let mut core = self.inner.core.lock().await;
        if core.state.phase() == Phase::Running {
            return Ok(());
        }
        core.state.transition(Phase::Running)?;
        self.inner.publish_phase(&core.state);
        Ok(())
    }

    /// Pushes a level. With a target it reaches that seat only; otherwise
    /// every other seat. Host only.
    pub fn sync_map(&self, payload: &MapPayload, target: Option<ClientId>) -> Result<(), ClientError> {
        if !self.inner.config.role.can_simulate_enemies() {
            return Err(SessionError::NotHost.into());
        }
        let event = Event::MapSync(payload.as_str().to_owned());
        let message = match target {
            Some(target) => Message::to(target, event),
            None => Message::others(event),
        };
        self.send_control(message)
    }

    /// Queues a control message ahead of the next tick. Fire and forget.
    pub fn send_control(&self, message: Message) -> Result<(), ClientError> {
        if self.inner.conn.is_closed() {
            return Err(ClientError::NotConnected);
        }
        self.inner
            .outgoing
            .send(Outgoing::Message(message))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Sends `!leave`, closes, and waits for the teardown. Calling it
    /// again, or after the session ended, does nothing.
    pub async fn leave(&self) {
        if self.inner.outgoing.send(Outgoing::Leave).is_err() {
            self.inner.conn.close_with(DisconnectCause::LocalClose).await;
        }
        self.wait_disconnected().await;
    }
}

impl<H> Inner<H> {
    fn publish_phase(&self, state: &SessionState) {
        self.phase.send_if_modified(|seen| {
            let changed = *seen != state.phase();
            *seen = state.phase();
            changed
        });
    }

    async fn write(&self, message: &Message) {
        let frame = match self.codec.encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = message.event.name(), error = %e, "failed to encode message");
                return;
            }
        };
        if let Err(e) = self.conn.send(&frame).await {
            tracing::debug!(event = message.event.name(), error = %e, "send failed");
        }
    }

    async fn reply(&self, text: &str) {
        if let Err(e) = self.conn.send(text.as_bytes()).await {
            tracing::debug!(error = %e, "handshake reply failed");
        }
    }

    fn enqueue(&self, message: Message) {
        let _ = self.outgoing.send(Outgoing::Message(message));
    }
}

// ---------------------------------------------------------------------------
// Receive task
// ---------------------------------------------------------------------------

async fn receive_loop<H: GameHooks>(inner: Arc<Inner<H>>) {
    loop {
        let data = match inner.conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "recv error");
                break;
            }
        };

        let message = match inner.codec.decode(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode frame");
                continue;
            }
        };

        if matches!(message.event, Event::Nickname | Event::ClientId) {
            let phase = *inner.phase.borrow();
            match handshake_answer(&inner.config, phase, &message.event) {
                Some(answer) => inner.reply(&answer).await,
                None => tracing::debug!(%phase, event = message.event.name(), "unexpected handshake request"),
            }
            continue;
        }

        if !dispatch(&inner, message).await {
            break;
        }
    }
    teardown(&inner).await;
}

/// The reply to a handshake request, or `None` once a slot is assigned.
///
/// Computed from the published phase so the reply is written without the
/// session lock held.
fn handshake_answer(config: &ClientConfig, phase: Phase, event: &Event) -> Option<String> {
    if phase != Phase::AwaitingSlot {
        return None;
    }
    match event {
        Event::Nickname => Some(config.nickname.clone()),
        Event::ClientId => Some(config.claimed_client_id().as_str().to_owned()),
        _ => None,
    }
}

/// Applies one event. Returns `false` when the session must end.
async fn dispatch<H: GameHooks>(inner: &Inner<H>, message: Message) -> bool {
    let mut guard = inner.core.lock().await;
    let core = &mut *guard;
    let phase = core.state.phase();

    if phase == Phase::Disconnected {
        tracing::trace!(event = message.event.name(), "ignoring message while disconnected");
        return true;
    }

    match message.event {
        Event::Nickname | Event::ClientId => {
            tracing::trace!("handshake request reached dispatch");
        }

        Event::PlayersJoined {
            index,
            client_id,
            roster,
        } => {
            core.lobby.rebuild(&roster);
            if phase == Phase::AwaitingSlot {
                // The first join we can see is our own.
                take_slot(core, index, &client_id);
            } else if core.state.role.can_simulate_enemies() && !client_id.is_host() {
                push_map(inner, core, &client_id);
            }
            tracing::info!(index, %client_id, players = core.lobby.len(), "player joined");
            core.hooks.on_players_joined(index, &client_id, &core.lobby);
        }

        Event::PlayerLeft(index) => {
            if !phase.has_slot() {
                tracing::debug!(index, "player left before we had a slot");
            } else if let Ok((player, _)) = core.lobby.remove(index) {
                tracing::info!(index, client_id = %player.client_id, nickname = %player.nickname, "player left");
                core.hooks.on_player_left(index, &core.lobby);
            } else {
                tracing::debug!(index, "player left from an empty seat");
            }
        }

        Event::ReInitialize {
            index,
            client_id,
            roster,
        } => {
            if core.state.self_client_id().is_some_and(|own| *own != client_id) {
                tracing::warn!(%client_id, "re-initialize addressed to another client");
            } else {
                core.lobby.rebuild(&roster);
                if phase == Phase::AwaitingSlot {
                    take_slot(core, index, &client_id);
                } else {
                    tracing::info!(index, "seat moved");
                    core.state.assign_slot(index, client_id.clone());
                    core.hooks.on_slot_assigned(index, &client_id);
                }
                core.hooks.on_reinitialized(index, &core.lobby);
            }
        }

        Event::PlayerReady(Some(client_id)) => {
            if core.lobby.mark_ready(&client_id) {
                tracing::info!(%client_id, all_ready = core.lobby.all_ready(), "player ready");
                core.hooks.on_player_ready(&client_id);
            }
        }

        Event::PlayerReady(None) => {
            tracing::debug!("unattributed ready ignored");
        }

        Event::StartGame => match phase {
            Phase::Lobby => {
                tracing::info!("game started");
                if let Err(e) = core.state.transition(Phase::Launched) {
                    tracing::warn!(error = %e, "could not launch");
                } else {
                    core.hooks.on_game_started();
                }
            }
            _ => {
                tracing::warn!(%phase, "protocol violation: start game outside the lobby");
            }
        },

        Event::MapSync(raw) => match MapPayload::from_wire(raw) {
            Ok(payload) if phase.has_slot() => {
                tracing::info!(bytes = payload.as_str().len(), "map synced");
                core.hooks.on_map_synced(&payload);
            }
            Ok(_) => tracing::debug!(%phase, "map sync before a slot, ignored"),
            Err(e) => tracing::debug!(error = %e, "malformed map payload"),
        },

        Event::EntityBatch { sender, snapshots } => {
            if core.state.game_started() {
                let outcome = apply_batch(&core.state, &core.lobby, &mut core.hooks, &sender, &snapshots);
                tracing::trace!(%sender, ?outcome, "batch applied");
            } else {
                tracing::trace!(%sender, "batch before launch dropped");
            }
        }

        Event::JoinFailed => {
            tracing::info!("join refused by host");
            inner.join_failed.store(true, Ordering::Release);
        }

        Event::Disconnect => {
            tracing::info!("host ended the session");
            inner.conn.close_with(DisconnectCause::PeerLeft).await;
            return false;
        }

        Event::Unrecognized(text) => {
            tracing::debug!(token = %text, "skipping unrecognized message");
        }
    }

    inner.publish_phase(&core.state);
    true
}

fn take_slot<H: GameHooks>(core: &mut Core<H>, index: usize, client_id: &ClientId) {
    core.state.assign_slot(index, client_id.clone());
    if let Err(e) = core.state.transition(Phase::Lobby) {
        tracing::warn!(error = %e, "could not enter the lobby");
        return;
    }
    tracing::info!(index, %client_id, "joined lobby");
    core.hooks.on_slot_assigned(index, client_id);
}

/// The host hands its current level to a player who just joined.
fn push_map<H: GameHooks>(inner: &Inner<H>, core: &Core<H>, joiner: &ClientId) {
    if let Some(payload) = core.hooks.map_payload() {
        tracing::debug!(%joiner, "pushing map to new player");
        inner.enqueue(Message::to(joiner.clone(), Event::MapSync(payload.into_string())));
    }
}

async fn teardown<H: GameHooks>(inner: &Inner<H>) {
    inner.conn.close_with(DisconnectCause::LocalClose).await;
    let cause = inner
        .conn
        .disconnect_cause()
        .unwrap_or(DisconnectCause::LocalClose);

    let mut core = inner.core.lock().await;
    if let Err(e) = core.state.transition(Phase::Disconnected) {
        tracing::debug!(error = %e, "teardown transition");
    }
    core.lobby = SlotTable::new();
    core.hooks.on_disconnected(&cause);
    inner.publish_phase(&core.state);
    tracing::info!(%cause, "session ended");
}

// ---------------------------------------------------------------------------
// Send task
// ---------------------------------------------------------------------------

async fn send_loop<H: GameHooks>(inner: Arc<Inner<H>>, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    let mut ticker = TickScheduler::new(TickConfig::with_rate(inner.config.send_rate()));

    loop {
        tokio::select! {
            _ = inner.conn.closed() => break,

            queued = outgoing.recv() => match queued {
                Some(Outgoing::Message(message)) => inner.write(&message).await,
                Some(Outgoing::Leave) => {
                    inner.write(&Message::others(Event::Disconnect)).await;
                    inner.conn.close_with(DisconnectCause::LocalClose).await;
                    break;
                }
                None => break,
            },

            _ = ticker.next_tick() => {
                let batch = {
                    let core = inner.core.lock().await;
                    assemble_batch(&core.state, &core.hooks)
                };
                if let Some(event) = batch {
                    inner.write(&Message::others(event)).await;
                }
                ticker.tick_done();
            }
        }
    }
    tracing::debug!(ticks = ticker.ticks(), "send loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shinobi_session::Role;

    #[test]
    fn test_handshake_answer_awaiting_slot_replies() {
        let config = ClientConfig::client("127.0.0.1:5050", "Ann");
        assert_eq!(
            handshake_answer(&config, Phase::AwaitingSlot, &Event::Nickname).as_deref(),
            Some("Ann")
        );
        assert_eq!(
            handshake_answer(&config, Phase::AwaitingSlot, &Event::ClientId).as_deref(),
            Some("client_unverified")
        );
    }

    #[test]
    fn test_handshake_answer_host_claims_host_id() {
        let config = ClientConfig::host("127.0.0.1:5050", "Kai");
        assert_eq!(config.role, Role::Host);
        assert_eq!(
            handshake_answer(&config, Phase::AwaitingSlot, &Event::ClientId).as_deref(),
            Some("host")
        );
    }

    #[test]
    fn test_handshake_answer_after_slot_is_none() {
        let config = ClientConfig::client("127.0.0.1:5050", "Ann");
        assert_eq!(handshake_answer(&config, Phase::Lobby, &Event::Nickname), None);
        assert_eq!(handshake_answer(&config, Phase::Running, &Event::ClientId), None);
        assert_eq!(handshake_answer(&config, Phase::AwaitingSlot, &Event::StartGame), None);
    }
}
