//! `HostSession` builder: the registry plus the host's own client.
//!
//! The host plays like everyone else: its game talks to a
//! [`ClientSession`] connected over loopback to the registry running in the
//! same process. Starting a host therefore means binding the registry,
//! spawning its accept loop, and joining it as slot 0.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use shinobi_client::{ClientConfig, ClientSession, GameHooks};
use shinobi_protocol::{ClientId, EntityId, EntitySnapshot, MapPayload, Roster};
use shinobi_registry::{Registry, RegistryConfig, RegistryHandle};
use shinobi_session::{EntityWorld, Phase, SlotTable};
use shinobi_transport::DisconnectCause;

use crate::ShinobiError;

/// The host's game wrapped with the level it hands to new players.
///
/// The game's own [`GameHooks::map_payload`] wins; the builder's level is
/// the fallback.
pub struct HostGame<H> {
    pub game: H,
    level: Option<MapPayload>,
}

impl<H: GameHooks> EntityWorld for HostGame<H> {
    fn local_player(&self) -> Option<EntitySnapshot> {
        self.game.local_player()
    }

    fn live_enemies(&self) -> Vec<EntitySnapshot> {
        self.game.live_enemies()
    }

    fn apply_remote(&mut self, snapshot: &EntitySnapshot) -> bool {
        self.game.apply_remote(snapshot)
    }

    fn remove_entity(&mut self, id: &EntityId) -> bool {
        self.game.remove_entity(id)
    }
}

impl<H: GameHooks> GameHooks for HostGame<H> {
    fn on_slot_assigned(&mut self, index: usize, client_id: &ClientId) {
        self.game.on_slot_assigned(index, client_id);
    }

    fn on_players_joined(&mut self, index: usize, client_id: &ClientId, lobby: &SlotTable) {
        self.game.on_players_joined(index, client_id, lobby);
    }

    fn on_player_left(&mut self, index: usize, lobby: &SlotTable) {
        self.game.on_player_left(index, lobby);
    }

    fn on_reinitialized(&mut self, index: usize, lobby: &SlotTable) {
        self.game.on_reinitialized(index, lobby);
    }

    fn on_player_ready(&mut self, client_id: &ClientId) {
        self.game.on_player_ready(client_id);
    }

    fn on_map_synced(&mut self, payload: &MapPayload) {
        self.game.on_map_synced(payload);
    }

    fn on_game_started(&mut self) {
        self.game.on_game_started();
    }

    fn on_disconnected(&mut self, cause: &DisconnectCause) {
        self.game.on_disconnected(cause);
    }

    fn map_payload(&self) -> Option<MapPayload> {
        self.game.map_payload().or_else(|| self.level.clone())
    }
}

/// Builder for starting a [`HostSession`].
///
/// # Example
///
/// ```rust,ignore
/// use shinobi::prelude::*;
///
/// let host = HostSession::<MirrorWorld>::builder()
///     .bind("0.0.0.0:5050")
///     .nickname("Kai")
///     .level(MapPayload::from_json_str(&level_json)?)
///     .start(MirrorWorld::new())
///     .await?;
/// host.ready_up().await?;
/// ```
pub struct HostBuilder {
    registry: RegistryConfig,
    client: ClientConfig,
    level: Option<MapPayload>,
}

impl HostBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        let registry = RegistryConfig::default();
        let client = ClientConfig::host(registry.bind_addr.clone(), "Host");
        Self {
            registry,
            client,
            level: None,
        }
    }

    /// Sets the address the registry listens on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.registry.bind_addr = addr.to_string();
        self
    }

    pub fn nickname(mut self, nickname: &str) -> Self {
        self.client.nickname = nickname.to_string();
        self
    }

    /// Entity batches per second sent by the host. Defaults to 60.
    pub fn send_rate(mut self, hz: u32) -> Self {
        self.client.send_rate_hz = Some(hz);
        self
    }

    /// Seats offered, host included.
    pub fn max_slots(mut self, slots: usize) -> Self {
        self.registry.max_slots = slots;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.registry.handshake_timeout = timeout;
        self
    }

    /// The level pushed to each player as they join.
    pub fn level(mut self, payload: MapPayload) -> Self {
        self.level = Some(payload);
        self
    }

    /// Replaces the whole registry configuration.
    pub fn registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    /// Binds the registry, starts it, and joins it as the host.
    ///
    /// If the host's own join fails the registry is shut down again.
    pub async fn start<H: GameHooks>(self, game: H) -> Result<HostSession<H>, ShinobiError> {
        let registry = Registry::bind(self.registry).await?.spawn();

        let client = ClientConfig {
            server_addr: loopback(registry.local_addr()).to_string(),
            ..self.client
        };
        let game = HostGame {
            game,
            level: self.level,
        };

        match ClientSession::connect(client, game).await {
            Ok(session) => {
                tracing::info!(addr = %registry.local_addr(), "host session started");
                Ok(HostSession { registry, session })
            }
            Err(e) => {
                tracing::error!(error = %e, "host could not join its own registry");
                registry.shutdown().await;
                Err(e.into())
            }
        }
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wildcard listen address is not connectable; use loopback instead.
fn loopback(addr: SocketAddr) -> SocketAddr {
    if addr.ip().is_unspecified() {
        SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port()))
    } else {
        addr
    }
}

/// A running host: the registry and the host's seat in it.
pub struct HostSession<H> {
    registry: RegistryHandle,
    session: ClientSession<HostGame<H>>,
}

impl<H: GameHooks> HostSession<H> {
    /// Creates a new builder.
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// The address peers connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.registry.local_addr()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// The host's own client session.
    pub fn session(&self) -> &ClientSession<HostGame<H>> {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub async fn roster(&self) -> Roster {
        self.session.roster().await
    }

    pub async fn lobby(&self) -> SlotTable {
        self.session.lobby().await
    }

    /// Runs `f` against the host's game with the session locked.
    pub async fn with_game<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        self.session.with_hooks(|hosted| f(&mut hosted.game)).await
    }

    pub async fn ready_up(&self) -> Result<(), ShinobiError> {
        Ok(self.session.ready_up().await?)
    }

    /// Asks the registry to start the game once every seat is ready. The
    /// host enters `Launched` with everyone else, on the registry's echo.
    pub async fn launch(&self) -> Result<(), ShinobiError> {
        Ok(self.session.launch().await?)
    }

    pub async fn level_loaded(&self) -> Result<(), ShinobiError> {
        Ok(self.session.level_loaded().await?)
    }

    /// Moves everyone to a new level: it becomes the level handed to later
    /// joiners and is pushed to every seated client now.
    pub async fn next_level(&self, payload: MapPayload) -> Result<(), ShinobiError> {
        self.session
            .with_hooks(|hosted| hosted.level = Some(payload.clone()))
            .await;
        Ok(self.session.sync_map(&payload, None)?)
    }

    /// Pushes a level to one seat only.
    pub fn sync_map_to(&self, payload: &MapPayload, target: ClientId) -> Result<(), ShinobiError> {
        Ok(self.session.sync_map(payload, Some(target))?)
    }

    /// Ends the session for everyone. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.session.leave().await;
        self.registry.shutdown().await;
    }

    /// Resolves once the host's own session has ended.
    pub async fn wait_disconnected(&self) -> DisconnectCause {
        self.session.wait_disconnected().await
    }
}
