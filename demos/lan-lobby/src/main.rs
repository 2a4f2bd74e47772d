use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use shinobi::prelude::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "lan-lobby", about = "Host or join a four-player LAN lobby", version)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Mode {
    /// Run the registry here and take slot 0
    Host {
        #[arg(default_value = "Player")]
        nickname: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Level JSON handed to every joiner
        #[arg(long, value_name = "FILE")]
        level: Option<PathBuf>,
    },
    /// Join a lobby hosted at IP
    Join {
        ip: String,
        #[arg(default_value = "Player")]
        nickname: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Who,
    Ready,
    Start,
    Loaded,
    Move(f32, f32),
    Level(PathBuf),
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some("who") => Command::Who,
        Some("ready") => Command::Ready,
        Some("start") => Command::Start,
        Some("loaded") => Command::Loaded,
        Some("move") => {
            let mut axis = || -> Result<f32, String> {
                let word = words.next().ok_or("move needs dx and dy")?;
                word.parse().map_err(|_| format!("not a number: {word}"))
            };
            let dx = axis()?;
            let dy = axis()?;
            Command::Move(dx, dy)
        }
        Some("level") => Command::Level(PathBuf::from(words.next().ok_or("level needs a file")?)),
        Some("quit") | Some("exit") => Command::Quit,
        Some(other) => return Err(format!("unknown command: {other}")),
        None => return Err("empty command".to_string()),
    };
    Ok(command)
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// Only the fields the console prints.
#[derive(Deserialize)]
struct LevelInfo {
    #[serde(default)]
    name: Option<String>,
}

/// A headless player: mirrors every entity and prints lobby events.
#[derive(Default)]
struct Console {
    world: MirrorWorld,
}

impl EntityWorld for Console {
    fn local_player(&self) -> Option<EntitySnapshot> {
        self.world.local_player()
    }

    fn live_enemies(&self) -> Vec<EntitySnapshot> {
        self.world.live_enemies()
    }

    fn apply_remote(&mut self, snapshot: &EntitySnapshot) -> bool {
        self.world.apply_remote(snapshot)
    }

    fn remove_entity(&mut self, id: &EntityId) -> bool {
        self.world.remove_entity(id)
    }
}

impl GameHooks for Console {
    fn on_slot_assigned(&mut self, index: usize, client_id: &ClientId) {
        println!("you are in slot {index} as {client_id}");
        self.world.on_slot_assigned(index, client_id);
    }

    fn on_players_joined(&mut self, index: usize, client_id: &ClientId, lobby: &SlotTable) {
        if let Some(player) = lobby.get(index) {
            println!("{} joined ({client_id})", player.nickname);
        }
        self.world.on_players_joined(index, client_id, lobby);
    }

    fn on_player_left(&mut self, index: usize, lobby: &SlotTable) {
        println!("slot {index} left, {} remaining", lobby.len());
        self.world.on_player_left(index, lobby);
    }

    fn on_reinitialized(&mut self, index: usize, lobby: &SlotTable) {
        println!("moved to slot {index}");
        self.world.on_reinitialized(index, lobby);
    }

    fn on_player_ready(&mut self, client_id: &ClientId) {
        println!("{client_id} is ready");
    }

    fn on_map_synced(&mut self, payload: &MapPayload) {
        match payload.parse::<LevelInfo>() {
            Ok(LevelInfo { name: Some(name) }) => println!("level received: {name}"),
            _ => println!("level received"),
        }
    }

    fn on_game_started(&mut self) {
        println!("game started, type `loaded` once the level is up");
    }

    fn on_disconnected(&mut self, cause: &DisconnectCause) {
        println!("disconnected: {cause}");
    }
}

fn read_level(path: &PathBuf) -> Result<MapPayload, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    Ok(MapPayload::from_json_str(&json)?)
}

// ---------------------------------------------------------------------------
// Seat
// ---------------------------------------------------------------------------

/// Our place in the session, hosting or joined.
enum Seat {
    Host(HostSession<Console>),
    Client(ClientSession<Console>),
}

impl Seat {
    async fn open(mode: &Mode) -> Result<Self, ShinobiError> {
        match mode {
            Mode::Host { nickname, port, level } => {
                let mut builder = HostSession::<Console>::builder()
                    .bind(&format!("0.0.0.0:{port}"))
                    .nickname(nickname);
                if let Some(path) = level {
                    match read_level(path) {
                        Ok(payload) => builder = builder.level(payload),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "level not loaded"),
                    }
                }
                let host = builder.start(Console::default()).await?;
                println!("hosting on port {}", host.local_addr().port());
                Ok(Seat::Host(host))
            }
            Mode::Join { ip, nickname, port } => {
                let config = ClientConfig::client(format!("{ip}:{port}"), nickname);
                let session = ClientSession::connect(config, Console::default()).await?;
                Ok(Seat::Client(session))
            }
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Seat::Host(host) => host.phase(),
            Seat::Client(session) => session.phase(),
        }
    }

    async fn lobby(&self) -> SlotTable {
        match self {
            Seat::Host(host) => host.lobby().await,
            Seat::Client(session) => session.lobby().await,
        }
    }

    async fn with_console<R>(&self, f: impl FnOnce(&mut Console) -> R) -> R {
        match self {
            Seat::Host(host) => host.with_game(f).await,
            Seat::Client(session) => session.with_hooks(f).await,
        }
    }

    async fn run(&self, command: Command) -> Result<(), ShinobiError> {
        match (command, self) {
            (Command::Who, _) => {
                for (index, player) in self.lobby().await.iter() {
                    let ready = if player.ready { "ready" } else { "waiting" };
                    println!("  {index}: {} ({}) {ready}", player.nickname, player.client_id);
                }
            }
            (Command::Ready, Seat::Host(host)) => host.ready_up().await?,
            (Command::Ready, Seat::Client(session)) => session.ready_up().await?,
            (Command::Start, Seat::Host(host)) => host.launch().await?,
            (Command::Start, Seat::Client(session)) => session.launch().await?,
            (Command::Loaded, Seat::Host(host)) => host.level_loaded().await?,
            (Command::Loaded, Seat::Client(session)) => session.level_loaded().await?,
            (Command::Move(dx, dy), _) => {
                let moved = self
                    .with_console(|console| {
                        console.world.update_local(|me| {
                            me.last_movement_x = dx;
                            me.last_movement_y = dy;
                            me.pos_x += dx;
                            me.pos_y += dy;
                        })
                    })
                    .await;
                if !moved {
                    println!("no player to move yet");
                }
            }
            (Command::Level(path), Seat::Host(host)) => match read_level(&path) {
                Ok(payload) => host.next_level(payload).await?,
                Err(e) => println!("could not read {}: {e}", path.display()),
            },
            (Command::Level(_), Seat::Client(_)) => println!("only the host picks the level"),
            (Command::Quit, _) => {}
        }
        Ok(())
    }

    async fn wait_disconnected(&self) -> DisconnectCause {
        match self {
            Seat::Host(host) => host.wait_disconnected().await,
            Seat::Client(session) => session.wait_disconnected().await,
        }
    }

    async fn close(&self) {
        match self {
            Seat::Host(host) => host.shutdown().await,
            Seat::Client(session) => session.leave().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

/// Reads commands until `quit`, end of input, or the session dropping
/// under us, whichever comes first.
async fn console<R: AsyncBufRead + Unpin>(seat: &Seat, mut lines: Lines<R>) -> std::io::Result<()> {
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = seat.run(command).await {
                            println!("{} {e}", e.status_text());
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            cause = seat.wait_disconnected() => {
                tracing::info!(%cause, "session ended");
                break;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    shinobi::telemetry::init_tracing();
    let cli = Cli::parse();

    let seat = match Seat::open(&cli.mode).await {
        Ok(seat) => seat,
        Err(e) => {
            eprintln!("{} {e}", e.status_text());
            std::process::exit(1);
        }
    };

    // Players come in ready; the host still decides when to start.
    if let Err(e) = seat.run(Command::Ready).await {
        tracing::warn!(error = %e, "could not ready up");
    }
    println!("commands: who, ready, start, loaded, move DX DY, level FILE, quit");

    console(&seat, BufReader::new(tokio::io::stdin()).lines()).await?;

    seat.close().await;
    Ok(())
}
