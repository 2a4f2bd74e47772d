//! Integration tests for the registry: handshake, admission, relay and
//! re-indexing, driven by raw TCP peers speaking the wire format by hand.

use std::net::SocketAddr;
use std::time::Duration;

use shinobi_registry::{Registry, RegistryConfig, RegistryHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_TIMEOUT: Duration = Duration::from_secs(2);

// =========================================================================
// Helpers
// =========================================================================

/// A hand-driven peer that reads and writes `|`-terminated frames.
struct Peer {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, frame: &str) {
        self.stream.write_all(format!("{frame}|").as_bytes()).await.unwrap();
    }

    /// Next frame, or `None` on EOF. Panics after [`READ_TIMEOUT`].
    async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(READ_TIMEOUT, self.read_frame())
            .await
            .expect("timed out waiting for a frame")
    }

    async fn read_frame(&mut self) -> Option<String> {
        loop {
            if let Some(at) = self.buf.iter().position(|&b| b == b'|') {
                let frame: Vec<u8> = self.buf.drain(..=at).collect();
                return Some(String::from_utf8(frame[..at].to_vec()).unwrap());
            }
            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    async fn expect(&mut self, frame: &str) {
        assert_eq!(self.recv().await.as_deref(), Some(frame));
    }

    /// Asserts nothing arrives within `wait`.
    async fn expect_silence(&mut self, wait: Duration) {
        let result = tokio::time::timeout(wait, self.read_frame()).await;
        assert!(result.is_err(), "unexpected frame: {result:?}");
    }

    async fn expect_eof(&mut self) {
        assert_eq!(self.recv().await, None);
    }
}

async fn start() -> RegistryHandle {
    start_with(RegistryConfig::default()).await
}

async fn start_with(config: RegistryConfig) -> RegistryHandle {
    let registry = Registry::bind(RegistryConfig {
        bind_addr: "127.0.0.1:0".into(),
        ..config
    })
    .await
    .unwrap();
    registry.spawn()
}

/// Answers the handshake, returning the peer with the join broadcast
/// still unread.
async fn handshake(addr: SocketAddr, nickname: &str, client_id: &str) -> Peer {
    let mut peer = Peer::connect(addr).await;
    peer.expect("[NICKNAME]").await;
    peer.send(nickname).await;
    peer.expect("[CLIENT ID]").await;
    peer.send(client_id).await;
    peer
}

async fn join_host(addr: SocketAddr) -> Peer {
    let mut host = handshake(addr, "Host", "host").await;
    host.expect("*NEW PLAYERS JOINED:0;host;Host;host").await;
    host
}

/// Joins a client and drains the join broadcast from every earlier peer.
async fn join_client(addr: SocketAddr, nickname: &str, earlier: &mut [&mut Peer]) -> Peer {
    let mut peer = handshake(addr, nickname, "client_unverified").await;
    let announcement = peer.recv().await.unwrap();
    assert!(announcement.starts_with("*NEW PLAYERS JOINED:"), "{announcement}");
    for other in earlier.iter_mut() {
        assert_eq!(other.recv().await.as_deref(), Some(announcement.as_str()));
    }
    peer
}

/// Host plus three clients: Ann (client_1), Bob (client_2), Cid (client_3).
async fn full_lobby(addr: SocketAddr) -> (Peer, Peer, Peer, Peer) {
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;
    let mut bob = join_client(addr, "Bob", &mut [&mut host, &mut ann]).await;
    let cid = join_client(addr, "Cid", &mut [&mut host, &mut ann, &mut bob]).await;
    (host, ann, bob, cid)
}

// =========================================================================
// Admission
// =========================================================================

#[tokio::test]
async fn test_join_host_then_client_broadcasts_roster_to_all() {
    let handle = start().await;
    let addr = handle.local_addr();

    let mut host = join_host(addr).await;
    let mut ann = handshake(addr, "Ann", "client_unverified").await;

    let expected = "*NEW PLAYERS JOINED:1;client_1;Host,Ann;host,client_1";
    ann.expect(expected).await;
    host.expect(expected).await;
    assert_eq!(handle.occupied().await, 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_join_fifth_connection_is_rejected() {
    let handle = start().await;
    let addr = handle.local_addr();
    let (_host, _ann, _bob, _cid) = full_lobby(addr).await;

    let mut eve = Peer::connect(addr).await;
    eve.expect("[JOIN FAILED]").await;
    eve.expect("!leave").await;
    eve.expect_eof().await;
    assert_eq!(handle.occupied().await, 4);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_join_before_host_is_rejected() {
    let handle = start().await;

    let mut ann = handshake(handle.local_addr(), "Ann", "client_unverified").await;
    ann.expect("[JOIN FAILED]").await;
    ann.expect("!leave").await;
    ann.expect_eof().await;
    assert_eq!(handle.occupied().await, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_join_second_host_is_rejected() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;

    let mut impostor = handshake(addr, "Fake", "host").await;
    impostor.expect("[JOIN FAILED]").await;
    impostor.expect("!leave").await;
    host.expect_silence(Duration::from_millis(200)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_join_respects_configured_capacity() {
    let handle = start_with(RegistryConfig {
        max_slots: 2,
        ..RegistryConfig::default()
    })
    .await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let _ann = join_client(addr, "Ann", &mut [&mut host]).await;

    let mut bob = Peer::connect(addr).await;
    bob.expect("[JOIN FAILED]").await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_handshake_timeout_drops_silent_peer() {
    let handle = start_with(RegistryConfig {
        handshake_timeout: Duration::from_millis(150),
        ..RegistryConfig::default()
    })
    .await;

    let mut silent = Peer::connect(handle.local_addr()).await;
    silent.expect("[NICKNAME]").await;
    silent.expect_eof().await;
    assert_eq!(handle.occupied().await, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_handshake_invalid_nickname_is_dropped() {
    let handle = start().await;

    let mut peer = Peer::connect(handle.local_addr()).await;
    peer.expect("[NICKNAME]").await;
    peer.send("a;b").await;
    peer.expect_eof().await;

    handle.shutdown().await;
}

// =========================================================================
// Departure and re-indexing
// =========================================================================

#[tokio::test]
async fn test_leave_middle_seat_reinitializes_shifted_seats() {
    let handle = start().await;
    let (mut host, mut ann, mut bob, mut cid) = full_lobby(handle.local_addr()).await;

    ann.send("!leave").await;
    ann.expect_eof().await;

    host.expect("PLAYER LEFT:1").await;
    bob.expect("PLAYER LEFT:1").await;
    cid.expect("PLAYER LEFT:1").await;

    bob.expect("RE_INITIALIZE:1;client_2;Host,Bob,Cid;host,client_2,client_3").await;
    cid.expect("RE_INITIALIZE:2;client_3;Host,Bob,Cid;host,client_2,client_3").await;
    host.expect_silence(Duration::from_millis(200)).await;

    let roster = handle.roster().await;
    assert_eq!(roster.nicknames, vec!["Host", "Bob", "Cid"]);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_leave_by_dropping_socket_is_treated_as_departure() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let ann = join_client(addr, "Ann", &mut [&mut host]).await;

    drop(ann);

    host.expect("PLAYER LEFT:1").await;
    assert_eq!(handle.occupied().await, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_leave_last_seat_sends_no_reinitialize() {
    let handle = start().await;
    let (mut host, mut ann, mut bob, mut cid) = full_lobby(handle.local_addr()).await;

    cid.send("!leave").await;

    host.expect("PLAYER LEFT:3").await;
    ann.expect("PLAYER LEFT:3").await;
    bob.expect("PLAYER LEFT:3").await;
    bob.expect_silence(Duration::from_millis(200)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_host_leave_ends_session_for_everyone() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    host.send("!leave").await;

    ann.expect("!leave").await;
    ann.expect_eof().await;
    tokio::time::timeout(READ_TIMEOUT, handle.wait_shutdown()).await.unwrap();
    assert!(handle.is_shut_down());
}

#[tokio::test]
async fn test_join_after_shift_gets_fresh_client_id() {
    let handle = start().await;
    let addr = handle.local_addr();
    let (mut host, mut ann, mut bob, mut cid) = full_lobby(addr).await;

    ann.send("!leave").await;
    host.expect("PLAYER LEFT:1").await;
    bob.expect("PLAYER LEFT:1").await;
    cid.expect("PLAYER LEFT:1").await;
    bob.recv().await.unwrap();
    cid.recv().await.unwrap();

    let mut dee = handshake(addr, "Dee", "client_unverified").await;
    dee.expect("*NEW PLAYERS JOINED:3;client_1;Host,Bob,Cid,Dee;host,client_2,client_3,client_1")
        .await;

    handle.shutdown().await;
}

// =========================================================================
// Readiness and launch
// =========================================================================

#[tokio::test]
async fn test_ready_is_attributed_to_sender_and_broadcast() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    // The id in the frame is ignored; the connection decides.
    ann.send("[PLAYER READY]:host").await;

    ann.expect("*[PLAYER READY]:client_1").await;
    host.expect("*[PLAYER READY]:client_1").await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_start_game_refused_until_everyone_ready() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    host.send("[PLAYER READY]").await;
    host.expect("*[PLAYER READY]:host").await;
    ann.expect("*[PLAYER READY]:host").await;

    host.send("[START GAME]").await;
    ann.expect_silence(Duration::from_millis(200)).await;
    assert!(!handle.launched().await);

    ann.send("[PLAYER READY]").await;
    host.expect("*[PLAYER READY]:client_1").await;
    ann.expect("*[PLAYER READY]:client_1").await;

    host.send("[START GAME]").await;
    host.expect("*[START GAME]").await;
    ann.expect("*[START GAME]").await;
    assert!(handle.launched().await);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_start_game_from_client_is_ignored() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    ann.send("[START GAME]").await;
    host.expect_silence(Duration::from_millis(200)).await;
    assert!(!handle.launched().await);

    handle.shutdown().await;
}

// =========================================================================
// Relay
// =========================================================================

#[tokio::test]
async fn test_entity_batch_relayed_to_others_only() {
    let handle = start().await;
    let (mut host, mut ann, mut bob, mut cid) = full_lobby(handle.local_addr()).await;

    let batch = "client_1;player_2,1.0,0.0,10.0,20.0,0,0,0";
    ann.send(batch).await;

    host.expect(batch).await;
    bob.expect(batch).await;
    cid.expect(batch).await;
    ann.expect_silence(Duration::from_millis(200)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_entity_batch_with_forged_sender_is_dropped() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    ann.send("host;enemy_1,0.0,0.0,1.0,1.0,0,0,0").await;
    host.expect_silence(Duration::from_millis(200)).await;

    // The connection survives.
    ann.send("client_1;player_2,0.0,0.0,1.0,1.0,0,0,0").await;
    host.expect("client_1;player_2,0.0,0.0,1.0,1.0,0,0,0").await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_targeted_map_reaches_only_its_target() {
    let handle = start().await;
    let (mut host, mut ann, mut bob, _cid) = full_lobby(handle.local_addr()).await;

    host.send("SYNCED MAP::{\"tiles\":[1,2]}>>>client_2").await;

    bob.expect("SYNCED MAP::{\"tiles\":[1,2]}>>>client_2").await;
    ann.expect_silence(Duration::from_millis(200)).await;
    host.expect_silence(Duration::from_millis(50)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_map_from_client_is_not_relayed() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    ann.send("SYNCED MAP::{}").await;
    host.expect_silence(Duration::from_millis(200)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_close_connection() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    ann.send("client_1;player_2,not-a-number").await;
    ann.send("SOMETHING NEW:42").await;
    ann.send("[PLAYER READY]").await;

    host.expect("*[PLAYER READY]:client_1").await;
    assert_eq!(handle.occupied().await, 2);

    handle.shutdown().await;
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test]
async fn test_shutdown_sends_leave_and_is_idempotent() {
    let handle = start().await;
    let addr = handle.local_addr();
    let mut host = join_host(addr).await;
    let mut ann = join_client(addr, "Ann", &mut [&mut host]).await;

    handle.shutdown().await;
    handle.shutdown().await;

    host.expect("!leave").await;
    host.expect_eof().await;
    ann.expect("!leave").await;
    ann.expect_eof().await;
    assert!(handle.is_shut_down());
    assert_eq!(handle.occupied().await, 0);
}
