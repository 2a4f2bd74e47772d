//! Integration tests for the framed TCP transport.
//!
//! These spin up a real listener on an OS-assigned port and talk to it with
//! raw `TcpStream`s, so framing is checked against bytes exactly as they
//! arrive from the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use shinobi_transport::{
    Connection, ConnectionConfig, DisconnectCause, Listener, TcpConnection, TcpTransport,
    TransportError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Binds a transport on port 0 and accepts one raw client.
async fn accept_pair() -> (TcpConnection, TcpStream) {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
    let addr = transport.local_addr().expect("should have addr");

    let accept = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpStream::connect(addr).await.expect("client should connect");
    let server = accept.await.expect("accept task should complete");
    (server, client)
}

// =========================================================================
// send / recv
// =========================================================================

#[tokio::test]
async fn test_send_appends_delimiter_on_the_wire() {
    let (server, mut client) = accept_pair().await;

    server.send(b"[NICKNAME]").await.expect("send should succeed");

    let mut buf = [0u8; 11];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"[NICKNAME]|");
}

#[tokio::test]
async fn test_recv_reassembles_frame_split_across_writes() {
    let (server, mut client) = accept_pair().await;

    client.write_all(b"Ann").await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.write_all(b"|[PLAYER READY]|!le").await.unwrap();

    assert_eq!(server.recv().await.unwrap(), Some(b"Ann".to_vec()));
    assert_eq!(server.recv().await.unwrap(), Some(b"[PLAYER READY]".to_vec()));

    client.write_all(b"ave|").await.unwrap();
    assert_eq!(server.recv().await.unwrap(), Some(b"!leave".to_vec()));
}

#[tokio::test]
async fn test_send_rejects_payload_with_delimiter() {
    let (server, _client) = accept_pair().await;

    let result = server.send(b"bad|frame").await;
    assert!(matches!(result, Err(TransportError::InvalidFrame('|'))));
    assert!(!server.is_closed(), "a rejected payload must not close the connection");
}

#[tokio::test]
async fn test_connect_outbound_exchanges_frames() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });

    let client = TcpConnection::connect(&addr, Duration::from_secs(1), ConnectionConfig::default())
        .await
        .expect("should connect");
    let server = accept.await.unwrap();

    client.send(b"Bob").await.unwrap();
    assert_eq!(server.recv().await.unwrap(), Some(b"Bob".to_vec()));
    assert_ne!(client.id(), server.id());
}

#[tokio::test]
async fn test_connect_refused_returns_connect_failed() {
    // Bind then drop to get a port nobody listens on.
    let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap().to_string();
    drop(transport);

    let result = TcpConnection::connect(&addr, Duration::from_secs(1), ConnectionConfig::default()).await;
    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
}

// =========================================================================
// close / disconnect callback
// =========================================================================

#[tokio::test]
async fn test_peer_eof_returns_none_and_records_cause() {
    let (server, client) = accept_pair().await;
    drop(client);

    assert_eq!(server.recv().await.unwrap(), None);
    assert!(server.is_closed());
    assert_eq!(server.disconnect_cause(), Some(DisconnectCause::PeerClosed));
}

#[tokio::test]
async fn test_close_wakes_pending_recv() {
    let (server, _client) = accept_pair().await;
    let server = Arc::new(server);

    let reader = Arc::clone(&server);
    let pending = tokio::spawn(async move { reader.recv().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    server.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("recv should return after close")
        .unwrap();
    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn test_close_is_idempotent_and_callback_fires_once() {
    let (server, _client) = accept_pair().await;
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&fired);
    server.on_disconnected(move |cause| {
        assert_eq!(cause, DisconnectCause::PeerLeft);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(server.close_with(DisconnectCause::PeerLeft).await);
    assert!(!server.close_with(DisconnectCause::LocalClose).await);
    server.close().await.unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(server.disconnect_cause(), Some(DisconnectCause::PeerLeft));
}

#[tokio::test]
async fn test_callback_registered_after_close_runs_immediately() {
    let (server, _client) = accept_pair().await;
    server.close().await.unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    server.on_disconnected(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_after_close_fails() {
    let (server, mut client) = accept_pair().await;
    server.close().await.unwrap();

    let result = server.send(b"[START GAME]").await;
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));

    // The peer observes EOF.
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(1), client.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let mut transport = TcpTransport::bind("127.0.0.1:0")
        .await
        .unwrap()
        .with_config(ConnectionConfig {
            max_frame_len: 16,
            ..ConnectionConfig::default()
        });
    let addr = transport.local_addr().unwrap();
    let accept = tokio::spawn(async move { transport.accept().await.unwrap() });
    let mut client = TcpStream::connect(addr).await.unwrap();
    let server = accept.await.unwrap();

    client.write_all(&[b'x'; 64]).await.unwrap();

    let result = server.recv().await;
    assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
    assert!(server.is_closed());
}
