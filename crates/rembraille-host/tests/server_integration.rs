//! Integration tests for the reference host server.
//!
//! # Purpose
//!
//! These tests talk to a real [`HostServer`] over loopback TCP using nothing
//! but the wire codec, the same way a guest driver does.  They verify:
//!
//! - The handshake reply carries the configured display size.
//! - Pings are answered, or ignored when the host is told not to.
//! - Rows are echoed back when acknowledgements are enabled.
//! - Keys pressed on the host reach every connected guest.
//! - The statistics count guests, messages and cells.
//! - Shutting down closes the listener and every guest connection.
//!
//! ```text
//! test (raw TcpStream)                 HostServer (port 0)
//! ────────────────────                 ───────────────────
//! HandshakeRequest ──────────────────▶
//!                  ◀────────────────── HandshakeResponse { cell_count }
//! Cells / Ping     ──────────────────▶
//!                  ◀────────────────── Cells echo / Pong
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use rembraille_core::protocol::messages::{
    HandshakeRequest, KeyAction, KeyEventMessage, PROTOCOL_MAJOR,
};
use rembraille_core::protocol::{decode_message, encode_message};
use rembraille_core::{BrailleMessage, FrameAssembler};
use rembraille_host::{HostConfig, HostEvent, HostServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

// ── Helpers ───────────────────────────────────────────────────────────────────

/// A minimal guest speaking the wire protocol over a raw socket.
struct RawGuest {
    stream: TcpStream,
    assembler: FrameAssembler,
}

impl RawGuest {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.expect("connect"),
            assembler: FrameAssembler::new(),
        }
    }

    async fn send(&mut self, msg: &BrailleMessage) {
        let bytes = encode_message(msg).expect("encode");
        self.stream.write_all(&bytes).await.expect("write");
    }

    async fn recv(&mut self) -> BrailleMessage {
        timeout(WAIT, async {
            let mut buf = [0u8; 1024];
            loop {
                if let Some(frame) = self.assembler.next_frame().expect("frame") {
                    return decode_message(&frame).expect("decode").expect("known type");
                }
                let n = self.stream.read(&mut buf).await.expect("read");
                assert!(n > 0, "host closed the connection");
                self.assembler.push(&buf[..n]);
            }
        })
        .await
        .expect("no message from host")
    }

    /// Returns true if nothing arrives within `window`.
    async fn stays_quiet(&mut self, window: Duration) -> bool {
        let mut buf = [0u8; 64];
        timeout(window, self.stream.read(&mut buf)).await.is_err()
    }

    async fn handshake(&mut self, name: &str) -> u16 {
        self.send(&BrailleMessage::HandshakeRequest(HandshakeRequest::current(
            name, 0,
        )))
        .await;
        match self.recv().await {
            BrailleMessage::HandshakeResponse(resp) => {
                assert_eq!(resp.major, PROTOCOL_MAJOR);
                resp.cell_count
            }
            other => panic!("expected HandshakeResponse, got {other:?}"),
        }
    }
}

async fn start(config: HostConfig) -> (HostServer, mpsc::Receiver<HostEvent>) {
    HostServer::bind(HostConfig {
        bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        ..config
    })
    .await
    .expect("bind")
}

async fn next_event(events: &mut mpsc::Receiver<HostEvent>) -> HostEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no host event")
        .expect("event channel closed")
}

// ── Handshake and keepalive ───────────────────────────────────────────────────

/// The handshake reply reports the configured display size and the guest is
/// announced with the name it sent.
#[tokio::test]
async fn test_handshake_reports_configured_cell_count() {
    // Arrange
    let (server, mut events) = start(HostConfig {
        cells: 32,
        ..HostConfig::default()
    })
    .await;
    let mut guest = RawGuest::connect(server.local_addr()).await;

    // Act
    let cells = guest.handshake("integration-guest").await;

    // Assert
    assert_eq!(cells, 32);
    match next_event(&mut events).await {
        HostEvent::GuestConnected { name, .. } => assert_eq!(name, "integration-guest"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_ping_gets_matching_pong() {
    let (server, _events) = start(HostConfig::default()).await;
    let mut guest = RawGuest::connect(server.local_addr()).await;
    guest.handshake("g").await;

    guest.send(&BrailleMessage::Ping(77)).await;

    assert_eq!(guest.recv().await, BrailleMessage::Pong(77));
}

/// With pongs disabled the host reads the ping and stays silent.
#[tokio::test]
async fn test_no_pong_host_ignores_pings() {
    let (server, _events) = start(HostConfig {
        no_pong: true,
        ..HostConfig::default()
    })
    .await;
    let mut guest = RawGuest::connect(server.local_addr()).await;
    guest.handshake("g").await;

    guest.send(&BrailleMessage::Ping(1)).await;

    assert!(guest.stays_quiet(Duration::from_millis(200)).await);
}

// ── Cells ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cells_are_echoed_when_acks_enabled() {
    // Arrange
    let (server, mut events) = start(HostConfig {
        ack_cells: true,
        ..HostConfig::default()
    })
    .await;
    let mut guest = RawGuest::connect(server.local_addr()).await;
    guest.handshake("g").await;
    let _connected = next_event(&mut events).await;

    // Act
    guest.send(&BrailleMessage::Cells(vec![0x13, 0x11])).await;

    // Assert
    assert_eq!(guest.recv().await, BrailleMessage::Cells(vec![0x13, 0x11]));
    match next_event(&mut events).await {
        HostEvent::CellsDisplayed { cells, .. } => assert_eq!(cells.to_braille_ascii(), "HE"),
        other => panic!("unexpected event {other:?}"),
    }
}

// ── Keys ──────────────────────────────────────────────────────────────────────

/// A key pressed on the host arrives at every connected guest.
#[tokio::test]
async fn test_broadcast_key_reaches_all_guests() {
    // Arrange: two guests, both past the handshake
    let (server, _events) = start(HostConfig::default()).await;
    let mut first = RawGuest::connect(server.local_addr()).await;
    let mut second = RawGuest::connect(server.local_addr()).await;
    first.handshake("first").await;
    second.handshake("second").await;

    // Act
    let delivered = server.broadcast_key(101, KeyAction::Down).await;

    // Assert
    assert_eq!(delivered, 2);
    let expected = BrailleMessage::KeyEvent(KeyEventMessage {
        key_id: 101,
        action: KeyAction::Down,
    });
    assert_eq!(first.recv().await, expected);
    assert_eq!(second.recv().await, expected);
}

#[tokio::test]
async fn test_broadcast_key_without_guests_reaches_nobody() {
    let (server, _events) = start(HostConfig::default()).await;
    assert_eq!(server.broadcast_key(100, KeyAction::Down).await, 0);
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Totals keep counting after a guest leaves; the active count drops.
#[tokio::test]
async fn test_stats_track_messages_cells_and_departures() {
    // Arrange
    let (server, mut events) = start(HostConfig::default()).await;
    let mut guest = RawGuest::connect(server.local_addr()).await;
    guest.handshake("g").await;
    guest.send(&BrailleMessage::Cells(vec![0; 40])).await;
    guest.send(&BrailleMessage::Ping(1)).await;
    let _pong = guest.recv().await;

    // Act
    drop(guest);
    loop {
        if let HostEvent::GuestDisconnected { .. } = next_event(&mut events).await {
            break;
        }
    }

    // Assert
    let stats = server.stats().await;
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.active_guests, 0);
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.cells_displayed, 40);
    assert!(server.guests().await.is_empty());
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

/// After shutdown a connected guest sees its socket close and new guests
/// are refused.
#[tokio::test]
async fn test_shutdown_closes_guests_and_listener() {
    // Arrange
    let (server, mut events) = start(HostConfig::default()).await;
    let addr = server.local_addr();
    let mut guest = RawGuest::connect(addr).await;
    guest.handshake("g").await;
    let _connected = next_event(&mut events).await;

    // Act
    server.shutdown().await;

    // Assert: EOF or a reset, either way the host is gone
    let mut buf = [0u8; 64];
    let read = timeout(WAIT, guest.stream.read(&mut buf))
        .await
        .expect("guest connection still open after shutdown");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(TcpStream::connect(addr).await.is_err());
}
