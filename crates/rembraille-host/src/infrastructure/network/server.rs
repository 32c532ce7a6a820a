//! HostServer: TCP listener and per-guest protocol sessions.
//!
//! ```text
//! accept loop ──spawn──▶ guest session (one task per guest)
//!                          ├─ socket read ─▶ FrameAssembler ─▶ handle_message ─▶ replies
//!                          └─ outbound queue (key events, errors) ─▶ socket write
//! ```
//!
//! Each guest task owns both halves of its socket, so replies and pushed key
//! events never interleave.  Shutting down or dropping the server aborts the
//! accept loop, which in turn aborts every guest task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rembraille_core::protocol::messages::{
    HandshakeResponse, KeyAction, KeyEventMessage, PROTOCOL_MAJOR, PROTOCOL_MINOR,
};
use rembraille_core::protocol::{decode_message, encode_message, ProtocolError};
use rembraille_core::{BrailleMessage, CellBuffer, Frame, FrameAssembler};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::application::guest_registry::{GuestId, GuestRecord, GuestRegistry, HostStats};
use crate::application::render::render;
use crate::infrastructure::network::{HostConfig, HostError, HostEvent};

const READ_CHUNK: usize = 4096;
const OUTBOUND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 256;

struct Shared {
    config: HostConfig,
    registry: RwLock<GuestRegistry>,
    outbound: RwLock<HashMap<GuestId, mpsc::Sender<BrailleMessage>>>,
    events: mpsc::Sender<HostEvent>,
}

impl Shared {
    fn emit(&self, event: HostEvent) {
        if let Err(e) = self.events.try_send(event) {
            trace!("host event dropped: {e}");
        }
    }
}

/// A running host server.
pub struct HostServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl HostServer {
    /// Binds the listener and starts accepting guests.
    ///
    /// Returns the server together with the receiver for its events.  Bind
    /// to port 0 to let the OS pick a free port; see [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns [`HostError::BindFailed`] if the address cannot be bound.
    pub async fn bind(config: HostConfig) -> Result<(Self, mpsc::Receiver<HostEvent>), HostError> {
        let addr = config.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HostError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(
            %local_addr,
            cells = config.cells,
            ack_cells = config.ack_cells,
            no_pong = config.no_pong,
            "braille host listening"
        );

        let (events, rx) = mpsc::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            config,
            registry: RwLock::new(GuestRegistry::new()),
            outbound: RwLock::new(HashMap::new()),
            events,
        });
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        Ok((
            Self {
                local_addr,
                shared,
                accept_task,
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    pub async fn stats(&self) -> HostStats {
        self.shared.registry.read().await.stats()
    }

    pub async fn guests(&self) -> Vec<GuestRecord> {
        self.shared.registry.read().await.all()
    }

    /// Queues a message for one guest.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::GuestNotFound`] if the guest is not connected.
    pub async fn send_to(&self, guest: GuestId, msg: BrailleMessage) -> Result<(), HostError> {
        let tx = self
            .shared
            .outbound
            .read()
            .await
            .get(&guest)
            .cloned()
            .ok_or(HostError::GuestNotFound(guest))?;
        tx.send(msg)
            .await
            .map_err(|_| HostError::GuestNotFound(guest))
    }

    /// Sends a key event to every connected guest; returns how many got it.
    pub async fn broadcast_key(&self, key_id: u16, action: KeyAction) -> usize {
        let targets: Vec<_> = self
            .shared
            .outbound
            .read()
            .await
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        if targets.is_empty() {
            warn!("no connected guests to send key event to");
            return 0;
        }

        let msg = BrailleMessage::KeyEvent(KeyEventMessage { key_id, action });
        let mut delivered = 0;
        for (guest, tx) in targets {
            match tx.send(msg.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => debug!(%guest, "guest left before the key event was queued"),
            }
        }
        info!(key_id, ?action, delivered, "key event sent");
        delivered
    }

    /// Stops accepting and disconnects every guest.
    ///
    /// The listener is closed when this returns; guest sockets close as
    /// their tasks are cancelled.
    pub async fn shutdown(mut self) {
        info!("braille host shutting down");
        self.accept_task.abort();
        if let Err(e) = (&mut self.accept_task).await {
            if e.is_panic() {
                error!("accept loop panicked: {e}");
            }
        }
    }
}

impl Drop for HostServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut guests = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, address)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!(%address, "could not disable Nagle: {e}");
                    }
                    guests.spawn(serve_guest(socket, address, Arc::clone(&shared)));
                }
                Err(e) => error!("accept failed: {e}"),
            },
            Some(joined) = guests.join_next() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("guest task panicked: {e}");
                    }
                }
            }
        }
    }
}

async fn serve_guest(socket: TcpStream, address: SocketAddr, shared: Arc<Shared>) {
    let guest = shared.registry.write().await.add(address);
    let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
    shared.outbound.write().await.insert(guest, tx);
    info!(%guest, %address, "guest connected");

    match guest_session(guest, socket, &mut rx, &shared).await {
        Ok(()) => debug!(%guest, "guest closed the connection"),
        Err(e) => warn!(%guest, "guest session ended: {e}"),
    }

    shared.outbound.write().await.remove(&guest);
    if let Some(record) = shared.registry.write().await.remove(guest) {
        info!(
            %guest,
            name = %record.label(),
            connected_for = ?record.connected_for(),
            messages = record.messages_received,
            "guest disconnected"
        );
    }
    shared.emit(HostEvent::GuestDisconnected { guest });
}

async fn guest_session(
    guest: GuestId,
    socket: TcpStream,
    outbound: &mut mpsc::Receiver<BrailleMessage>,
    shared: &Shared,
) -> Result<(), HostError> {
    let (mut reader, mut writer) = socket.into_split();
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                assembler.push(&buf[..n]);
                while let Some(frame) = assembler.next_frame().map_err(ProtocolError::from)? {
                    if let Some(reply) = handle_frame(guest, &frame, shared).await? {
                        write_message(&mut writer, &reply).await?;
                    }
                }
            }
            Some(msg) = outbound.recv() => write_message(&mut writer, &msg).await?,
        }
    }
}

async fn write_message(writer: &mut OwnedWriteHalf, msg: &BrailleMessage) -> Result<(), HostError> {
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Acts on one frame from a guest and returns the reply, if any.
async fn handle_frame(
    guest: GuestId,
    frame: &Frame,
    shared: &Shared,
) -> Result<Option<BrailleMessage>, HostError> {
    shared.registry.write().await.record_message(guest);
    let Some(msg) = decode_message(frame)? else {
        debug!(%guest, "ignoring unknown message type 0x{:02X}", frame.type_code);
        return Ok(None);
    };
    let cfg = &shared.config;

    let reply = match msg {
        BrailleMessage::HandshakeRequest(req) => {
            info!(
                %guest,
                name = %req.client_name,
                version = %format!("{}.{}", req.major, req.minor),
                capabilities = %format!("{:#x}", req.capabilities),
                "handshake"
            );
            if req.major != PROTOCOL_MAJOR {
                warn!(%guest, major = req.major, "guest speaks another major version");
            }
            let address = {
                let mut registry = shared.registry.write().await;
                registry.set_name(guest, req.client_name.clone());
                registry.get(guest).map(|g| g.address)
            };
            if let Some(address) = address {
                shared.emit(HostEvent::GuestConnected {
                    guest,
                    name: req.client_name,
                    address,
                });
            }
            Some(BrailleMessage::HandshakeResponse(HandshakeResponse {
                major: cfg.advertised_major,
                minor: PROTOCOL_MINOR,
                cell_count: cfg.cells,
                server_name: cfg.server_name.clone(),
            }))
        }
        BrailleMessage::Cells(cells) => {
            let row = CellBuffer::new(cells);
            shared.registry.write().await.record_cells(guest, row.len());
            let text = render(&row);
            info!(%guest, cells = row.len(), braille = %text.unicode, ascii = %text.ascii, "display");
            debug!(%guest, raw = %text.hex);
            shared.emit(HostEvent::CellsDisplayed {
                guest,
                cells: row.clone(),
            });
            cfg.ack_cells
                .then(|| BrailleMessage::Cells(row.into_bytes()))
        }
        BrailleMessage::Ping(token) if cfg.no_pong => {
            debug!(%guest, token, "ignoring ping");
            None
        }
        BrailleMessage::Ping(token) => Some(BrailleMessage::Pong(token)),
        BrailleMessage::Pong(token) => {
            trace!(%guest, token, "pong");
            None
        }
        BrailleMessage::Error(text) => {
            warn!(%guest, "guest reported: {text}");
            None
        }
        other @ (BrailleMessage::HandshakeResponse(_) | BrailleMessage::KeyEvent(_)) => {
            let kind = other.message_type();
            warn!(%guest, ?kind, "guest sent a host-only message");
            Some(BrailleMessage::Error(format!("unexpected {kind:?} from guest")))
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rembraille_core::protocol::{decode_frame, Decoded};
    use std::net::Ipv4Addr;

    fn shared(config: HostConfig) -> (Shared, mpsc::Receiver<HostEvent>) {
        let (events, rx) = mpsc::channel(16);
        (
            Shared {
                config,
                registry: RwLock::new(GuestRegistry::new()),
                outbound: RwLock::new(HashMap::new()),
                events,
            },
            rx,
        )
    }

    fn frame(msg: &BrailleMessage) -> Frame {
        match decode_frame(&encode_message(msg).unwrap()).unwrap() {
            Decoded::Frame { frame, .. } => frame,
            other => panic!("incomplete: {other:?}"),
        }
    }

    async fn guest_in(s: &Shared) -> GuestId {
        s.registry
            .write()
            .await
            .add(SocketAddr::from((Ipv4Addr::LOCALHOST, 40000)))
    }

    #[tokio::test]
    async fn test_handshake_reports_configured_cells_and_names_guest() {
        // Arrange
        let (s, mut events) = shared(HostConfig {
            cells: 80,
            ..HostConfig::default()
        });
        let guest = guest_in(&s).await;
        let req = BrailleMessage::HandshakeRequest(
            rembraille_core::protocol::messages::HandshakeRequest::current("vm", 0),
        );

        // Act
        let reply = handle_frame(guest, &frame(&req), &s).await.unwrap();

        // Assert
        match reply {
            Some(BrailleMessage::HandshakeResponse(resp)) => {
                assert_eq!(resp.cell_count, 80);
                assert_eq!(resp.major, PROTOCOL_MAJOR);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert_eq!(s.registry.read().await.get(guest).unwrap().label(), "vm");
        assert!(matches!(
            events.try_recv(),
            Ok(HostEvent::GuestConnected { name, .. }) if name == "vm"
        ));
    }

    #[tokio::test]
    async fn test_ping_is_answered_unless_pongs_are_disabled() {
        let (s, _events) = shared(HostConfig::default());
        let guest = guest_in(&s).await;
        assert_eq!(
            handle_frame(guest, &frame(&BrailleMessage::Ping(3)), &s).await.unwrap(),
            Some(BrailleMessage::Pong(3))
        );

        let (silent, _events) = shared(HostConfig {
            no_pong: true,
            ..HostConfig::default()
        });
        let guest = guest_in(&silent).await;
        assert_eq!(
            handle_frame(guest, &frame(&BrailleMessage::Ping(3)), &silent)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_cells_are_counted_and_echoed_when_acking() {
        // Arrange
        let (s, mut events) = shared(HostConfig {
            ack_cells: true,
            ..HostConfig::default()
        });
        let guest = guest_in(&s).await;

        // Act
        let reply = handle_frame(guest, &frame(&BrailleMessage::Cells(vec![1, 2, 3])), &s)
            .await
            .unwrap();

        // Assert
        assert_eq!(reply, Some(BrailleMessage::Cells(vec![1, 2, 3])));
        let stats = s.registry.read().await.stats();
        assert_eq!(stats.cells_displayed, 3);
        assert_eq!(stats.messages_received, 1);
        assert!(matches!(
            events.try_recv(),
            Ok(HostEvent::CellsDisplayed { cells, .. }) if cells.as_bytes() == [1, 2, 3]
        ));
    }

    #[tokio::test]
    async fn test_key_event_from_guest_gets_error_reply() {
        let (s, _events) = shared(HostConfig::default());
        let guest = guest_in(&s).await;
        let msg = BrailleMessage::KeyEvent(KeyEventMessage {
            key_id: 1,
            action: KeyAction::Down,
        });

        let reply = handle_frame(guest, &frame(&msg), &s).await.unwrap();

        assert!(matches!(reply, Some(BrailleMessage::Error(_))));
    }

    #[tokio::test]
    async fn test_unknown_type_is_ignored() {
        let (s, _events) = shared(HostConfig::default());
        let guest = guest_in(&s).await;
        let unknown = Frame {
            version: rembraille_core::protocol::messages::FRAME_VERSION,
            type_code: 0x30,
            payload: vec![],
        };

        assert_eq!(handle_frame(guest, &unknown, &s).await.unwrap(), None);
    }
}
