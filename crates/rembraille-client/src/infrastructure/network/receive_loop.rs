//! Per-connection receive task.
//!
//! Started as soon as the handshake begins.  Reads into an accumulating
//! buffer, pulls out every complete frame and acts on the dispatch decision
//! in arrival order.  The task only ever ends with the error that ended the
//! link; the supervisor decides what happens next.

use rembraille_core::protocol::messages::{HandshakeResponse, MessageType, FRAME_VERSION};
use rembraille_core::protocol::{FrameAssembler, FrameError, ProtocolError};
use rembraille_core::{BrailleMessage, Frame};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::application::dispatch::{dispatch, Dispatched, SessionEvent};
use crate::infrastructure::network::{ConnectionError, HandshakeError, SharedWriter};

const READ_CHUNK: usize = 4096;

pub(crate) type HandshakeReply = Result<HandshakeResponse, HandshakeError>;

/// Everything the receive task needs besides the read half.
pub(crate) struct ReceiveContext {
    pub events: mpsc::Sender<SessionEvent>,
    /// Used to answer host pings.
    pub writer: SharedWriter,
    /// Taken by the first HandshakeResponse; `None` once the session is up.
    pub handshake: Option<oneshot::Sender<HandshakeReply>>,
    /// Latest Pong token, observed by the keepalive task.
    pub pongs: watch::Sender<u64>,
}

/// Runs until the link fails and returns the reason.
pub(crate) async fn run<R>(mut reader: R, mut ctx: ReceiveContext) -> ConnectionError
where
    R: AsyncRead + Unpin,
{
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                info!("host closed the connection");
                return ConnectionError::Closed;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("read error on braille link: {e}");
                return ConnectionError::Read(e);
            }
        };
        trace!(bytes = n, "read from host");
        assembler.push(&buf[..n]);

        loop {
            let frame = match assembler.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return malformed_frame(e, &mut ctx),
            };
            if let Err(e) = handle_frame(&frame, &mut ctx).await {
                return e;
            }
        }
    }
}

fn malformed_frame(e: FrameError, ctx: &mut ReceiveContext) -> ConnectionError {
    error!("malformed frame from host: {e}");
    if let FrameError::UnsupportedVersion(remote) = e {
        // A foreign header version during negotiation is an incompatible host,
        // not a transient fault.
        if let Some(tx) = ctx.handshake.take() {
            let _ = tx.send(Err(HandshakeError::VersionMismatch {
                local: FRAME_VERSION,
                remote,
            }));
        }
    }
    ConnectionError::Protocol(e.into())
}

async fn handle_frame(frame: &Frame, ctx: &mut ReceiveContext) -> Result<(), ConnectionError> {
    let dispatched = dispatch(frame).map_err(|e| {
        error!("undecodable message from host: {e}");
        ConnectionError::Protocol(e)
    })?;

    match dispatched {
        Dispatched::HandshakeResponse(resp) => match ctx.handshake.take() {
            Some(tx) => {
                debug!(major = resp.major, minor = resp.minor, "handshake response received");
                let _ = tx.send(Ok(resp));
            }
            None => {
                return Err(unexpected(MessageType::HandshakeResponse, "connected"));
            }
        },
        Dispatched::Event(event) => match ctx.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                // Pongs behind this frame must still reach keepalive.
                warn!(?event, "event queue full; dropping event");
            }
            Err(TrySendError::Closed(_)) => debug!("event receiver dropped; discarding event"),
        },
        Dispatched::Pong(token) => {
            trace!(token, "pong received");
            ctx.pongs.send_replace(token);
        }
        Dispatched::PingRequest(token) => {
            trace!(token, "answering host ping");
            ctx.writer
                .send(&BrailleMessage::Pong(token))
                .await
                .map_err(|e| e.into_link_error())?;
        }
        Dispatched::Ignored { type_code } => {
            debug!("ignoring unknown message type 0x{type_code:02X}");
        }
        Dispatched::Unexpected(message) => {
            let state = if ctx.handshake.is_some() {
                "handshaking"
            } else {
                "connected"
            };
            return Err(unexpected(message, state));
        }
    }
    Ok(())
}

fn unexpected(message: MessageType, state: &str) -> ConnectionError {
    warn!(?message, state, "host sent a message that is invalid in this state");
    ConnectionError::Protocol(ProtocolError::UnexpectedMessage {
        message,
        state: state.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rembraille_core::protocol::encode_message;
    use rembraille_core::protocol::messages::{KeyAction, KeyEventMessage};
    use tokio_test::io::Builder;

    use crate::application::dispatch::StatusEvent;

    struct Harness {
        ctx: ReceiveContext,
        events: mpsc::Receiver<SessionEvent>,
        handshake: oneshot::Receiver<HandshakeReply>,
        pongs: watch::Receiver<u64>,
    }

    fn harness(writer: SharedWriter) -> Harness {
        harness_with_queue(writer, 16)
    }

    fn harness_with_queue(writer: SharedWriter, capacity: usize) -> Harness {
        let (events_tx, events) = mpsc::channel(capacity);
        let (hs_tx, handshake) = oneshot::channel();
        let (pong_tx, pongs) = watch::channel(0);
        Harness {
            ctx: ReceiveContext {
                events: events_tx,
                writer,
                handshake: Some(hs_tx),
                pongs: pong_tx,
            },
            events,
            handshake,
            pongs,
        }
    }

    fn bytes(msg: &BrailleMessage) -> Vec<u8> {
        encode_message(msg).unwrap()
    }

    fn response(major: u8) -> BrailleMessage {
        BrailleMessage::HandshakeResponse(HandshakeResponse {
            major,
            minor: 0,
            cell_count: 40,
            server_name: "test host".into(),
        })
    }

    #[tokio::test]
    async fn test_frames_split_across_reads_are_dispatched_in_order() {
        // Arrange: handshake response then two key events, chopped at odd offsets
        let mut stream = bytes(&response(1));
        for (id, action) in [(3, KeyAction::Down), (3, KeyAction::Up)] {
            stream.extend(bytes(&BrailleMessage::KeyEvent(KeyEventMessage {
                key_id: id,
                action,
            })));
        }
        let mut builder = Builder::new();
        for chunk in stream.chunks(5) {
            builder.read(chunk);
        }
        let reader = builder.build();
        let mut h = harness(SharedWriter::new());

        // Act
        let end = run(reader, h.ctx).await;

        // Assert
        assert!(matches!(end, ConnectionError::Closed));
        let resp = h.handshake.await.unwrap().unwrap();
        assert_eq!(resp.cell_count, 40);
        let first = h.events.recv().await.unwrap();
        let second = h.events.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::Key(k) if k.code == 3 && k.pressed));
        assert!(matches!(second, SessionEvent::Key(k) if k.code == 3 && !k.pressed));
    }

    #[tokio::test]
    async fn test_host_ping_is_answered_with_matching_pong() {
        // Arrange
        let reader = Builder::new().read(&bytes(&BrailleMessage::Ping(77))).build();
        let wire = Builder::new().write(&bytes(&BrailleMessage::Pong(77))).build();
        let writer = SharedWriter::new();
        let _failed = writer.attach(Box::new(wire)).await;
        let h = harness(writer.clone());

        // Act
        let end = run(reader, h.ctx).await;

        // Assert: the mock panics on drop if the pong was not written
        assert!(matches!(end, ConnectionError::Closed));
        writer.detach().await;
    }

    #[tokio::test]
    async fn test_pong_updates_watch_and_emits_no_event() {
        let reader = Builder::new().read(&bytes(&BrailleMessage::Pong(12))).build();
        let mut h = harness(SharedWriter::new());

        run(reader, h.ctx).await;

        assert_eq!(*h.pongs.borrow_and_update(), 12);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cells_echo_becomes_status_event() {
        let reader = Builder::new()
            .read(&bytes(&BrailleMessage::Cells(vec![1, 2, 3])))
            .build();
        let mut h = harness(SharedWriter::new());

        run(reader, h.ctx).await;

        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::Status(StatusEvent::CellsAcknowledged {
                cell_count: 3
            }))
        );
    }

    /// A driver that stops draining events must not hide pongs from keepalive.
    #[tokio::test]
    async fn test_full_event_queue_does_not_block_pong_handling() {
        // Arrange: two acks for a one-slot queue nobody drains, then a pong
        let mut stream = bytes(&BrailleMessage::Cells(vec![1]));
        stream.extend(bytes(&BrailleMessage::Cells(vec![1, 2])));
        stream.extend(bytes(&BrailleMessage::Pong(9)));
        let reader = Builder::new().read(&stream).build();
        let mut h = harness_with_queue(SharedWriter::new(), 1);

        // Act
        let end = tokio::time::timeout(std::time::Duration::from_secs(2), run(reader, h.ctx))
            .await
            .expect("receive loop blocked on the event queue");

        // Assert: first ack kept, second dropped, pong still seen
        assert!(matches!(end, ConnectionError::Closed));
        assert_eq!(*h.pongs.borrow_and_update(), 9);
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::Status(StatusEvent::CellsAcknowledged {
                cell_count: 1
            }))
        );
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_loop_with_protocol_error() {
        let reader = Builder::new().read(&[0x01, 0x10, 0xFF, 0, 0, 0]).build();
        let h = harness(SharedWriter::new());

        let end = run(reader, h.ctx).await;

        assert!(matches!(
            end,
            ConnectionError::Protocol(ProtocolError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[tokio::test]
    async fn test_foreign_header_version_during_handshake_is_version_mismatch() {
        let reader = Builder::new().read(&[0x02, 0x02, 0, 0, 0, 0]).build();
        let h = harness(SharedWriter::new());

        let end = run(reader, h.ctx).await;

        assert!(matches!(end, ConnectionError::Protocol(_)));
        assert_eq!(
            h.handshake.await.unwrap(),
            Err(HandshakeError::VersionMismatch {
                local: FRAME_VERSION,
                remote: 2
            })
        );
    }

    #[tokio::test]
    async fn test_second_handshake_response_is_a_protocol_violation() {
        let mut stream = bytes(&response(1));
        stream.extend(bytes(&response(1)));
        let reader = Builder::new().read(&stream).build();
        let h = harness(SharedWriter::new());

        let end = run(reader, h.ctx).await;

        assert!(matches!(
            end,
            ConnectionError::Protocol(ProtocolError::UnexpectedMessage {
                message: MessageType::HandshakeResponse,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_read_error_ends_loop() {
        let reader = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let h = harness(SharedWriter::new());

        let end = run(reader, h.ctx).await;

        assert!(matches!(end, ConnectionError::Read(e) if e.kind() == std::io::ErrorKind::ConnectionReset));
    }
}
