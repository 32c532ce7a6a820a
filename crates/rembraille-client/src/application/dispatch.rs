//! Dispatch layer: inbound frames → typed session events.
//!
//! [`dispatch`] is the single place that decides what each message kind
//! means to the guest.  The match over [`BrailleMessage`] is exhaustive, so a
//! new message kind cannot be added without deciding how it is handled here.
//!
//! Events reach the screen-reader binding through an [`EventPump`]: the
//! background tasks push onto a channel and the driver drains it on its own
//! turn, invoking the handlers it registered.

use std::time::{SystemTime, UNIX_EPOCH};

use rembraille_core::protocol::messages::{HandshakeResponse, KeyAction, MessageType};
use rembraille_core::protocol::{decode_message, Frame, ProtocolError};
use rembraille_core::{BrailleMessage, ConnectionState, KeyEvent};
use tokio::sync::mpsc;
use tracing::debug;

/// Connection-level news for the driver's status handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    StateChanged(ConnectionState),
    /// The host echoed a Cells message, confirming a row of `cell_count` cells.
    CellsAcknowledged { cell_count: usize },
    /// The host reported an error in free text.
    HostError(String),
}

/// Everything the background tasks deliver to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(StatusEvent),
    Key(KeyEvent),
}

/// What the receive loop must do with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Completes the pending handshake.
    HandshakeResponse(HandshakeResponse),
    /// Forward to the driver.
    Event(SessionEvent),
    /// Acknowledges keepalive pings up to this token; not forwarded.
    Pong(u64),
    /// The host is probing us; answer with a Pong echoing the token.
    PingRequest(u64),
    /// A type code this protocol version does not know.
    Ignored { type_code: u8 },
    /// A known message the host must never send to a guest.
    Unexpected(MessageType),
}

/// Maps one frame to its handling.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if a known message kind has an
/// invalid payload.
pub fn dispatch(frame: &Frame) -> Result<Dispatched, ProtocolError> {
    let Some(msg) = decode_message(frame)? else {
        return Ok(Dispatched::Ignored {
            type_code: frame.type_code,
        });
    };

    let dispatched = match msg {
        BrailleMessage::HandshakeResponse(resp) => Dispatched::HandshakeResponse(resp),
        BrailleMessage::Cells(cells) => {
            Dispatched::Event(SessionEvent::Status(StatusEvent::CellsAcknowledged {
                cell_count: cells.len(),
            }))
        }
        BrailleMessage::Error(text) => {
            Dispatched::Event(SessionEvent::Status(StatusEvent::HostError(text)))
        }
        BrailleMessage::KeyEvent(key) => Dispatched::Event(SessionEvent::Key(KeyEvent {
            code: key.key_id,
            pressed: key.action == KeyAction::Down,
            timestamp_us: current_timestamp_us(),
        })),
        BrailleMessage::Pong(token) => Dispatched::Pong(token),
        BrailleMessage::Ping(token) => Dispatched::PingRequest(token),
        BrailleMessage::HandshakeRequest(_) => Dispatched::Unexpected(MessageType::HandshakeRequest),
    };
    Ok(dispatched)
}

fn current_timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ── Event pump ────────────────────────────────────────────────────────────────

type KeyHandler = Box<dyn FnMut(&KeyEvent) + Send>;
type StatusHandler = Box<dyn FnMut(&StatusEvent) + Send>;

/// Delivers queued session events to registered driver handlers.
pub struct EventPump {
    rx: mpsc::Receiver<SessionEvent>,
    key_handlers: Vec<KeyHandler>,
    status_handlers: Vec<StatusHandler>,
}

impl EventPump {
    pub fn new(rx: mpsc::Receiver<SessionEvent>) -> Self {
        Self {
            rx,
            key_handlers: Vec::new(),
            status_handlers: Vec::new(),
        }
    }

    /// Registers a handler for key presses and releases from the display.
    pub fn on_key_event(&mut self, handler: impl FnMut(&KeyEvent) + Send + 'static) {
        self.key_handlers.push(Box::new(handler));
    }

    /// Registers a handler for state changes, acknowledgements and host errors.
    pub fn on_status_change(&mut self, handler: impl FnMut(&StatusEvent) + Send + 'static) {
        self.status_handlers.push(Box::new(handler));
    }

    /// Pops one queued event without waiting and without invoking handlers.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next event; `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Invokes the handlers registered for `event`.
    pub fn deliver(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Key(key) => {
                for handler in &mut self.key_handlers {
                    handler(key);
                }
            }
            SessionEvent::Status(status) => {
                for handler in &mut self.status_handlers {
                    handler(status);
                }
            }
        }
    }

    /// Delivers every queued event in arrival order; returns how many there were.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_next() {
            self.deliver(&event);
            delivered += 1;
        }
        if delivered > 0 {
            debug!(delivered, "drained session events");
        }
        delivered
    }
}
