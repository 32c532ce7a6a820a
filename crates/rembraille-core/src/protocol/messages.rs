//! All RemBraille protocol message types.
//!
//! Every message travels inside a [`Frame`](crate::protocol::frame::Frame): a
//! 6-byte header followed by a payload of at most [`MAX_PAYLOAD_LEN`] bytes.
//! This module defines the closed set of message kinds and their typed
//! payloads; [`crate::protocol::codec`] converts between the two.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Version byte written into every frame header.
pub const FRAME_VERSION: u8 = 0x01;

/// Major protocol version negotiated during the handshake.
///
/// Peers with a different major version can never interoperate.
pub const PROTOCOL_MAJOR: u8 = 1;

/// Minor protocol version; differences here are backward compatible.
pub const PROTOCOL_MINOR: u8 = 0;

/// Size of the frame header in bytes: version (1) + type (1) + length (4).
pub const HEADER_SIZE: usize = 6;

/// Largest payload a single frame may carry.
///
/// Bounds the memory a peer can make us allocate for one frame.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Default TCP port of the host braille server.
pub const DEFAULT_PORT: u16 = 17635;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes understood by this protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    HandshakeRequest = 0x01,
    HandshakeResponse = 0x02,
    Cells = 0x10,
    KeyEvent = 0x20,
    Ping = 0x40,
    Pong = 0x41,
    Error = 0xFF,
}

impl MessageType {
    /// Returns the wire code of this message type.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::HandshakeRequest),
            0x02 => Ok(MessageType::HandshakeResponse),
            0x10 => Ok(MessageType::Cells),
            0x20 => Ok(MessageType::KeyEvent),
            0x40 => Ok(MessageType::Ping),
            0x41 => Ok(MessageType::Pong),
            0xFF => Ok(MessageType::Error),
            _ => Err(()),
        }
    }
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// HANDSHAKE_REQUEST (0x01): sent by the guest right after the TCP connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Major protocol version the guest speaks.
    pub major: u8,
    /// Minor protocol version the guest speaks.
    pub minor: u8,
    /// Bitmask of optional features, see [`capabilities`].
    pub capabilities: u32,
    /// Human-readable guest name shown in the host's log.
    pub client_name: String,
}

impl HandshakeRequest {
    /// Builds a request advertising this crate's protocol version.
    pub fn current(client_name: impl Into<String>, capabilities: u32) -> Self {
        Self {
            major: PROTOCOL_MAJOR,
            minor: PROTOCOL_MINOR,
            capabilities,
            client_name: client_name.into(),
        }
    }
}

/// Capability bitmask flags used in [`HandshakeRequest::capabilities`].
pub mod capabilities {
    /// The guest forwards key events from the display to the screen reader.
    pub const KEY_INPUT: u32 = 1 << 0;
    /// The guest sends periodic pings and expects pongs.
    pub const KEEPALIVE: u32 = 1 << 1;
    /// The guest understands host-side Cells acknowledgements.
    pub const CELLS_ACK: u32 = 1 << 2;
}

/// HANDSHAKE_RESPONSE (0x02): host answer carrying the display geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Major protocol version the host agreed to.
    pub major: u8,
    /// Minor protocol version the host agreed to.
    pub minor: u8,
    /// Number of cells on the physical display.
    pub cell_count: u16,
    /// Human-readable host name.
    pub server_name: String,
}

/// Whether a key went down or came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0x01,
    Up = 0x02,
}

impl TryFrom<u8> for KeyAction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(KeyAction::Down),
            0x02 => Ok(KeyAction::Up),
            _ => Err(()),
        }
    }
}

/// KEY_EVENT (0x20): a key on the physical display was pressed or released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEventMessage {
    /// Display-specific key identifier, see [`crate::keymap`].
    pub key_id: u16,
    pub action: KeyAction,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// A typed RemBraille message.
///
/// The set is closed: adding a variant forces every `match` over it to be
/// revisited.  Frames whose type code is not listed here are still decoded by
/// the frame codec; they simply have no `BrailleMessage` representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrailleMessage {
    HandshakeRequest(HandshakeRequest),
    HandshakeResponse(HandshakeResponse),
    /// Cell bytes, one dot bitmask per cell.
    ///
    /// Guest → host: content to show.  Host → guest: acknowledgement echo.
    Cells(Vec<u8>),
    KeyEvent(KeyEventMessage),
    /// Keepalive probe carrying a token the peer must echo.
    Ping(u64),
    /// Keepalive answer echoing the Ping token.
    Pong(u64),
    /// Free-form error text from the peer.
    Error(String),
}

impl BrailleMessage {
    /// Returns the [`MessageType`] discriminant for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            BrailleMessage::HandshakeRequest(_) => MessageType::HandshakeRequest,
            BrailleMessage::HandshakeResponse(_) => MessageType::HandshakeResponse,
            BrailleMessage::Cells(_) => MessageType::Cells,
            BrailleMessage::KeyEvent(_) => MessageType::KeyEvent,
            BrailleMessage::Ping(_) => MessageType::Ping,
            BrailleMessage::Pong(_) => MessageType::Pong,
            BrailleMessage::Error(_) => MessageType::Error,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
