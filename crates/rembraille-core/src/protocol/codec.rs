//! Payload codec: converts [`BrailleMessage`] values to and from frame payloads.
//!
//! The framing itself lives in [`crate::protocol::frame`]; this module only
//! knows how each message kind lays out its payload.  All multi-byte integers
//! are big-endian.

use thiserror::Error;

use crate::protocol::frame::{encode_frame, Frame, FrameError};
use crate::protocol::messages::{
    BrailleMessage, HandshakeRequest, HandshakeResponse, KeyAction, KeyEventMessage, MessageType,
};

/// Errors raised while interpreting frames as protocol messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame header was malformed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The payload could not be parsed (truncated field, UTF-8 error, bad enum value).
    #[error("malformed {message:?} payload: {reason}")]
    MalformedPayload {
        message: MessageType,
        reason: String,
    },

    /// A well-formed message arrived that is not valid in the current connection state.
    #[error("unexpected {message:?} message while {state}")]
    UnexpectedMessage {
        message: MessageType,
        state: String,
    },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`BrailleMessage`] into a complete frame, header included.
///
/// # Errors
///
/// Returns [`ProtocolError::Frame`] if the encoded payload exceeds the frame
/// size limit (e.g. a Cells message longer than 4096 cells).
///
/// # Examples
///
/// ```rust
/// use rembraille_core::protocol::{decode_message, encode_message, FrameAssembler};
/// use rembraille_core::protocol::messages::BrailleMessage;
///
/// let msg = BrailleMessage::Ping(42);
/// let bytes = encode_message(&msg).unwrap();
/// let mut assembler = FrameAssembler::new();
/// assembler.push(&bytes);
/// let frame = assembler.next_frame().unwrap().unwrap();
/// assert_eq!(decode_message(&frame).unwrap(), Some(msg));
/// ```
pub fn encode_message(msg: &BrailleMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    Ok(encode_frame(msg.message_type(), &payload)?)
}

/// Interprets a decoded frame as a typed message.
///
/// Returns `Ok(None)` for type codes this protocol version does not know;
/// callers ignore those frames.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload does not match
/// the layout of its declared type.
pub fn decode_message(frame: &Frame) -> Result<Option<BrailleMessage>, ProtocolError> {
    let Some(message_type) = frame.message_type() else {
        return Ok(None);
    };
    decode_payload(message_type, &frame.payload).map(Some)
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &BrailleMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        BrailleMessage::HandshakeRequest(m) => encode_handshake_request(&mut buf, m),
        BrailleMessage::HandshakeResponse(m) => encode_handshake_response(&mut buf, m),
        BrailleMessage::Cells(cells) => buf.extend_from_slice(cells),
        BrailleMessage::KeyEvent(m) => encode_key_event(&mut buf, m),
        BrailleMessage::Ping(token) | BrailleMessage::Pong(token) => {
            buf.extend_from_slice(&token.to_be_bytes())
        }
        BrailleMessage::Error(text) => buf.extend_from_slice(text.as_bytes()),
    }
    buf
}

fn encode_handshake_request(buf: &mut Vec<u8>, m: &HandshakeRequest) {
    buf.push(m.major);
    buf.push(m.minor);
    buf.extend_from_slice(&m.capabilities.to_be_bytes());
    write_length_prefixed_string(buf, &m.client_name);
}

fn encode_handshake_response(buf: &mut Vec<u8>, m: &HandshakeResponse) {
    buf.push(m.major);
    buf.push(m.minor);
    buf.extend_from_slice(&m.cell_count.to_be_bytes());
    write_length_prefixed_string(buf, &m.server_name);
}

fn encode_key_event(buf: &mut Vec<u8>, m: &KeyEventMessage) {
    buf.extend_from_slice(&m.key_id.to_be_bytes());
    buf.push(m.action as u8);
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(ty: MessageType, p: &[u8]) -> Result<BrailleMessage, ProtocolError> {
    let msg = match ty {
        MessageType::HandshakeRequest => {
            BrailleMessage::HandshakeRequest(decode_handshake_request(p)?)
        }
        MessageType::HandshakeResponse => {
            BrailleMessage::HandshakeResponse(decode_handshake_response(p)?)
        }
        MessageType::Cells => BrailleMessage::Cells(p.to_vec()),
        MessageType::KeyEvent => BrailleMessage::KeyEvent(decode_key_event(p)?),
        MessageType::Ping => BrailleMessage::Ping(read_token(ty, p)?),
        MessageType::Pong => BrailleMessage::Pong(read_token(ty, p)?),
        MessageType::Error => BrailleMessage::Error(
            std::str::from_utf8(p)
                .map_err(|e| malformed(ty, format!("invalid UTF-8: {e}")))?
                .to_string(),
        ),
    };
    Ok(msg)
}

fn decode_handshake_request(p: &[u8]) -> Result<HandshakeRequest, ProtocolError> {
    let ty = MessageType::HandshakeRequest;
    require_len(ty, p, 6)?;
    let capabilities = u32::from_be_bytes([p[2], p[3], p[4], p[5]]);
    let (client_name, _) = read_length_prefixed_string(ty, p, 6)?;
    Ok(HandshakeRequest {
        major: p[0],
        minor: p[1],
        capabilities,
        client_name,
    })
}

fn decode_handshake_response(p: &[u8]) -> Result<HandshakeResponse, ProtocolError> {
    let ty = MessageType::HandshakeResponse;
    require_len(ty, p, 4)?;
    let cell_count = u16::from_be_bytes([p[2], p[3]]);
    let (server_name, _) = read_length_prefixed_string(ty, p, 4)?;
    Ok(HandshakeResponse {
        major: p[0],
        minor: p[1],
        cell_count,
        server_name,
    })
}

fn decode_key_event(p: &[u8]) -> Result<KeyEventMessage, ProtocolError> {
    let ty = MessageType::KeyEvent;
    require_len(ty, p, 3)?;
    let action = KeyAction::try_from(p[2])
        .map_err(|_| malformed(ty, format!("unknown key action 0x{:02X}", p[2])))?;
    Ok(KeyEventMessage {
        key_id: u16::from_be_bytes([p[0], p[1]]),
        action,
    })
}

/// Ping and Pong carry an optional token; an empty payload means token 0.
fn read_token(ty: MessageType, p: &[u8]) -> Result<u64, ProtocolError> {
    match p.len() {
        0 => Ok(0),
        8 => Ok(u64::from_be_bytes([
            p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7],
        ])),
        n => Err(malformed(ty, format!("token must be 0 or 8 bytes, got {n}"))),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn malformed(message: MessageType, reason: String) -> ProtocolError {
    ProtocolError::MalformedPayload { message, reason }
}

fn require_len(ty: MessageType, buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(malformed(
            ty,
            format!("need {needed} bytes, got {}", buf.len()),
        ))
    } else {
        Ok(())
    }
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let mut len = s.len().min(u16::MAX as usize);
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(
    ty: MessageType,
    buf: &[u8],
    offset: usize,
) -> Result<(String, usize), ProtocolError> {
    require_len(ty, buf, offset + 2)?;
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(malformed(
            ty,
            format!("string of length {len} at offset {start} exceeds payload"),
        ));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| malformed(ty, format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
